use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use clap::{Args, Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use agent_scheduler_core::{config::AppConfig, NewTask, Recurrence};

mod app;
mod shutdown;

use app::{AppMode, Application};
use shutdown::{wait_for_shutdown_signal, ShutdownManager};

#[derive(Parser, Debug)]
#[command(name = "agent-scheduler", version, about = "延迟与周期任务调度系统")]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long, global = true, value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: Option<String>,

    /// 日志格式，覆盖配置文件
    #[arg(long, global = true, value_parser = ["json", "pretty"])]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 运行调度器和/或Worker
    Run {
        #[arg(short, long, value_enum, default_value = "all")]
        mode: AppMode,
    },
    /// 创建任务并输出任务ID
    Schedule(ScheduleArgs),
    /// 取消任务
    Cancel {
        /// 任务ID
        id: String,
    },
    /// 查看存储中的任务
    Show {
        /// 任务ID
        id: String,
    },
}

#[derive(Args, Debug)]
struct ScheduleArgs {
    /// 执行方使用的代理标识
    #[arg(long)]
    agent: String,
    /// 任务所属用户
    #[arg(long)]
    owner: String,
    /// 任务查询内容
    #[arg(long)]
    query: String,
    #[arg(long, default_value = "")]
    description: String,
    /// 计划时间（RFC3339），默认立即
    #[arg(long, value_parser = parse_rfc3339, conflicts_with = "in_ms")]
    at: Option<DateTime<Utc>>,
    /// 从现在起延迟的毫秒数
    #[arg(long)]
    in_ms: Option<i64>,
    /// 重复间隔（毫秒）
    #[arg(long)]
    every_ms: Option<i64>,
    /// 重复结束时间（RFC3339）
    #[arg(long, value_parser = parse_rfc3339, requires = "every_ms")]
    until: Option<DateTime<Utc>>,
}

impl ScheduleArgs {
    fn into_new_task(self) -> Result<NewTask> {
        let scheduled_time = match (self.at, self.in_ms) {
            (Some(at), _) => at,
            (None, Some(ms)) => TimeDelta::try_milliseconds(ms)
                .and_then(|delay| Utc::now().checked_add_signed(delay))
                .with_context(|| format!("延迟 {ms}ms 超出可表示的时间范围"))?,
            (None, None) => Utc::now(),
        };

        let recurrence = match self.every_ms {
            Some(ms) => {
                let interval = TimeDelta::try_milliseconds(ms)
                    .with_context(|| format!("重复间隔 {ms}ms 超出可表示范围"))?;
                Recurrence::recurring(interval, self.until)?
            }
            None => Recurrence::NonRecurring,
        };

        Ok(NewTask {
            agent_ref: self.agent,
            owner_id: self.owner,
            query: self.query,
            description: self.description,
            scheduled_time,
            recurrence,
        })
    }
}

fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("无效的RFC3339时间 {value}: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("加载配置失败")?;

    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.observability.log_level);
    let log_format = cli
        .log_format
        .as_deref()
        .unwrap_or(&config.observability.log_format);
    init_logging(log_level, log_format)?;

    match cli.command {
        Commands::Run { mode } => run(config, mode).await,
        Commands::Schedule(args) => {
            let scheduler = app::producer_scheduler(&config).await?;
            let id = scheduler.schedule_task(args.into_new_task()?).await?;
            println!("{id}");
            Ok(())
        }
        Commands::Cancel { id } => {
            let scheduler = app::producer_scheduler(&config).await?;
            println!("{}", scheduler.cancel_task(&id).await?);
            Ok(())
        }
        Commands::Show { id } => {
            let scheduler = app::producer_scheduler(&config).await?;
            match scheduler.get_task(&id).await? {
                Some(task) => println!("{}", serde_json::to_string_pretty(&task)?),
                None => println!("任务不存在: {id}"),
            }
            Ok(())
        }
    }
}

async fn run(config: AppConfig, mode: AppMode) -> Result<()> {
    info!("启动任务调度系统，模式: {:?}", mode);

    if let Some(address) = &config.observability.metrics_address {
        let address: SocketAddr = address
            .parse()
            .with_context(|| format!("指标监听地址无效: {address}"))?;
        PrometheusBuilder::new()
            .with_http_listener(address)
            .install()
            .context("启动Prometheus指标导出失败")?;
        info!("Prometheus指标监听: {}", address);
    }

    let app = Application::new(config, mode).await?;
    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let shutdown = shutdown_manager.subscribe();
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown).await {
                error!("应用运行失败: {e:#}");
            }
        })
    };

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown();

    match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("任务调度系统已退出");
    Ok(())
}

/// 初始化日志系统，`RUST_LOG` 优先于配置的级别
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("初始化JSON日志格式失败")?,
        "pretty" => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .context("初始化Pretty日志格式失败")?,
        _ => return Err(anyhow::anyhow!("不支持的日志格式: {log_format}")),
    }

    Ok(())
}
