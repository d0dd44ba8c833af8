//! # Channel Relay 主程序
//!
//! 加载配置、连接数据库并启动路由核心的后台任务，收到 Ctrl-C 后排空持久化队列退出。

use channel_relay::{
    ChannelRouter, lerror, linfo,
    config::{self, AppConfig},
    database,
    logging::{self, LogComponent, LogStage},
    notify::{NotificationDispatcher, build_notifier},
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "channel-relay", version, about = "AI 网关渠道路由核心")]
struct Args {
    /// 配置文件路径，未指定时按 RUST_ENV 加载 config/config.{env}.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 日志级别，RUST_LOG 存在时以其为准
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_logging(args.log_level.as_deref());

    let config = match &args.config {
        Some(path) => config::load_config_from(path),
        None => config::load_config(),
    }
    .map_err(|e| anyhow::anyhow!("配置加载失败: {e}"))?;

    if let Err(e) = run(config).await {
        lerror!(
            "system",
            LogStage::Startup,
            LogComponent::Main,
            "service_failed",
            "服务异常退出",
            error = %e
        );
        return Err(e);
    }

    linfo!(
        "system",
        LogStage::Shutdown,
        LogComponent::Main,
        "service_shutdown",
        "服务正常关闭"
    );
    Ok(())
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::Main,
        "service_starting",
        "服务启动"
    );

    let db = database::init_database(&config.database)
        .await
        .map_err(|e| anyhow::anyhow!("数据库连接失败: {e}"))?;
    database::run_migrations(&db)
        .await
        .map_err(|e| anyhow::anyhow!("数据库迁移失败: {e}"))?;

    let (router, streams) = ChannelRouter::from_config(&config, Arc::new(db)).await?;
    let cached = router.refresh_cache().await?;
    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::Main,
        "cache_primed",
        "渠道缓存已预热",
        channels = cached
    );

    let sync_task =
        router.spawn_cache_sync(Duration::from_secs(config.routing.sync_frequency_secs));
    let notifier = build_notifier(&config.notification)?;
    let listeners = NotificationDispatcher::new(notifier).spawn(streams);

    tokio::signal::ctrl_c().await?;
    linfo!(
        "system",
        LogStage::Shutdown,
        LogComponent::Main,
        "shutdown_signal",
        "收到退出信号，开始关闭"
    );

    sync_task.abort();
    router.shutdown().await;
    // 发送端随路由器释放，监听任务投递完剩余通知后退出
    drop(router);
    for listener in listeners {
        if tokio::time::timeout(Duration::from_secs(5), listener).await.is_err() {
            lerror!(
                "system",
                LogStage::Shutdown,
                LogComponent::Notifier,
                "notification_flush_timeout",
                "等待通知投递超时"
            );
        }
    }
    Ok(())
}
