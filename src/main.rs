//! Venue Notify CLI
//!
//! 基于 stdin 推送帧运行通知引擎，并管理本地通知历史

use anyhow::{bail, Result};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use venue_notify::config::days_to_duration;
use venue_notify::notification::{LocalFilePresenter, LogPresenter};
use venue_notify::{
    classify, AlertDispatcher, Classified, ConnectionState, FileSlot, LineChannel, LoopbackChannel,
    MemorySlot, Notification, NotificationCenter, NotificationStore, NotifyConfig, StoreOptions,
};

#[derive(Parser)]
#[command(name = "vnotify")]
#[command(about = "Venue Notify - 实时预订通知与本地历史")]
#[command(version)]
struct Cli {
    /// 配置文件 (默认: <config_dir>/venue-notify/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// 指定历史文件
    #[arg(long, global = true)]
    storage: Option<PathBuf>,
    /// 只记录提醒日志，不实际展示
    #[arg(long, global = true)]
    dry_run: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 从 stdin 逐行读取推送帧，直到 EOF 或 Ctrl+C
    Listen {
        /// 要订阅的频道
        #[arg(long, short)]
        channel: Option<String>,
    },
    /// 用内存回环通道运行引擎
    Demo {
        /// 触发的测试通知数量
        #[arg(long, short, default_value = "3")]
        count: usize,
    },
    /// 列出已存储的通知
    List {
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
        /// 只显示未读通知
        #[arg(long)]
        unread: bool,
    },
    /// 标记通知（或全部）为已读
    Read {
        id: Option<String>,
        #[arg(long)]
        all: bool,
    },
    /// 删除一条通知
    Remove { id: String },
    /// 删除所有通知
    Clear,
    /// 删除超过保留期的通知
    Sweep {
        /// 指定保留天数
        #[arg(long)]
        days: Option<u64>,
    },
    /// 输出统计
    Summary,
    /// 分类一个原始推送帧（不存储）
    Classify { raw: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity, e.g. RUST_LOG=debug vnotify listen
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("venue_notify=info,vnotify=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => NotifyConfig::load_from(path)?,
        None => NotifyConfig::load()?,
    };
    if let Some(storage) = cli.storage {
        config = config.storage_path(storage);
    }
    if cli.dry_run {
        config = config.dry_run(true);
    }

    match cli.command {
        Commands::Listen { channel } => {
            let name = channel.unwrap_or_else(|| config.default_channel.clone());
            listen(&config, &name).await?;
        }
        Commands::Demo { count } => {
            demo(&config, count).await?;
        }
        Commands::List { json, unread } => {
            let store = open_store(&config).await?;
            let entries: Vec<Notification> = store
                .snapshot()
                .iter()
                .filter(|n| !unread || !n.is_read)
                .cloned()
                .collect();
            store.shutdown().await;

            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("No notifications");
            } else {
                println!("{} notifications:\n", entries.len());
                for n in &entries {
                    print_notification(n);
                }
            }
        }
        Commands::Read { id, all } => {
            let store = open_store(&config).await?;
            let result = match (id, all) {
                (_, true) => {
                    let changed = store.mark_all_read().await?;
                    println!("Marked {} notifications as read", changed);
                    Ok(())
                }
                (Some(id), false) => {
                    if store.mark_read(&id).await? {
                        println!("Marked {} as read", id);
                    } else {
                        println!("{} not found or already read", id);
                    }
                    Ok(())
                }
                (None, false) => Err(anyhow::anyhow!("pass a notification id or --all")),
            };
            store.shutdown().await;
            result?;
        }
        Commands::Remove { id } => {
            let store = open_store(&config).await?;
            let removed = store.remove(&id).await?;
            store.shutdown().await;
            if !removed {
                bail!("notification {} not found", id);
            }
            println!("Removed {}", id);
        }
        Commands::Clear => {
            let store = open_store(&config).await?;
            let removed = store.clear_all().await?;
            store.shutdown().await;
            println!("Cleared {} notifications", removed);
        }
        Commands::Sweep { days } => {
            let store = open_store(&config).await?;
            let removed = match days {
                Some(days) => store.sweep_older_than(days_to_duration(days)).await?,
                None => store.sweep_expired().await?,
            };
            store.shutdown().await;
            println!("Swept {} expired notifications", removed);
        }
        Commands::Summary => {
            let store = open_store(&config).await?;
            let stats = store.projections().current_stats();
            store.shutdown().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Classify { raw } => match classify(&raw) {
            Classified::Event(n) => println!("{}", serde_json::to_string_pretty(&n)?),
            Classified::Ignored(reason) => println!("ignored: {:?}", reason),
            Classified::Unknown(tag) => println!("unknown type: {}", tag),
        },
    }

    Ok(())
}

fn build_alerts(config: &NotifyConfig) -> Arc<AlertDispatcher> {
    let mut alerts = AlertDispatcher::new().with_dry_run(config.dry_run);
    alerts.register(Arc::new(LogPresenter::new()));
    if let Some(path) = &config.alert_log_path {
        alerts.register(Arc::new(LocalFilePresenter::new(path.clone())));
    }
    Arc::new(alerts)
}

async fn open_store(config: &NotifyConfig) -> Result<NotificationStore> {
    let slot = Arc::new(FileSlot::new(config.storage_path.clone()));
    let store = NotificationStore::spawn(slot, build_alerts(config), StoreOptions::from(config));
    store.load().await?;
    Ok(store)
}

async fn listen(config: &NotifyConfig, channel_name: &str) -> Result<()> {
    let slot = Arc::new(FileSlot::new(config.storage_path.clone()));
    let channel = Arc::new(LineChannel::new(config.message_buffer));
    let center = NotificationCenter::start(
        slot,
        build_alerts(config),
        channel.clone(),
        StoreOptions::from(config),
    )
    .await?;
    center.subscribe_to_channel(channel_name)?;

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    tokio::select! {
        result = channel.run(stdin) => {
            if let Err(e) = result {
                warn!(error = %e, "Input stream failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
        }
    }

    eprintln!("{}", center.summary());
    center.shutdown().await;
    Ok(())
}

async fn demo(config: &NotifyConfig, count: usize) -> Result<()> {
    let channel = Arc::new(LoopbackChannel::new(config.message_buffer));
    let center = NotificationCenter::start(
        Arc::new(MemorySlot::new()),
        build_alerts(&config.clone().alert_log_path(None)),
        channel.clone(),
        StoreOptions::from(config),
    )
    .await?;

    channel.set_state(ConnectionState::Connected);
    let mut connection = center.connection_state();
    connection.wait_for(|s| *s == ConnectionState::Connected).await?;
    center.subscribe_to_channel(&config.default_channel)?;

    for i in 0..count {
        center.send_test_message(&format!("demo-{}", i + 1));
    }

    let mut unread = center.unread_count();
    let arrived = tokio::time::timeout(Duration::from_secs(5), unread.wait_for(|n| *n >= count))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);
    if !arrived {
        warn!("Timed out waiting for loopback notifications");
    }

    println!("{}\n", center.summary());
    for n in center.notifications().iter() {
        print_notification(n);
    }
    center.shutdown().await;
    Ok(())
}

fn print_notification(n: &Notification) {
    let when = DateTime::from_timestamp_millis(n.created_at_millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| n.created_at_millis.to_string());
    let marker = if n.is_read { " " } else { "●" };
    println!("{} [{}] {} - {}", marker, when, n.title, n.message);
    println!("    id: {}", n.id);
}
