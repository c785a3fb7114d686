//! 关系同步 CLI
//!
//! 非交互式 CLI：每次执行一个子命令（同步、拉黑传播、统计等），
//! Ctrl-C 取消正在执行的操作，已写入的数据和断点保留。

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use relsync_core_rust::relation::listener::SyncListener;
use relsync_core_rust::relation::settings::{load_config, load_username_list, DEFAULT_SETTINGS_PATH};
use relsync_core_rust::relation::{
    is_cancelled, Category, RelationSyncer, RemoteId, SkipReason, SyncMode,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 关系同步 CLI
#[derive(Parser, Debug)]
#[command(name = "relsync-cli")]
#[command(about = "关系同步 CLI - 同步拉黑 / 粉丝 / 关注列表并执行拉黑传播", long_about = None)]
struct Args {
    /// 配置文件路径
    #[arg(short, long, default_value = DEFAULT_SETTINGS_PATH)]
    settings: String,

    /// 日志级别（默认: info,relsync_core_rust=debug）
    #[arg(long, default_value = "info,relsync_core_rust=debug")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 同步拉黑列表
    SyncBlocked {
        /// 清空本地集合后全量拉取
        #[arg(long)]
        full: bool,
    },
    /// 同步粉丝列表
    SyncFollowers {
        #[arg(long)]
        full: bool,
    },
    /// 同步关注列表
    SyncFriends {
        #[arg(long)]
        full: bool,
    },
    /// 拉黑目标账号及其粉丝
    Propagate {
        username: String,
        /// 粉丝展开深度，0 表示只处理直接粉丝
        #[arg(short, long, default_value = "0")]
        depth: u32,
    },
    /// 按文件批量拉黑传播（每行一个用户名）
    PropagateFile {
        path: String,
        #[arg(short, long, default_value = "0")]
        depth: u32,
    },
    /// 解除目标账号及其直接粉丝的拉黑
    Unpropagate { username: String },
    /// 本地各集合的数量
    Counts,
    /// 根据 ID 查询用户名
    Username { id: i64 },
    /// 未完成同步的断点
    Cursors,
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("relsync.log")?;

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    // 文件不需要颜色
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("[CLI] 📝 日志已同时输出到控制台和文件: relsync.log");
    Ok(())
}

/// 把进度回调输出到日志
struct CliListener;

#[async_trait]
impl SyncListener for CliListener {
    async fn on_sync_start(&self, category: Category, resumed_from: Option<i64>) {
        match resumed_from {
            Some(pos) => info!("[CLI] 🔄 {} 从断点 {} 续拉", category, pos),
            None => info!("[CLI] 🔄 {} 开始同步", category),
        }
    }

    async fn on_page(&self, category: Category, page: u64, inserted: u64, total_inserted: u64) {
        info!(
            "[CLI] 📄 {} 第 {} 页，新增 {}，累计新增 {}",
            category, page, inserted, total_inserted
        );
    }

    async fn on_sync_finish(&self, category: Category, total: i64) {
        info!("[CLI] ✅ {} 同步完成，本地共 {} 个", category, total);
    }

    async fn on_rate_limited(&self, endpoint: String, reset_at: DateTime<Utc>) {
        warn!("[CLI] ⏳ {} 配额已用尽，等待至 {}", endpoint, reset_at);
    }

    async fn on_blocked(&self, id: RemoteId) {
        info!("[CLI] 🚫 已拉黑: {}", id);
    }

    async fn on_unblocked(&self, id: RemoteId) {
        info!("[CLI] ↩️ 已解除拉黑: {}", id);
    }

    async fn on_skipped(&self, id: RemoteId, reason: SkipReason) {
        info!("[CLI] ⏭️ 跳过 {}: {}", id, reason);
    }
}

fn sync_mode(full: bool) -> SyncMode {
    if full {
        SyncMode::FullReplace
    } else {
        SyncMode::ResumeOrFresh
    }
}

async fn run(syncer: &RelationSyncer, command: Command) -> Result<()> {
    match command {
        Command::SyncBlocked { full } => {
            syncer.sync_blocked(sync_mode(full)).await?;
        }
        Command::SyncFollowers { full } => {
            syncer.sync_followers(sync_mode(full)).await?;
        }
        Command::SyncFriends { full } => {
            syncer.sync_friends(sync_mode(full)).await?;
        }
        Command::Propagate { username, depth } => {
            let report = syncer.propagate(&username, depth).await?;
            info!(
                "[CLI] {}：收集 {} 个，拉黑 {} 个，跳过 {} 个",
                username,
                report.collected,
                report.acted.len(),
                report.skipped.len()
            );
        }
        Command::PropagateFile { path, depth } => {
            let usernames = load_username_list(&path)?;
            info!("[CLI] 从 {} 读取到 {} 个目标", path, usernames.len());
            let results = syncer.propagate_all(&usernames, depth).await?;
            for (username, report) in results {
                match report {
                    Some(r) => info!(
                        "[CLI] {}：拉黑 {} 个，跳过 {} 个",
                        username,
                        r.acted.len(),
                        r.skipped.len()
                    ),
                    None => warn!("[CLI] {}：用户不存在，已跳过", username),
                }
            }
        }
        Command::Unpropagate { username } => {
            let report = syncer.unpropagate(&username).await?;
            info!(
                "[CLI] {}：解除拉黑 {} 个，跳过 {} 个",
                username,
                report.acted.len(),
                report.skipped.len()
            );
        }
        Command::Counts => {
            for (category, count) in syncer.counts().await? {
                println!("{:<10} {}", category, count);
            }
        }
        Command::Username { id } => {
            println!("{}", syncer.resolve_username(RemoteId(id)).await?);
        }
        Command::Cursors => {
            let cursors = syncer.list_cursors().await?;
            if cursors.is_empty() {
                println!("没有未完成的同步");
            }
            for c in cursors {
                let at = DateTime::<Utc>::from_timestamp_millis(c.updated_at)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default();
                println!("{:<14} {:>20} {}", c.stream_name, c.position, at);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level)?;

    let config = load_config(&args.settings)?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("[CLI] 收到 Ctrl-C，正在取消当前操作...");
            trigger.cancel();
        }
    });

    let syncer = RelationSyncer::with_listener(config, Arc::new(CliListener), cancel).await?;

    match run(&syncer, args.command).await {
        Ok(()) => Ok(()),
        Err(e) if is_cancelled(&e) => {
            warn!("[CLI] 操作已取消，已完成的部分已保存");
            std::process::exit(130);
        }
        Err(e) => {
            error!("[CLI] ❌ 执行失败: {:?}", e);
            Err(e)
        }
    }
}
