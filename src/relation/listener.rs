//! 同步进度监听器回调接口
//!
//! 纯观察用途，核心逻辑不依赖回调结果。

use crate::relation::models::SkipReason;
use crate::relation::types::{Category, RemoteId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// 同步 / 传播过程的进度回调
#[async_trait]
pub trait SyncListener: Send + Sync {
    /// 分类同步开始，`resumed_from` 为续拉的断点位置
    async fn on_sync_start(&self, category: Category, resumed_from: Option<i64>);

    /// 一页数据已写入本地，`total_inserted` 为本次同步累计新增数
    async fn on_page(&self, category: Category, page: u64, inserted: u64, total_inserted: u64);

    /// 分类同步完成，`total` 为本地集合当前大小
    async fn on_sync_finish(&self, category: Category, total: i64);

    /// 配额用尽，开始等待
    async fn on_rate_limited(&self, endpoint: String, reset_at: DateTime<Utc>);

    async fn on_blocked(&self, id: RemoteId);

    async fn on_unblocked(&self, id: RemoteId);

    async fn on_skipped(&self, id: RemoteId, reason: SkipReason);
}

/// 默认空实现（无操作）
pub struct EmptySyncListener;

#[async_trait]
impl SyncListener for EmptySyncListener {
    async fn on_sync_start(&self, _category: Category, _resumed_from: Option<i64>) {}
    async fn on_page(&self, _category: Category, _page: u64, _inserted: u64, _total: u64) {}
    async fn on_sync_finish(&self, _category: Category, _total: i64) {}
    async fn on_rate_limited(&self, _endpoint: String, _reset_at: DateTime<Utc>) {}
    async fn on_blocked(&self, _id: RemoteId) {}
    async fn on_unblocked(&self, _id: RemoteId) {}
    async fn on_skipped(&self, _id: RemoteId, _reason: SkipReason) {}
}
