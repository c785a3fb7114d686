//! 关系同步本地模型定义

use crate::relation::types::{Category, RemoteId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 分页同步断点（对应 sync_cursors 表）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// 流名，唯一键
    #[serde(rename = "streamName")]
    pub stream_name: String,
    /// 下一页的分页位置
    pub position: i64,
    /// 最近一次写入时间（毫秒）
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
}

impl Cursor {
    pub fn new(stream_name: impl Into<String>, position: i64) -> Self {
        Self {
            stream_name: stream_name.into(),
            position,
            updated_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// 分类同步模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// 清空本地集合后从第一页全量拉取
    FullReplace,
    /// 有断点则从断点续拉，否则从头增量合并；不删除本地数据
    #[default]
    ResumeOrFresh,
}

/// 一次分类同步的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub category: Category,
    pub mode: SyncMode,
    /// 若从断点续拉，记录断点位置
    pub resumed_from: Option<i64>,
    pub pages: u64,
    pub ids_seen: u64,
    pub inserted: u64,
    /// 同步结束后本地集合大小
    pub total: i64,
}

/// 跳过某个目标的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyBlocked,
    IsFollower,
    IsFriend,
    NotBlocked,
    NotFound,
    Forbidden,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SkipReason::AlreadyBlocked => "已拉黑",
            SkipReason::IsFollower => "是自己的粉丝",
            SkipReason::IsFriend => "是自己的关注",
            SkipReason::NotBlocked => "未拉黑",
            SkipReason::NotFound => "用户不存在",
            SkipReason::Forbidden => "无权访问",
        };
        f.write_str(s)
    }
}

/// 拉黑 / 解除拉黑传播的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropagationReport {
    pub root: Option<RemoteId>,
    /// 收集到的候选 ID 数（去重后）
    pub collected: usize,
    /// 实际展开过粉丝列表的节点数
    pub expanded: usize,
    /// 按执行顺序记录的远端操作（block 或 unblock）
    pub acted: Vec<RemoteId>,
    pub skipped: Vec<(RemoteId, SkipReason)>,
}

/// 关系同步器配置
#[derive(Debug, Clone)]
pub struct RelationSyncerConfig {
    /// API 基础 URL
    pub api_base_url: String,
    /// Bearer token
    pub token: String,
    /// 数据库 URL（SQLite），如 `sqlite://relsync.db?mode=rwc`
    pub db_path: String,
    /// 每页 ID 数
    pub page_size: u32,
    /// 两次分页请求之间的固定间隔（毫秒）
    pub page_delay_ms: u64,
    /// 两次 block/unblock 之间的固定间隔（毫秒）
    pub action_delay_ms: u64,
    /// 限流等待时的轮询步长（毫秒）
    pub rate_poll_interval_ms: u64,
    /// 限流重置时间之后额外等待的余量（毫秒）
    pub rate_reset_margin_ms: u64,
}

impl RelationSyncerConfig {
    pub fn new(api_base_url: String, token: String, db_path: String) -> Self {
        Self {
            api_base_url,
            token,
            db_path,
            page_size: 5000,
            page_delay_ms: 100,
            action_delay_ms: 100,
            rate_poll_interval_ms: 1000,
            rate_reset_margin_ms: 1000,
        }
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn action_delay(&self) -> Duration {
        Duration::from_millis(self.action_delay_ms)
    }
}
