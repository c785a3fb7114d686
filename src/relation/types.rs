//! 关系同步的基础类型与 API DTO

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;

/// 第一页的分页位置
pub const START_POSITION: i64 = -1;

/// 分页终止哨兵：`next_cursor == 0` 表示没有更多页
pub const TERMINAL_POSITION: i64 = 0;

/// 远端账号 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(pub i64);

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 本地镜像的三类关系集合，彼此独立，不强制互斥
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Blocked,
    Follower,
    Friend,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Blocked, Category::Follower, Category::Friend];

    /// 对应的 SQLite 表名
    pub fn table_name(self) -> &'static str {
        match self {
            Category::Blocked => "blocked_users",
            Category::Follower => "followers",
            Category::Friend => "friends",
        }
    }

    /// 分页同步使用的流名（断点表主键）
    pub fn stream_name(self) -> &'static str {
        match self {
            Category::Blocked => "blocked_ids",
            Category::Follower => "follower_ids",
            Category::Friend => "friend_ids",
        }
    }

    pub fn endpoint_group(self) -> EndpointGroup {
        match self {
            Category::Blocked => EndpointGroup::Blocks,
            Category::Follower => EndpointGroup::Followers,
            Category::Friend => EndpointGroup::Friends,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Blocked => "blocked",
            Category::Follower => "follower",
            Category::Friend => "friend",
        };
        f.write_str(name)
    }
}

/// 限流配额分组（对应 rate_limit_status 中的 resource / endpoint）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointGroup {
    Blocks,
    Followers,
    Friends,
}

impl EndpointGroup {
    pub fn resource(self) -> &'static str {
        match self {
            EndpointGroup::Blocks => "blocks",
            EndpointGroup::Followers => "followers",
            EndpointGroup::Friends => "friends",
        }
    }

    pub fn endpoint(self) -> &'static str {
        match self {
            EndpointGroup::Blocks => "/blocks/ids",
            EndpointGroup::Followers => "/followers/ids",
            EndpointGroup::Friends => "/friends/ids",
        }
    }
}

impl fmt::Display for EndpointGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.endpoint())
    }
}

/// 限流窗口：剩余次数 + 重置时间，不落库
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitWindow {
    pub remaining: u32,
    pub limit: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitWindow {
    /// 由 epoch 秒构造（响应头和 rate_limit_status 都使用秒级时间戳）
    pub fn from_epoch(remaining: u32, limit: u32, reset_epoch_secs: i64) -> Self {
        let reset_at = Utc
            .timestamp_opt(reset_epoch_secs, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self {
            remaining,
            limit,
            reset_at,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }
}

/// 一页 ID 拉取结果
#[derive(Debug, Clone, Default)]
pub struct IdPage {
    pub ids: Vec<RemoteId>,
    pub next_cursor: i64,
    pub rate_window: Option<RateLimitWindow>,
}

impl IdPage {
    pub fn is_last(&self) -> bool {
        self.next_cursor == TERMINAL_POSITION
    }
}

/// 远端用户信息（只保留同步需要的字段）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: RemoteId,
    pub screen_name: String,
    #[serde(default)]
    pub name: String,
}

/// 按用户名或 ID 引用一个远端用户
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserRef {
    ScreenName(String),
    Id(RemoteId),
}

/// 反序列化数组字段，处理 null 值
pub(crate) fn deserialize_vec_or_null<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let opt = Option::<Vec<T>>::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}

/// `*/ids.json` 分页响应
#[derive(Debug, Clone, Deserialize)]
pub struct IdsResp {
    #[serde(deserialize_with = "deserialize_vec_or_null")]
    pub ids: Vec<i64>,
    #[serde(default)]
    pub next_cursor: i64,
}

/// `application/rate_limit_status.json` 中的单个端点配额
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimitEntry {
    pub limit: u32,
    pub remaining: u32,
    pub reset: i64,
}

/// `application/rate_limit_status.json` 响应
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitStatusResp {
    #[serde(default)]
    pub resources: HashMap<String, HashMap<String, RateLimitEntry>>,
}

impl RateLimitStatusResp {
    /// 取出某个端点分组的配额窗口
    pub fn window_for(&self, group: EndpointGroup) -> Option<RateLimitWindow> {
        self.resources
            .get(group.resource())
            .and_then(|endpoints| endpoints.get(group.endpoint()))
            .map(|e| RateLimitWindow::from_epoch(e.remaining, e.limit, e.reset))
    }
}
