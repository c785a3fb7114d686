//! 单测用的远端客户端替身与日志初始化

use crate::relation::api::RemoteGraphClient;
use crate::relation::error::RelationError;
use crate::relation::types::{
    EndpointGroup, IdPage, RateLimitWindow, RemoteId, UserProfile, UserRef, START_POSITION,
    TERMINAL_POSITION,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, Once};
use tokio::time::Instant;

static INIT_LOGGER: Once = Once::new();

pub fn init_test_logger() {
    INIT_LOGGER.call_once(|| {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::EnvFilter;

        let filter_layer = EnvFilter::new("info,relsync_core_rust=debug,sqlx=warn");

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .with_test_writer();

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    });
}

/// 游标编码：第 0 页用 START_POSITION，第 n 页用 CURSOR_BASE + n
const CURSOR_BASE: i64 = 1000;

fn page_index(cursor: i64) -> usize {
    if cursor == START_POSITION {
        0
    } else {
        (cursor - CURSOR_BASE) as usize
    }
}

#[derive(Default)]
struct FakeState {
    me: Option<UserProfile>,
    by_name: HashMap<String, RemoteId>,
    names: HashMap<RemoteId, String>,
    missing: HashSet<RemoteId>,
    protected: HashSet<RemoteId>,
    remote_blocked: Vec<RemoteId>,
    followers: HashMap<RemoteId, Vec<RemoteId>>,
    friends: HashMap<RemoteId, Vec<RemoteId>>,
    quota: Option<RateLimitWindow>,
    fail_rate_limit: bool,
    fail_blocked_page: Option<usize>,
    fail_block: HashMap<RemoteId, fn(RemoteId) -> RelationError>,
    fail_unblock: HashMap<RemoteId, fn(RemoteId) -> RelationError>,
    /// 依次附在后续分页响应上的限流窗口，用完后回到默认窗口
    page_windows: VecDeque<RateLimitWindow>,

    block_calls: Vec<RemoteId>,
    unblock_calls: Vec<RemoteId>,
    rate_limit_calls: usize,
    fetched_pages: Vec<(EndpointGroup, i64)>,
    fetch_times: Vec<Instant>,
    follower_fetches: Vec<RemoteId>,
    resolve_calls: Vec<UserRef>,
}

/// 按脚本返回数据的远端客户端
pub struct FakeGraphClient {
    page_size: usize,
    state: Mutex<FakeState>,
}

impl FakeGraphClient {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            state: Mutex::new(FakeState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn with_me(self, id: i64, screen_name: &str) -> Self {
        let profile = profile(RemoteId(id), screen_name);
        {
            let mut s = self.state();
            s.by_name.insert(screen_name.to_string(), RemoteId(id));
            s.names.insert(RemoteId(id), screen_name.to_string());
            s.me = Some(profile);
        }
        self
    }

    pub fn with_user(self, id: i64, screen_name: &str) -> Self {
        {
            let mut s = self.state();
            s.by_name.insert(screen_name.to_string(), RemoteId(id));
            s.names.insert(RemoteId(id), screen_name.to_string());
        }
        self
    }

    pub fn with_followers(self, id: i64, followers: &[i64]) -> Self {
        self.state()
            .followers
            .insert(RemoteId(id), followers.iter().copied().map(RemoteId).collect());
        self
    }

    pub fn with_friends(self, id: i64, friends: &[i64]) -> Self {
        self.state()
            .friends
            .insert(RemoteId(id), friends.iter().copied().map(RemoteId).collect());
        self
    }

    pub fn with_remote_blocked(self, ids: &[i64]) -> Self {
        self.state().remote_blocked = ids.iter().copied().map(RemoteId).collect();
        self
    }

    /// 解析该 ID 时返回 NotFound
    pub fn with_missing(self, id: i64) -> Self {
        self.state().missing.insert(RemoteId(id));
        self
    }

    /// 拉取该用户粉丝时返回 Forbidden
    pub fn with_protected(self, id: i64) -> Self {
        self.state().protected.insert(RemoteId(id));
        self
    }

    pub fn set_quota(&self, window: RateLimitWindow) {
        self.state().quota = Some(window);
    }

    pub fn fail_rate_limit(&self, fail: bool) {
        self.state().fail_rate_limit = fail;
    }

    /// 拉黑列表拉到第 `index` 页时返回网络错误
    pub fn fail_blocked_page(&self, index: Option<usize>) {
        self.state().fail_blocked_page = index;
    }

    pub fn fail_block(&self, id: i64, make: fn(RemoteId) -> RelationError) {
        self.state().fail_block.insert(RemoteId(id), make);
    }

    pub fn fail_unblock(&self, id: i64, make: fn(RemoteId) -> RelationError) {
        self.state().fail_unblock.insert(RemoteId(id), make);
    }

    /// 后续分页响应依次携带这些窗口
    pub fn script_page_windows(&self, windows: &[RateLimitWindow]) {
        self.state().page_windows.extend(windows.iter().copied());
    }

    pub fn block_calls(&self) -> Vec<RemoteId> {
        self.state().block_calls.clone()
    }

    pub fn unblock_calls(&self) -> Vec<RemoteId> {
        self.state().unblock_calls.clone()
    }

    pub fn rate_limit_calls(&self) -> usize {
        self.state().rate_limit_calls
    }

    pub fn fetched_pages(&self) -> Vec<(EndpointGroup, i64)> {
        self.state().fetched_pages.clone()
    }

    /// 每次分页请求发出时的 tokio 时钟
    pub fn fetch_times(&self) -> Vec<Instant> {
        self.state().fetch_times.clone()
    }

    pub fn follower_fetches(&self) -> Vec<RemoteId> {
        self.state().follower_fetches.clone()
    }

    pub fn resolve_calls(&self) -> usize {
        self.state().resolve_calls.len()
    }

    /// 记录一次分页请求，返回本页要携带的窗口
    fn record_fetch(s: &mut FakeState, group: EndpointGroup, cursor: i64) -> RateLimitWindow {
        s.fetched_pages.push((group, cursor));
        s.fetch_times.push(Instant::now());
        s.page_windows.pop_front().unwrap_or(RateLimitWindow {
            remaining: 100,
            limit: 100,
            reset_at: Utc::now() + chrono::Duration::minutes(15),
        })
    }

    fn page_of(&self, all: &[RemoteId], cursor: i64, window: RateLimitWindow) -> IdPage {
        let index = page_index(cursor);
        let start = (index * self.page_size).min(all.len());
        let end = (start + self.page_size).min(all.len());
        let next_cursor = if end >= all.len() {
            TERMINAL_POSITION
        } else {
            CURSOR_BASE + index as i64 + 1
        };
        IdPage {
            ids: all[start..end].to_vec(),
            next_cursor,
            rate_window: Some(window),
        }
    }
}

fn profile(id: RemoteId, screen_name: &str) -> UserProfile {
    UserProfile {
        id,
        screen_name: screen_name.to_string(),
        name: screen_name.to_uppercase(),
    }
}

#[async_trait]
impl RemoteGraphClient for FakeGraphClient {
    async fn authenticated_user(&self) -> Result<UserProfile, RelationError> {
        self.state()
            .me
            .clone()
            .ok_or_else(|| RelationError::Unauthorized("未登录".to_string()))
    }

    async fn resolve_user(&self, user: &UserRef) -> Result<UserProfile, RelationError> {
        let mut s = self.state();
        s.resolve_calls.push(user.clone());
        let id = match user {
            UserRef::ScreenName(name) => *s
                .by_name
                .get(name)
                .ok_or_else(|| RelationError::NotFound(name.clone()))?,
            UserRef::Id(id) => *id,
        };
        if s.missing.contains(&id) {
            return Err(RelationError::NotFound(id.to_string()));
        }
        let name = s
            .names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("user{}", id));
        Ok(profile(id, &name))
    }

    async fn fetch_blocked_ids_page(&self, cursor: i64) -> Result<IdPage, RelationError> {
        let (all, window) = {
            let mut s = self.state();
            let window = Self::record_fetch(&mut s, EndpointGroup::Blocks, cursor);
            if s.fail_blocked_page == Some(page_index(cursor)) {
                return Err(RelationError::Transport("connection reset".to_string()));
            }
            (s.remote_blocked.clone(), window)
        };
        Ok(self.page_of(&all, cursor, window))
    }

    async fn fetch_follower_ids_page(
        &self,
        user_id: RemoteId,
        cursor: i64,
    ) -> Result<IdPage, RelationError> {
        let (all, window) = {
            let mut s = self.state();
            let window = Self::record_fetch(&mut s, EndpointGroup::Followers, cursor);
            s.follower_fetches.push(user_id);
            if s.protected.contains(&user_id) {
                return Err(RelationError::Forbidden(user_id.to_string()));
            }
            (s.followers.get(&user_id).cloned().unwrap_or_default(), window)
        };
        Ok(self.page_of(&all, cursor, window))
    }

    async fn fetch_friend_ids_page(
        &self,
        user_id: RemoteId,
        cursor: i64,
    ) -> Result<IdPage, RelationError> {
        let (all, window) = {
            let mut s = self.state();
            let window = Self::record_fetch(&mut s, EndpointGroup::Friends, cursor);
            (s.friends.get(&user_id).cloned().unwrap_or_default(), window)
        };
        Ok(self.page_of(&all, cursor, window))
    }

    async fn block(&self, id: RemoteId) -> Result<(), RelationError> {
        let mut s = self.state();
        if let Some(make) = s.fail_block.get(&id) {
            return Err(make(id));
        }
        s.block_calls.push(id);
        Ok(())
    }

    async fn unblock(&self, id: RemoteId) -> Result<(), RelationError> {
        let mut s = self.state();
        if let Some(make) = s.fail_unblock.get(&id) {
            return Err(make(id));
        }
        s.unblock_calls.push(id);
        Ok(())
    }

    async fn get_rate_limit(&self, _group: EndpointGroup) -> Result<RateLimitWindow, RelationError> {
        let mut s = self.state();
        s.rate_limit_calls += 1;
        if s.fail_rate_limit {
            return Err(RelationError::Transport("rate_limit_status 不可用".to_string()));
        }
        Ok(s.quota.unwrap_or(RateLimitWindow {
            remaining: 15,
            limit: 15,
            reset_at: Utc::now() + chrono::Duration::minutes(15),
        }))
    }
}
