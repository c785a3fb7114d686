//! 关系同步服务层
//!
//! 把远端的拉黑 / 粉丝 / 关注列表镜像到本地 SQLite，并提供拉黑传播入口。
//! 三类集合共用同一个分页同步任务，区别只在拉取的端点和写入的表。

use crate::relation::api::{GraphApi, RemoteGraphClient};
use crate::relation::dao::{CursorStore, MembershipStore, RelationDao};
use crate::relation::db::create_sqlite_pool_with_migration;
use crate::relation::error::{remote_error, RelationError};
use crate::relation::listener::{EmptySyncListener, SyncListener};
use crate::relation::models::{
    Cursor, PropagationReport, RelationSyncerConfig, SyncMode, SyncReport,
};
use crate::relation::paginator::{CursorPaginator, PageSink, PageSource};
use crate::relation::propagation::PropagationWalker;
use crate::relation::rate_gate::RateGate;
use crate::relation::types::{Category, EndpointGroup, IdPage, RemoteId, UserRef, START_POSITION};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 某个分类对应的远端 ID 流
enum CategoryStream {
    Blocked,
    Followers(RemoteId),
    Friends(RemoteId),
}

impl CategoryStream {
    fn category(&self) -> Category {
        match self {
            CategoryStream::Blocked => Category::Blocked,
            CategoryStream::Followers(_) => Category::Follower,
            CategoryStream::Friends(_) => Category::Friend,
        }
    }
}

struct CategoryPageSource<'a> {
    client: &'a dyn RemoteGraphClient,
    stream: CategoryStream,
}

#[async_trait]
impl PageSource for CategoryPageSource<'_> {
    fn endpoint_group(&self) -> EndpointGroup {
        self.stream.category().endpoint_group()
    }

    async fn fetch_page(&self, position: i64) -> Result<IdPage, RelationError> {
        match self.stream {
            CategoryStream::Blocked => self.client.fetch_blocked_ids_page(position).await,
            CategoryStream::Followers(me) => {
                self.client.fetch_follower_ids_page(me, position).await
            }
            CategoryStream::Friends(me) => self.client.fetch_friend_ids_page(me, position).await,
        }
    }
}

/// 每页在一个事务内写入本地集合
struct CategorySink<'a> {
    store: &'a dyn MembershipStore,
    listener: &'a dyn SyncListener,
    category: Category,
    inserted: u64,
}

#[async_trait]
impl PageSink for CategorySink<'_> {
    async fn on_page(&mut self, page: u64, ids: &[RemoteId]) -> Result<()> {
        let inserted = self.store.insert_many(self.category, ids).await?;
        self.inserted += inserted;
        info!(
            "[RelationSync] {} 第 {} 页: {} 个 ID，新增 {} 个，累计新增 {}",
            self.category,
            page,
            ids.len(),
            inserted,
            self.inserted
        );
        self.listener
            .on_page(self.category, page, inserted, self.inserted)
            .await;
        Ok(())
    }
}

/// 关系同步器
pub struct RelationSyncer {
    config: RelationSyncerConfig,
    client: Arc<dyn RemoteGraphClient>,
    dao: RelationDao,
    listener: Arc<dyn SyncListener>,
    gate: RateGate,
}

impl RelationSyncer {
    /// 创建新的关系同步器（使用默认空监听器）
    pub async fn new(config: RelationSyncerConfig) -> Result<Self> {
        Self::with_listener(config, Arc::new(EmptySyncListener), CancellationToken::new()).await
    }

    /// 创建新的关系同步器（带自定义监听器和取消令牌）
    pub async fn with_listener(
        config: RelationSyncerConfig,
        listener: Arc<dyn SyncListener>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        info!(
            "[RelationSync] 创建关系同步器，API: {}, SQLite数据库: {}",
            config.api_base_url, config.db_path
        );
        let db = create_sqlite_pool_with_migration(&config.db_path).await?;
        let api = GraphApi::with_token(config.api_base_url.clone(), &config.token, config.page_size)?;
        Ok(Self::with_parts(config, Arc::new(api), db, listener, cancel))
    }

    /// 使用现成的远端客户端和连接池组装（数据库迁移需已完成）
    pub fn with_parts(
        config: RelationSyncerConfig,
        client: Arc<dyn RemoteGraphClient>,
        db: Pool<Sqlite>,
        listener: Arc<dyn SyncListener>,
        cancel: CancellationToken,
    ) -> Self {
        let gate = RateGate::new(
            Duration::from_millis(config.rate_poll_interval_ms),
            Duration::from_millis(config.rate_reset_margin_ms),
            cancel,
            listener.clone(),
        );
        Self {
            config,
            client,
            dao: RelationDao::new(db),
            listener,
            gate,
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.gate.cancel_token().clone()
    }

    pub async fn sync_blocked(&self, mode: SyncMode) -> Result<SyncReport> {
        self.sync_category(Category::Blocked, mode).await
    }

    pub async fn sync_followers(&self, mode: SyncMode) -> Result<SyncReport> {
        self.sync_category(Category::Follower, mode).await
    }

    pub async fn sync_friends(&self, mode: SyncMode) -> Result<SyncReport> {
        self.sync_category(Category::Friend, mode).await
    }

    /// 把远端某个分类的完整列表同步到本地集合
    ///
    /// - `FullReplace`：删除断点、清空集合后从第一页开始
    /// - `ResumeOrFresh`：有断点从断点续拉，否则从第一页开始；不删除本地数据
    ///
    /// 中断（包括取消）时断点保留在最后一页成功写入之后的位置。
    pub async fn sync_category(&self, category: Category, mode: SyncMode) -> Result<SyncReport> {
        info!("[RelationSync] 🔄 开始同步 {} 集合，模式: {:?}", category, mode);

        let stream = match category {
            Category::Blocked => CategoryStream::Blocked,
            Category::Follower | Category::Friend => {
                let me = self
                    .client
                    .authenticated_user()
                    .await
                    .context("获取当前账号失败")?;
                info!(
                    "[RelationSync] 当前账号: {} (id: {})",
                    me.screen_name, me.id
                );
                if category == Category::Follower {
                    CategoryStream::Followers(me.id)
                } else {
                    CategoryStream::Friends(me.id)
                }
            }
        };

        let stream_name = category.stream_name();
        let (start, resumed_from) = match mode {
            SyncMode::FullReplace => {
                self.dao.delete_cursor(stream_name).await?;
                let removed = self.dao.clear(category).await?;
                info!(
                    "[RelationSync] 全量模式，已清空本地 {} 集合 {} 条",
                    category, removed
                );
                (START_POSITION, None)
            }
            SyncMode::ResumeOrFresh => match self.dao.load_cursor(stream_name).await? {
                Some(cursor) => {
                    info!(
                        "[RelationSync] 发现 {} 的断点，从位置 {} 续拉（写入于 {}）",
                        category, cursor.position, cursor.updated_at
                    );
                    (cursor.position, Some(cursor.position))
                }
                None => (START_POSITION, None),
            },
        };
        self.listener.on_sync_start(category, resumed_from).await;

        let source = CategoryPageSource {
            client: self.client.as_ref(),
            stream,
        };
        let mut sink = CategorySink {
            store: &self.dao,
            listener: self.listener.as_ref(),
            category,
            inserted: 0,
        };
        let paginator = CursorPaginator::new(
            self.client.as_ref(),
            &self.gate,
            &self.dao,
            self.config.page_delay(),
        );

        let outcome = match paginator.run(stream_name, start, None, &source, &mut sink).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    "[RelationSync] ❌ {} 同步中断，已写入 {} 个新 ID，断点已保留: {:?}",
                    category, sink.inserted, e
                );
                return Err(e.context(format!("同步 {} 集合失败", category)));
            }
        };

        let total = self.dao.count(category).await?;
        self.listener.on_sync_finish(category, total).await;
        info!(
            "[RelationSync] ✅ {} 同步完成：{} 页，{} 个 ID，新增 {} 个，本地共 {} 个",
            category, outcome.pages, outcome.ids_seen, sink.inserted, total
        );

        Ok(SyncReport {
            category,
            mode,
            resumed_from,
            pages: outcome.pages,
            ids_seen: outcome.ids_seen,
            inserted: sink.inserted,
            total,
        })
    }

    /// 本地某个集合的大小
    pub async fn count_by_category(&self, category: Category) -> Result<i64> {
        self.dao.count(category).await
    }

    /// 三个集合的大小（拉黑、粉丝、关注）
    pub async fn counts(&self) -> Result<Vec<(Category, i64)>> {
        let mut counts = Vec::with_capacity(Category::ALL.len());
        for category in Category::ALL {
            counts.push((category, self.dao.count(category).await?));
        }
        Ok(counts)
    }

    /// 根据 ID 查询远端用户名
    pub async fn resolve_username(&self, id: RemoteId) -> Result<String> {
        let profile = self
            .client
            .resolve_user(&UserRef::Id(id))
            .await
            .with_context(|| format!("查询用户 {} 失败", id))?;
        Ok(profile.screen_name)
    }

    /// 未完成同步的断点
    pub async fn list_cursors(&self) -> Result<Vec<Cursor>> {
        self.dao.list_cursors().await
    }

    /// 拉黑目标账号及其 `max_depth` 层以内的粉丝
    pub async fn propagate(&self, username: &str, max_depth: u32) -> Result<PropagationReport> {
        self.walker().propagate(username, max_depth).await
    }

    /// 解除目标账号及其直接粉丝的拉黑
    pub async fn unpropagate(&self, username: &str) -> Result<PropagationReport> {
        self.walker().unpropagate(username).await
    }

    /// 依次传播一批目标；不存在的用户名跳过，其余错误中止整批
    ///
    /// 返回每个目标的结果，被跳过的目标对应 `None`。
    pub async fn propagate_all(
        &self,
        usernames: &[String],
        max_depth: u32,
    ) -> Result<Vec<(String, Option<PropagationReport>)>> {
        let walker = self.walker();
        let mut results = Vec::with_capacity(usernames.len());
        for (index, username) in usernames.iter().enumerate() {
            info!(
                "[RelationSync] 批量传播 {}/{}: {}",
                index + 1,
                usernames.len(),
                username
            );
            match walker.propagate(username, max_depth).await {
                Ok(report) => results.push((username.clone(), Some(report))),
                Err(e) if matches!(remote_error(&e), Some(RelationError::NotFound(_))) => {
                    warn!("[RelationSync] 用户 {} 不存在，跳过", username);
                    results.push((username.clone(), None));
                }
                Err(e) => return Err(e.context(format!("批量传播在 {} 处中止", username))),
            }
        }
        Ok(results)
    }

    fn walker(&self) -> PropagationWalker<'_> {
        PropagationWalker::new(
            self.client.as_ref(),
            &self.dao,
            &self.gate,
            self.listener.as_ref(),
            self.config.page_delay(),
            self.config.action_delay(),
        )
    }
}
