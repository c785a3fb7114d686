//! 拉黑传播
//!
//! 拉黑目标账号，并按深度上限沿“账号 → 粉丝”边收集候选 ID 后逐个拉黑。
//! 每个候选在拉黑前都会查本地集合：已拉黑、自己的粉丝、自己的关注一律跳过。

use crate::relation::api::RemoteGraphClient;
use crate::relation::dao::MembershipStore;
use crate::relation::error::{remote_error, RelationError};
use crate::relation::listener::SyncListener;
use crate::relation::models::{PropagationReport, SkipReason};
use crate::relation::paginator::{CollectSink, CursorPaginator, PageSource};
use crate::relation::rate_gate::RateGate;
use crate::relation::types::{
    Category, EndpointGroup, IdPage, RateLimitWindow, RemoteId, UserProfile, UserRef,
    START_POSITION,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, warn};

/// 某个用户的粉丝 ID 流
struct FollowerSource<'a> {
    client: &'a dyn RemoteGraphClient,
    user_id: RemoteId,
}

#[async_trait]
impl PageSource for FollowerSource<'_> {
    fn endpoint_group(&self) -> EndpointGroup {
        EndpointGroup::Followers
    }

    async fn fetch_page(&self, position: i64) -> Result<IdPage, RelationError> {
        self.client
            .fetch_follower_ids_page(self.user_id, position)
            .await
    }
}

/// 收集阶段的累积状态
#[derive(Default)]
struct Collection {
    /// 去重后按发现顺序排列的候选
    ids: Vec<RemoteId>,
    seen: HashSet<RemoteId>,
    /// 已展开节点 → 展开时的深度
    expanded_at: HashMap<RemoteId, u32>,
    skipped: Vec<(RemoteId, SkipReason)>,
    /// 上一次粉丝分页返回的限流窗口，跨节点沿用
    window: Option<RateLimitWindow>,
}

impl Collection {
    /// 未展开过，或这次能以更浅的深度展开（更浅意味着能走得更远）
    fn should_expand(&self, id: RemoteId, depth: u32) -> bool {
        self.expanded_at.get(&id).map_or(true, |&d| depth < d)
    }
}

pub struct PropagationWalker<'a> {
    client: &'a dyn RemoteGraphClient,
    store: &'a dyn MembershipStore,
    gate: &'a RateGate,
    listener: &'a dyn SyncListener,
    page_delay: Duration,
    action_delay: Duration,
}

impl<'a> PropagationWalker<'a> {
    pub fn new(
        client: &'a dyn RemoteGraphClient,
        store: &'a dyn MembershipStore,
        gate: &'a RateGate,
        listener: &'a dyn SyncListener,
        page_delay: Duration,
        action_delay: Duration,
    ) -> Self {
        Self {
            client,
            store,
            gate,
            listener,
            page_delay,
            action_delay,
        }
    }

    /// 拉黑目标账号及其 `max_depth` 层以内的粉丝
    ///
    /// `max_depth = 0` 表示只处理目标的直接粉丝。
    pub async fn propagate(&self, root_username: &str, max_depth: u32) -> Result<PropagationReport> {
        let root = self.resolve_root(root_username).await?;
        info!(
            "[Propagation] 🚫 开始拉黑传播: {}, {} (id: {})，深度: {}",
            root.name, root.screen_name, root.id, max_depth
        );
        self.ensure_not_cancelled()?;

        let mut report = PropagationReport {
            root: Some(root.id),
            ..Default::default()
        };

        if self.store.contains(Category::Blocked, root.id).await? {
            info!("[Propagation] 目标 {} 已拉黑，跳过远端调用", root.id);
            self.record_skip(&mut report, root.id, SkipReason::AlreadyBlocked)
                .await;
        } else {
            self.client
                .block(root.id)
                .await
                .with_context(|| format!("拉黑目标 {} 失败", root.screen_name))?;
            self.store.insert(Category::Blocked, root.id).await?;
            report.acted.push(root.id);
            self.listener.on_blocked(root.id).await;
            info!("[Propagation] 已拉黑目标: {}", root.id);
            self.gate.sleep_for(self.action_delay).await?;
        }

        let mut acc = Collection::default();
        acc.expanded_at.insert(root.id, 0);
        self.expand(root.id, 0, max_depth, &mut acc).await?;

        info!(
            "[Propagation] 收集完成：候选 {} 个，展开 {} 个节点",
            acc.ids.len(),
            acc.expanded_at.len()
        );
        report.collected = acc.ids.len();
        report.expanded = acc.expanded_at.len();
        for (id, reason) in std::mem::take(&mut acc.skipped) {
            self.record_skip(&mut report, id, reason).await;
        }

        for id in acc.ids {
            self.ensure_not_cancelled()?;

            if let Some(reason) = self.skip_reason(id).await? {
                debug!("[Propagation] 跳过 {}: {}", id, reason);
                self.record_skip(&mut report, id, reason).await;
                continue;
            }

            match self.client.block(id).await {
                Ok(()) => {}
                Err(e) if e.is_skippable() => {
                    warn!("[Propagation] 拉黑 {} 失败，跳过: {}", id, e);
                    self.record_skip(&mut report, id, skip_reason_for(&e)).await;
                    continue;
                }
                Err(e) => {
                    return Err(anyhow::Error::from(e))
                        .with_context(|| format!("拉黑 {} 失败，传播中止", id));
                }
            }

            self.store.insert(Category::Blocked, id).await?;
            report.acted.push(id);
            self.listener.on_blocked(id).await;
            info!("[Propagation] 已拉黑: {}", id);
            self.gate.sleep_for(self.action_delay).await?;
        }

        info!(
            "[Propagation] ✅ {} 及其粉丝处理完成：拉黑 {} 个，跳过 {} 个",
            root.screen_name,
            report.acted.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// 解除目标账号及其直接粉丝的拉黑
    ///
    /// 只处理本地拉黑集合中存在的 ID，粉丝 / 关注集合不受影响。
    pub async fn unpropagate(&self, username: &str) -> Result<PropagationReport> {
        let target = self.resolve_root(username).await?;
        info!(
            "[Propagation] 开始解除拉黑: {}, {} (id: {})",
            target.name, target.screen_name, target.id
        );

        let mut report = PropagationReport {
            root: Some(target.id),
            ..Default::default()
        };
        self.ensure_not_cancelled()?;
        self.unblock_one(target.id, &mut report).await?;

        let mut window = None;
        let followers = match self.follower_ids(target.id, &mut window).await {
            Ok(ids) => ids,
            Err(e) if remote_error(&e).is_some_and(RelationError::is_skippable) => {
                warn!(
                    "[Propagation] 无法获取 {} 的粉丝列表，只处理目标本身: {:?}",
                    target.id, e
                );
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let mut seen = HashSet::new();
        for id in followers {
            if !seen.insert(id) {
                continue;
            }
            self.ensure_not_cancelled()?;
            self.unblock_one(id, &mut report).await?;
        }
        report.collected = seen.len();

        info!(
            "[Propagation] ✅ {} 及其粉丝解除拉黑完成：解除 {} 个，跳过 {} 个",
            target.screen_name,
            report.acted.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    async fn resolve_root(&self, username: &str) -> Result<UserProfile> {
        self.client
            .resolve_user(&UserRef::ScreenName(username.to_string()))
            .await
            .with_context(|| format!("解析用户 {} 失败", username))
    }

    /// 展开 `id` 的粉丝：每个粉丝先加入候选，再递归展开
    fn expand<'s>(
        &'s self,
        id: RemoteId,
        depth: u32,
        max_depth: u32,
        acc: &'s mut Collection,
    ) -> BoxFuture<'s, Result<()>> {
        async move {
            if depth > max_depth {
                return Ok(());
            }
            self.ensure_not_cancelled()?;

            let user = match self.client.resolve_user(&UserRef::Id(id)).await {
                Ok(user) => user,
                Err(e) if e.is_skippable() => {
                    warn!("[Propagation] 无法解析 {}，跳过其子树: {}", id, e);
                    acc.skipped.push((id, skip_reason_for(&e)));
                    return Ok(());
                }
                Err(e) => {
                    return Err(anyhow::Error::from(e))
                        .with_context(|| format!("解析 {} 失败", id));
                }
            };

            let followers = match self.follower_ids(user.id, &mut acc.window).await {
                Ok(ids) => ids,
                Err(e) => match remote_error(&e) {
                    Some(r) if r.is_skippable() => {
                        warn!(
                            "[Propagation] 无法获取 {} 的粉丝列表，跳过其子树: {}",
                            user.screen_name, r
                        );
                        acc.skipped.push((id, skip_reason_for(r)));
                        return Ok(());
                    }
                    _ => return Err(e),
                },
            };
            debug!(
                "[Propagation] 深度 {}: {} 有 {} 个粉丝",
                depth,
                user.screen_name,
                followers.len()
            );

            let next_depth = depth + 1;
            for follower in followers {
                if acc.seen.insert(follower) {
                    acc.ids.push(follower);
                }
                if next_depth <= max_depth && acc.should_expand(follower, next_depth) {
                    acc.expanded_at.insert(follower, next_depth);
                    self.expand(follower, next_depth, max_depth, acc).await?;
                }
            }
            Ok(())
        }
        .boxed()
    }

    /// 拉取某个用户的全部粉丝 ID（不保存断点）
    ///
    /// `window` 传入上一次已知的限流窗口，结束后更新为最后一页的窗口。
    async fn follower_ids(
        &self,
        user_id: RemoteId,
        window: &mut Option<RateLimitWindow>,
    ) -> Result<Vec<RemoteId>> {
        let source = FollowerSource {
            client: self.client,
            user_id,
        };
        let mut sink = CollectSink::default();
        let outcome = CursorPaginator::transient(self.client, self.gate, self.page_delay)
            .run(
                &format!("followers:{}", user_id),
                START_POSITION,
                *window,
                &source,
                &mut sink,
            )
            .await?;
        *window = outcome.last_window;
        Ok(sink.ids)
    }

    async fn skip_reason(&self, id: RemoteId) -> Result<Option<SkipReason>> {
        if self.store.contains(Category::Blocked, id).await? {
            return Ok(Some(SkipReason::AlreadyBlocked));
        }
        if self.store.contains(Category::Follower, id).await? {
            return Ok(Some(SkipReason::IsFollower));
        }
        if self.store.contains(Category::Friend, id).await? {
            return Ok(Some(SkipReason::IsFriend));
        }
        Ok(None)
    }

    async fn unblock_one(&self, id: RemoteId, report: &mut PropagationReport) -> Result<()> {
        if !self.store.contains(Category::Blocked, id).await? {
            debug!("[Propagation] 未拉黑: {}", id);
            self.record_skip(report, id, SkipReason::NotBlocked).await;
            return Ok(());
        }

        match self.client.unblock(id).await {
            Ok(()) => {}
            // 远端账号已不存在时本地记录同样作废
            Err(e @ RelationError::NotFound(_)) => {
                warn!("[Propagation] 解除拉黑 {} 失败，仍移除本地记录: {}", id, e)
            }
            // 远端拉黑仍在，本地记录必须保留
            Err(e @ RelationError::Forbidden(_)) => {
                warn!("[Propagation] 无权解除拉黑 {}，保留本地记录: {}", id, e);
                self.record_skip(report, id, SkipReason::Forbidden).await;
                return Ok(());
            }
            Err(e) => {
                return Err(anyhow::Error::from(e))
                    .with_context(|| format!("解除拉黑 {} 失败", id));
            }
        }

        self.store.remove(Category::Blocked, id).await?;
        report.acted.push(id);
        self.listener.on_unblocked(id).await;
        info!("[Propagation] 已解除拉黑: {}", id);
        self.gate.sleep_for(self.action_delay).await?;
        Ok(())
    }

    async fn record_skip(&self, report: &mut PropagationReport, id: RemoteId, reason: SkipReason) {
        report.skipped.push((id, reason));
        self.listener.on_skipped(id, reason).await;
    }

    fn ensure_not_cancelled(&self) -> Result<(), RelationError> {
        if self.gate.cancel_token().is_cancelled() {
            Err(RelationError::Cancelled)
        } else {
            Ok(())
        }
    }
}

fn skip_reason_for(e: &RelationError) -> SkipReason {
    match e {
        RelationError::Forbidden(_) => SkipReason::Forbidden,
        _ => SkipReason::NotFound,
    }
}
