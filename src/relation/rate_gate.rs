//! 限流闸门
//!
//! 远端配额用尽时挂起调用方直到重置时间。等待按固定步长分段进行，
//! 每段都会响应取消信号；挂起期间不发起任何远端调用。

use crate::relation::api::RemoteGraphClient;
use crate::relation::error::RelationError;
use crate::relation::listener::SyncListener;
use crate::relation::types::{EndpointGroup, RateLimitWindow};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct RateGate {
    poll_interval: Duration,
    reset_margin: Duration,
    cancel: CancellationToken,
    listener: Arc<dyn SyncListener>,
}

impl RateGate {
    pub fn new(
        poll_interval: Duration,
        reset_margin: Duration,
        cancel: CancellationToken,
        listener: Arc<dyn SyncListener>,
    ) -> Self {
        Self {
            // 步长为 0 会让等待循环空转
            poll_interval: poll_interval.max(Duration::from_millis(10)),
            reset_margin,
            cancel,
            listener,
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// 根据限流窗口决定是否等待
    ///
    /// 没有窗口时先查询一次该端点分组的配额；查询失败按“配额未知”放行。
    /// 唯一的错误是等待期间收到取消信号。
    pub async fn wait(
        &self,
        window: Option<&RateLimitWindow>,
        group: EndpointGroup,
        client: &dyn RemoteGraphClient,
    ) -> Result<(), RelationError> {
        let window = match window {
            Some(w) => *w,
            None => match client.get_rate_limit(group).await {
                Ok(w) => {
                    debug!(
                        "[RateGate] {} 配额: {}/{}，重置时间: {}",
                        group, w.remaining, w.limit, w.reset_at
                    );
                    w
                }
                Err(e) => {
                    warn!("[RateGate] 查询 {} 配额失败，直接放行: {}", group, e);
                    return Ok(());
                }
            },
        };

        if !window.is_exhausted() {
            return Ok(());
        }

        let now = Utc::now();
        if window.reset_at <= now {
            debug!("[RateGate] {} 配额重置时间已过，直接放行", group);
            return Ok(());
        }

        let wait = (window.reset_at - now).to_std().unwrap_or(Duration::ZERO) + self.reset_margin;
        info!(
            "[RateGate] ⏳ {} 配额已用尽，等待至 {}（约 {} 秒）",
            group,
            window.reset_at,
            wait.as_secs()
        );
        self.listener
            .on_rate_limited(group.to_string(), window.reset_at)
            .await;

        self.sleep_for(wait).await?;
        info!("[RateGate] {} 配额已重置，继续执行", group);
        Ok(())
    }

    /// 分段睡眠，每段不超过 poll_interval，并在每段响应取消
    pub async fn sleep_for(&self, duration: Duration) -> Result<(), RelationError> {
        let deadline = Instant::now() + duration;
        loop {
            if self.cancel.is_cancelled() {
                return Err(RelationError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            let step = (deadline - now).min(self.poll_interval);
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(RelationError::Cancelled),
                _ = sleep(step) => {}
            }
        }
    }
}
