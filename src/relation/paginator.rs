//! 游标分页驱动
//!
//! 把一条远端分页流从给定位置拉到结束：每页先过限流闸门，再拉取、交给 sink
//! 写入，最后持久化下一页位置。断点只在 sink 成功返回之后写入，
//! 因此中断后续拉最多重复处理最后一页，不会丢页。

use crate::relation::api::RemoteGraphClient;
use crate::relation::dao::CursorStore;
use crate::relation::error::RelationError;
use crate::relation::models::Cursor;
use crate::relation::rate_gate::RateGate;
use crate::relation::types::{EndpointGroup, IdPage, RateLimitWindow, RemoteId, TERMINAL_POSITION};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

/// 一条可分页拉取的远端 ID 流
#[async_trait]
pub trait PageSource: Send + Sync {
    fn endpoint_group(&self) -> EndpointGroup;

    async fn fetch_page(&self, position: i64) -> Result<IdPage, RelationError>;
}

/// 接收每一页 ID 的处理方
#[async_trait]
pub trait PageSink: Send {
    async fn on_page(&mut self, page: u64, ids: &[RemoteId]) -> Result<()>;
}

/// 只在内存里按顺序收集 ID
#[derive(Debug, Default)]
pub struct CollectSink {
    pub ids: Vec<RemoteId>,
}

#[async_trait]
impl PageSink for CollectSink {
    async fn on_page(&mut self, _page: u64, ids: &[RemoteId]) -> Result<()> {
        self.ids.extend_from_slice(ids);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationOutcome {
    pub pages: u64,
    pub ids_seen: u64,
    pub last_position: i64,
    /// 最后一次已知的限流窗口，供同一端点的下一次分页沿用
    pub last_window: Option<RateLimitWindow>,
}

enum PageState {
    Idle,
    Fetching,
    Applying(IdPage),
    Done,
}

pub struct CursorPaginator<'a> {
    client: &'a dyn RemoteGraphClient,
    gate: &'a RateGate,
    cursors: Option<&'a dyn CursorStore>,
    page_delay: Duration,
}

impl<'a> CursorPaginator<'a> {
    /// 每页之后持久化断点
    pub fn new(
        client: &'a dyn RemoteGraphClient,
        gate: &'a RateGate,
        cursors: &'a dyn CursorStore,
        page_delay: Duration,
    ) -> Self {
        Self {
            client,
            gate,
            cursors: Some(cursors),
            page_delay,
        }
    }

    /// 不持久化断点，中断后只能从头再来
    pub fn transient(
        client: &'a dyn RemoteGraphClient,
        gate: &'a RateGate,
        page_delay: Duration,
    ) -> Self {
        Self {
            client,
            gate,
            cursors: None,
            page_delay,
        }
    }

    /// 从 `start` 拉到最后一页
    ///
    /// `window` 为调用方已知的限流窗口；为 `None` 时第一页之前会查询一次配额。
    pub async fn run(
        &self,
        stream: &str,
        start: i64,
        window: Option<RateLimitWindow>,
        source: &dyn PageSource,
        sink: &mut dyn PageSink,
    ) -> Result<PaginationOutcome> {
        let mut state = PageState::Idle;
        let mut position = start;
        let mut window = window;
        let mut outcome = PaginationOutcome {
            pages: 0,
            ids_seen: 0,
            last_position: start,
            last_window: window,
        };

        loop {
            state = match state {
                PageState::Idle => {
                    if self.gate.cancel_token().is_cancelled() {
                        return Err(RelationError::Cancelled.into());
                    }
                    self.gate
                        .wait(window.as_ref(), source.endpoint_group(), self.client)
                        .await?;
                    PageState::Fetching
                }
                PageState::Fetching => {
                    debug!("[Paginator] {} 拉取位置 {}", stream, position);
                    let page = source.fetch_page(position).await.with_context(|| {
                        format!(
                            "拉取 {} 第 {} 页失败，位置: {}",
                            stream,
                            outcome.pages + 1,
                            position
                        )
                    })?;
                    PageState::Applying(page)
                }
                PageState::Applying(page) => {
                    outcome.pages += 1;
                    outcome.ids_seen += page.ids.len() as u64;
                    sink.on_page(outcome.pages, &page.ids).await?;

                    if page.rate_window.is_some() {
                        window = page.rate_window;
                        outcome.last_window = window;
                    }

                    if page.is_last() {
                        if let Some(store) = self.cursors {
                            store.delete_cursor(stream).await?;
                        }
                        outcome.last_position = TERMINAL_POSITION;
                        PageState::Done
                    } else {
                        if page.next_cursor == position {
                            anyhow::bail!("{} 的分页游标未前进: {}", stream, position);
                        }
                        if let Some(store) = self.cursors {
                            store
                                .save_cursor(&Cursor::new(stream, page.next_cursor))
                                .await?;
                        }
                        position = page.next_cursor;
                        outcome.last_position = position;

                        self.gate.sleep_for(self.page_delay).await?;
                        PageState::Idle
                    }
                }
                PageState::Done => {
                    info!(
                        "[Paginator] ✅ {} 拉取完成，共 {} 页，{} 个 ID",
                        stream, outcome.pages, outcome.ids_seen
                    );
                    return Ok(outcome);
                }
            };
        }
    }
}
