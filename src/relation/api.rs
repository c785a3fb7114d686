//! 关系 HTTP API 客户端
//!
//! [`RemoteGraphClient`] 是同步 / 传播逻辑依赖的远端接口；[`GraphApi`] 是基于
//! reqwest 的默认实现，对接 v1.1 风格的 REST 接口（`*/ids.json` 游标分页）。

use crate::relation::error::RelationError;
use crate::relation::types::{
    EndpointGroup, IdPage, IdsResp, RateLimitStatusResp, RateLimitWindow, RemoteId, UserProfile,
    UserRef,
};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};
use uuid::Uuid;

/// 远端社交关系接口
///
/// 调用方假设客户端已完成鉴权。
#[async_trait]
pub trait RemoteGraphClient: Send + Sync {
    /// 当前登录账号
    async fn authenticated_user(&self) -> Result<UserProfile, RelationError>;

    async fn resolve_user(&self, user: &UserRef) -> Result<UserProfile, RelationError>;

    async fn fetch_blocked_ids_page(&self, cursor: i64) -> Result<IdPage, RelationError>;

    async fn fetch_follower_ids_page(
        &self,
        user_id: RemoteId,
        cursor: i64,
    ) -> Result<IdPage, RelationError>;

    async fn fetch_friend_ids_page(
        &self,
        user_id: RemoteId,
        cursor: i64,
    ) -> Result<IdPage, RelationError>;

    async fn block(&self, id: RemoteId) -> Result<(), RelationError>;

    async fn unblock(&self, id: RemoteId) -> Result<(), RelationError>;

    /// 查询某个端点分组的剩余配额
    async fn get_rate_limit(&self, group: EndpointGroup) -> Result<RateLimitWindow, RelationError>;
}

/// 关系相关的 HTTP API 客户端
pub struct GraphApi {
    client: reqwest::Client,
    api_base_url: String,
    page_size: u32,
}

impl GraphApi {
    /// 创建新的关系 API 客户端
    ///
    /// `client` 应该已经在外部配置好认证头
    pub fn new(client: reqwest::Client, api_base_url: String, page_size: u32) -> Self {
        Self {
            client,
            api_base_url,
            page_size,
        }
    }

    /// 创建带 Bearer token 的客户端（token 通过 default_headers 自动添加）
    pub fn with_token(api_base_url: String, token: &str, page_size: u32) -> anyhow::Result<Self> {
        let http_client = reqwest::ClientBuilder::new()
            .default_headers({
                let mut headers = HeaderMap::new();
                headers.insert(
                    reqwest::header::AUTHORIZATION,
                    reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token))
                        .context("无效的 token")?,
                );
                headers
            })
            .build()
            .context("创建 HTTP 客户端失败")?;
        Ok(Self::new(http_client, api_base_url, page_size))
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        label: &str,
    ) -> Result<(T, Option<RateLimitWindow>), RelationError> {
        let operation_id = Uuid::new_v4().to_string();
        let url = format!("{}/{}", self.api_base_url.trim_end_matches('/'), path);

        debug!("[GraphAPI] 📡 请求{}", label);
        debug!(
            "[GraphAPI]   请求URL: {}, 参数: {:?}, 操作ID: {}",
            url, query, operation_id
        );

        let response = self
            .client
            .request(method, &url)
            .header("operationID", &operation_id)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        let window = parse_rate_window(response.headers());
        let body_bytes = response.bytes().await?;
        let body_str = String::from_utf8_lossy(&body_bytes);

        if !status.is_success() {
            error!(
                "[GraphAPI] {}请求失败，HTTP状态: {}, 响应: {}",
                label, status, body_str
            );
            return Err(classify_status(status, &body_str, window));
        }

        let data: T = serde_json::from_slice(&body_bytes).map_err(|e| {
            error!(
                "[GraphAPI] {}反序列化失败: {:?}\n原始响应: {}",
                label, e, body_str
            );
            RelationError::Decode(format!("{:?}", e))
        })?;

        if let Some(w) = window {
            debug!(
                "[GraphAPI]   {} 剩余配额: {}/{}，重置时间: {}",
                label, w.remaining, w.limit, w.reset_at
            );
        }
        Ok((data, window))
    }

    async fn fetch_ids(
        &self,
        path: &str,
        user_id: Option<RemoteId>,
        cursor: i64,
        label: &str,
    ) -> Result<IdPage, RelationError> {
        let mut query = vec![
            ("cursor", cursor.to_string()),
            ("count", self.page_size.to_string()),
        ];
        if let Some(id) = user_id {
            query.push(("user_id", id.to_string()));
        }

        let (resp, window): (IdsResp, _) = self.request(Method::GET, path, &query, label).await?;
        info!(
            "[GraphAPI] ✅ {}响应，条目数: {}, next_cursor: {}",
            label,
            resp.ids.len(),
            resp.next_cursor
        );

        Ok(IdPage {
            ids: resp.ids.into_iter().map(RemoteId).collect(),
            next_cursor: resp.next_cursor,
            rate_window: window,
        })
    }
}

#[async_trait]
impl RemoteGraphClient for GraphApi {
    async fn authenticated_user(&self) -> Result<UserProfile, RelationError> {
        let query = [("skip_status", "true".to_string())];
        let (user, _): (UserProfile, _) = self
            .request(
                Method::GET,
                "account/verify_credentials.json",
                &query,
                "当前账号信息",
            )
            .await?;
        Ok(user)
    }

    async fn resolve_user(&self, user: &UserRef) -> Result<UserProfile, RelationError> {
        let query = match user {
            UserRef::ScreenName(name) => [("screen_name", name.trim_start_matches('@').to_string())],
            UserRef::Id(id) => [("user_id", id.to_string())],
        };
        let (profile, _): (UserProfile, _) = self
            .request(Method::GET, "users/show.json", &query, "用户信息")
            .await?;
        Ok(profile)
    }

    async fn fetch_blocked_ids_page(&self, cursor: i64) -> Result<IdPage, RelationError> {
        self.fetch_ids("blocks/ids.json", None, cursor, "拉黑列表").await
    }

    async fn fetch_follower_ids_page(
        &self,
        user_id: RemoteId,
        cursor: i64,
    ) -> Result<IdPage, RelationError> {
        self.fetch_ids("followers/ids.json", Some(user_id), cursor, "粉丝列表")
            .await
    }

    async fn fetch_friend_ids_page(
        &self,
        user_id: RemoteId,
        cursor: i64,
    ) -> Result<IdPage, RelationError> {
        self.fetch_ids("friends/ids.json", Some(user_id), cursor, "关注列表")
            .await
    }

    async fn block(&self, id: RemoteId) -> Result<(), RelationError> {
        let query = [
            ("user_id", id.to_string()),
            ("skip_status", "true".to_string()),
        ];
        let _: (serde_json::Value, _) = self
            .request(Method::POST, "blocks/create.json", &query, "拉黑")
            .await?;
        Ok(())
    }

    async fn unblock(&self, id: RemoteId) -> Result<(), RelationError> {
        let query = [
            ("user_id", id.to_string()),
            ("skip_status", "true".to_string()),
        ];
        let _: (serde_json::Value, _) = self
            .request(Method::POST, "blocks/destroy.json", &query, "解除拉黑")
            .await?;
        Ok(())
    }

    async fn get_rate_limit(&self, group: EndpointGroup) -> Result<RateLimitWindow, RelationError> {
        let query = [("resources", group.resource().to_string())];
        let (resp, _): (RateLimitStatusResp, _) = self
            .request(
                Method::GET,
                "application/rate_limit_status.json",
                &query,
                "限流状态",
            )
            .await?;

        resp.window_for(group)
            .ok_or_else(|| RelationError::Decode(format!("限流状态中缺少端点 {}", group)))
    }
}

/// 从响应头解析限流窗口（缺少 remaining 或 reset 时返回 None）
pub fn parse_rate_window(headers: &HeaderMap) -> Option<RateLimitWindow> {
    fn header<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
        headers.get(name)?.to_str().ok()?.trim().parse().ok()
    }

    let remaining: u32 = header(headers, "x-rate-limit-remaining")?;
    let reset: i64 = header(headers, "x-rate-limit-reset")?;
    let limit: u32 = header(headers, "x-rate-limit-limit").unwrap_or(0);
    Some(RateLimitWindow::from_epoch(remaining, limit, reset))
}

/// HTTP 状态码到错误分类的映射
pub fn classify_status(
    status: StatusCode,
    body: &str,
    window: Option<RateLimitWindow>,
) -> RelationError {
    match status {
        StatusCode::NOT_FOUND => RelationError::NotFound(body.to_string()),
        StatusCode::UNAUTHORIZED => RelationError::Unauthorized(body.to_string()),
        StatusCode::FORBIDDEN => RelationError::Forbidden(body.to_string()),
        StatusCode::TOO_MANY_REQUESTS => RelationError::RateLimited {
            reset_at: window.map(|w| w.reset_at),
        },
        other => RelationError::Api {
            status: other.as_u16(),
            message: body.to_string(),
        },
    }
}
