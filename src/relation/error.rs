//! 远端调用错误分类
//!
//! 服务层统一使用 `anyhow::Result`，远端错误以 `RelationError` 的形式包在
//! `anyhow::Error` 里，需要区分“跳过”还是“中止”时通过 [`remote_error`] 取回。

use chrono::{DateTime, Utc};
use thiserror::Error;

/// 远端关系 API 的错误类型
#[derive(Debug, Error)]
pub enum RelationError {
    /// 用户或资源不存在（用户名无效、账号已注销等）
    #[error("远端资源不存在: {0}")]
    NotFound(String),

    /// 无权访问某个目标（受保护账号、被对方屏蔽）
    #[error("无权访问: {0}")]
    Forbidden(String),

    /// 鉴权失败（token 无效或过期），对所有目标都一样，必须中止
    #[error("鉴权失败: {0}")]
    Unauthorized(String),

    /// 服务端返回 429
    #[error("触发限流，重置时间: {reset_at:?}")]
    RateLimited { reset_at: Option<DateTime<Utc>> },

    /// 网络层失败（连接、超时、TLS）
    #[error("请求失败: {0}")]
    Transport(String),

    /// 其它非 2xx 响应
    #[error("服务器错误 {status}: {message}")]
    Api { status: u16, message: String },

    /// 响应体无法解析
    #[error("反序列化响应失败: {0}")]
    Decode(String),

    /// 外部取消信号
    #[error("操作已取消")]
    Cancelled,
}

impl RelationError {
    /// 单个目标可以跳过、不影响整体流程的错误
    pub fn is_skippable(&self) -> bool {
        matches!(self, RelationError::NotFound(_) | RelationError::Forbidden(_))
    }
}

impl From<reqwest::Error> for RelationError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RelationError::Decode(e.to_string())
        } else {
            RelationError::Transport(e.to_string())
        }
    }
}

/// 从 anyhow 错误链中取出远端错误（若有）
pub fn remote_error(err: &anyhow::Error) -> Option<&RelationError> {
    err.chain().find_map(|e| e.downcast_ref::<RelationError>())
}

/// 错误链中是否包含取消信号
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    matches!(remote_error(err), Some(RelationError::Cancelled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn remote_error_survives_context() {
        let res: anyhow::Result<()> = Err(RelationError::NotFound("alice".to_string()).into());
        let err = res.context("解析用户失败").unwrap_err();

        let remote = remote_error(&err).expect("应能取回远端错误");
        assert!(remote.is_skippable());
        assert!(!is_cancelled(&err));
    }

    #[test]
    fn transient_errors_are_not_skippable() {
        assert!(!RelationError::RateLimited { reset_at: None }.is_skippable());
        assert!(!RelationError::Transport("timeout".into()).is_skippable());
        assert!(RelationError::Forbidden("protected".into()).is_skippable());
        assert!(!RelationError::Unauthorized("expired".into()).is_skippable());
    }

    #[test]
    fn cancelled_is_detected_through_chain() {
        let err = anyhow::Error::from(RelationError::Cancelled).context("同步拉黑列表失败");
        assert!(is_cancelled(&err));
    }
}
