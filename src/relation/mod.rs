//! 社交关系同步模块
//!
//! 把远端账号的拉黑 / 粉丝 / 关注列表镜像到本地，并支持沿粉丝关系拉黑传播

pub mod api;
pub mod dao;
pub mod db;
pub mod error;
pub mod listener;
pub mod models;
pub mod paginator;
pub mod propagation;
pub mod rate_gate;
pub mod service;
pub mod settings;
pub mod types;

#[cfg(test)]
pub mod testing;

// 重新导出主要类型和函数
pub use api::{GraphApi, RemoteGraphClient};
pub use dao::{CursorStore, MembershipStore, RelationDao};
pub use error::{is_cancelled, remote_error, RelationError};
pub use listener::{EmptySyncListener, SyncListener};
pub use models::{
    Cursor, PropagationReport, RelationSyncerConfig, SkipReason, SyncMode, SyncReport,
};
pub use service::RelationSyncer;
pub use types::{Category, RemoteId, UserProfile, UserRef};
