pub mod relation;

// 重新导出常用类型和函数，方便外部使用
pub use relation::{
    settings::{load_config, load_username_list},
    Category, RelationSyncer, RelationSyncerConfig, RemoteId, SyncMode,
};
