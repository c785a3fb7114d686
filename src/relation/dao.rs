//! 关系数据访问层（DAO）
//!
//! 负责关系集合（拉黑 / 粉丝 / 关注）与分页断点的读写。
//! 同步与传播逻辑只依赖 [`MembershipStore`] / [`CursorStore`] 两个 trait，
//! 默认实现基于 sqlx + SQLite。

use crate::relation::models::Cursor;
use crate::relation::types::{Category, RemoteId};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Pool, Row, Sqlite};
use tracing::debug;

/// 本地关系集合（去重存储）
///
/// 每次调用返回前已提交，同一操作内后续读取一定能看到之前的写入。
#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn contains(&self, category: Category, id: RemoteId) -> Result<bool>;

    /// 幂等插入，返回是否为新插入
    async fn insert(&self, category: Category, id: RemoteId) -> Result<bool>;

    /// 在一个事务内批量插入，返回新插入的条数
    async fn insert_many(&self, category: Category, ids: &[RemoteId]) -> Result<u64>;

    /// 幂等删除，返回是否确实删除了一行
    async fn remove(&self, category: Category, id: RemoteId) -> Result<bool>;

    async fn count(&self, category: Category) -> Result<i64>;

    /// 清空整个集合，返回删除的条数
    async fn clear(&self, category: Category) -> Result<u64>;
}

/// 分页断点存储，每条流至多一行
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load_cursor(&self, stream: &str) -> Result<Option<Cursor>>;

    /// 按流名 upsert
    async fn save_cursor(&self, cursor: &Cursor) -> Result<()>;

    async fn delete_cursor(&self, stream: &str) -> Result<()>;

    async fn list_cursors(&self) -> Result<Vec<Cursor>>;
}

/// 关系 DAO（基于 sqlx）
#[derive(Clone)]
pub struct RelationDao {
    db: Pool<Sqlite>,
}

impl RelationDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MembershipStore for RelationDao {
    async fn contains(&self, category: Category, id: RemoteId) -> Result<bool> {
        let sql = format!("SELECT id FROM {} WHERE id = ?", category.table_name());
        let row = sqlx::query(&sql)
            .bind(id.0)
            .fetch_optional(&self.db)
            .await
            .with_context(|| format!("查询 {} 集合失败: {}", category, id))?;
        Ok(row.is_some())
    }

    async fn insert(&self, category: Category, id: RemoteId) -> Result<bool> {
        let sql = format!(
            "INSERT OR IGNORE INTO {} (id) VALUES (?)",
            category.table_name()
        );
        let result = sqlx::query(&sql)
            .bind(id.0)
            .execute(&self.db)
            .await
            .with_context(|| format!("写入 {} 集合失败: {}", category, id))?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_many(&self, category: Category, ids: &[RemoteId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "INSERT OR IGNORE INTO {} (id) VALUES (?)",
            category.table_name()
        );
        let mut tx = self.db.begin().await.context("开启事务失败")?;
        let mut inserted = 0u64;
        for id in ids {
            inserted += sqlx::query(&sql)
                .bind(id.0)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("批量写入 {} 集合失败: {}", category, id))?
                .rows_affected();
        }
        tx.commit().await.context("提交事务失败")?;

        debug!(
            "[RelationDAO] {} 集合批量写入 {} 条，新增 {} 条",
            category,
            ids.len(),
            inserted
        );
        Ok(inserted)
    }

    async fn remove(&self, category: Category, id: RemoteId) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?", category.table_name());
        let result = sqlx::query(&sql)
            .bind(id.0)
            .execute(&self.db)
            .await
            .with_context(|| format!("删除 {} 集合记录失败: {}", category, id))?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self, category: Category) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) AS cnt FROM {}", category.table_name());
        let row = sqlx::query(&sql)
            .fetch_one(&self.db)
            .await
            .with_context(|| format!("统计 {} 集合失败", category))?;
        Ok(row.get::<i64, _>("cnt"))
    }

    async fn clear(&self, category: Category) -> Result<u64> {
        let sql = format!("DELETE FROM {}", category.table_name());
        let result = sqlx::query(&sql)
            .execute(&self.db)
            .await
            .with_context(|| format!("清空 {} 集合失败", category))?;
        debug!(
            "[RelationDAO] 已清空 {} 集合，共 {} 条",
            category,
            result.rows_affected()
        );
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CursorStore for RelationDao {
    async fn load_cursor(&self, stream: &str) -> Result<Option<Cursor>> {
        let row = sqlx::query(
            r#"
            SELECT stream_name, position, updated_at
            FROM sync_cursors
            WHERE stream_name = ?
            "#,
        )
        .bind(stream)
        .fetch_optional(&self.db)
        .await
        .with_context(|| format!("查询同步断点失败: {}", stream))?;

        Ok(row.map(|m| Cursor {
            stream_name: m.get("stream_name"),
            position: m.get("position"),
            updated_at: m.get("updated_at"),
        }))
    }

    async fn save_cursor(&self, cursor: &Cursor) -> Result<()> {
        let sql = r#"
            INSERT INTO sync_cursors (stream_name, position, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(stream_name) DO UPDATE SET
                position = excluded.position,
                updated_at = excluded.updated_at
        "#;

        sqlx::query(sql)
            .bind(&cursor.stream_name)
            .bind(cursor.position)
            .bind(cursor.updated_at)
            .execute(&self.db)
            .await
            .with_context(|| format!("保存同步断点失败: {}", cursor.stream_name))?;
        Ok(())
    }

    async fn delete_cursor(&self, stream: &str) -> Result<()> {
        sqlx::query("DELETE FROM sync_cursors WHERE stream_name = ?")
            .bind(stream)
            .execute(&self.db)
            .await
            .with_context(|| format!("删除同步断点失败: {}", stream))?;
        Ok(())
    }

    async fn list_cursors(&self) -> Result<Vec<Cursor>> {
        let rows = sqlx::query(
            "SELECT stream_name, position, updated_at FROM sync_cursors ORDER BY stream_name",
        )
        .fetch_all(&self.db)
        .await
        .context("查询同步断点列表失败")?;

        Ok(rows
            .into_iter()
            .map(|m| Cursor {
                stream_name: m.get("stream_name"),
                position: m.get("position"),
                updated_at: m.get("updated_at"),
            })
            .collect())
    }
}
