// 存储模块：封装 SQLite/Postgres 上 behaviors 表的单行读写与条件查询。

mod postgres;
pub mod query;
mod sqlite;

use crate::config::StorageConfig;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub use postgres::PostgresStorage;
pub use query::BehaviorQuery;
pub use sqlite::SqliteStorage;

#[derive(Debug, Clone, PartialEq)]
pub struct BehaviorRecord {
    pub id: i64,
    pub key: String,
    pub user_id: i64,
    pub data: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl BehaviorRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// 待写入的行为记录，deleted_at 恒为空。
#[derive(Debug, Clone)]
pub struct NewBehaviorRecord {
    pub key: String,
    pub user_id: i64,
    pub data: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 存储后端抽象，所有方法都只作用于单行或一条渲染好的查询。
pub trait StorageBackend: Send + Sync {
    fn ensure_initialized(&self) -> Result<()>;
    fn backend_name(&self) -> &'static str;

    /// 返回新行 id；后端无法给出 id 时返回 None，但写入已经发生。
    fn insert_behavior(&self, record: &NewBehaviorRecord) -> Result<Option<i64>>;
    /// 按 id 读取原始行，包含已软删除的行。
    fn get_behavior(&self, id: i64) -> Result<Option<BehaviorRecord>>;
    /// 仅当行存在且未删除时写入 deleted_at，返回是否真正改动了一行。
    fn soft_delete_behavior(&self, id: i64, deleted_at: DateTime<Utc>) -> Result<bool>;

    fn query_behaviors(&self, query: &BehaviorQuery) -> Result<Vec<BehaviorRecord>>;
    fn count_behaviors(&self, query: &BehaviorQuery) -> Result<i64>;
}

/// 构建存储后端，根据 backend 配置选择 SQLite/Postgres。
pub fn build_storage(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    let backend = config.backend.trim().to_lowercase();
    let backend = if backend.is_empty() {
        "sqlite".to_string()
    } else {
        backend
    };
    match backend.as_str() {
        "sqlite" | "default" => Ok(Arc::new(SqliteStorage::new(
            config.db_path.trim().to_string(),
        ))),
        "postgres" | "postgresql" | "pg" => Ok(Arc::new(PostgresStorage::new(
            config.postgres.dsn.clone(),
            config.postgres.connect_timeout_s,
            config.postgres.pool_size,
        )?)),
        other => Err(anyhow!("未知存储后端: {other}")),
    }
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| anyhow!("timestamp out of range: {millis}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PostgresConfig;

    #[test]
    fn unknown_backend_is_rejected() {
        let config = StorageConfig {
            backend: "mongo".to_string(),
            db_path: String::new(),
            postgres: PostgresConfig::default(),
        };
        assert!(build_storage(&config).is_err());
    }

    #[test]
    fn blank_backend_falls_back_to_sqlite() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = StorageConfig {
            backend: "  ".to_string(),
            db_path: dir.path().join("b.db").to_string_lossy().to_string(),
            postgres: PostgresConfig::default(),
        };
        let storage = build_storage(&config).expect("build storage");
        assert_eq!(storage.backend_name(), "sqlite");
    }

    #[test]
    fn postgres_requires_dsn() {
        let config = StorageConfig {
            backend: "postgres".to_string(),
            db_path: String::new(),
            postgres: PostgresConfig::default(),
        };
        assert!(build_storage(&config).is_err());
    }
}
