// SQLite 存储实现：时间戳按毫秒整数落盘，查询语句由 query 模块统一构造。
use crate::storage::query::{build_count, build_select, Placeholder, QueryValue, NOT_DELETED};
use crate::storage::{
    millis_to_datetime, BehaviorQuery, BehaviorRecord, NewBehaviorRecord, StorageBackend,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct SqliteStorage {
    db_path: PathBuf,
    initialized: AtomicBool,
    init_guard: Mutex<()>,
}

struct SqliteBehaviorRow {
    id: i64,
    key: String,
    user_id: i64,
    data: String,
    created_at: i64,
    updated_at: i64,
    deleted_at: Option<i64>,
}

impl SqliteBehaviorRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            key: row.get(1)?,
            user_id: row.get(2)?,
            data: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
            deleted_at: row.get(6)?,
        })
    }

    fn into_record(self) -> Result<BehaviorRecord> {
        Ok(BehaviorRecord {
            id: self.id,
            key: self.key,
            user_id: self.user_id,
            data: self.data,
            created_at: millis_to_datetime(self.created_at)?,
            updated_at: millis_to_datetime(self.updated_at)?,
            deleted_at: self.deleted_at.map(millis_to_datetime).transpose()?,
        })
    }
}

impl SqliteStorage {
    pub fn new(db_path: String) -> Self {
        let path = if db_path.trim().is_empty() {
            PathBuf::from("./data/behavior.db")
        } else {
            PathBuf::from(db_path)
        };
        Self {
            db_path: path,
            initialized: AtomicBool::new(false),
            init_guard: Mutex::new(()),
        }
    }

    fn ensure_db_dir(&self) -> Result<()> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    fn open(&self) -> Result<Connection> {
        self.ensure_db_dir()?;
        let conn = Connection::open(&self.db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.busy_timeout(std::time::Duration::from_secs(5)).ok();
        Ok(conn)
    }

    fn bind_values(values: &[QueryValue]) -> Vec<SqlValue> {
        values
            .iter()
            .map(|value| match value {
                QueryValue::Text(text) => SqlValue::Text(text.clone()),
                QueryValue::Integer(number) => SqlValue::Integer(*number),
                QueryValue::Timestamp(time) => SqlValue::Integer(time.timestamp_millis()),
            })
            .collect()
    }
}

impl StorageBackend for SqliteStorage {
    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        let _guard = self.init_guard.lock();
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        let conn = self.open()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS behaviors (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              "key" TEXT NOT NULL,
              user_id INTEGER NOT NULL,
              data TEXT NOT NULL,
              created_at INTEGER NOT NULL,
              updated_at INTEGER NOT NULL,
              deleted_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_behaviors_key_created
              ON behaviors ("key", created_at);
            CREATE INDEX IF NOT EXISTS idx_behaviors_user_created
              ON behaviors (user_id, created_at);
            "#,
        )?;
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    fn insert_behavior(&self, record: &NewBehaviorRecord) -> Result<Option<i64>> {
        self.ensure_initialized()?;
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO behaviors (\"key\", user_id, data, created_at, updated_at, deleted_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
            params![
                record.key,
                record.user_id,
                record.data,
                record.created_at.timestamp_millis(),
                record.updated_at.timestamp_millis(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Some(id).filter(|value| *value > 0))
    }

    fn get_behavior(&self, id: i64) -> Result<Option<BehaviorRecord>> {
        self.ensure_initialized()?;
        let conn = self.open()?;
        let row = conn
            .query_row(
                "SELECT id, \"key\", user_id, data, created_at, updated_at, deleted_at \
                 FROM behaviors WHERE id = ?1",
                params![id],
                SqliteBehaviorRow::from_row,
            )
            .optional()?;
        row.map(SqliteBehaviorRow::into_record).transpose()
    }

    fn soft_delete_behavior(&self, id: i64, deleted_at: DateTime<Utc>) -> Result<bool> {
        self.ensure_initialized()?;
        let conn = self.open()?;
        let millis = deleted_at.timestamp_millis();
        let affected = conn.execute(
            &format!(
                "UPDATE behaviors SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2 AND {NOT_DELETED}"
            ),
            params![millis, id],
        )?;
        Ok(affected > 0)
    }

    fn query_behaviors(&self, query: &BehaviorQuery) -> Result<Vec<BehaviorRecord>> {
        self.ensure_initialized()?;
        let statement = build_select(query, Placeholder::Question);
        let values = Self::bind_values(&statement.values);
        let conn = self.open()?;
        let mut stmt = conn.prepare(&statement.text)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), SqliteBehaviorRow::from_row)?
            .collect::<std::result::Result<Vec<SqliteBehaviorRow>, _>>()?;
        rows.into_iter().map(SqliteBehaviorRow::into_record).collect()
    }

    fn count_behaviors(&self, query: &BehaviorQuery) -> Result<i64> {
        self.ensure_initialized()?;
        let statement = build_count(query, Placeholder::Question);
        let values = Self::bind_values(&statement.values);
        let conn = self.open()?;
        let total: i64 = conn.query_row(&statement.text, params_from_iter(values.iter()), |row| {
            row.get(0)
        })?;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn storage() -> (tempfile::TempDir, SqliteStorage) {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("behavior.db");
        let storage = SqliteStorage::new(path.to_string_lossy().to_string());
        storage.ensure_initialized().expect("init");
        (dir, storage)
    }

    fn record(key: &str, user_id: i64, created_at: DateTime<Utc>) -> NewBehaviorRecord {
        NewBehaviorRecord {
            key: key.to_string(),
            user_id,
            data: format!("{{\"k\":\"{key}\"}}"),
            created_at,
            updated_at: created_at,
        }
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn insert_then_get_round_trips_fields() {
        let (_dir, storage) = storage();
        let created = base_time();
        let id = storage
            .insert_behavior(&record("click", 9, created))
            .unwrap()
            .expect("assigned id");
        let loaded = storage.get_behavior(id).unwrap().expect("row exists");
        assert_eq!(loaded.key, "click");
        assert_eq!(loaded.user_id, 9);
        assert_eq!(loaded.data, "{\"k\":\"click\"}");
        assert_eq!(loaded.created_at, created);
        assert!(!loaded.is_deleted());
        assert!(storage.get_behavior(id + 100).unwrap().is_none());
    }

    #[test]
    fn soft_delete_applies_once() {
        let (_dir, storage) = storage();
        let id = storage
            .insert_behavior(&record("view", 1, base_time()))
            .unwrap()
            .unwrap();
        let now = base_time() + Duration::minutes(1);
        assert!(storage.soft_delete_behavior(id, now).unwrap());
        assert!(!storage.soft_delete_behavior(id, now).unwrap());
        assert!(!storage.soft_delete_behavior(id + 1, now).unwrap());

        let loaded = storage.get_behavior(id).unwrap().expect("row kept");
        assert_eq!(loaded.deleted_at, Some(now));
        assert_eq!(loaded.updated_at, now);
    }

    #[test]
    fn query_filters_and_counts_exclude_deleted_rows() {
        let (_dir, storage) = storage();
        let start = base_time();
        let mut ids = Vec::new();
        for offset in 0..6 {
            let key = if offset % 2 == 0 { "click" } else { "view" };
            let created = start + Duration::seconds(offset);
            ids.push(storage.insert_behavior(&record(key, 3, created)).unwrap().unwrap());
        }
        storage
            .soft_delete_behavior(ids[0], start + Duration::hours(1))
            .unwrap();

        let clicks = BehaviorQuery::new("click", 0, None, None, 1, 10);
        let rows = storage.query_behaviors(&clicks).unwrap();
        assert_eq!(
            rows.iter().map(|row| row.id).collect::<Vec<_>>(),
            vec![ids[4], ids[2]]
        );
        assert_eq!(storage.count_behaviors(&clicks).unwrap(), 2);

        let window = BehaviorQuery::new(
            "",
            3,
            Some(start + Duration::seconds(1)),
            Some(start + Duration::seconds(3)),
            1,
            10,
        );
        assert_eq!(storage.count_behaviors(&window).unwrap(), 3);

        let other_user = BehaviorQuery::new("", 4, None, None, 1, 10);
        assert!(storage.query_behaviors(&other_user).unwrap().is_empty());
        assert_eq!(storage.count_behaviors(&other_user).unwrap(), 0);
    }
}
