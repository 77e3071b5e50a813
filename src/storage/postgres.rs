use crate::storage::query::{build_count, build_select, Placeholder, QueryValue, NOT_DELETED};
use crate::storage::{BehaviorQuery, BehaviorRecord, NewBehaviorRecord, StorageBackend};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;

const DEFAULT_POOL_SIZE: usize = 16;

pub struct PostgresStorage {
    pool: Pool,
    initialized: AtomicBool,
    init_guard: Mutex<()>,
    fallback_runtime: tokio::runtime::Runtime,
}

struct PgConn<'a> {
    storage: &'a PostgresStorage,
    client: deadpool_postgres::Client,
}

impl PgConn<'_> {
    fn batch_execute(&mut self, query: &str) -> Result<()> {
        self.storage.block_on(self.client.batch_execute(query))??;
        Ok(())
    }

    fn execute(&mut self, query: &str, params: &[&(dyn ToSql + Sync)]) -> Result<u64> {
        Ok(self
            .storage
            .block_on(self.client.execute(query, params))??)
    }

    fn query(
        &mut self,
        query: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<tokio_postgres::Row>> {
        Ok(self.storage.block_on(self.client.query(query, params))??)
    }

    fn query_one(
        &mut self,
        query: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<tokio_postgres::Row> {
        Ok(self
            .storage
            .block_on(self.client.query_one(query, params))??)
    }

    fn query_opt(
        &mut self,
        query: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Option<tokio_postgres::Row>> {
        Ok(self
            .storage
            .block_on(self.client.query_opt(query, params))??)
    }
}

impl PostgresStorage {
    pub fn new(dsn: String, connect_timeout_s: u64, pool_size: usize) -> Result<Self> {
        let cleaned = dsn.trim().to_string();
        if cleaned.is_empty() {
            return Err(anyhow!("postgres dsn is empty"));
        }
        let timeout = Duration::from_secs(connect_timeout_s.max(1));
        let mut config = cleaned.parse::<tokio_postgres::Config>()?;
        config.connect_timeout(timeout);
        let manager_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let manager = Manager::from_config(config, NoTls, manager_config);
        let max_size = if pool_size == 0 {
            DEFAULT_POOL_SIZE
        } else {
            pool_size
        };
        let pool = Pool::builder(manager).max_size(max_size).build()?;
        let fallback_runtime = tokio::runtime::Runtime::new()
            .map_err(|err| anyhow!("create tokio runtime for postgres: {err}"))?;
        Ok(Self {
            pool,
            initialized: AtomicBool::new(false),
            init_guard: Mutex::new(()),
            fallback_runtime,
        })
    }

    fn block_on<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => Ok(tokio::task::block_in_place(|| handle.block_on(fut))),
            Err(_) => Ok(self.fallback_runtime.block_on(fut)),
        }
    }

    fn conn(&self) -> Result<PgConn<'_>> {
        let client = self.block_on(self.pool.get())??;
        Ok(PgConn {
            storage: self,
            client,
        })
    }

    fn bind_values(values: Vec<QueryValue>) -> Vec<Box<dyn ToSql + Sync>> {
        values
            .into_iter()
            .map(|value| -> Box<dyn ToSql + Sync> {
                match value {
                    QueryValue::Text(text) => Box::new(text),
                    QueryValue::Integer(number) => Box::new(number),
                    QueryValue::Timestamp(time) => Box::new(time),
                }
            })
            .collect()
    }

    fn row_to_record(row: &tokio_postgres::Row) -> BehaviorRecord {
        BehaviorRecord {
            id: row.get(0),
            key: row.get(1),
            user_id: row.get(2),
            data: row.get(3),
            created_at: row.get(4),
            updated_at: row.get(5),
            deleted_at: row.get(6),
        }
    }
}

impl StorageBackend for PostgresStorage {
    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        let _guard = self.init_guard.lock();
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let mut conn = match self.conn() {
                Ok(conn) => conn,
                Err(err) => {
                    if attempts >= 5 {
                        return Err(err);
                    }
                    std::thread::sleep(Duration::from_secs(1));
                    continue;
                }
            };
            let result = conn.batch_execute(
                r#"
                CREATE TABLE IF NOT EXISTS behaviors (
                  id BIGSERIAL PRIMARY KEY,
                  "key" TEXT NOT NULL,
                  user_id BIGINT NOT NULL,
                  data TEXT NOT NULL,
                  created_at TIMESTAMPTZ NOT NULL,
                  updated_at TIMESTAMPTZ NOT NULL,
                  deleted_at TIMESTAMPTZ
                );
                CREATE INDEX IF NOT EXISTS idx_behaviors_key_created
                  ON behaviors ("key", created_at);
                CREATE INDEX IF NOT EXISTS idx_behaviors_user_created
                  ON behaviors (user_id, created_at);
                "#,
            );
            match result {
                Ok(_) => {
                    self.initialized.store(true, Ordering::SeqCst);
                    return Ok(());
                }
                Err(err) => {
                    if attempts >= 5 {
                        return Err(err);
                    }
                    std::thread::sleep(Duration::from_secs(1));
                }
            }
        }
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    fn insert_behavior(&self, record: &NewBehaviorRecord) -> Result<Option<i64>> {
        self.ensure_initialized()?;
        let mut conn = self.conn()?;
        let row = conn.query_opt(
            "INSERT INTO behaviors (\"key\", user_id, data, created_at, updated_at, deleted_at) \
             VALUES ($1, $2, $3, $4, $5, NULL) RETURNING id",
            &[
                &record.key,
                &record.user_id,
                &record.data,
                &record.created_at,
                &record.updated_at,
            ],
        )?;
        Ok(row.map(|row| row.get::<_, i64>(0)))
    }

    fn get_behavior(&self, id: i64) -> Result<Option<BehaviorRecord>> {
        self.ensure_initialized()?;
        let mut conn = self.conn()?;
        let row = conn.query_opt(
            "SELECT id, \"key\", user_id, data, created_at, updated_at, deleted_at \
             FROM behaviors WHERE id = $1",
            &[&id],
        )?;
        Ok(row.as_ref().map(Self::row_to_record))
    }

    fn soft_delete_behavior(&self, id: i64, deleted_at: DateTime<Utc>) -> Result<bool> {
        self.ensure_initialized()?;
        let mut conn = self.conn()?;
        let affected = conn.execute(
            &format!(
                "UPDATE behaviors SET deleted_at = $1, updated_at = $1 WHERE id = $2 AND {NOT_DELETED}"
            ),
            &[&deleted_at, &id],
        )?;
        Ok(affected > 0)
    }

    fn query_behaviors(&self, query: &BehaviorQuery) -> Result<Vec<BehaviorRecord>> {
        self.ensure_initialized()?;
        let statement = build_select(query, Placeholder::Dollar);
        let params = Self::bind_values(statement.values);
        let params_ref: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|value| value.as_ref()).collect();
        let mut conn = self.conn()?;
        let rows = conn.query(&statement.text, &params_ref)?;
        Ok(rows.iter().map(Self::row_to_record).collect())
    }

    fn count_behaviors(&self, query: &BehaviorQuery) -> Result<i64> {
        self.ensure_initialized()?;
        let statement = build_count(query, Placeholder::Dollar);
        let params = Self::bind_values(statement.values);
        let params_ref: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|value| value.as_ref()).collect();
        let mut conn = self.conn()?;
        let row = conn.query_one(&statement.text, &params_ref)?;
        Ok(row.get::<_, i64>(0))
    }
}
