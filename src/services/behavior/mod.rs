// 行为服务：校验 + 单行持久化 + 列表查询的编排，批量逻辑见 batch 模块。
mod batch;
pub mod error;
pub mod validation;

use crate::config::BehaviorConfig;
use crate::schemas::{
    BehaviorPayload, DeleteBehaviorResponse, ListBehaviorsRequest, ListBehaviorsResponse,
    RecordBehaviorRequest, RecordBehaviorResponse,
};
use crate::storage::{BehaviorQuery, NewBehaviorRecord, StorageBackend};
use anyhow::anyhow;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};

pub use error::{BehaviorError, BehaviorErrorKind};
use validation::{normalize_pagination, parse_time_bound, validate_id, validate_record};

#[derive(Clone)]
pub struct BehaviorService {
    storage: Arc<dyn StorageBackend>,
    limits: BehaviorConfig,
}

impl BehaviorService {
    pub fn new(storage: Arc<dyn StorageBackend>, limits: BehaviorConfig) -> Self {
        Self { storage, limits }
    }

    pub fn limits(&self) -> &BehaviorConfig {
        &self.limits
    }

    /// 存储调用是同步的，统一放到阻塞线程池执行。
    async fn with_storage<T, F>(&self, call: F) -> anyhow::Result<T>
    where
        F: FnOnce(&dyn StorageBackend) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let storage = self.storage.clone();
        tokio::task::spawn_blocking(move || call(storage.as_ref()))
            .await
            .map_err(|err| anyhow!(err.to_string()))?
    }

    pub async fn record(
        &self,
        request: &RecordBehaviorRequest,
    ) -> Result<RecordBehaviorResponse, BehaviorError> {
        validate_record(request)?;
        let now = Utc::now();
        let record = NewBehaviorRecord {
            key: request.key.clone(),
            user_id: request.user_id,
            data: request.data.clone(),
            created_at: now,
            updated_at: now,
        };
        let inserted = self
            .with_storage(move |storage| storage.insert_behavior(&record))
            .await
            .map_err(|err| {
                error!(
                    "[RB004] insert behavior failed, key={}, user_id={}: {err:#}",
                    request.key, request.user_id
                );
                BehaviorError::internal("RB004", "behavior.error.record_failed")
            })?;
        // 写入已经发生，拿不到 id 时仍按成功返回。
        let id = inserted.unwrap_or_else(|| {
            info!(
                "inserted behavior id unavailable, key={}, user_id={}",
                request.key, request.user_id
            );
            0
        });
        Ok(RecordBehaviorResponse { success: true, id })
    }

    pub async fn get(&self, id: i64) -> Result<BehaviorPayload, BehaviorError> {
        validate_id(id, "GB001")?;
        let found = self
            .with_storage(move |storage| storage.get_behavior(id))
            .await
            .map_err(|err| {
                error!("[GB003] load behavior {id} failed: {err:#}");
                BehaviorError::internal("GB003", "behavior.error.lookup_failed")
            })?;
        let Some(record) = found else {
            return Err(BehaviorError::not_found("GB002", "behavior.error.not_found"));
        };
        if record.is_deleted() {
            return Err(BehaviorError::not_found(
                "GB004",
                "behavior.error.already_deleted",
            ));
        }
        Ok(BehaviorPayload::from(&record))
    }

    pub async fn list(
        &self,
        request: ListBehaviorsRequest,
    ) -> Result<ListBehaviorsResponse, BehaviorError> {
        let (page, page_size) =
            normalize_pagination(request.page, request.page_size, &self.limits)?;
        let start_time = parse_time_bound(request.start_time)?;
        let end_time = parse_time_bound(request.end_time)?;
        let query = BehaviorQuery::new(
            &request.key,
            request.user_id,
            start_time,
            end_time,
            page,
            page_size,
        );

        let rows_query = query.clone();
        let rows = self
            .with_storage(move |storage| storage.query_behaviors(&rows_query))
            .await
            .map_err(|err| {
                error!("[LB002] list behaviors failed: {err:#}");
                BehaviorError::internal("LB002", "behavior.error.list_failed")
            })?;
        let total = self
            .with_storage(move |storage| storage.count_behaviors(&query))
            .await
            .map_err(|err| {
                error!("[LB003] count behaviors failed: {err:#}");
                BehaviorError::internal("LB003", "behavior.error.count_failed")
            })?;

        Ok(ListBehaviorsResponse {
            list: rows.iter().map(BehaviorPayload::from).collect(),
            total,
            page,
            size: page_size,
        })
    }

    pub async fn delete(&self, id: i64) -> Result<DeleteBehaviorResponse, BehaviorError> {
        validate_id(id, "DB001")?;
        let found = self
            .with_storage(move |storage| storage.get_behavior(id))
            .await
            .map_err(|err| {
                error!("[DB003] load behavior {id} failed: {err:#}");
                BehaviorError::internal("DB003", "behavior.error.lookup_failed")
            })?;
        let Some(record) = found else {
            return Err(BehaviorError::not_found("DB002", "behavior.error.not_found"));
        };
        if record.is_deleted() {
            return Err(BehaviorError::not_found(
                "DB004",
                "behavior.error.already_deleted",
            ));
        }
        let changed = self
            .with_storage(move |storage| storage.soft_delete_behavior(id, Utc::now()))
            .await
            .map_err(|err| {
                error!("[DB005] soft delete behavior {id} failed: {err:#}");
                BehaviorError::internal("DB005", "behavior.error.delete_failed")
            })?;
        // 并发删除时只有一方真正改动该行，另一方视为已删除。
        if !changed {
            return Err(BehaviorError::not_found(
                "DB004",
                "behavior.error.already_deleted",
            ));
        }
        Ok(DeleteBehaviorResponse { success: true })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{BatchDeleteBehaviorRequest, BatchRecordBehaviorRequest};
    use crate::storage::{BehaviorRecord, SqliteStorage};
    use anyhow::Result;
    use chrono::DateTime;
    use parking_lot::Mutex;

    fn sqlite_service(dir: &tempfile::TempDir) -> BehaviorService {
        let path = dir.path().join("service.db");
        let storage = SqliteStorage::new(path.to_string_lossy().to_string());
        BehaviorService::new(Arc::new(storage), BehaviorConfig::default())
    }

    fn request(key: &str, user_id: i64, data: &str) -> RecordBehaviorRequest {
        RecordBehaviorRequest {
            key: key.to_string(),
            user_id,
            data: data.to_string(),
        }
    }

    /// 插入成功但不返回 id、或在指定 id 上失败的存储桩。
    struct FlakyStorage {
        fail_key: String,
        rows: Mutex<Vec<BehaviorRecord>>,
    }

    impl StorageBackend for FlakyStorage {
        fn ensure_initialized(&self) -> Result<()> {
            Ok(())
        }

        fn backend_name(&self) -> &'static str {
            "flaky"
        }

        fn insert_behavior(&self, record: &NewBehaviorRecord) -> Result<Option<i64>> {
            if record.key == self.fail_key {
                return Err(anyhow!("connection reset by peer"));
            }
            let mut rows = self.rows.lock();
            let id = rows.len() as i64 + 1;
            rows.push(BehaviorRecord {
                id,
                key: record.key.clone(),
                user_id: record.user_id,
                data: record.data.clone(),
                created_at: record.created_at,
                updated_at: record.updated_at,
                deleted_at: None,
            });
            Ok(None)
        }

        fn get_behavior(&self, id: i64) -> Result<Option<BehaviorRecord>> {
            if id == 13 {
                return Err(anyhow!("disk I/O error"));
            }
            Ok(self.rows.lock().iter().find(|row| row.id == id).cloned())
        }

        fn soft_delete_behavior(&self, _id: i64, _deleted_at: DateTime<Utc>) -> Result<bool> {
            // 模拟被并发删除抢先：查到时未删除，更新时已无可改动的行。
            Ok(false)
        }

        fn query_behaviors(&self, _query: &BehaviorQuery) -> Result<Vec<BehaviorRecord>> {
            Err(anyhow!("relation \"behaviors\" does not exist"))
        }

        fn count_behaviors(&self, _query: &BehaviorQuery) -> Result<i64> {
            Ok(0)
        }
    }

    fn flaky_service() -> BehaviorService {
        let storage = FlakyStorage {
            fail_key: "boom".to_string(),
            rows: Mutex::new(Vec::new()),
        };
        BehaviorService::new(Arc::new(storage), BehaviorConfig::default())
    }

    #[tokio::test]
    async fn record_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let service = sqlite_service(&dir);
        let before = Utc::now().timestamp_millis();
        let recorded = service
            .record(&request("click", 5, "{\"x\":1}"))
            .await
            .unwrap();
        let after = Utc::now().timestamp_millis();
        assert!(recorded.success);
        assert!(recorded.id > 0);

        let loaded = service.get(recorded.id).await.unwrap();
        assert_eq!(loaded.key, "click");
        assert_eq!(loaded.user_id, 5);
        assert_eq!(loaded.data, "{\"x\":1}");
        assert!(loaded.created_at >= before && loaded.created_at <= after);
        assert_eq!(loaded.created_at, loaded.updated_at);
    }

    #[tokio::test]
    async fn invalid_record_is_rejected_before_storage() {
        let service = flaky_service();
        let err = service.record(&request("", 1, "x")).await.unwrap_err();
        assert_eq!(err.kind(), BehaviorErrorKind::InvalidArgument);
        assert_eq!(err.tag(), "RB001");
    }

    #[tokio::test]
    async fn record_without_assigned_id_reports_zero() {
        let service = flaky_service();
        let recorded = service.record(&request("click", 1, "x")).await.unwrap();
        assert_eq!(recorded, RecordBehaviorResponse { success: true, id: 0 });
    }

    #[tokio::test]
    async fn storage_failures_become_opaque_internal_errors() {
        let service = flaky_service();
        let err = service.record(&request("boom", 1, "x")).await.unwrap_err();
        assert_eq!(err.kind(), BehaviorErrorKind::Internal);
        assert_eq!(err.tag(), "RB004");
        assert!(!err.message().contains("connection reset"));

        let err = service.get(13).await.unwrap_err();
        assert_eq!(err.tag(), "GB003");
        assert!(!err.to_string().contains("disk I/O"));

        let err = service
            .list(ListBehaviorsRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), BehaviorErrorKind::Internal);
        assert_eq!(err.tag(), "LB002");
        assert!(!err.message().contains("relation"));
    }

    #[tokio::test]
    async fn lost_delete_race_reports_not_found() {
        let service = flaky_service();
        service.record(&request("click", 1, "x")).await.unwrap();
        let err = service.delete(1).await.unwrap_err();
        assert_eq!(err.kind(), BehaviorErrorKind::NotFound);
        assert_eq!(err.tag(), "DB004");
    }

    #[tokio::test]
    async fn get_and_delete_distinguish_missing_and_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let service = sqlite_service(&dir);
        let id = service
            .record(&request("view", 2, "payload"))
            .await
            .unwrap()
            .id;

        assert_eq!(service.get(0).await.unwrap_err().tag(), "GB001");
        assert_eq!(service.get(id + 50).await.unwrap_err().tag(), "GB002");
        assert_eq!(service.delete(-1).await.unwrap_err().tag(), "DB001");
        assert_eq!(service.delete(id + 50).await.unwrap_err().tag(), "DB002");

        assert!(service.delete(id).await.unwrap().success);
        let again = service.delete(id).await.unwrap_err();
        assert_eq!(again.kind(), BehaviorErrorKind::NotFound);
        assert_eq!(again.tag(), "DB004");
        assert_eq!(service.get(id).await.unwrap_err().tag(), "GB004");
    }

    #[tokio::test]
    async fn batch_record_isolates_item_failures() {
        let service = flaky_service();
        let items = vec![
            request("a", 1, "x"),
            request("b", 1, ""),
            request("boom", 1, "x"),
            request("c", 0, "x"),
            request("d", 2, "y"),
        ];
        let response = service
            .batch_record(BatchRecordBehaviorRequest {
                behaviors: items.clone(),
            })
            .await
            .unwrap();
        assert_eq!(response.success_count, 2);
        assert_eq!(response.fail_count, 3);
        assert_eq!(
            response.fail_list,
            vec![items[1].clone(), items[2].clone(), items[3].clone()]
        );
        assert!(response.success_list.iter().all(|item| item.success));
    }

    #[tokio::test]
    async fn batch_delete_collects_failed_ids() {
        let service = flaky_service();
        let response = service
            .batch_delete(BatchDeleteBehaviorRequest {
                ids: vec![0, 13, 77],
            })
            .await
            .unwrap();
        assert_eq!(response.deleted_count, 0);
        assert_eq!(response.failed_ids, vec![0, 13, 77]);
    }

    #[tokio::test]
    async fn batch_size_violations_fail_the_whole_call() {
        let service = flaky_service();
        let empty = service
            .batch_record(BatchRecordBehaviorRequest {
                behaviors: Vec::new(),
            })
            .await
            .unwrap_err();
        assert_eq!(empty.tag(), "BRB001");

        let oversized = service
            .batch_delete(BatchDeleteBehaviorRequest {
                ids: (1..=101).collect(),
            })
            .await
            .unwrap_err();
        assert_eq!(oversized.kind(), BehaviorErrorKind::InvalidArgument);
        assert_eq!(oversized.tag(), "BDB002");
    }
}
