// API 请求与响应数据结构，时间戳一律以毫秒整数跨越接口边界。
use crate::storage::BehaviorRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RecordBehaviorRequest {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordBehaviorResponse {
    pub success: bool,
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchRecordBehaviorRequest {
    #[serde(default)]
    pub behaviors: Vec<RecordBehaviorRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecordBehaviorResponse {
    pub success_count: i64,
    pub fail_count: i64,
    pub success_list: Vec<RecordBehaviorResponse>,
    pub fail_list: Vec<RecordBehaviorRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorPayload {
    pub id: i64,
    pub key: String,
    pub user_id: i64,
    pub data: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&BehaviorRecord> for BehaviorPayload {
    fn from(record: &BehaviorRecord) -> Self {
        Self {
            id: record.id,
            key: record.key.clone(),
            user_id: record.user_id,
            data: record.data.clone(),
            created_at: record.created_at.timestamp_millis(),
            updated_at: record.updated_at.timestamp_millis(),
        }
    }
}

/// 列表查询参数；0 或缺省表示不过滤，分页参数非正时取默认值。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListBehaviorsRequest {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub start_time: i64,
    #[serde(default)]
    pub end_time: i64,
    #[serde(default)]
    pub page: i64,
    #[serde(default)]
    pub page_size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListBehaviorsResponse {
    pub list: Vec<BehaviorPayload>,
    pub total: i64,
    pub page: i64,
    pub size: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteBehaviorResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchDeleteBehaviorRequest {
    #[serde(default)]
    pub ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDeleteBehaviorResponse {
    pub deleted_count: i64,
    pub failed_ids: Vec<i64>,
}
