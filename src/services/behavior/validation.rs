// 请求校验：纯函数，失败时返回带标签的 InvalidArgument。
use super::error::BehaviorError;
use crate::config::BehaviorConfig;
use crate::schemas::RecordBehaviorRequest;
use chrono::{DateTime, Utc};

pub fn validate_id(id: i64, tag: &'static str) -> Result<(), BehaviorError> {
    if id <= 0 {
        return Err(BehaviorError::invalid_argument(
            tag,
            "behavior.error.id_invalid",
        ));
    }
    Ok(())
}

/// 依次检查 key、user_id、data，首个失败即返回。
pub fn validate_record(request: &RecordBehaviorRequest) -> Result<(), BehaviorError> {
    if request.key.is_empty() {
        return Err(BehaviorError::invalid_argument(
            "RB001",
            "behavior.error.key_required",
        ));
    }
    if request.user_id <= 0 {
        return Err(BehaviorError::invalid_argument(
            "RB002",
            "behavior.error.user_id_invalid",
        ));
    }
    if request.data.is_empty() {
        return Err(BehaviorError::invalid_argument(
            "RB003",
            "behavior.error.data_required",
        ));
    }
    Ok(())
}

pub struct BatchSizeTags {
    pub empty: &'static str,
    pub too_many: &'static str,
    pub empty_key: &'static str,
    pub too_many_key: &'static str,
}

pub const BATCH_RECORD_TAGS: BatchSizeTags = BatchSizeTags {
    empty: "BRB001",
    too_many: "BRB002",
    empty_key: "behavior.error.batch_record_empty",
    too_many_key: "behavior.error.batch_record_too_many",
};

pub const BATCH_DELETE_TAGS: BatchSizeTags = BatchSizeTags {
    empty: "BDB001",
    too_many: "BDB002",
    empty_key: "behavior.error.batch_delete_empty",
    too_many_key: "behavior.error.batch_delete_too_many",
};

pub fn validate_batch_size(
    len: usize,
    max: usize,
    tags: &BatchSizeTags,
) -> Result<(), BehaviorError> {
    if len == 0 {
        return Err(BehaviorError::invalid_argument(tags.empty, tags.empty_key));
    }
    if len > max {
        return Err(BehaviorError::invalid_argument_with_max(
            tags.too_many,
            tags.too_many_key,
            max,
        ));
    }
    Ok(())
}

/// 归一化分页参数：非正值取默认，超过上限则拒绝。
pub fn normalize_pagination(
    page: i64,
    page_size: i64,
    limits: &BehaviorConfig,
) -> Result<(i64, i64), BehaviorError> {
    let page = if page <= 0 { 1 } else { page };
    let page_size = if page_size <= 0 {
        limits.default_page_size.max(1)
    } else {
        page_size
    };
    if page_size > limits.max_page_size {
        return Err(BehaviorError::invalid_argument_with_max(
            "LB001",
            "behavior.error.page_size_too_large",
            limits.max_page_size,
        ));
    }
    Ok((page, page_size))
}

/// 毫秒时间边界，非正值表示不限。
pub fn parse_time_bound(millis: i64) -> Result<Option<DateTime<Utc>>, BehaviorError> {
    if millis <= 0 {
        return Ok(None);
    }
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(Some)
        .ok_or_else(|| {
            BehaviorError::invalid_argument("LB004", "behavior.error.time_range_invalid")
        })
}
