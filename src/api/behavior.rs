// 行为数据接口：请求解析后交给 BehaviorService，错误统一转换为错误包。
use crate::api::errors::{
    behavior_error_response, error_response_with_detail, hint_for_error_code,
};
use crate::i18n;
use crate::schemas::{
    BatchDeleteBehaviorRequest, BatchRecordBehaviorRequest, ListBehaviorsRequest,
    RecordBehaviorRequest,
};
use crate::state::AppState;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::get, routing::post, Json, Router};
use std::collections::HashMap;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/behavior/v1/record", post(record_behavior))
        .route("/behavior/v1/batch_record", post(batch_record_behavior))
        .route("/behavior/v1/behaviors", get(list_behaviors))
        .route(
            "/behavior/v1/behaviors/{id}",
            get(get_behavior).delete(delete_behavior),
        )
        .route("/behavior/v1/batch_delete", post(batch_delete_behavior))
}

async fn record_behavior(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RecordBehaviorRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let Json(payload) = payload.map_err(|err| invalid_request("INVALID_JSON", err.body_text()))?;
    let result = state
        .behavior
        .record(&payload)
        .await
        .map_err(|err| behavior_error_response(&err))?;
    Ok(Json(result).into_response())
}

async fn batch_record_behavior(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BatchRecordBehaviorRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let Json(payload) = payload.map_err(|err| invalid_request("INVALID_JSON", err.body_text()))?;
    let result = state
        .behavior
        .batch_record(payload)
        .await
        .map_err(|err| behavior_error_response(&err))?;
    Ok(Json(result).into_response())
}

async fn get_behavior(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Result<Response, Response> {
    let result = state
        .behavior
        .get(parse_path_id(&id))
        .await
        .map_err(|err| behavior_error_response(&err))?;
    Ok(Json(result).into_response())
}

async fn list_behaviors(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ListBehaviorsRequest>, QueryRejection>,
) -> Result<Response, Response> {
    let Query(query) =
        query.map_err(|err| invalid_request("INVALID_ARGUMENT", err.body_text()))?;
    let result = state
        .behavior
        .list(query)
        .await
        .map_err(|err| behavior_error_response(&err))?;
    Ok(Json(result).into_response())
}

async fn delete_behavior(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Result<Response, Response> {
    let result = state
        .behavior
        .delete(parse_path_id(&id))
        .await
        .map_err(|err| behavior_error_response(&err))?;
    Ok(Json(result).into_response())
}

async fn batch_delete_behavior(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BatchDeleteBehaviorRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let Json(payload) = payload.map_err(|err| invalid_request("INVALID_JSON", err.body_text()))?;
    let result = state
        .behavior
        .batch_delete(payload)
        .await
        .map_err(|err| behavior_error_response(&err))?;
    Ok(Json(result).into_response())
}

/// 路径中的非数字 id 按 0 处理，交由服务层给出带标签的参数错误。
fn parse_path_id(raw: &str) -> i64 {
    raw.trim().parse::<i64>().unwrap_or(0)
}

fn invalid_request(code: &str, detail: String) -> Response {
    let mut params = HashMap::new();
    params.insert("detail".to_string(), detail);
    let message = i18n::t_with_params("error.invalid_request", &params);
    error_response_with_detail(
        StatusCode::BAD_REQUEST,
        Some(code),
        message,
        hint_for_error_code(code),
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_id_parsing_falls_back_to_zero() {
        assert_eq!(parse_path_id("42"), 42);
        assert_eq!(parse_path_id(" 7 "), 7);
        assert_eq!(parse_path_id("-3"), -3);
        assert_eq!(parse_path_id("abc"), 0);
        assert_eq!(parse_path_id("99999999999999999999"), 0);
    }
}
