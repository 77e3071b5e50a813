// API 路由汇总入口：行为接口 + 健康检查，并挂载请求级语言上下文。
pub mod behavior;
pub mod errors;

use crate::i18n;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use futures::FutureExt;
use serde_json::json;
use std::any::Any as StdAny;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, warn};

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(behavior::router())
        .layer(from_fn_with_state(state.clone(), language_guard))
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    let storage = state.storage.clone();
    let backend = storage.backend_name();
    let checked = tokio::task::spawn_blocking(move || storage.ensure_initialized()).await;
    match checked {
        Ok(Ok(())) => Json(json!({ "status": "ok", "storage": backend })).into_response(),
        Ok(Err(err)) => {
            warn!("health check failed on {backend}: {err:#}");
            errors::error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                i18n::t("error.storage_unavailable"),
            )
        }
        Err(err) => {
            warn!("health check task failed: {err}");
            errors::error_response(StatusCode::INTERNAL_SERVER_ERROR, i18n::t("error.internal"))
        }
    }
}

async fn language_guard(
    _state: State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let language = resolve_language_from_request(&request);
    let response =
        i18n::with_language(language.clone(), async move { next.run(request).await }).await;
    let mut response = response;
    if !response.headers().contains_key("content-language") {
        if let Ok(value) = language.parse() {
            response.headers_mut().insert("content-language", value);
        }
    }
    Ok(response)
}

/// 最外层中间件：处理函数 panic 时返回 500 错误包而不是断开连接。
pub async fn panic_guard(request: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let language = resolve_language_from_request(&request);
    let result = AssertUnwindSafe(next.run(request)).catch_unwind().await;
    match result {
        Ok(response) => Ok(response),
        Err(panic) => {
            let detail = panic_message(panic.as_ref());
            error!("panic while handling {method} {path}: {detail}");
            let message = i18n::with_language(language, async { i18n::t("error.internal") }).await;
            Ok(errors::error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                message,
            ))
        }
    }
}

fn panic_message(panic: &(dyn StdAny + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        return message.to_string();
    }
    if let Some(message) = panic.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic".to_string()
}

fn resolve_language_from_request(request: &Request<Body>) -> String {
    let headers = request.headers();
    let mut candidates: Vec<String> = Vec::new();
    if let Some(value) = headers
        .get("x-behavior-language")
        .and_then(|v| v.to_str().ok())
    {
        candidates.push(value.to_string());
    }
    if let Some(value) = headers.get("accept-language").and_then(|v| v.to_str().ok()) {
        candidates.push(value.to_string());
    }
    if let Some(query) = request.uri().query() {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if (key == "lang" || key == "language") && !value.trim().is_empty() {
                candidates.push(value.to_string());
            }
        }
    }
    i18n::resolve_language(candidates.iter().map(|value| value.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::middleware::from_fn;
    use serde_json::Value;
    use tower::ServiceExt;

    #[tokio::test]
    async fn panic_guard_returns_error_envelope() {
        let app = Router::new()
            .route(
                "/boom",
                get(|| async {
                    if true {
                        panic!("handler exploded");
                    }
                    "unreachable"
                }),
            )
            .layer(from_fn(panic_guard));
        let request = Request::builder()
            .uri("/boom?lang=en-US")
            .body(Body::empty())
            .expect("build request");
        let response = app.oneshot(request).await.expect("call router");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        let payload: Value = serde_json::from_slice(&body).expect("parse response json");
        assert_eq!(payload["error"]["code"], json!("INTERNAL_ERROR"));
        assert_eq!(payload["error"]["message"], json!("Internal server error"));
    }
}
