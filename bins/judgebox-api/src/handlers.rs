// HTTP route handlers for the Judgebox API

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use judgebox_common::error::JudgeError;
use judgebox_common::types::SubmissionStatus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::metrics;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub code: String,
    pub language: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub submission_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: SubmissionStatus,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Submitters only ever see a status or a short reason
pub struct ApiError(JudgeError);

impl From<JudgeError> for ApiError {
    fn from(err: JudgeError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            JudgeError::UnsupportedLanguage(_) => (StatusCode::BAD_REQUEST, self.0.to_string()),
            JudgeError::EnqueueFailed(_) | JudgeError::QueueUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "submission could not be queued".to_string(),
            ),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string()),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

/// POST /submit - Accept code for execution
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    match state.intake.submit(payload.code, &payload.language).await {
        Ok((submission_id, language)) => {
            metrics::record_submission(language.as_str());
            Ok((StatusCode::CREATED, Json(SubmitResponse { submission_id })))
        }
        Err(e) => {
            let reason = match e {
                JudgeError::UnsupportedLanguage(_) => "unsupported_language",
                _ => "queue_unavailable",
            };
            metrics::record_rejection(reason);
            Err(e.into())
        }
    }
}

/// GET /status/:id - Current status of a submission
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<String>,
) -> Json<StatusResponse> {
    let status = state.intake.get_status(&submission_id).await;
    Json(StatusResponse { status })
}

/// GET /health - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus scrape endpoint
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.intake.queue_depth().await {
        Ok(depth) => metrics::set_queue_depth(depth),
        Err(e) => tracing::warn!(error = %e, "Could not read queue depth"),
    }

    match metrics::render_metrics() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::SubmissionService;
    use crate::routes;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use axum::Router;
    use judgebox_common::queue::{JobQueue, MemoryQueue};
    use judgebox_common::status::{MemoryStatusLog, StatusLog};
    use judgebox_common::types::{Job, Language, StatusEvent};
    use tower::ServiceExt;

    fn app() -> (Arc<MemoryQueue>, Arc<AppState>, Router) {
        let (queue, _, state, router) = app_with_log();
        (queue, state, router)
    }

    fn app_with_log() -> (Arc<MemoryQueue>, Arc<MemoryStatusLog>, Arc<AppState>, Router) {
        let queue = Arc::new(MemoryQueue::new());
        let log = Arc::new(MemoryStatusLog::new());
        let state = Arc::new(AppState {
            intake: Arc::new(SubmissionService::new(queue.clone(), log.clone())),
        });
        let router = routes::routes().with_state(state.clone());
        (queue, log, state, router)
    }

    fn submit_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/submit")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn status_of(router: Router, id: &str) -> SubmissionStatus {
        let response = router
            .oneshot(
                Request::builder()
                    .uri(format!("/status/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice::<StatusResponse>(&body).unwrap().status
    }

    #[tokio::test]
    async fn test_submit_then_poll() {
        let (queue, _, router) = app();

        let response = router
            .clone()
            .oneshot(submit_request(r#"{"code":"print(\"hi\")","language":"python"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let submitted: SubmitResponse = serde_json::from_slice(&body).unwrap();

        assert_eq!(status_of(router, &submitted.submission_id).await, SubmissionStatus::Pending);
        assert_eq!(queue.depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_status_reflects_worker_events() {
        let (_, state, router) = app();
        let (id, _) = state.intake.submit("print(1)".to_string(), "python").await.unwrap();

        state
            .intake
            .apply(&StatusEvent {
                submission_id: id.clone(),
                status: SubmissionStatus::TimeLimitExceeded,
                language: Some(Language::Python),
                exit_code: Some(-1),
                execution_time_ms: Some(60_000),
            })
            .await;

        assert_eq!(status_of(router, &id).await, SubmissionStatus::TimeLimitExceeded);
    }

    #[tokio::test]
    async fn test_poll_completes_without_subscriber() {
        let (queue, log, _, router) = app_with_log();

        let response = router
            .clone()
            .oneshot(submit_request(r#"{"code":"print(\"hi\")","language":"python"}"#))
            .await
            .unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let submitted: SubmitResponse = serde_json::from_slice(&body).unwrap();

        // Stand in for a worker whose events never reached the subscriber
        let job: Job = queue.dequeue(std::time::Duration::from_millis(10)).await.unwrap().unwrap();
        log.record(&StatusEvent::running(&job)).await.unwrap();
        log.record(&StatusEvent::internal_error(&job)).await.unwrap();

        assert_eq!(
            status_of(router, &submitted.submission_id).await,
            SubmissionStatus::InternalError
        );
    }

    #[tokio::test]
    async fn test_unknown_status_is_not_found() {
        let (_, _, router) = app();
        assert_eq!(status_of(router, "nope").await, SubmissionStatus::NotFound);
    }

    #[tokio::test]
    async fn test_unsupported_language_is_bad_request() {
        let (queue, _, router) = app();

        let response = router
            .oneshot(submit_request(r#"{"code":"x","language":"brainfuck"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_queue_down_is_service_unavailable() {
        let (queue, state, router) = app();
        queue.set_unavailable(true);

        let response = router
            .oneshot(submit_request(r#"{"code":"print(1)","language":"python"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.intake.tracked().await, 0);
    }

    #[tokio::test]
    async fn test_health() {
        let (_, _, router) = app();
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
