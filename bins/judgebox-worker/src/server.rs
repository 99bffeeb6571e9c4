// Engine-facing HTTP surface: run one job synchronously

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use judgebox_common::error::JudgeError;
use judgebox_common::types::{ExecutionStatus, Job, Language};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::engine::ExecutionEngine;

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub submission_id: String,
    pub code: String,
    pub language: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub submission_id: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub status: ExecutionStatus,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

pub fn routes(engine: Arc<dyn ExecutionEngine>) -> Router {
    Router::new()
        .route("/execute", post(execute))
        .route("/health", get(health_check))
        .with_state(engine)
}

/// POST /execute - Run a job and wait for its result
async fn execute(
    State(engine): State<Arc<dyn ExecutionEngine>>,
    Json(request): Json<ExecuteRequest>,
) -> Response {
    let language: Language = match request.language.parse() {
        Ok(language) => language,
        Err(e) => return error(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let job = Job::new(request.submission_id, request.code, language);
    match engine.execute(&job).await {
        Ok(result) => Json(ExecuteResponse {
            submission_id: job.submission_id,
            stdout: String::from_utf8_lossy(&result.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
            exit_code: result.exit_code,
            status: result.status,
        })
        .into_response(),
        Err(e) => {
            tracing::error!(submission_id = %job.submission_id, error = %e, "Execute request failed");
            let status = match e {
                JudgeError::Provisioning { .. } => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            // Container API detail stays in the log
            error(status, "execution could not be provisioned")
        }
    }
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
