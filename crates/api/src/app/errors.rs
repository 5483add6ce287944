use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use itemkeep_core::DomainError;
use itemkeep_infra::BatchError;

use crate::app::services::ServiceError;

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    match err {
        ServiceError::Domain(DomainError::Validation(msg)) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", msg)
        }
        ServiceError::Domain(DomainError::InvalidId(msg)) => {
            json_error(StatusCode::BAD_REQUEST, "invalid_id", msg)
        }
        ServiceError::Store(e) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
    }
}

pub fn batch_error_to_response(err: BatchError) -> axum::response::Response {
    let code = match err {
        BatchError::Snapshot(_) => "snapshot_failed",
        BatchError::PoolUnavailable(_) => "pool_unavailable",
        BatchError::TaskFailed { .. } => "task_failed",
    };
    json_error(StatusCode::INTERNAL_SERVER_ERROR, code, err.to_string())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
