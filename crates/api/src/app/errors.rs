use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use parcelhub_core::DomainError;
use parcelhub_infra::PackageError;
use parcelhub_infra::jobs::JobStoreError;
use parcelhub_infra::store::StoreError;

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

pub fn validation_error(err: DomainError) -> axum::response::Response {
    json_error(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", err.to_string())
}

pub fn json_rejection(rejection: JsonRejection) -> axum::response::Response {
    json_error(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", rejection.body_text())
}

pub fn query_rejection(rejection: QueryRejection) -> axum::response::Response {
    json_error(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", rejection.body_text())
}

pub fn package_error_to_response(err: PackageError) -> axum::response::Response {
    match err {
        PackageError::UnknownPackageType(_) => {
            json_error(StatusCode::BAD_REQUEST, "unknown_package_type", err.to_string())
        }
        PackageError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", "package not found"),
        PackageError::Store(e) => store_error_to_response(e),
    }
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::LockBusy => json_error(
            StatusCode::CONFLICT,
            "package_busy",
            "package is being modified by another request, retry later",
        ),
        StoreError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        e => {
            error!(error = %e, "storage failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", "internal storage error")
        }
    }
}

pub fn job_store_error_to_response(err: JobStoreError) -> axum::response::Response {
    error!(error = %err, "work queue failure");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "queue_error", "could not reach the work queue")
}
