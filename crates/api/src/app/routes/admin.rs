use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query, rejection::QueryRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;

use parcelhub_infra::{
    jobs::{JobId, TaskStatus},
    store::PackageStore,
};

use crate::app::{dto, errors, services::AppServices};

pub fn router<S: PackageStore>() -> Router {
    Router::new()
        .route("/calculate-delivery-costs", post(calculate_delivery_costs::<S>))
        .route("/task/:task_id", get(task_status::<S>))
        .route("/jobs/stats", get(job_stats::<S>))
        .route("/jobs/dead-letters", get(dead_letters::<S>))
}

pub async fn calculate_delivery_costs<S: PackageStore>(
    Extension(services): Extension<Arc<AppServices<S>>>,
) -> axum::response::Response {
    match services.dispatcher.enqueue_cost_update() {
        Ok(id) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "message": "delivery cost calculation started",
                "task_id": id.to_string(),
                "status": "pending",
            })),
        )
            .into_response(),
        Err(e) => errors::job_store_error_to_response(e),
    }
}

pub async fn task_status<S: PackageStore>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Path(task_id): Path<String>,
) -> axum::response::Response {
    // Malformed handles are as unknown as well-formed ones we never issued.
    let Ok(id) = task_id.parse::<JobId>() else {
        return errors::json_error(StatusCode::NOT_FOUND, "task_not_found", "task not found");
    };

    let status = match services.dispatcher.status(id) {
        Ok(Some(s)) => s,
        Ok(None) => return errors::json_error(StatusCode::NOT_FOUND, "task_not_found", "task not found"),
        Err(e) => return errors::job_store_error_to_response(e),
    };

    (StatusCode::OK, Json(task_body(id, &status))).into_response()
}

pub async fn job_stats<S: PackageStore>(
    Extension(services): Extension<Arc<AppServices<S>>>,
) -> axum::response::Response {
    match services.dispatcher.stats() {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => errors::job_store_error_to_response(e),
    }
}

/// Tasks that exhausted their retries, oldest first.
pub async fn dead_letters<S: PackageStore>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    query: Result<Query<dto::DeadLettersQuery>, QueryRejection>,
) -> axum::response::Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(rejection) => return errors::query_rejection(rejection),
    };

    match services.dispatcher.dead_letters(query.limit()) {
        Ok(entries) => {
            let body: Vec<dto::DeadLetterResponse> = entries.into_iter().map(Into::into).collect();
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => errors::job_store_error_to_response(e),
    }
}

fn task_body(id: JobId, status: &TaskStatus) -> serde_json::Value {
    let mut body = serde_json::to_value(status).unwrap_or_else(|_| json!({}));
    if let Some(obj) = body.as_object_mut() {
        obj.insert("task_id".to_string(), json!(id.to_string()));
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_body_flattens_the_status() {
        let id = JobId::new();
        let body = task_body(
            id,
            &TaskStatus::Succeeded {
                result: json!({"updated_packages": 3}),
            },
        );

        assert_eq!(body["task_id"], id.to_string());
        assert_eq!(body["status"], "succeeded");
        assert_eq!(body["result"]["updated_packages"], 3);
    }
}
