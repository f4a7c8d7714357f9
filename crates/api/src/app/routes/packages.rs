use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Extension, Path, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use parcelhub_core::{PackageId, SessionId, TransportCompanyId};
use parcelhub_infra::{ClaimOutcome, store::PackageStore};
use parcelhub_shipping::PackageType;

use crate::app::{dto, errors, services::AppServices};

type Services<S> = Extension<Arc<AppServices<S>>>;

pub async fn list_package_types<S: PackageStore>(
    Extension(services): Services<S>,
) -> axum::response::Response {
    match services.packages.package_types().await {
        Ok(types) => {
            let body: Vec<dto::PackageTypeResponse> = types.into_iter().map(Into::into).collect();
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => errors::package_error_to_response(e),
    }
}

pub async fn create_package<S: PackageStore>(
    Extension(services): Services<S>,
    Extension(session): Extension<SessionId>,
    body: Result<Json<dto::CreatePackageRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection(rejection),
    };
    let input = match body.validate() {
        Ok(v) => v,
        Err(e) => return errors::validation_error(e),
    };

    let package = match services.packages.create(input, &session).await {
        Ok(p) => p,
        Err(e) => return errors::package_error_to_response(e),
    };
    let types = match package_types(&services).await {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    (StatusCode::OK, Json(dto::PackageResponse::from_package(package, &types))).into_response()
}

/// Validate now, register on the work queue.
pub async fn create_package_async<S: PackageStore>(
    Extension(services): Services<S>,
    Extension(session): Extension<SessionId>,
    body: Result<Json<dto::CreatePackageRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection(rejection),
    };
    if let Err(e) = body.validate() {
        return errors::validation_error(e);
    }

    let task_id = match services
        .dispatcher
        .enqueue_package_registration(&body.into_payload(&session))
    {
        Ok(id) => id,
        Err(e) => return errors::job_store_error_to_response(e),
    };

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "package queued for registration",
            "session_id": session.to_string(),
            "task_id": task_id.to_string(),
            "status": "queued",
        })),
    )
        .into_response()
}

pub async fn list_packages<S: PackageStore>(
    Extension(services): Services<S>,
    Extension(session): Extension<SessionId>,
    query: Result<Query<dto::ListPackagesQuery>, QueryRejection>,
) -> axum::response::Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(rejection) => return errors::query_rejection(rejection),
    };
    let (filter, page) = match (query.filter(), query.page_request()) {
        (Ok(f), Ok(p)) => (f, p),
        (Err(e), _) | (_, Err(e)) => return errors::validation_error(e),
    };

    let page = match services.packages.list(&session, filter, page).await {
        Ok(p) => p,
        Err(e) => return errors::package_error_to_response(e),
    };
    let types = match package_types(&services).await {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    (StatusCode::OK, Json(dto::PackagePageResponse::from_page(page, &types))).into_response()
}

pub async fn get_package<S: PackageStore>(
    Extension(services): Services<S>,
    Extension(session): Extension<SessionId>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: PackageId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_id", "invalid package id"),
    };

    let package = match services.packages.get(id, &session).await {
        Ok(p) => p,
        Err(e) => return errors::package_error_to_response(e),
    };
    let types = match package_types(&services).await {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    (StatusCode::OK, Json(dto::PackageResponse::from_package(package, &types))).into_response()
}

pub async fn assign_transport<S: PackageStore>(
    Extension(services): Services<S>,
    Extension(session): Extension<SessionId>,
    Path(id): Path<String>,
    body: Result<Json<dto::AssignTransportRequest>, JsonRejection>,
) -> axum::response::Response {
    let id: PackageId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_id", "invalid package id"),
    };
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection(rejection),
    };
    let company = match TransportCompanyId::new(body.company_id) {
        Ok(c) => c,
        Err(e) => return errors::validation_error(e),
    };

    match services.claims.claim(id, &session, company).await {
        Ok(ClaimOutcome::Claimed(_)) => (
            StatusCode::OK,
            Json(json!({
                "message": format!("package assigned to transport company {company}"),
                "package_id": id,
                "transport_company_id": company,
            })),
        )
            .into_response(),
        Ok(ClaimOutcome::AlreadyClaimed { company: holder }) => errors::json_error(
            StatusCode::CONFLICT,
            "already_claimed",
            format!("package is already assigned to transport company {holder}"),
        ),
        Ok(ClaimOutcome::NotFound) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "package not found"),
        Ok(ClaimOutcome::LockBusy) => errors::store_error_to_response(parcelhub_infra::store::StoreError::LockBusy),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn package_types<S: PackageStore>(services: &AppServices<S>) -> Result<Vec<PackageType>, axum::response::Response> {
    services
        .packages
        .package_types()
        .await
        .map_err(errors::package_error_to_response)
}
