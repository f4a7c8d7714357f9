//! Handlers for the parcel job kinds.

use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use parcelhub_core::SessionId;
use parcelhub_shipping::NewPackage;

use super::executor::JobHandler;
use super::types::{Job, JobResult};
use crate::packages::{PackageError, PackageService};
use crate::pricing::DeliveryCostJob;
use crate::store::PackageStore;

/// Runs the batch delivery-cost update.
pub struct DeliveryCostHandler<S: PackageStore> {
    job: DeliveryCostJob<S>,
}

impl<S: PackageStore> DeliveryCostHandler<S> {
    pub fn new(job: DeliveryCostJob<S>) -> Self {
        Self { job }
    }
}

#[async_trait]
impl<S: PackageStore> JobHandler for DeliveryCostHandler<S> {
    async fn handle(&self, job: &Job) -> JobResult {
        info!(job_id = %job.id, attempt = job.attempt, "calculating delivery costs");
        match self.job.run().await {
            Ok(updated) => JobResult::Success(json!({
                "status": "success",
                "updated_packages": updated,
                "message": format!("Processed packages: {updated}"),
            })),
            Err(e) => JobResult::Failure(e.to_string()),
        }
    }
}

/// Arguments of a `register_package` job, as submitted by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterPackagePayload {
    pub name: String,
    pub weight: f64,
    pub package_type_id: i32,
    pub content_cost_usd: f64,
    pub session_id: String,
}

/// Registers packages submitted through the asynchronous endpoint.
pub struct RegisterPackageHandler<S: PackageStore> {
    packages: PackageService<S>,
}

impl<S: PackageStore> RegisterPackageHandler<S> {
    pub fn new(packages: PackageService<S>) -> Self {
        Self { packages }
    }
}

#[async_trait]
impl<S: PackageStore> JobHandler for RegisterPackageHandler<S> {
    async fn handle(&self, job: &Job) -> JobResult {
        let payload: RegisterPackagePayload = match serde_json::from_value(job.payload.clone()) {
            Ok(p) => p,
            Err(e) => return JobResult::Fatal(format!("invalid payload: {e}")),
        };
        let session_id = match SessionId::from_str(&payload.session_id) {
            Ok(s) => s,
            Err(e) => return JobResult::Fatal(e.to_string()),
        };
        let input = match NewPackage::new(
            payload.name,
            payload.weight,
            payload.package_type_id,
            payload.content_cost_usd,
        ) {
            Ok(input) => input,
            Err(e) => return JobResult::Fatal(e.to_string()),
        };

        match self.packages.create(input, &session_id).await {
            Ok(package) => JobResult::Success(json!({
                "status": "success",
                "package_id": package.id,
                "message": format!("Package {} registered", package.id),
            })),
            Err(e @ PackageError::UnknownPackageType(_)) => JobResult::Fatal(e.to_string()),
            Err(e) => JobResult::Failure(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::JobKind;
    use crate::rates::FixedRate;
    use crate::store::InMemoryPackageStore;
    use parcelhub_shipping::ExchangeRate;
    use std::sync::Arc;

    fn register_job(payload: serde_json::Value) -> Job {
        Job::new(JobKind::RegisterPackage, payload)
    }

    #[tokio::test]
    async fn registers_a_valid_package() {
        let store = InMemoryPackageStore::arc();
        let handler = RegisterPackageHandler::new(PackageService::new(store.clone()));
        let session = SessionId::generate();

        let payload = serde_json::to_value(RegisterPackagePayload {
            name: "jacket".to_string(),
            weight: 1.2,
            package_type_id: 1,
            content_cost_usd: 80.0,
            session_id: session.to_string(),
        })
        .unwrap();

        let JobResult::Success(result) = handler.handle(&register_job(payload)).await else {
            panic!("expected success");
        };
        let id = parcelhub_core::PackageId::from_raw(result["package_id"].as_i64().unwrap());
        let stored = store.package(id).unwrap();
        assert_eq!(stored.name, "jacket");
        assert!(stored.belongs_to(&session));
    }

    #[tokio::test]
    async fn invalid_input_is_fatal() {
        let handler = RegisterPackageHandler::new(PackageService::new(InMemoryPackageStore::arc()));

        let garbage = handler.handle(&register_job(json!({"name": 5}))).await;
        assert!(matches!(garbage, JobResult::Fatal(_)));

        let negative_weight = handler
            .handle(&register_job(json!({
                "name": "x", "weight": -1.0, "package_type_id": 1,
                "content_cost_usd": 0.0, "session_id": "abc"
            })))
            .await;
        assert!(matches!(negative_weight, JobResult::Fatal(_)));

        let unknown_type = handler
            .handle(&register_job(json!({
                "name": "x", "weight": 1.0, "package_type_id": 77,
                "content_cost_usd": 0.0, "session_id": "abc"
            })))
            .await;
        assert!(matches!(unknown_type, JobResult::Fatal(_)));
    }

    #[tokio::test]
    async fn cost_handler_reports_the_processed_count() {
        let store = InMemoryPackageStore::arc();
        PackageService::new(store.clone())
            .create(NewPackage::new("tv", 2.5, 2, 150.0).unwrap(), &SessionId::generate())
            .await
            .unwrap();
        let rates = Arc::new(FixedRate(Some(ExchangeRate::new(90.0).unwrap())));
        let handler = DeliveryCostHandler::new(DeliveryCostJob::new(store, rates));

        let JobResult::Success(result) = handler
            .handle(&Job::new(JobKind::CalculateDeliveryCosts, json!({})))
            .await
        else {
            panic!("expected success");
        };
        assert_eq!(result["updated_packages"], 1);
        assert_eq!(result["status"], "success");
    }
}
