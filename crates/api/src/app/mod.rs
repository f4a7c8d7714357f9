//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store, exchange rates, work queue and background workers
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router};
use thiserror::Error;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use parcelhub_infra::{
    AppConfig,
    rates::{RateError, RateProvider},
    store::{InMemoryPackageStore, PackageStore, PostgresPackageStore, StoreError},
};

use crate::session;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, BackgroundWorkers, WorkerOptions};

const DB_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("package store: {0}")]
    Store(#[from] StoreError),

    #[error("exchange rate source: {0}")]
    Rates(#[from] RateError),
}

/// A ready router plus the workers feeding it.
#[derive(Debug)]
pub struct App {
    pub router: Router,
    pub workers: BackgroundWorkers,
}

/// Build the full application from configuration (public entrypoint used by `main.rs`).
///
/// Uses Postgres when `DATABASE_URL` is set, the in-memory store otherwise.
pub async fn build_app(config: &AppConfig) -> Result<App, StartupError> {
    let rates = services::build_rate_provider(config)?;
    let options = WorkerOptions::from_config(config);

    match &config.database_url {
        Some(url) => {
            let store = PostgresPackageStore::connect(url, DB_MAX_CONNECTIONS).await?;
            store.migrate().await?;
            info!("using postgres package store");
            Ok(build_app_with(Arc::new(store), rates, options, &config.url_prefix))
        }
        None => {
            warn!("DATABASE_URL not set; packages are kept in memory");
            Ok(build_app_with(InMemoryPackageStore::arc(), rates, options, &config.url_prefix))
        }
    }
}

/// Build the application around an existing store and rate provider.
pub fn build_app_with<S: PackageStore>(
    store: Arc<S>,
    rates: Arc<dyn RateProvider>,
    options: WorkerOptions,
    url_prefix: &str,
) -> App {
    let (services, workers) = services::build_services(store, rates, options);

    let api = routes::router::<S>().layer(
        ServiceBuilder::new()
            .layer(Extension(services))
            .layer(axum::middleware::from_fn(session::session_middleware)),
    );

    let router = if url_prefix.is_empty() {
        api
    } else {
        Router::new().nest(url_prefix, api)
    };

    App {
        router: router.layer(TraceLayer::new_for_http()),
        workers,
    }
}
