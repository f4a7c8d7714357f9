use axum::{
    Router,
    routing::{get, post},
};

use parcelhub_infra::store::PackageStore;

pub mod admin;
pub mod packages;
pub mod system;

/// Router for every endpoint, relative to the URL prefix.
///
/// Collection routes answer with and without a trailing slash.
pub fn router<S: PackageStore>() -> Router {
    Router::new()
        .route("/healthcheck", get(system::healthcheck))
        .route("/package-types", get(packages::list_package_types::<S>))
        .route("/package-types/", get(packages::list_package_types::<S>))
        .route("/packages", post(packages::create_package::<S>).get(packages::list_packages::<S>))
        .route("/packages/", post(packages::create_package::<S>).get(packages::list_packages::<S>))
        .route("/packages/async", post(packages::create_package_async::<S>))
        .route("/packages/:id", get(packages::get_package::<S>))
        .route("/packages/:id/assign-transport", post(packages::assign_transport::<S>))
        .nest("/admin", admin::router::<S>())
}
