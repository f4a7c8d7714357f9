//! Package registration and session-scoped reads.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use parcelhub_core::{PackageId, PackageTypeId, SessionId};
use parcelhub_shipping::{NewPackage, Package, PackageFilter, PackagePage, PackageType, PageRequest};

use crate::store::{PackageStore, PackageTx, StoreError};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PackageError {
    #[error("package type {0} does not exist")]
    UnknownPackageType(PackageTypeId),

    #[error("package {0} not found")]
    NotFound(PackageId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug)]
pub struct PackageService<S: PackageStore> {
    store: Arc<S>,
}

impl<S: PackageStore> Clone for PackageService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: PackageStore> PackageService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn package_types(&self) -> Result<Vec<PackageType>, PackageError> {
        let mut tx = self.store.begin().await?;
        let types = tx.package_types().await?;
        tx.rollback().await?;
        Ok(types)
    }

    /// Register a package for `session_id`. Its delivery cost is left for the
    /// batch job.
    pub async fn create(&self, input: NewPackage, session_id: &SessionId) -> Result<Package, PackageError> {
        let mut tx = self.store.begin().await?;
        if tx.package_type(input.package_type_id).await?.is_none() {
            return Err(PackageError::UnknownPackageType(input.package_type_id));
        }
        let package = tx.insert_package(input, session_id).await?;
        tx.commit().await?;

        info!(package_id = %package.id, package_type_id = %package.package_type_id, "package registered");
        Ok(package)
    }

    pub async fn get(&self, id: PackageId, session_id: &SessionId) -> Result<Package, PackageError> {
        let mut tx = self.store.begin().await?;
        let package = tx.find_package(id, session_id).await?;
        tx.rollback().await?;
        package.ok_or(PackageError::NotFound(id))
    }

    pub async fn list(
        &self,
        session_id: &SessionId,
        filter: PackageFilter,
        page: PageRequest,
    ) -> Result<PackagePage, PackageError> {
        let mut tx = self.store.begin().await?;
        let page = tx.list_packages(session_id, filter, page).await?;
        tx.rollback().await?;
        Ok(page)
    }
}
