//! Package storage boundary.
//!
//! Core operations run inside an explicit unit of work:
//!
//! ```ignore
//! let mut tx = store.begin().await?;
//! let package = tx.lock_package_nowait(id, &session).await?;
//! // ...
//! tx.commit().await?;
//! ```
//!
//! A transaction that is dropped without `commit()` is rolled back and any row
//! locks it holds are released. Both implementations honour this, so early
//! returns and `?` never leak a lock.

use async_trait::async_trait;
use thiserror::Error;

use parcelhub_core::{PackageId, PackageTypeId, SessionId, TransportCompanyId};
use parcelhub_shipping::{DeliveryCost, NewPackage, Package, PackageFilter, PackagePage, PackageType, PageRequest};

pub mod in_memory;
pub mod postgres;

pub use in_memory::{InMemoryPackageStore, InMemoryTx};
pub use postgres::{PostgresPackageStore, PostgresTx};

/// Storage failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A non-blocking row lock could not be acquired because another
    /// transaction holds it.
    #[error("row is locked by a concurrent transaction")]
    LockBusy,

    /// A referenced row does not exist (foreign key or targeted update).
    #[error("not found: {0}")]
    NotFound(String),

    /// The transaction was already committed or rolled back.
    #[error("transaction is no longer active")]
    Closed,

    #[error("storage error: {0}")]
    Storage(String),
}

/// Opens units of work against the package table.
#[async_trait]
pub trait PackageStore: Send + Sync + 'static {
    type Tx: PackageTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}

/// One open transaction.
///
/// Reads observe committed data; writes become visible to others on
/// `commit()`.
#[async_trait]
pub trait PackageTx: Send {
    async fn package_types(&mut self) -> Result<Vec<PackageType>, StoreError>;

    async fn package_type(&mut self, id: PackageTypeId) -> Result<Option<PackageType>, StoreError>;

    /// Insert a package and return it with its assigned id and timestamps.
    async fn insert_package(&mut self, input: NewPackage, session_id: &SessionId) -> Result<Package, StoreError>;

    /// A package owned by `session_id`, without locking.
    async fn find_package(&mut self, id: PackageId, session_id: &SessionId) -> Result<Option<Package>, StoreError>;

    /// A session's packages, newest first.
    async fn list_packages(
        &mut self,
        session_id: &SessionId,
        filter: PackageFilter,
        page: PageRequest,
    ) -> Result<PackagePage, StoreError>;

    /// Every package whose delivery cost has not been computed yet.
    async fn unpriced_packages(&mut self) -> Result<Vec<Package>, StoreError>;

    /// `SELECT ... FOR UPDATE NOWAIT` on the row matching `(id, session_id)`.
    ///
    /// `Ok(None)` when no row matches; `Err(StoreError::LockBusy)` when the row
    /// exists but another transaction holds its lock.
    async fn lock_package_nowait(
        &mut self,
        id: PackageId,
        session_id: &SessionId,
    ) -> Result<Option<Package>, StoreError>;

    /// Write the transport company of a package locked by this transaction.
    async fn set_transport_company(&mut self, id: PackageId, company: TransportCompanyId) -> Result<(), StoreError>;

    /// Write delivery costs for a batch of packages in one statement.
    async fn set_delivery_costs(&mut self, costs: &[(PackageId, DeliveryCost)]) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> PackageStore for std::sync::Arc<S>
where
    S: PackageStore,
{
    type Tx = S::Tx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        (**self).begin().await
    }
}
