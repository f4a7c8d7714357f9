//! Transport company assignment.
//!
//! A package is claimed by at most one company. The claim runs in its own
//! transaction holding a `FOR UPDATE NOWAIT` lock on the package row: the
//! first transaction to take the lock decides the outcome, concurrent
//! claimants get [`ClaimOutcome::LockBusy`] instead of queueing behind it.

use std::sync::Arc;

use tracing::{info, warn};

use parcelhub_core::{Clock, PackageId, SessionId, SystemClock, TransportCompanyId};
use parcelhub_shipping::{ClaimDecision, Package};

use crate::store::{PackageStore, PackageTx, StoreError};

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// This request assigned the company.
    Claimed(Package),
    /// The package was already assigned; nothing was written.
    AlreadyClaimed { company: TransportCompanyId },
    /// No package with that id belongs to the session.
    NotFound,
    /// Another transaction holds the row; the caller may retry.
    LockBusy,
}

pub struct ClaimService<S: PackageStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: PackageStore> Clone for ClaimService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<S: PackageStore> ClaimService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Try to assign `company` to the package. Only storage failures are errors.
    pub async fn claim(
        &self,
        package_id: PackageId,
        session_id: &SessionId,
        company: TransportCompanyId,
    ) -> Result<ClaimOutcome, StoreError> {
        let mut tx = self.store.begin().await?;

        let mut package = match tx.lock_package_nowait(package_id, session_id).await {
            Ok(Some(package)) => package,
            Ok(None) => return Ok(ClaimOutcome::NotFound),
            Err(StoreError::LockBusy) => {
                warn!(%package_id, company_id = %company, "package is locked by a concurrent claim");
                return Ok(ClaimOutcome::LockBusy);
            }
            Err(e) => return Err(e),
        };

        match package.claim_for(company, self.clock.now()) {
            ClaimDecision::AlreadyClaimed(holder) => {
                tx.rollback().await?;
                info!(%package_id, company_id = %company, holder = %holder, "package already claimed");
                Ok(ClaimOutcome::AlreadyClaimed { company: holder })
            }
            ClaimDecision::Assigned => {
                tx.set_transport_company(package_id, company).await?;
                tx.commit().await?;
                info!(%package_id, company_id = %company, "transport company assigned");
                Ok(ClaimOutcome::Claimed(package))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryPackageStore;
    use parcelhub_shipping::NewPackage;

    async fn setup() -> (Arc<InMemoryPackageStore>, ClaimService<InMemoryPackageStore>, SessionId, PackageId) {
        let store = InMemoryPackageStore::arc();
        let session = SessionId::generate();
        let mut tx = store.begin().await.unwrap();
        let package = tx
            .insert_package(NewPackage::new("tv", 12.0, 2, 400.0).unwrap(), &session)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        let service = ClaimService::new(store.clone());
        (store, service, session, package.id)
    }

    fn company(id: i64) -> TransportCompanyId {
        TransportCompanyId::from_raw(id)
    }

    #[tokio::test]
    async fn first_claim_assigns_the_company() {
        let (store, service, session, id) = setup().await;

        let outcome = service.claim(id, &session, company(7)).await.unwrap();

        assert!(matches!(outcome, ClaimOutcome::Claimed(ref p) if p.transport_company_id == Some(company(7))));
        assert_eq!(store.package(id).unwrap().transport_company_id, Some(company(7)));
    }

    #[tokio::test]
    async fn reclaim_with_another_company_changes_nothing() {
        let (store, service, session, id) = setup().await;
        service.claim(id, &session, company(1)).await.unwrap();
        let stamped = store.package(id).unwrap().updated_at;

        let outcome = service.claim(id, &session, company(2)).await.unwrap();

        assert_eq!(outcome, ClaimOutcome::AlreadyClaimed { company: company(1) });
        let stored = store.package(id).unwrap();
        assert_eq!(stored.transport_company_id, Some(company(1)));
        assert_eq!(stored.updated_at, stamped);
    }

    #[tokio::test]
    async fn missing_or_foreign_packages_are_not_found() {
        let (_store, service, session, id) = setup().await;

        let outcome = service
            .claim(PackageId::from_raw(id.get() + 1000), &session, company(1))
            .await
            .unwrap();
        assert_eq!(outcome, ClaimOutcome::NotFound);

        let outcome = service.claim(id, &SessionId::generate(), company(1)).await.unwrap();
        assert_eq!(outcome, ClaimOutcome::NotFound);
    }

    #[tokio::test]
    async fn held_lock_is_reported_as_busy_not_missing() {
        let (store, service, session, id) = setup().await;

        let mut holder = store.begin().await.unwrap();
        holder.lock_package_nowait(id, &session).await.unwrap();

        assert_eq!(service.claim(id, &session, company(3)).await.unwrap(), ClaimOutcome::LockBusy);

        holder.rollback().await.unwrap();
        assert!(matches!(
            service.claim(id, &session, company(3)).await.unwrap(),
            ClaimOutcome::Claimed(_)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_have_exactly_one_winner() {
        let (store, service, session, id) = setup().await;

        let mut tasks = Vec::new();
        for n in 1..=16 {
            let service = service.clone();
            let session = session.clone();
            tasks.push(tokio::spawn(async move {
                (n, service.claim(id, &session, company(n)).await.unwrap())
            }));
        }

        let mut winners = Vec::new();
        for task in tasks {
            let (n, outcome) = task.await.unwrap();
            match outcome {
                ClaimOutcome::Claimed(_) => winners.push(n),
                ClaimOutcome::AlreadyClaimed { .. } | ClaimOutcome::LockBusy => {}
                ClaimOutcome::NotFound => panic!("package vanished"),
            }
        }

        assert_eq!(winners.len(), 1);
        assert_eq!(store.package(id).unwrap().transport_company_id, Some(company(winners[0])));
    }
}
