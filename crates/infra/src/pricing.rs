//! Batch delivery-cost update.

use std::sync::Arc;

use tracing::{info, warn};

use parcelhub_core::PackageId;
use parcelhub_shipping::{CostCalculator, DeliveryCost};

use crate::rates::RateProvider;
use crate::store::{PackageStore, PackageTx, StoreError};

/// Prices every package that has no delivery cost yet.
///
/// Only unpriced rows are selected, so a second run finds nothing to do.
/// Overlapping runs may price the same row twice; the last write wins.
pub struct DeliveryCostJob<S: PackageStore> {
    store: Arc<S>,
    rates: Arc<dyn RateProvider>,
    calculator: CostCalculator,
}

impl<S: PackageStore> Clone for DeliveryCostJob<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            rates: self.rates.clone(),
            calculator: self.calculator,
        }
    }
}

impl<S: PackageStore> DeliveryCostJob<S> {
    pub fn new(store: Arc<S>, rates: Arc<dyn RateProvider>) -> Self {
        Self {
            store,
            rates,
            calculator: CostCalculator::default(),
        }
    }

    pub fn with_calculator(mut self, calculator: CostCalculator) -> Self {
        self.calculator = calculator;
        self
    }

    /// Returns how many packages received a cost.
    pub async fn run(&self) -> Result<usize, StoreError> {
        let mut tx = self.store.begin().await?;
        let unpriced = tx.unpriced_packages().await?;
        tx.rollback().await?;

        if unpriced.is_empty() {
            info!("no packages awaiting a delivery cost");
            return Ok(0);
        }

        let Some(rate) = self.rates.current_rate().await else {
            warn!(pending = unpriced.len(), "no exchange rate available; delivery costs not updated");
            return Ok(0);
        };

        let costs: Vec<(PackageId, DeliveryCost)> = unpriced
            .iter()
            .filter_map(|p| self.calculator.compute_for(p, Some(rate)).map(|cost| (p.id, cost)))
            .collect();

        if costs.len() < unpriced.len() {
            warn!(
                skipped = unpriced.len() - costs.len(),
                "some packages could not be priced"
            );
        }
        if costs.is_empty() {
            return Ok(0);
        }

        let mut tx = self.store.begin().await?;
        tx.set_delivery_costs(&costs).await?;
        tx.commit().await?;

        info!(updated = costs.len(), %rate, "delivery costs updated");
        Ok(costs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rates::FixedRate;
    use crate::store::InMemoryPackageStore;
    use async_trait::async_trait;
    use parcelhub_core::SessionId;
    use parcelhub_shipping::{ExchangeRate, NewPackage, Package};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRates {
        rate: Option<ExchangeRate>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RateProvider for CountingRates {
        async fn current_rate(&self) -> Option<ExchangeRate> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.rate
        }
    }

    fn rate(v: f64) -> Option<ExchangeRate> {
        Some(ExchangeRate::new(v).unwrap())
    }

    async fn insert(store: &InMemoryPackageStore, weight: f64, content: f64) -> Package {
        let mut tx = store.begin().await.unwrap();
        let p = tx
            .insert_package(NewPackage::new("box", weight, 3, content).unwrap(), &SessionId::generate())
            .await
            .unwrap();
        tx.commit().await.unwrap();
        p
    }

    #[tokio::test]
    async fn prices_unpriced_packages_once() {
        let store = InMemoryPackageStore::arc();
        let p = insert(&store, 2.5, 150.0).await;
        insert(&store, 1.0, 0.0).await;

        let job = DeliveryCostJob::new(store.clone(), Arc::new(FixedRate(rate(90.0))));

        assert_eq!(job.run().await.unwrap(), 2);
        assert_eq!(
            store.package(p.id).unwrap().delivery_cost,
            Some(DeliveryCost::from_kopecks(24_750))
        );
        assert_eq!(job.run().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_rate_writes_nothing() {
        let store = InMemoryPackageStore::arc();
        let p = insert(&store, 2.5, 150.0).await;
        let commits_before = store.commits_with_writes();

        let job = DeliveryCostJob::new(store.clone(), Arc::new(FixedRate(None)));

        assert_eq!(job.run().await.unwrap(), 0);
        assert_eq!(store.commits_with_writes(), commits_before);
        assert_eq!(store.package(p.id).unwrap().delivery_cost, None);
    }

    #[tokio::test]
    async fn empty_backlog_skips_the_rate_lookup() {
        let store = InMemoryPackageStore::arc();
        let rates = Arc::new(CountingRates {
            rate: rate(90.0),
            calls: AtomicUsize::new(0),
        });
        let job = DeliveryCostJob::new(store, rates.clone());

        assert_eq!(job.run().await.unwrap(), 0);
        assert_eq!(rates.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rate_is_fetched_once_per_run() {
        let store = InMemoryPackageStore::arc();
        for _ in 0..5 {
            insert(&store, 1.0, 10.0).await;
        }
        let rates = Arc::new(CountingRates {
            rate: rate(90.0),
            calls: AtomicUsize::new(0),
        });
        let job = DeliveryCostJob::new(store, rates.clone());

        assert_eq!(job.run().await.unwrap(), 5);
        assert_eq!(rates.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_cost_is_persisted_and_counted() {
        let store = InMemoryPackageStore::arc();
        let p = insert(&store, 0.001, 0.0).await;

        let job = DeliveryCostJob::new(store.clone(), Arc::new(FixedRate(rate(0.01))));

        assert_eq!(job.run().await.unwrap(), 1);
        assert_eq!(store.package(p.id).unwrap().delivery_cost, Some(DeliveryCost::ZERO));
        assert_eq!(job.run().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn already_priced_packages_are_left_alone() {
        let store = InMemoryPackageStore::arc();
        let p = insert(&store, 2.5, 150.0).await;
        DeliveryCostJob::new(store.clone(), Arc::new(FixedRate(rate(90.0))))
            .run()
            .await
            .unwrap();

        let later = DeliveryCostJob::new(store.clone(), Arc::new(FixedRate(rate(100.0))));
        assert_eq!(later.run().await.unwrap(), 0);
        assert_eq!(
            store.package(p.id).unwrap().delivery_cost,
            Some(DeliveryCost::from_kopecks(24_750))
        );
    }
}
