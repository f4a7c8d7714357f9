//! In-memory package store for tests/dev.
//!
//! Reproduces the parts of the Postgres behaviour the core relies on:
//! read-committed visibility, buffered writes applied atomically on commit,
//! and `FOR UPDATE NOWAIT` row locks released on commit, rollback or drop.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use parcelhub_core::{Clock, PackageId, PackageTypeId, SessionId, SystemClock, TransportCompanyId};
use parcelhub_shipping::{
    DeliveryCost, NewPackage, Package, PackageFilter, PackagePage, PackageType, PageRequest, seed_package_types,
};

use super::{PackageStore, PackageTx, StoreError};

#[derive(Debug)]
struct State {
    packages: BTreeMap<PackageId, Package>,
    types: BTreeMap<PackageTypeId, PackageType>,
    row_locks: HashMap<PackageId, u64>,
    next_package_id: i64,
    next_tx_id: u64,
    commits_with_writes: u64,
}

#[derive(Debug)]
enum PendingWrite {
    Insert(Package),
    TransportCompany {
        id: PackageId,
        company: TransportCompanyId,
        at: DateTime<Utc>,
    },
    DeliveryCosts {
        costs: Vec<(PackageId, DeliveryCost)>,
        at: DateTime<Utc>,
    },
}

/// Shared in-memory package table.
#[derive(Clone)]
pub struct InMemoryPackageStore {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryPackageStore {
    /// Empty store seeded with the standard package types.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let types = seed_package_types().into_iter().map(|t| (t.id, t)).collect();
        Self {
            state: Arc::new(Mutex::new(State {
                packages: BTreeMap::new(),
                types,
                row_locks: HashMap::new(),
                next_package_id: 1,
                next_tx_id: 1,
                commits_with_writes: 0,
            })),
            clock,
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Committed state of a package, regardless of owner.
    pub fn package(&self, id: PackageId) -> Option<Package> {
        lock(&self.state).ok()?.packages.get(&id).cloned()
    }

    /// Number of commits that carried at least one write.
    pub fn commits_with_writes(&self) -> u64 {
        lock(&self.state).map(|s| s.commits_with_writes).unwrap_or(0)
    }
}

impl Default for InMemoryPackageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryPackageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryPackageStore").finish_non_exhaustive()
    }
}

fn lock(state: &Mutex<State>) -> Result<MutexGuard<'_, State>, StoreError> {
    state
        .lock()
        .map_err(|_| StoreError::Storage("in-memory store mutex poisoned".to_string()))
}

#[async_trait]
impl PackageStore for InMemoryPackageStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<InMemoryTx, StoreError> {
        let tx_id = {
            let mut state = lock(&self.state)?;
            let id = state.next_tx_id;
            state.next_tx_id += 1;
            id
        };
        Ok(InMemoryTx {
            state: self.state.clone(),
            clock: self.clock.clone(),
            tx_id,
            held_locks: Vec::new(),
            pending: Vec::new(),
            active: true,
        })
    }
}

/// Open in-memory transaction.
pub struct InMemoryTx {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
    tx_id: u64,
    held_locks: Vec<PackageId>,
    pending: Vec<PendingWrite>,
    active: bool,
}

impl InMemoryTx {
    fn state(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        if !self.active {
            return Err(StoreError::Closed);
        }
        lock(&self.state)
    }

    fn release_locks(&mut self) {
        if self.held_locks.is_empty() {
            return;
        }
        if let Ok(mut state) = self.state.lock() {
            for id in self.held_locks.drain(..) {
                if state.row_locks.get(&id) == Some(&self.tx_id) {
                    state.row_locks.remove(&id);
                }
            }
        }
    }
}

#[async_trait]
impl PackageTx for InMemoryTx {
    async fn package_types(&mut self) -> Result<Vec<PackageType>, StoreError> {
        Ok(self.state()?.types.values().cloned().collect())
    }

    async fn package_type(&mut self, id: PackageTypeId) -> Result<Option<PackageType>, StoreError> {
        Ok(self.state()?.types.get(&id).cloned())
    }

    async fn insert_package(&mut self, input: NewPackage, session_id: &SessionId) -> Result<Package, StoreError> {
        let now = self.clock.now();
        let package = {
            let mut state = self.state()?;
            if !state.types.contains_key(&input.package_type_id) {
                return Err(StoreError::NotFound(format!(
                    "package type {}",
                    input.package_type_id
                )));
            }
            // Ids are handed out eagerly, like a database sequence.
            let id = PackageId::from_raw(state.next_package_id);
            state.next_package_id += 1;
            Package::register(id, input, session_id.clone(), now)
        };
        self.pending.push(PendingWrite::Insert(package.clone()));
        Ok(package)
    }

    async fn find_package(&mut self, id: PackageId, session_id: &SessionId) -> Result<Option<Package>, StoreError> {
        let state = self.state()?;
        Ok(state
            .packages
            .get(&id)
            .filter(|p| p.belongs_to(session_id))
            .cloned())
    }

    async fn list_packages(
        &mut self,
        session_id: &SessionId,
        filter: PackageFilter,
        page: PageRequest,
    ) -> Result<PackagePage, StoreError> {
        let state = self.state()?;
        let mut matching: Vec<&Package> = state
            .packages
            .values()
            .filter(|p| p.belongs_to(session_id) && filter.matches(p))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.size() as usize)
            .cloned()
            .collect();
        Ok(PackagePage::new(items, total, page))
    }

    async fn unpriced_packages(&mut self) -> Result<Vec<Package>, StoreError> {
        let state = self.state()?;
        Ok(state
            .packages
            .values()
            .filter(|p| !p.is_priced())
            .cloned()
            .collect())
    }

    async fn lock_package_nowait(
        &mut self,
        id: PackageId,
        session_id: &SessionId,
    ) -> Result<Option<Package>, StoreError> {
        let tx_id = self.tx_id;
        let package = {
            let mut state = self.state()?;
            let package = match state.packages.get(&id) {
                Some(p) if p.belongs_to(session_id) => p.clone(),
                _ => return Ok(None),
            };
            match state.row_locks.get(&id) {
                Some(holder) if *holder != tx_id => return Err(StoreError::LockBusy),
                Some(_) => {}
                None => {
                    state.row_locks.insert(id, tx_id);
                }
            }
            package
        };
        if !self.held_locks.contains(&id) {
            self.held_locks.push(id);
        }
        Ok(Some(package))
    }

    async fn set_transport_company(&mut self, id: PackageId, company: TransportCompanyId) -> Result<(), StoreError> {
        let at = self.clock.now();
        {
            let state = self.state()?;
            if !state.packages.contains_key(&id) {
                return Err(StoreError::NotFound(format!("package {id}")));
            }
            // Postgres would block here; a non-blocking store reports it instead.
            if let Some(holder) = state.row_locks.get(&id) {
                if *holder != self.tx_id {
                    return Err(StoreError::LockBusy);
                }
            }
        }
        self.pending.push(PendingWrite::TransportCompany { id, company, at });
        Ok(())
    }

    async fn set_delivery_costs(&mut self, costs: &[(PackageId, DeliveryCost)]) -> Result<(), StoreError> {
        if costs.is_empty() {
            return Ok(());
        }
        let at = self.clock.now();
        self.pending.push(PendingWrite::DeliveryCosts {
            costs: costs.to_vec(),
            at,
        });
        Ok(())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        if !self.active {
            return Err(StoreError::Closed);
        }
        let pending = std::mem::take(&mut self.pending);
        {
            let mut state = lock(&self.state)?;
            if !pending.is_empty() {
                state.commits_with_writes += 1;
            }
            for write in pending {
                match write {
                    PendingWrite::Insert(package) => {
                        state.packages.insert(package.id, package);
                    }
                    PendingWrite::TransportCompany { id, company, at } => {
                        if let Some(p) = state.packages.get_mut(&id) {
                            p.transport_company_id = Some(company);
                            p.updated_at = Some(at);
                        }
                    }
                    PendingWrite::DeliveryCosts { costs, at } => {
                        for (id, cost) in costs {
                            if let Some(p) = state.packages.get_mut(&id) {
                                p.delivery_cost = Some(cost);
                                p.updated_at = Some(at);
                            }
                        }
                    }
                }
            }
        }
        self.release_locks();
        self.active = false;
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        self.pending.clear();
        self.release_locks();
        self.active = false;
        Ok(())
    }
}

impl Drop for InMemoryTx {
    fn drop(&mut self) {
        if self.active {
            self.pending.clear();
            self.release_locks();
        }
    }
}
