//! Shipping domain module.
//!
//! This crate contains business rules for packages: registration input
//! validation, delivery-cost arithmetic and the transport-assignment state
//! machine, implemented purely as deterministic domain logic (no IO, no HTTP,
//! no storage).

pub mod cost;
pub mod package;
pub mod query;

pub use cost::{CONTENT_COEFFICIENT, CostCalculator, DeliveryCost, ExchangeRate, WEIGHT_COEFFICIENT};
pub use package::{ClaimDecision, NewPackage, Package, PackageType, seed_package_types};
pub use query::{PackageFilter, PackagePage, PageRequest};
