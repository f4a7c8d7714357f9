use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use parcelhub_core::{
    DomainError, DomainResult, PackageId, PackageTypeId, SessionId, TransportCompanyId,
};

use crate::cost::DeliveryCost;

/// Lookup entity: the kind of goods inside a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageType {
    pub id: PackageTypeId,
    pub name: String,
}

/// The fixed set of package types every store starts with.
pub fn seed_package_types() -> Vec<PackageType> {
    [(1, "Clothing"), (2, "Electronics"), (3, "Miscellaneous")]
        .into_iter()
        .map(|(id, name)| PackageType {
            id: PackageTypeId::from_raw(id),
            name: name.to_string(),
        })
        .collect()
}

/// Validated registration input for a new package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPackage {
    pub name: String,
    pub weight_kg: f64,
    pub package_type_id: PackageTypeId,
    pub content_cost_usd: f64,
}

impl NewPackage {
    pub const MAX_NAME_LEN: usize = 255;

    pub fn new(
        name: impl Into<String>,
        weight_kg: f64,
        package_type_id: i32,
        content_cost_usd: f64,
    ) -> DomainResult<Self> {
        let name = name.into();
        let name_len = name.chars().count();
        if name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if name_len > Self::MAX_NAME_LEN {
            return Err(DomainError::validation(format!(
                "name cannot exceed {} characters",
                Self::MAX_NAME_LEN
            )));
        }
        if !weight_kg.is_finite() || weight_kg <= 0.0 {
            return Err(DomainError::validation("weight must be greater than zero"));
        }
        if !content_cost_usd.is_finite() || content_cost_usd < 0.0 {
            return Err(DomainError::validation("content cost cannot be negative"));
        }
        let package_type_id = PackageTypeId::new(package_type_id)?;

        Ok(Self {
            name,
            weight_kg,
            package_type_id,
            content_cost_usd,
        })
    }
}

/// A shipment record.
///
/// `delivery_cost` is written only by the delivery-cost batch job and
/// `transport_company_id` only through [`Package::claim_for`] while the row is
/// locked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub id: PackageId,
    pub name: String,
    pub weight_kg: f64,
    pub package_type_id: PackageTypeId,
    pub content_cost_usd: f64,
    pub session_id: SessionId,
    pub delivery_cost: Option<DeliveryCost>,
    pub transport_company_id: Option<TransportCompanyId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Outcome of asking a package to accept a transport company.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ClaimDecision {
    /// The package was unclaimed and now belongs to the requested company.
    Assigned,
    /// First assignment wins; the package keeps this company.
    AlreadyClaimed(TransportCompanyId),
}

impl Package {
    pub fn register(
        id: PackageId,
        input: NewPackage,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: input.name,
            weight_kg: input.weight_kg,
            package_type_id: input.package_type_id,
            content_cost_usd: input.content_cost_usd,
            session_id,
            delivery_cost: None,
            transport_company_id: None,
            created_at: now,
            updated_at: None,
        }
    }

    pub fn is_priced(&self) -> bool {
        self.delivery_cost.is_some()
    }

    pub fn is_claimed(&self) -> bool {
        self.transport_company_id.is_some()
    }

    pub fn belongs_to(&self, session_id: &SessionId) -> bool {
        &self.session_id == session_id
    }

    /// `UNCLAIMED -> CLAIMED(company)`; `CLAIMED` is terminal.
    pub fn claim_for(&mut self, company: TransportCompanyId, now: DateTime<Utc>) -> ClaimDecision {
        match self.transport_company_id {
            Some(holder) => ClaimDecision::AlreadyClaimed(holder),
            None => {
                self.transport_company_id = Some(company);
                self.updated_at = Some(now);
                ClaimDecision::Assigned
            }
        }
    }
}
