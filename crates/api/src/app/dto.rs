use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use parcelhub_core::{DomainResult, PackageId, PackageTypeId, SessionId, TransportCompanyId};
use parcelhub_infra::jobs::{DeadLetterEntry, RegisterPackagePayload};
use parcelhub_shipping::{DeliveryCost, NewPackage, Package, PackageFilter, PackagePage, PackageType, PageRequest};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePackageRequest {
    pub name: String,
    pub weight: f64,
    pub package_type_id: i32,
    pub content_cost_usd: f64,
}

impl CreatePackageRequest {
    pub fn validate(&self) -> DomainResult<NewPackage> {
        NewPackage::new(
            self.name.clone(),
            self.weight,
            self.package_type_id,
            self.content_cost_usd,
        )
    }

    pub fn into_payload(self, session_id: &SessionId) -> RegisterPackagePayload {
        RegisterPackagePayload {
            name: self.name,
            weight: self.weight,
            package_type_id: self.package_type_id,
            content_cost_usd: self.content_cost_usd,
            session_id: session_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignTransportRequest {
    pub company_id: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListPackagesQuery {
    pub page: Option<u32>,
    pub size: Option<u32>,
    pub package_type_id: Option<i32>,
    pub has_delivery_cost: Option<bool>,
}

impl ListPackagesQuery {
    pub fn page_request(&self) -> DomainResult<PageRequest> {
        PageRequest::new(
            self.page.unwrap_or(1),
            self.size.unwrap_or(PageRequest::DEFAULT_SIZE),
        )
    }

    pub fn filter(&self) -> DomainResult<PackageFilter> {
        Ok(PackageFilter {
            package_type_id: self.package_type_id.map(PackageTypeId::new).transpose()?,
            has_delivery_cost: self.has_delivery_cost,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeadLettersQuery {
    pub limit: Option<usize>,
}

impl DeadLettersQuery {
    pub const DEFAULT_LIMIT: usize = 50;
    pub const MAX_LIMIT: usize = 500;

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, Self::MAX_LIMIT)
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Clone, Serialize)]
pub struct PackageTypeResponse {
    pub id: PackageTypeId,
    pub name: String,
}

impl From<PackageType> for PackageTypeResponse {
    fn from(t: PackageType) -> Self {
        Self { id: t.id, name: t.name }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PackageResponse {
    pub id: PackageId,
    pub name: String,
    pub weight: f64,
    pub package_type_id: PackageTypeId,
    pub package_type: Option<PackageTypeResponse>,
    pub content_cost_usd: f64,
    /// Rubles; `null` until the batch job has priced the package.
    pub delivery_cost: Option<DeliveryCost>,
    pub transport_company_id: Option<TransportCompanyId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PackageResponse {
    pub fn from_package(package: Package, types: &[PackageType]) -> Self {
        let package_type = types
            .iter()
            .find(|t| t.id == package.package_type_id)
            .cloned()
            .map(PackageTypeResponse::from);

        Self {
            id: package.id,
            name: package.name,
            weight: package.weight_kg,
            package_type_id: package.package_type_id,
            package_type,
            content_cost_usd: package.content_cost_usd,
            delivery_cost: package.delivery_cost,
            transport_company_id: package.transport_company_id,
            created_at: package.created_at,
            updated_at: package.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PackagePageResponse {
    pub items: Vec<PackageResponse>,
    pub total: u64,
    pub page: u32,
    pub size: u32,
    pub pages: u64,
}

impl PackagePageResponse {
    pub fn from_page(page: PackagePage, types: &[PackageType]) -> Self {
        Self {
            items: page
                .items
                .into_iter()
                .map(|p| PackageResponse::from_package(p, types))
                .collect(),
            total: page.total,
            page: page.page,
            size: page.size,
            pages: page.pages,
        }
    }
}

/// One dead-lettered task, without its payload.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterResponse {
    pub task_id: String,
    pub kind: String,
    pub reason: String,
    pub attempts: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

impl From<DeadLetterEntry> for DeadLetterResponse {
    fn from(entry: DeadLetterEntry) -> Self {
        Self {
            task_id: entry.job.id.to_string(),
            kind: entry.job.kind.type_name().to_string(),
            reason: entry.reason,
            attempts: entry.job.attempt,
            dead_lettered_at: entry.dead_lettered_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_query_defaults_to_the_first_page() {
        let page = ListPackagesQuery::default().page_request().unwrap();
        assert_eq!(page.page(), 1);
        assert_eq!(page.size(), PageRequest::DEFAULT_SIZE);
    }

    #[test]
    fn list_query_rejects_out_of_range_values() {
        let oversized = ListPackagesQuery {
            size: Some(101),
            ..Default::default()
        };
        assert!(oversized.page_request().is_err());

        let bad_type = ListPackagesQuery {
            package_type_id: Some(0),
            ..Default::default()
        };
        assert!(bad_type.filter().is_err());
    }

    #[test]
    fn dead_letter_limit_is_bounded() {
        assert_eq!(DeadLettersQuery::default().limit(), DeadLettersQuery::DEFAULT_LIMIT);
        assert_eq!(DeadLettersQuery { limit: Some(0) }.limit(), 1);
        assert_eq!(DeadLettersQuery { limit: Some(10_000) }.limit(), DeadLettersQuery::MAX_LIMIT);
    }

    #[test]
    fn package_response_names_its_type() {
        let session = SessionId::generate();
        let input = NewPackage::new("kettle", 1.0, 3, 20.0).unwrap();
        let package = Package::register(PackageId::from_raw(7), input, session, Utc::now());

        let response = PackageResponse::from_package(package, &parcelhub_shipping::seed_package_types());
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["id"], 7);
        assert_eq!(json["package_type"]["name"], "Miscellaneous");
        assert!(json["delivery_cost"].is_null());
    }
}
