//! Listing a session's packages: filters and pagination.

use serde::{Deserialize, Serialize};

use parcelhub_core::{DomainError, DomainResult, PackageTypeId};

use crate::package::Package;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageFilter {
    pub package_type_id: Option<PackageTypeId>,
    /// `Some(true)`: priced only; `Some(false)`: unpriced only.
    pub has_delivery_cost: Option<bool>,
}

impl PackageFilter {
    pub fn matches(&self, package: &Package) -> bool {
        if let Some(type_id) = self.package_type_id {
            if package.package_type_id != type_id {
                return false;
            }
        }
        match self.has_delivery_cost {
            Some(wanted) => package.is_priced() == wanted,
            None => true,
        }
    }
}

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    page: u32,
    size: u32,
}

impl PageRequest {
    pub const MAX_SIZE: u32 = 100;
    pub const DEFAULT_SIZE: u32 = 20;

    pub fn new(page: u32, size: u32) -> DomainResult<Self> {
        if page < 1 {
            return Err(DomainError::validation("page must be at least 1"));
        }
        if !(1..=Self::MAX_SIZE).contains(&size) {
            return Err(DomainError::validation(format!(
                "size must be between 1 and {}",
                Self::MAX_SIZE
            )));
        }
        Ok(Self { page, size })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            size: Self::DEFAULT_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackagePage {
    pub items: Vec<Package>,
    pub total: u64,
    pub page: u32,
    pub size: u32,
    pub pages: u64,
}

impl PackagePage {
    pub fn new(items: Vec<Package>, total: u64, request: PageRequest) -> Self {
        let size = u64::from(request.size());
        Self {
            items,
            total,
            page: request.page(),
            size: request.size(),
            pages: total.div_ceil(size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_bounds() {
        assert!(PageRequest::new(0, 20).is_err());
        assert!(PageRequest::new(1, 0).is_err());
        assert!(PageRequest::new(1, 101).is_err());
        assert_eq!(PageRequest::new(3, 10).unwrap().offset(), 20);
    }

    #[test]
    fn page_count_rounds_up() {
        let req = PageRequest::new(1, 10).unwrap();
        assert_eq!(PackagePage::new(vec![], 0, req).pages, 0);
        assert_eq!(PackagePage::new(vec![], 10, req).pages, 1);
        assert_eq!(PackagePage::new(vec![], 11, req).pages, 2);
    }
}
