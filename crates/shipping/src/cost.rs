//! Delivery cost arithmetic.
//!
//! `cost = (weight_kg * W + content_usd * C) * usd_to_rub`
//!
//! Results are held as whole kopecks. Conversion from the raw `f64` product
//! rounds half away from zero (`f64::round` on the kopeck value); all inputs
//! are non-negative, so in practice this is half-up.

use serde::{Deserialize, Serialize};

use parcelhub_core::{DomainError, DomainResult, ValueObject};

use crate::package::Package;

/// Rubles charged per kilogram of weight, before currency conversion.
pub const WEIGHT_COEFFICIENT: f64 = 0.5;

/// Share of the declared content value charged, before currency conversion.
pub const CONTENT_COEFFICIENT: f64 = 0.01;

/// Units of local currency (RUB) per one unit of source currency (USD).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct ExchangeRate(f64);

impl ExchangeRate {
    pub fn new(value: f64) -> DomainResult<Self> {
        if !value.is_finite() || value <= 0.0 {
            return Err(DomainError::validation(format!(
                "exchange rate must be a positive finite number, got {value}"
            )));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl ValueObject for ExchangeRate {}

impl TryFrom<f64> for ExchangeRate {
    type Error = DomainError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ExchangeRate> for f64 {
    fn from(rate: ExchangeRate) -> Self {
        rate.0
    }
}

impl core::fmt::Display for ExchangeRate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

/// A delivery cost in rubles, stored as kopecks.
///
/// Serialized as a ruble amount with two decimals of precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct DeliveryCost {
    kopecks: u64,
}

impl DeliveryCost {
    pub const ZERO: Self = Self { kopecks: 0 };

    pub const fn from_kopecks(kopecks: u64) -> Self {
        Self { kopecks }
    }

    /// Round a ruble amount to whole kopecks (half away from zero).
    ///
    /// Returns `None` for negative or non-finite amounts.
    pub fn from_rubles(rubles: f64) -> Option<Self> {
        if !rubles.is_finite() || rubles < 0.0 {
            return None;
        }
        let kopecks = (rubles * 100.0).round();
        if kopecks > u64::MAX as f64 {
            return None;
        }
        Some(Self {
            kopecks: kopecks as u64,
        })
    }

    pub const fn kopecks(self) -> u64 {
        self.kopecks
    }

    pub fn as_rubles(self) -> f64 {
        self.kopecks as f64 / 100.0
    }
}

impl ValueObject for DeliveryCost {}

impl TryFrom<f64> for DeliveryCost {
    type Error = DomainError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::from_rubles(value)
            .ok_or_else(|| DomainError::validation(format!("invalid delivery cost: {value}")))
    }
}

impl From<DeliveryCost> for f64 {
    fn from(cost: DeliveryCost) -> Self {
        cost.as_rubles()
    }
}

impl core::fmt::Display for DeliveryCost {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{:02}", self.kopecks / 100, self.kopecks % 100)
    }
}

/// Pure delivery cost formula with tunable coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostCalculator {
    pub weight_coefficient: f64,
    pub content_coefficient: f64,
}

impl Default for CostCalculator {
    fn default() -> Self {
        Self {
            weight_coefficient: WEIGHT_COEFFICIENT,
            content_coefficient: CONTENT_COEFFICIENT,
        }
    }
}

impl CostCalculator {
    pub fn new(weight_coefficient: f64, content_coefficient: f64) -> Self {
        Self {
            weight_coefficient,
            content_coefficient,
        }
    }

    /// Compute the delivery cost. `None` only when no rate is available (or the
    /// inputs are outside the domain, which validated packages never are).
    pub fn compute(
        &self,
        weight_kg: f64,
        content_cost_usd: f64,
        rate: Option<ExchangeRate>,
    ) -> Option<DeliveryCost> {
        let rate = rate?;
        let raw = (weight_kg * self.weight_coefficient
            + content_cost_usd * self.content_coefficient)
            * rate.value();
        DeliveryCost::from_rubles(raw)
    }

    pub fn compute_for(&self, package: &Package, rate: Option<ExchangeRate>) -> Option<DeliveryCost> {
        self.compute(package.weight_kg, package.content_cost_usd, rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rate(v: f64) -> Option<ExchangeRate> {
        Some(ExchangeRate::new(v).unwrap())
    }

    #[test]
    fn reference_formula() {
        let calc = CostCalculator::default();
        let cost = calc.compute(2.5, 150.0, rate(90.0)).unwrap();
        assert_eq!(cost.kopecks(), 24_750);
        assert_eq!(cost.to_string(), "247.50");
        assert_eq!(cost.as_rubles(), 247.5);
    }

    #[test]
    fn absent_rate_yields_absent_cost() {
        let calc = CostCalculator::default();
        assert_eq!(calc.compute(2.5, 150.0, None), None);
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        // Exact binary halves: 12.5 and 62.5 kopecks. Half-even would give 12 and 62.
        assert_eq!(DeliveryCost::from_rubles(0.125).unwrap().kopecks(), 13);
        assert_eq!(DeliveryCost::from_rubles(0.625).unwrap().kopecks(), 63);
        assert_eq!(DeliveryCost::from_rubles(0.124).unwrap().kopecks(), 12);
    }

    #[test]
    fn tiny_package_rounds_to_a_real_zero_cost() {
        let calc = CostCalculator::default();
        let cost = calc.compute(0.001, 0.0, rate(0.01));
        assert_eq!(cost, Some(DeliveryCost::ZERO));
    }

    #[test]
    fn coefficients_are_tunable() {
        let calc = CostCalculator::new(1.0, 0.0);
        assert_eq!(calc.compute(3.0, 1000.0, rate(2.0)).unwrap().kopecks(), 600);
    }

    #[test]
    fn exchange_rate_rejects_non_positive_values() {
        assert!(ExchangeRate::new(0.0).is_err());
        assert!(ExchangeRate::new(-1.0).is_err());
        assert!(ExchangeRate::new(f64::NAN).is_err());
        assert!(ExchangeRate::new(f64::INFINITY).is_err());
    }

    #[test]
    fn negative_amounts_are_not_costs() {
        assert_eq!(DeliveryCost::from_rubles(-0.01), None);
        assert_eq!(DeliveryCost::from_rubles(f64::NAN), None);
    }

    #[test]
    fn display_pads_kopecks() {
        assert_eq!(DeliveryCost::from_kopecks(105).to_string(), "1.05");
        assert_eq!(DeliveryCost::ZERO.to_string(), "0.00");
    }

    proptest! {
        #[test]
        fn present_rate_always_prices_valid_packages(
            weight in 0.001f64..10_000.0,
            content in 0.0f64..1_000_000.0,
            r in 0.01f64..1_000.0,
        ) {
            let calc = CostCalculator::default();
            prop_assert!(calc.compute(weight, content, rate(r)).is_some());
        }

        #[test]
        fn heavier_never_costs_less(
            weight in 0.001f64..1_000.0,
            extra in 0.0f64..1_000.0,
            content in 0.0f64..10_000.0,
            r in 0.01f64..500.0,
        ) {
            let calc = CostCalculator::default();
            let light = calc.compute(weight, content, rate(r)).unwrap();
            let heavy = calc.compute(weight + extra, content, rate(r)).unwrap();
            prop_assert!(heavy >= light);
        }
    }
}
