//! Value object trait: equality by value, not identity.
//!
//! Value objects have **no identity**. Two exchange rates of `90.0` are the same
//! rate; two packages with identical fields are still two packages.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values. To
/// "modify" one, build a new one.
///
/// ```ignore
/// #[derive(Debug, Clone, Copy, PartialEq)]
/// struct Weight(f64);
///
/// impl ValueObject for Weight {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
