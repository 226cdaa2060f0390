//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values. `Money`
/// and `Currency` are the main examples in this workspace: two amounts of 100
/// USD cents are the same value no matter where they came from.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
