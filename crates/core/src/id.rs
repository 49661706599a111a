//! Strongly-typed identifiers used across the catalog.
//!
//! All catalog rows are keyed by database serials, so every identifier wraps
//! an `i64`. Identifiers are totally ordered; "lowest id" means "created first".

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of a product (owned by the wider catalog service).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(i64);

/// Identifier of a product attribute (a dimension such as "Color").
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeId(i64);

/// Identifier of an attribute option (a value such as "Red").
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptionId(i64);

/// Identifier of a sellable product variant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantId(i64);

macro_rules! impl_serial_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{} {}", $name, self.0)
            }
        }

        impl From<i64> for $t {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$t> for i64 {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let value = s
                    .trim()
                    .parse::<i64>()
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                if value <= 0 {
                    return Err(DomainError::invalid_id(format!(
                        "{}: must be positive, got {}",
                        $name, value
                    )));
                }
                Ok(Self(value))
            }
        }
    };
}

impl_serial_newtype!(ProductId, "product");
impl_serial_newtype!(AttributeId, "attribute");
impl_serial_newtype!(OptionId, "option");
impl_serial_newtype!(VariantId, "variant");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positive_serials() {
        let id: VariantId = " 42 ".parse().unwrap();
        assert_eq!(id, VariantId::new(42));
        assert_eq!(i64::from(id), 42);
    }

    #[test]
    fn rejects_non_positive_and_garbage() {
        assert!(matches!("0".parse::<OptionId>(), Err(DomainError::InvalidId(_))));
        assert!(matches!("-3".parse::<OptionId>(), Err(DomainError::InvalidId(_))));
        assert!(matches!("red".parse::<OptionId>(), Err(DomainError::InvalidId(_))));
    }

    #[test]
    fn ordering_follows_the_serial() {
        assert!(AttributeId::new(1) < AttributeId::new(2));
        assert_eq!(ProductId::new(9).to_string(), "product 9");
    }

    #[test]
    fn serializes_transparently() {
        let json = serde_json::to_string(&AttributeId::new(5)).unwrap();
        assert_eq!(json, "5");
        let back: AttributeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, AttributeId::new(5));
    }
}
