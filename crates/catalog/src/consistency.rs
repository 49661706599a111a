//! Attribute presence classification.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use bazaar_core::{AttributeId, DomainError, DomainResult, VariantId};

use crate::model::Assignment;

/// How an attribute is represented across a product's live variants.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributePresence {
    /// Every variant has an assignment for the attribute.
    AllPresent,
    /// No variant has one (also the answer for a product with no variants).
    NonePresent,
    /// Some do and some don't. The matrix is corrupt for this attribute.
    Inconsistent(AttributeId),
}

impl AttributePresence {
    /// Turns `Inconsistent` into [`DomainError::InconsistentAttributePresence`].
    pub fn ensure_consistent(self) -> DomainResult<Self> {
        match self {
            AttributePresence::Inconsistent(attribute_id) => {
                Err(DomainError::InconsistentAttributePresence(attribute_id))
            }
            other => Ok(other),
        }
    }

    pub fn is_all_present(self) -> bool {
        matches!(self, AttributePresence::AllPresent)
    }
}

/// Classify `attribute_id` over `variant_ids`.
///
/// Assignments for variants outside `variant_ids` are ignored.
pub fn classify_presence(
    variant_ids: &[VariantId],
    assignments: &[Assignment],
    attribute_id: AttributeId,
) -> AttributePresence {
    let scope: BTreeSet<VariantId> = variant_ids.iter().copied().collect();
    if scope.is_empty() {
        return AttributePresence::NonePresent;
    }

    let covered: BTreeSet<VariantId> = assignments
        .iter()
        .filter(|a| a.attribute_id == attribute_id && scope.contains(&a.variant_id))
        .map(|a| a.variant_id)
        .collect();

    match covered.len() {
        0 => AttributePresence::NonePresent,
        n if n == scope.len() => AttributePresence::AllPresent,
        _ => AttributePresence::Inconsistent(attribute_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::assign;

    fn ids(raw: &[i64]) -> Vec<VariantId> {
        raw.iter().map(|id| VariantId::new(*id)).collect()
    }

    #[test]
    fn no_variants_is_none_present() {
        assert_eq!(
            classify_presence(&[], &[], AttributeId::new(1)),
            AttributePresence::NonePresent
        );
    }

    #[test]
    fn all_none_and_some() {
        let rows = vec![assign(1, 1, 10), assign(2, 1, 11), assign(1, 2, 20)];
        let variants = ids(&[1, 2]);

        assert_eq!(
            classify_presence(&variants, &rows, AttributeId::new(1)),
            AttributePresence::AllPresent
        );
        assert_eq!(
            classify_presence(&variants, &rows, AttributeId::new(3)),
            AttributePresence::NonePresent
        );
        assert_eq!(
            classify_presence(&variants, &rows, AttributeId::new(2)),
            AttributePresence::Inconsistent(AttributeId::new(2))
        );
    }

    #[test]
    fn rows_outside_scope_are_ignored() {
        let rows = vec![assign(1, 1, 10), assign(9, 1, 10)];
        assert_eq!(
            classify_presence(&ids(&[1]), &rows, AttributeId::new(1)),
            AttributePresence::AllPresent
        );
        assert_eq!(
            classify_presence(&ids(&[2]), &rows, AttributeId::new(1)),
            AttributePresence::NonePresent
        );
    }

    #[test]
    fn inconsistent_is_a_hard_error() {
        let err = AttributePresence::Inconsistent(AttributeId::new(4))
            .ensure_consistent()
            .unwrap_err();
        match err {
            DomainError::InconsistentAttributePresence(id) => assert_eq!(id, AttributeId::new(4)),
            _ => panic!("Expected InconsistentAttributePresence"),
        }
        assert_eq!(
            AttributePresence::AllPresent.ensure_consistent(),
            Ok(AttributePresence::AllPresent)
        );
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: the classification agrees with a per-variant check.
            #[test]
            fn matches_per_variant_membership(
                variant_count in 0usize..8,
                covered in prop::collection::vec(any::<bool>(), 8),
            ) {
                let variants: Vec<VariantId> =
                    (1..=variant_count as i64).map(VariantId::new).collect();
                let rows: Vec<Assignment> = variants
                    .iter()
                    .zip(&covered)
                    .filter(|(_, has)| **has)
                    .map(|(v, _)| assign(v.get(), 1, 10))
                    .collect();

                let presence = classify_presence(&variants, &rows, AttributeId::new(1));
                let hits = rows.len();

                let expected = if hits == 0 {
                    AttributePresence::NonePresent
                } else if hits == variants.len() {
                    AttributePresence::AllPresent
                } else {
                    AttributePresence::Inconsistent(AttributeId::new(1))
                };
                prop_assert_eq!(presence, expected);
            }
        }
    }
}
