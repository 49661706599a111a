//! Catalog rows and the per-product snapshot the matrix rules operate on.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bazaar_core::{
    AttributeId, DomainError, DomainResult, Entity, OptionId, ProductId, ValueObject, VariantId,
};

use crate::consistency::{classify_presence, AttributePresence};

/// A named dimension of a product (e.g. "Color").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub id: AttributeId,
    pub product_id: ProductId,
    pub label: String,
}

impl Entity for Attribute {
    type Id = AttributeId;

    fn id(&self) -> AttributeId {
        self.id
    }
}

/// One value along an attribute's dimension (e.g. "Red").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeOption {
    pub id: OptionId,
    pub attribute_id: AttributeId,
    pub value: String,
}

impl Entity for AttributeOption {
    type Id = OptionId;

    fn id(&self) -> OptionId {
        self.id
    }
}

/// A sellable point in the product's attribute space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    pub product_id: ProductId,
    /// Units in stock. Owned by the variant; the matrix rules never change it.
    pub quantity: i64,
    pub created_at: DateTime<Utc>,
}

impl Entity for Variant {
    type Id = VariantId;

    fn id(&self) -> VariantId {
        self.id
    }
}

/// One coordinate of a variant: `(variant, attribute) -> option`.
///
/// Unique per `(variant_id, attribute_id)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Assignment {
    pub variant_id: VariantId,
    pub attribute_id: AttributeId,
    pub option_id: OptionId,
}

impl Assignment {
    pub fn new(variant_id: VariantId, attribute_id: AttributeId, option_id: OptionId) -> Self {
        Self {
            variant_id,
            attribute_id,
            option_id,
        }
    }
}

/// The sorted set of a variant's `(attribute, option)` pairs.
///
/// Two live variants of a product must never share a signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Signature(Vec<(AttributeId, OptionId)>);

impl Signature {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn option_for(&self, attribute_id: AttributeId) -> Option<OptionId> {
        self.0
            .binary_search_by_key(&attribute_id, |(a, _)| *a)
            .ok()
            .map(|idx| self.0[idx].1)
    }
}

impl FromIterator<(AttributeId, OptionId)> for Signature {
    fn from_iter<I: IntoIterator<Item = (AttributeId, OptionId)>>(iter: I) -> Self {
        let mut pairs: Vec<_> = iter.into_iter().collect();
        pairs.sort_unstable();
        pairs.dedup();
        Self(pairs)
    }
}

impl ValueObject for Signature {}

/// An attribute together with its options, ordered by option id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeWithOptions {
    pub attribute: Attribute,
    pub options: Vec<AttributeOption>,
}

impl AttributeWithOptions {
    pub fn option_ids(&self) -> Vec<OptionId> {
        self.options.iter().map(|o| o.id).collect()
    }

    pub fn has_option(&self, option_id: OptionId) -> bool {
        self.options.iter().any(|o| o.id == option_id)
    }
}

/// A variant with its assignment rows, ordered by attribute id.
///
/// This is the shape handed to the storefront and order placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantWithAssignments {
    pub variant: Variant,
    pub assignments: Vec<Assignment>,
}

impl VariantWithAssignments {
    pub fn signature(&self) -> Signature {
        self.assignments
            .iter()
            .map(|a| (a.attribute_id, a.option_id))
            .collect()
    }
}

/// Everything the matrix rules need to know about one product, read inside the
/// same transaction that will write the delta.
///
/// Construction through [`ProductMatrix::new`] sorts every collection by id so
/// that planning never depends on storage iteration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductMatrix {
    pub product_id: ProductId,
    pub attributes: Vec<AttributeWithOptions>,
    pub variants: Vec<Variant>,
    pub assignments: Vec<Assignment>,
}

impl ProductMatrix {
    pub fn new(
        product_id: ProductId,
        mut attributes: Vec<AttributeWithOptions>,
        mut variants: Vec<Variant>,
        mut assignments: Vec<Assignment>,
    ) -> Self {
        attributes.sort_by_key(|a| a.attribute.id);
        for attribute in &mut attributes {
            attribute.options.sort_by_key(|o| o.id);
        }
        variants.sort_by_key(|v| v.id);
        assignments.sort_unstable();

        Self {
            product_id,
            attributes,
            variants,
            assignments,
        }
    }

    pub fn empty(product_id: ProductId) -> Self {
        Self::new(product_id, Vec::new(), Vec::new(), Vec::new())
    }

    pub fn attribute(&self, attribute_id: AttributeId) -> Option<&AttributeWithOptions> {
        self.attributes
            .iter()
            .find(|a| a.attribute.id == attribute_id)
    }

    /// Returns the attribute that owns `option_id`, if any.
    pub fn attribute_of_option(&self, option_id: OptionId) -> Option<&AttributeWithOptions> {
        self.attributes.iter().find(|a| a.has_option(option_id))
    }

    pub fn variant_ids(&self) -> Vec<VariantId> {
        ids_of(&self.variants)
    }

    pub fn presence_of(&self, attribute_id: AttributeId) -> AttributePresence {
        classify_presence(&self.variant_ids(), &self.assignments, attribute_id)
    }

    /// Signature of every live variant; variants without assignments map to the
    /// empty signature.
    pub fn signatures(&self) -> BTreeMap<VariantId, Signature> {
        let mut pairs: BTreeMap<VariantId, Vec<(AttributeId, OptionId)>> = self
            .variants
            .iter()
            .map(|v| (v.id, Vec::new()))
            .collect();

        for a in &self.assignments {
            if let Some(entry) = pairs.get_mut(&a.variant_id) {
                entry.push((a.attribute_id, a.option_id));
            }
        }

        pairs
            .into_iter()
            .map(|(id, p)| (id, p.into_iter().collect()))
            .collect()
    }

    /// `(attribute, sorted option ids)` for every attribute that has at least one
    /// option. Attributes without options never appear in a signature.
    pub fn dimensions(&self) -> Vec<(AttributeId, Vec<OptionId>)> {
        self.attributes
            .iter()
            .filter(|a| !a.options.is_empty())
            .map(|a| (a.attribute.id, a.option_ids()))
            .collect()
    }

    pub fn dimensions_excluding(&self, attribute_id: AttributeId) -> Vec<(AttributeId, Vec<OptionId>)> {
        self.dimensions()
            .into_iter()
            .filter(|(id, _)| *id != attribute_id)
            .collect()
    }

    /// Split the snapshot into the listing shape, ordered by variant id.
    pub fn into_variant_listing(self) -> Vec<VariantWithAssignments> {
        let mut by_variant: BTreeMap<VariantId, Vec<Assignment>> = BTreeMap::new();
        for a in self.assignments {
            by_variant.entry(a.variant_id).or_default().push(a);
        }

        self.variants
            .into_iter()
            .map(|variant| {
                let mut assignments = by_variant.remove(&variant.id).unwrap_or_default();
                assignments.sort_by_key(|a| a.attribute_id);
                VariantWithAssignments {
                    variant,
                    assignments,
                }
            })
            .collect()
    }

    /// Verify referential closure, attribute coverage and signature uniqueness.
    pub fn check_invariants(&self) -> DomainResult<()> {
        let variant_ids: BTreeSet<VariantId> = self.variants.iter().map(|v| v.id).collect();
        let mut seen: BTreeSet<(VariantId, AttributeId)> = BTreeSet::new();

        for a in &self.assignments {
            if !variant_ids.contains(&a.variant_id) {
                return Err(DomainError::invariant(format!(
                    "assignment references {} outside {}",
                    a.variant_id, self.product_id
                )));
            }
            let attribute = self.attribute(a.attribute_id).ok_or_else(|| {
                DomainError::invariant(format!(
                    "{} references dead {}",
                    a.variant_id, a.attribute_id
                ))
            })?;
            if !attribute.has_option(a.option_id) {
                return Err(DomainError::invariant(format!(
                    "{} references {} which does not belong to {}",
                    a.variant_id, a.option_id, a.attribute_id
                )));
            }
            if !seen.insert((a.variant_id, a.attribute_id)) {
                return Err(DomainError::invariant(format!(
                    "{} has more than one assignment for {}",
                    a.variant_id, a.attribute_id
                )));
            }
        }

        for attribute in &self.attributes {
            self.presence_of(attribute.attribute.id).ensure_consistent()?;
        }

        let mut owners: BTreeMap<Signature, VariantId> = BTreeMap::new();
        for (variant_id, signature) in self.signatures() {
            if let Some(first) = owners.insert(signature, variant_id) {
                return Err(DomainError::invariant(format!(
                    "{first} and {variant_id} share a signature"
                )));
            }
        }

        Ok(())
    }
}

fn ids_of<E: Entity>(items: &[E]) -> Vec<E::Id> {
    items.iter().map(Entity::id).collect()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn attr(id: i64, product: i64, label: &str, options: &[(i64, &str)]) -> AttributeWithOptions {
        AttributeWithOptions {
            attribute: Attribute {
                id: AttributeId::new(id),
                product_id: ProductId::new(product),
                label: label.to_string(),
            },
            options: options
                .iter()
                .map(|(oid, value)| AttributeOption {
                    id: OptionId::new(*oid),
                    attribute_id: AttributeId::new(id),
                    value: value.to_string(),
                })
                .collect(),
        }
    }

    pub fn variant(id: i64, product: i64) -> Variant {
        Variant {
            id: VariantId::new(id),
            product_id: ProductId::new(product),
            quantity: 0,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    pub fn assign(variant: i64, attribute: i64, option: i64) -> Assignment {
        Assignment::new(
            VariantId::new(variant),
            AttributeId::new(attribute),
            OptionId::new(option),
        )
    }

    /// Color{Red=10, Blue=11} x Size{S=20, M=21}, fully expanded.
    pub fn color_by_size() -> ProductMatrix {
        ProductMatrix::new(
            ProductId::new(1),
            vec![
                attr(2, 1, "Size", &[(20, "S"), (21, "M")]),
                attr(1, 1, "Color", &[(10, "Red"), (11, "Blue")]),
            ],
            vec![variant(4, 1), variant(1, 1), variant(2, 1), variant(3, 1)],
            vec![
                assign(1, 1, 10),
                assign(1, 2, 20),
                assign(2, 1, 10),
                assign(2, 2, 21),
                assign(3, 1, 11),
                assign(3, 2, 20),
                assign(4, 1, 11),
                assign(4, 2, 21),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn new_sorts_everything_by_id() {
        let m = color_by_size();
        assert_eq!(m.attributes[0].attribute.label, "Color");
        assert_eq!(
            m.variant_ids(),
            vec![VariantId::new(1), VariantId::new(2), VariantId::new(3), VariantId::new(4)]
        );
    }

    #[test]
    fn signature_is_order_independent() {
        let a: Signature = vec![
            (AttributeId::new(2), OptionId::new(20)),
            (AttributeId::new(1), OptionId::new(10)),
        ]
        .into_iter()
        .collect();
        let b: Signature = vec![
            (AttributeId::new(1), OptionId::new(10)),
            (AttributeId::new(2), OptionId::new(20)),
        ]
        .into_iter()
        .collect();
        assert_eq!(a, b);
        assert_eq!(a.option_for(AttributeId::new(2)), Some(OptionId::new(20)));
        assert_eq!(a.option_for(AttributeId::new(3)), None);
    }

    #[test]
    fn variants_without_rows_have_empty_signatures() {
        let m = ProductMatrix::new(ProductId::new(1), vec![], vec![variant(5, 1)], vec![]);
        let sigs = m.signatures();
        assert!(sigs[&VariantId::new(5)].is_empty());
    }

    #[test]
    fn dimensions_skip_attributes_without_options() {
        let m = ProductMatrix::new(
            ProductId::new(1),
            vec![attr(1, 1, "Color", &[(10, "Red")]), attr(2, 1, "Size", &[])],
            vec![],
            vec![],
        );
        assert_eq!(
            m.dimensions(),
            vec![(AttributeId::new(1), vec![OptionId::new(10)])]
        );
        assert!(m.dimensions_excluding(AttributeId::new(1)).is_empty());
    }

    #[test]
    fn listing_groups_assignments_by_variant() {
        let listing = color_by_size().into_variant_listing();
        assert_eq!(listing.len(), 4);
        assert_eq!(listing[0].variant.id, VariantId::new(1));
        assert_eq!(
            listing[0].assignments,
            vec![assign(1, 1, 10), assign(1, 2, 20)]
        );
    }

    #[test]
    fn full_matrix_satisfies_invariants() {
        color_by_size().check_invariants().unwrap();
    }

    #[test]
    fn duplicate_signatures_are_reported() {
        let m = ProductMatrix::new(
            ProductId::new(1),
            vec![attr(1, 1, "Color", &[(10, "Red")])],
            vec![variant(1, 1), variant(2, 1)],
            vec![assign(1, 1, 10), assign(2, 1, 10)],
        );
        match m.check_invariants() {
            Err(DomainError::InvariantViolation(msg)) => assert!(msg.contains("share a signature")),
            other => panic!("Expected InvariantViolation, got {other:?}"),
        }
    }

    #[test]
    fn half_covered_attribute_is_reported() {
        let m = ProductMatrix::new(
            ProductId::new(1),
            vec![attr(1, 1, "Color", &[(10, "Red"), (11, "Blue")])],
            vec![variant(1, 1), variant(2, 1)],
            vec![assign(1, 1, 10)],
        );
        assert_eq!(
            m.check_invariants(),
            Err(DomainError::InconsistentAttributePresence(AttributeId::new(1)))
        );
    }

    #[test]
    fn option_from_another_attribute_is_reported() {
        let m = ProductMatrix::new(
            ProductId::new(1),
            vec![
                attr(1, 1, "Color", &[(10, "Red")]),
                attr(2, 1, "Size", &[(20, "S")]),
            ],
            vec![variant(1, 1)],
            vec![assign(1, 1, 20), assign(1, 2, 20)],
        );
        assert!(matches!(
            m.check_invariants(),
            Err(DomainError::InvariantViolation(_))
        ));
    }
}
