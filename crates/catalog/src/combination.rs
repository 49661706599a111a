//! Combination generator: the Cartesian product of a product's option sets.
//!
//! The generator is a pure function of its input. Input pairs are normalized
//! (sorted by attribute id, options sorted and de-duplicated) before
//! enumeration, so the output never depends on arrival order or on storage
//! iteration order.
//!
//! ## Ordering
//!
//! Enumeration is an odometer over the normalized dimensions: the first
//! (lowest-id) attribute is the slowest-changing digit, the last attribute
//! the fastest. For `{A:[1,2], B:[3,4]}` the sequence is
//! `{A:1,B:3}, {A:1,B:4}, {A:2,B:3}, {A:2,B:4}`.
//!
//! ## Edge cases
//!
//! - No dimensions: exactly one combination, the empty one.
//! - Any dimension without options: no combinations at all.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use bazaar_core::{AttributeId, OptionId, ValueObject, VariantId};

use crate::model::Assignment;

/// One element of the Cartesian product: one option per attribute, sorted by
/// attribute id.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Combination(Vec<(AttributeId, OptionId)>);

impl Combination {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, attribute_id: AttributeId) -> Option<OptionId> {
        self.0
            .binary_search_by_key(&attribute_id, |(a, _)| *a)
            .ok()
            .map(|idx| self.0[idx].1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (AttributeId, OptionId)> + '_ {
        self.0.iter().copied()
    }

    /// Returns this combination extended (or overridden) with `attribute_id = option_id`.
    pub fn with(mut self, attribute_id: AttributeId, option_id: OptionId) -> Self {
        match self.0.binary_search_by_key(&attribute_id, |(a, _)| *a) {
            Ok(idx) => self.0[idx].1 = option_id,
            Err(idx) => self.0.insert(idx, (attribute_id, option_id)),
        }
        self
    }

    /// Assignment rows that place `variant_id` at this point.
    pub fn assignments_for(&self, variant_id: VariantId) -> Vec<Assignment> {
        self.0
            .iter()
            .map(|(a, o)| Assignment::new(variant_id, *a, *o))
            .collect()
    }
}

impl ValueObject for Combination {}

/// Normalized generator input: `(attribute, options)` sorted by attribute id,
/// options sorted and unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dimensions(Vec<(AttributeId, Vec<OptionId>)>);

impl Dimensions {
    /// Normalize arbitrary input. Repeated attribute ids have their option
    /// lists merged.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (AttributeId, Vec<OptionId>)>,
    {
        let mut merged: BTreeMap<AttributeId, BTreeSet<OptionId>> = BTreeMap::new();
        for (attribute_id, options) in pairs {
            merged.entry(attribute_id).or_default().extend(options);
        }

        Self(
            merged
                .into_iter()
                .map(|(a, opts)| (a, opts.into_iter().collect()))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn attribute_ids(&self) -> impl Iterator<Item = AttributeId> + '_ {
        self.0.iter().map(|(a, _)| *a)
    }

    /// `∏ |options(attr)|`, saturating at `usize::MAX`.
    pub fn combination_count(&self) -> usize {
        self.0
            .iter()
            .fold(1usize, |acc, (_, opts)| acc.saturating_mul(opts.len()))
    }

    pub fn combinations(&self) -> Combinations<'_> {
        let remaining = self.combination_count();
        Combinations {
            dims: &self.0,
            cursor: vec![0; self.0.len()],
            remaining,
        }
    }
}

/// Odometer iterator over [`Dimensions`].
#[derive(Debug, Clone)]
pub struct Combinations<'a> {
    dims: &'a [(AttributeId, Vec<OptionId>)],
    cursor: Vec<usize>,
    remaining: usize,
}

impl Combinations<'_> {
    fn advance(&mut self) {
        let mut digit = self.cursor.len();
        while digit > 0 {
            digit -= 1;
            self.cursor[digit] += 1;
            if self.cursor[digit] < self.dims[digit].1.len() {
                return;
            }
            self.cursor[digit] = 0;
        }
    }
}

impl Iterator for Combinations<'_> {
    type Item = Combination;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let current = Combination(
            self.dims
                .iter()
                .zip(&self.cursor)
                .map(|((attribute_id, options), idx)| (*attribute_id, options[*idx]))
                .collect(),
        );

        self.remaining -= 1;
        self.advance();
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Combinations<'_> {}

/// Enumerate every combination of `pairs` (see module docs for ordering).
pub fn combinations<I>(pairs: I) -> Vec<Combination>
where
    I: IntoIterator<Item = (AttributeId, Vec<OptionId>)>,
{
    Dimensions::from_pairs(pairs).combinations().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a(id: i64) -> AttributeId {
        AttributeId::new(id)
    }

    fn o(id: i64) -> OptionId {
        OptionId::new(id)
    }

    fn set(combos: Vec<Combination>) -> BTreeSet<Combination> {
        combos.into_iter().collect()
    }

    #[test]
    fn empty_input_yields_the_empty_combination() {
        let combos = combinations(Vec::new());
        assert_eq!(combos, vec![Combination::default()]);
    }

    #[test]
    fn dimension_without_options_yields_nothing() {
        let combos = combinations(vec![(a(1), vec![o(1)]), (a(2), vec![])]);
        assert!(combos.is_empty());
    }

    #[test]
    fn two_by_one_round_trip() {
        let expected: BTreeSet<Combination> = [
            Combination::default().with(a(1), o(1)).with(a(2), o(3)),
            Combination::default().with(a(1), o(2)).with(a(2), o(3)),
        ]
        .into_iter()
        .collect();

        let forward = combinations(vec![(a(1), vec![o(1), o(2)]), (a(2), vec![o(3)])]);
        let reversed = combinations(vec![(a(2), vec![o(3)]), (a(1), vec![o(2), o(1)])]);

        assert_eq!(forward.len(), 2);
        assert_eq!(set(forward), expected);
        assert_eq!(set(reversed), expected);
    }

    #[test]
    fn first_attribute_is_the_slowest_digit() {
        let combos = combinations(vec![(a(1), vec![o(1), o(2)]), (a(2), vec![o(3), o(4)])]);
        let order: Vec<(OptionId, OptionId)> = combos
            .iter()
            .map(|c| (c.get(a(1)).unwrap(), c.get(a(2)).unwrap()))
            .collect();
        assert_eq!(
            order,
            vec![(o(1), o(3)), (o(1), o(4)), (o(2), o(3)), (o(2), o(4))]
        );
    }

    #[test]
    fn repeated_attributes_and_options_are_merged() {
        let dims = Dimensions::from_pairs(vec![
            (a(1), vec![o(2), o(1)]),
            (a(1), vec![o(2), o(3)]),
        ]);
        assert_eq!(dims.len(), 1);
        assert_eq!(dims.combination_count(), 3);
    }

    #[test]
    fn with_overrides_existing_attribute() {
        let c = Combination::default().with(a(1), o(1)).with(a(1), o(5));
        assert_eq!(c.len(), 1);
        assert_eq!(c.get(a(1)), Some(o(5)));
    }

    #[test]
    fn iterator_reports_exact_size() {
        let dims = Dimensions::from_pairs(vec![(a(1), vec![o(1), o(2), o(3)]), (a(2), vec![o(4), o(5)])]);
        let mut it = dims.combinations();
        assert_eq!(it.len(), 6);
        it.next();
        assert_eq!(it.len(), 5);
    }

    #[test]
    fn assignments_for_places_a_variant() {
        let c = Combination::default().with(a(2), o(7)).with(a(1), o(3));
        let rows = c.assignments_for(VariantId::new(9));
        assert_eq!(
            rows,
            vec![
                Assignment::new(VariantId::new(9), a(1), o(3)),
                Assignment::new(VariantId::new(9), a(2), o(7)),
            ]
        );
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn dims_strategy() -> impl Strategy<Value = Vec<(i64, Vec<i64>)>> {
            prop::collection::vec(
                (1i64..8, prop::collection::vec(1i64..50, 1..4)),
                0..4,
            )
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: count is the product of the (normalized) option-set sizes.
            #[test]
            fn count_is_product_of_option_counts(raw in dims_strategy()) {
                let pairs: Vec<_> = raw
                    .iter()
                    .map(|(attr, opts)| (a(*attr), opts.iter().map(|x| o(*x)).collect::<Vec<_>>()))
                    .collect();
                let dims = Dimensions::from_pairs(pairs.clone());
                let combos = combinations(pairs);

                prop_assert_eq!(combos.len(), dims.combination_count());

                let distinct: BTreeSet<_> = combos.iter().cloned().collect();
                prop_assert_eq!(distinct.len(), combos.len());
            }

            /// Property: every combination picks exactly one listed option per attribute.
            #[test]
            fn every_combination_covers_every_attribute(raw in dims_strategy()) {
                let pairs: Vec<_> = raw
                    .iter()
                    .map(|(attr, opts)| (a(*attr), opts.iter().map(|x| o(*x)).collect::<Vec<_>>()))
                    .collect();
                let dims = Dimensions::from_pairs(pairs.clone());
                let attrs: Vec<AttributeId> = dims.attribute_ids().collect();

                for combo in combinations(pairs.clone()) {
                    prop_assert_eq!(combo.len(), attrs.len());
                    for attr in &attrs {
                        let chosen = combo.get(*attr).unwrap();
                        prop_assert!(pairs
                            .iter()
                            .any(|(pa, opts)| pa == attr && opts.contains(&chosen)));
                    }
                }
            }

            /// Property: arrival order of the input pairs never changes the output set.
            #[test]
            fn arrival_order_is_irrelevant(raw in dims_strategy()) {
                let pairs: Vec<_> = raw
                    .iter()
                    .map(|(attr, opts)| (a(*attr), opts.iter().map(|x| o(*x)).collect::<Vec<_>>()))
                    .collect();
                let mut reversed: Vec<_> = pairs
                    .iter()
                    .rev()
                    .map(|(attr, opts)| (*attr, opts.iter().rev().copied().collect::<Vec<_>>()))
                    .collect();
                let shift = reversed.len().min(1);
                reversed.rotate_left(shift);

                prop_assert_eq!(combinations(pairs), combinations(reversed));
            }
        }
    }
}
