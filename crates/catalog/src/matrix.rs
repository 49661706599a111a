//! Matrix planning: decide what rows an attribute/option mutation must write.
//!
//! Every planner here is pure. It receives a [`ProductMatrix`] read inside
//! the caller's transaction and returns the delta to apply. Nothing in this
//! module touches storage.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use bazaar_core::{AttributeId, DomainError, DomainResult, OptionId, VariantId};

use crate::combination::{Combination, Dimensions};
use crate::consistency::AttributePresence;
use crate::model::{Assignment, ProductMatrix, Signature};

/// What to write after a new option has been added to an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsertionPlan {
    /// The attribute did not discriminate any variant yet: tag every existing
    /// variant with the new option. No variants are created.
    Backfill { assignments: Vec<Assignment> },
    /// The attribute already discriminates every variant: create one new
    /// variant per combination. Each combination already contains the new option.
    Proliferate { combinations: Vec<Combination> },
}

impl InsertionPlan {
    pub fn new_variant_count(&self) -> usize {
        match self {
            InsertionPlan::Backfill { .. } => 0,
            InsertionPlan::Proliferate { combinations } => combinations.len(),
        }
    }
}

/// Plan the rows for `option_id`, which must already be part of `matrix`
/// under `attribute_id`.
///
/// Fails with `InconsistentAttributePresence` when the target attribute, or
/// any other attribute feeding the proliferation, is only partly present.
pub fn plan_option_insertion(
    matrix: &ProductMatrix,
    attribute_id: AttributeId,
    option_id: OptionId,
) -> DomainResult<InsertionPlan> {
    let attribute = matrix
        .attribute(attribute_id)
        .ok_or_else(|| DomainError::not_found(attribute_id))?;
    if !attribute.has_option(option_id) {
        return Err(DomainError::not_found(option_id));
    }

    match matrix.presence_of(attribute_id).ensure_consistent()? {
        AttributePresence::NonePresent => {
            let assignments = matrix
                .variants
                .iter()
                .map(|v| Assignment::new(v.id, attribute_id, option_id))
                .collect();
            Ok(InsertionPlan::Backfill { assignments })
        }
        _ => {
            let others = matrix.dimensions_excluding(attribute_id);
            for (other, _) in &others {
                if !matrix.presence_of(*other).is_all_present() {
                    return Err(DomainError::InconsistentAttributePresence(*other));
                }
            }

            let combinations = Dimensions::from_pairs(others)
                .combinations()
                .map(|c| c.with(attribute_id, option_id))
                .collect();
            Ok(InsertionPlan::Proliferate { combinations })
        }
    }
}

/// Variants to delete so that no two live variants share a signature.
///
/// In each group of identical signatures the lowest id survives. The result is
/// sorted by id.
pub fn plan_deduplication(matrix: &ProductMatrix) -> Vec<VariantId> {
    let mut survivors: BTreeMap<Signature, VariantId> = BTreeMap::new();
    let mut doomed = Vec::new();

    // `signatures()` iterates in ascending id order, so the first owner wins.
    for (variant_id, signature) in matrix.signatures() {
        if survivors.contains_key(&signature) {
            doomed.push(variant_id);
        } else {
            survivors.insert(signature, variant_id);
        }
    }

    doomed
}

/// How the variants that referenced a deleted option are treated.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionRemoval {
    /// The attribute keeps other options: variants that used this one are deleted.
    DropVariants,
    /// This was the attribute's last option: variants survive and the
    /// dimension collapses in place.
    Collapse,
}

/// Decide the removal mode for `option_id`, counting the attribute's options
/// before deletion.
pub fn plan_option_removal(matrix: &ProductMatrix, option_id: OptionId) -> DomainResult<OptionRemoval> {
    let attribute = matrix
        .attribute_of_option(option_id)
        .ok_or_else(|| DomainError::not_found(option_id))?;

    if attribute.options.len() > 1 {
        Ok(OptionRemoval::DropVariants)
    } else {
        Ok(OptionRemoval::Collapse)
    }
}

/// Combinations for a product that has attributes but no variants yet.
///
/// Attributes without options are skipped; with no remaining dimensions the
/// result is a single empty combination.
pub fn plan_seed(matrix: &ProductMatrix) -> DomainResult<Vec<Combination>> {
    if !matrix.variants.is_empty() {
        return Err(DomainError::conflict(format!(
            "{} already has {} variants",
            matrix.product_id,
            matrix.variants.len()
        )));
    }

    Ok(Dimensions::from_pairs(matrix.dimensions())
        .combinations()
        .collect())
}
