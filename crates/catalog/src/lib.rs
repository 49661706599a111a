//! Catalog variant-matrix domain module.
//!
//! This crate contains the rules that keep a product's variants consistent with
//! its attributes and options, implemented purely as deterministic domain logic
//! (no IO, no storage, no transactions). The orchestration that reads and writes
//! rows lives in `bazaar-infra`.

pub mod combination;
pub mod consistency;
pub mod matrix;
pub mod model;

pub use combination::{combinations, Combination, Combinations, Dimensions};
pub use consistency::{classify_presence, AttributePresence};
pub use matrix::{
    plan_deduplication, plan_option_insertion, plan_option_removal, plan_seed, InsertionPlan,
    OptionRemoval,
};
pub use model::{
    Assignment, Attribute, AttributeOption, AttributeWithOptions, ProductMatrix, Signature,
    Variant, VariantWithAssignments,
};
