use serde::{Deserialize, Serialize};

use crate::bucket::RolloutBucketer;

/// Sum of the weights of a fully allocated variant list: weights are thousandths of a percent.
pub const TOTAL_WEIGHT: u32 = 100_000;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct WeightedVariant {
    pub name: String,
    pub weight: u32,
}

impl WeightedVariant {
    pub fn new(name: impl Into<String>, weight: u32) -> Self {
        Self {
            name: name.into(),
            weight,
        }
    }
}

/// Picks the variant served to `identifier` for an enabled flag.
///
/// Variant assignment is hashed separately from the rollout bucket so that the users admitted by a
/// rollout are not all funnelled into the first variant. If the weights do not cover the whole
/// population the remainder falls into the last variant.
pub fn select_variant<'a>(
    flag_name: &str,
    identifier: &str,
    variants: &'a [WeightedVariant],
) -> Option<&'a WeightedVariant> {
    let prefix = format!("{}.variant", flag_name);
    let bucket = RolloutBucketer::fraction(&prefix, identifier);

    let mut sum = 0.0;
    for variant in variants {
        sum += variant.weight as f32 / TOTAL_WEIGHT as f32;
        if bucket < sum {
            return Some(variant);
        }
    }
    variants.last()
}
