use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::flag::FlagSnapshot;
use crate::rule::{Operator, RuleOrMalformed, TargetingRule};
use crate::variation::TOTAL_WEIGHT;

lazy_static! {
    static ref FLAG_NAME_REGEX: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap();
}

/// A problem found while checking a flag on the admin write path.
///
/// None of these are ever raised during evaluation: the evaluator tolerates the same conditions
/// (malformed rules never match, cycles fold into a reason) so that a bad write cannot break reads.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("flag name '{0}' may only contain letters, digits, '.', '_' and '-', and must start with a letter or digit")]
    InvalidName(String),
    #[error("rollout percentage {0} is outside 0..=100")]
    RolloutOutOfRange(u8),
    #[error("end_at {end} is not after start_at {start}")]
    InvertedWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("environments is empty; use \"all\" to allow every environment")]
    NoEnvironments,
    #[error("flag depends on itself")]
    SelfDependency,
    #[error("dependency cycle: {}", .0.iter().join(" -> "))]
    DependencyCycle(Vec<String>),
    #[error("targeting rule {index} is not a recognized rule: {raw}")]
    MalformedRule { index: usize, raw: String },
    #[error("targeting rule {index} ({kind} {operator:?}) has no {expected} to compare against")]
    MissingOperand {
        index: usize,
        kind: &'static str,
        operator: Operator,
        expected: &'static str,
    },
    #[error("targeting rule {index} compares numerically against a non-numeric value")]
    NonNumericOperand { index: usize },
    #[error("date_range rule {index} ends before it starts")]
    InvertedRuleRange { index: usize },
    #[error("variant weights sum to {0}, expected {expected}", expected = TOTAL_WEIGHT)]
    VariantWeights(u64),
}

/// Every [ValidationError] found for one write.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("invalid flag: {}", .0.iter().join("; "))]
pub struct ValidationErrors(pub Vec<ValidationError>);

/// Checks a single snapshot in isolation. Dependency cycles through other flags need the rest of
/// the flag set; see [find_dependency_cycle].
pub fn validate_snapshot(flag: &FlagSnapshot) -> Result<(), ValidationErrors> {
    let mut errors = Vec::new();

    if !FLAG_NAME_REGEX.is_match(&flag.name) {
        errors.push(ValidationError::InvalidName(flag.name.clone()));
    }

    if let Some(pct) = flag.rollout_percentage {
        if pct > 100 {
            errors.push(ValidationError::RolloutOutOfRange(pct));
        }
    }

    if let (Some(start), Some(end)) = (flag.start_at, flag.end_at) {
        if end <= start {
            errors.push(ValidationError::InvertedWindow { start, end });
        }
    }

    if flag.environments.is_empty() {
        errors.push(ValidationError::NoEnvironments);
    }

    if flag.dependencies.contains(&flag.name) {
        errors.push(ValidationError::SelfDependency);
    }

    for (index, entry) in flag.targeting_rules.iter().enumerate() {
        validate_rule(index, entry, &mut errors);
    }

    if !flag.variants.is_empty() {
        let total: u64 = flag.variants.iter().map(|v| u64::from(v.weight)).sum();
        if total != u64::from(TOTAL_WEIGHT) {
            errors.push(ValidationError::VariantWeights(total));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(errors))
    }
}

fn validate_rule(index: usize, entry: &RuleOrMalformed, errors: &mut Vec<ValidationError>) {
    let rule = match entry {
        RuleOrMalformed::Rule(rule) => rule,
        RuleOrMalformed::Malformed(raw) => {
            errors.push(ValidationError::MalformedRule {
                index,
                raw: raw.to_string(),
            });
            return;
        }
    };

    if let TargetingRule::DateRange(range) = rule {
        if let (Some(start), Some(end)) = (range.start, range.end) {
            if end < start {
                errors.push(ValidationError::InvertedRuleRange { index });
            }
        }
        return;
    }

    let attribute_rule = match rule.attribute_rule() {
        Some(attribute_rule) => attribute_rule,
        None => return,
    };
    let operator = attribute_rule.operator;

    if operator.takes_list() {
        if attribute_rule.values.is_empty() {
            errors.push(ValidationError::MissingOperand {
                index,
                kind: rule.kind_name(),
                operator,
                expected: "values",
            });
        }
        return;
    }

    match &attribute_rule.value {
        Some(value) if value.is_scalar() => {
            if operator.is_numeric() && value.to_f64().is_none() {
                errors.push(ValidationError::NonNumericOperand { index });
            }
        }
        _ => errors.push(ValidationError::MissingOperand {
            index,
            kind: rule.kind_name(),
            operator,
            expected: "value",
        }),
    }
}

/// Looks for a dependency cycle through `flag` as it would be after a write, with every other flag
/// taken from `others`. Returns the cycle as a path of names that starts and ends on the same flag.
///
/// Dependencies on flags that do not exist yet are not cycles; they are reported at evaluation
/// time as unmet.
pub fn find_dependency_cycle(
    flag: &FlagSnapshot,
    others: &HashMap<String, FlagSnapshot>,
) -> Option<Vec<String>> {
    let graph = DependencyGraph { flag, others };
    let mut path = vec![flag.name.clone()];
    graph.visit(&flag.name, &mut path, &mut HashSet::new())
}

struct DependencyGraph<'a> {
    flag: &'a FlagSnapshot,
    others: &'a HashMap<String, FlagSnapshot>,
}

impl<'a> DependencyGraph<'a> {
    fn dependencies(&self, name: &str) -> Option<&'a BTreeSet<String>> {
        if name == self.flag.name {
            Some(&self.flag.dependencies)
        } else {
            self.others.get(name).map(|flag| &flag.dependencies)
        }
    }

    fn visit(
        &self,
        name: &str,
        path: &mut Vec<String>,
        done: &mut HashSet<String>,
    ) -> Option<Vec<String>> {
        for dependency in self.dependencies(name)? {
            if let Some(position) = path.iter().position(|p| p == dependency) {
                let mut cycle = path[position..].to_vec();
                cycle.push(dependency.clone());
                return Some(cycle);
            }
            if done.contains(dependency) {
                continue;
            }

            path.push(dependency.clone());
            if let Some(cycle) = self.visit(dependency, path, done) {
                return Some(cycle);
            }
            path.pop();
            done.insert(dependency.clone());
        }
        None
    }
}
