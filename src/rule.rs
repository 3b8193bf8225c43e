use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::attribute_value::AttributeValue;
use crate::context::EvaluationContext;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    In,
    NotIn,
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
}

impl Operator {
    /// List operators read [AttributeRule::values]; every other operator reads
    /// [AttributeRule::value].
    pub fn takes_list(&self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Operator::GreaterThan | Operator::LessThan)
    }
}

/// A predicate over one context field.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct AttributeRule {
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<AttributeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<AttributeValue>,
    /// The outcome when the context does not carry the field this rule reads.
    #[serde(default)]
    pub matches_default: bool,
}

/// Matches while "now" lies within `[start, end]`. Either bound may be left open.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct DateRangeRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

/// TargetingRule is a typed predicate over an [EvaluationContext].
///
/// Each attribute kind reads exactly one context field: `user` reads `user_id`, `jurisdiction`
/// reads `jurisdiction`, `environment` reads `environment` and `role` reads `user_role`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetingRule {
    User(AttributeRule),
    Jurisdiction(AttributeRule),
    Environment(AttributeRule),
    Role(AttributeRule),
    DateRange(DateRangeRule),
}

// Stored rule data may carry kinds or operators this version does not know. Those entries are
// kept rather than failing the whole snapshot, never match, and are reported by validation.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum RuleOrMalformed {
    Rule(TargetingRule),
    Malformed(serde_json::Value),
}

impl From<TargetingRule> for RuleOrMalformed {
    fn from(rule: TargetingRule) -> Self {
        RuleOrMalformed::Rule(rule)
    }
}

impl RuleOrMalformed {
    pub fn as_rule(&self) -> Option<&TargetingRule> {
        match self {
            RuleOrMalformed::Rule(rule) => Some(rule),
            RuleOrMalformed::Malformed(_) => None,
        }
    }
}

impl AttributeRule {
    pub fn new(operator: Operator) -> Self {
        Self {
            operator,
            values: Vec::new(),
            value: None,
            matches_default: false,
        }
    }

    pub fn with_values<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<AttributeValue>,
    {
        self.values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_value(mut self, value: impl Into<AttributeValue>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_matches_default(mut self, matches_default: bool) -> Self {
        self.matches_default = matches_default;
        self
    }

    pub fn matches(&self, field: Option<&str>) -> bool {
        let field = match field {
            Some(field) => field,
            None => return self.matches_default,
        };

        match self.operator {
            Operator::In => self.values.iter().any(|v| v.matches_str(field)),
            Operator::NotIn => !self.values.iter().any(|v| v.matches_str(field)),
            Operator::Equals => self.scalar().map_or(false, |v| v.matches_str(field)),
            Operator::NotEquals => self.scalar().map_or(false, |v| !v.matches_str(field)),
            Operator::GreaterThan => self.numeric_op(field, |l, r| l > r),
            Operator::LessThan => self.numeric_op(field, |l, r| l < r),
        }
    }

    fn scalar(&self) -> Option<&AttributeValue> {
        if self.value.is_none() {
            warn!(
                "'{:?}' rule has no value to compare against; treating as non-matching",
                self.operator
            );
        }
        self.value.as_ref()
    }

    fn numeric_op<F: Fn(f64, f64) -> bool>(&self, field: &str, f: F) -> bool {
        let lhs = AttributeValue::from(field).to_f64();
        let rhs = self.scalar().and_then(AttributeValue::to_f64);
        match (lhs, rhs) {
            (Some(l), Some(r)) => f(l, r),
            _ => false,
        }
    }
}

impl DateRangeRule {
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| now >= start) && self.end.map_or(true, |end| now <= end)
    }
}

impl TargetingRule {
    pub fn matches(&self, context: &EvaluationContext, now: DateTime<Utc>) -> bool {
        match self {
            TargetingRule::User(rule) => rule.matches(context.user_id.as_deref()),
            TargetingRule::Jurisdiction(rule) => rule.matches(context.jurisdiction.as_deref()),
            TargetingRule::Environment(rule) => rule.matches(Some(context.environment.as_str())),
            TargetingRule::Role(rule) => rule.matches(context.user_role.as_deref()),
            TargetingRule::DateRange(rule) => rule.contains(now),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            TargetingRule::User(_) => "user",
            TargetingRule::Jurisdiction(_) => "jurisdiction",
            TargetingRule::Environment(_) => "environment",
            TargetingRule::Role(_) => "role",
            TargetingRule::DateRange(_) => "date_range",
        }
    }

    pub(crate) fn attribute_rule(&self) -> Option<&AttributeRule> {
        match self {
            TargetingRule::User(rule)
            | TargetingRule::Jurisdiction(rule)
            | TargetingRule::Environment(rule)
            | TargetingRule::Role(rule) => Some(rule),
            TargetingRule::DateRange(_) => None,
        }
    }
}

/// Returns the index of the first rule in `rules` that matches, if any.
///
/// Malformed entries are skipped with a warning so one bad rule never aborts the evaluation.
pub fn first_matching_rule(
    flag_name: &str,
    rules: &[RuleOrMalformed],
    context: &EvaluationContext,
    now: DateTime<Utc>,
) -> Option<usize> {
    rules.iter().enumerate().find_map(|(index, entry)| match entry {
        RuleOrMalformed::Rule(rule) if rule.matches(context, now) => Some(index),
        RuleOrMalformed::Rule(_) => None,
        RuleOrMalformed::Malformed(raw) => {
            warn!(
                "flag {} has an unrecognized targeting rule at index {}: {}",
                flag_name, index, raw
            );
            None
        }
    })
}
