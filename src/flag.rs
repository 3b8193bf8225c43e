use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::rule::RuleOrMalformed;
use crate::variation::WeightedVariant;

/// The environment name that leaves a flag unrestricted by environment.
pub const ALL_ENVIRONMENTS: &str = "all";

/// Kind records what a flag is used for. It is informational; the engine evaluates every kind the
/// same way.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    #[default]
    Feature,
    Experiment,
    Operational,
    Permission,
}

/// FlagSnapshot is an immutable view of one flag's configuration at a point in time.
///
/// Snapshots are produced by a [crate::FlagStore] and only ever read by the engine. Write-time
/// checks live in [crate::validate_snapshot]; nothing here is re-validated on read.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct FlagSnapshot {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub kind: FlagKind,

    pub globally_enabled: bool,

    // None means rollout gating is not in effect, which is not the same as Some(0).
    #[serde(default)]
    pub rollout_percentage: Option<u8>,

    #[serde(default)]
    pub targeting_rules: Vec<RuleOrMalformed>,
    #[serde(default)]
    pub targeting_default: bool,

    #[serde(default)]
    pub user_overrides: HashMap<String, bool>,
    #[serde(default = "all_environments")]
    pub environments: BTreeSet<String>,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,

    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub variants: Vec<WeightedVariant>,

    #[serde(default)]
    pub config: Map<String, Value>,
}

fn all_environments() -> BTreeSet<String> {
    BTreeSet::from([ALL_ENVIRONMENTS.to_string()])
}

impl FlagSnapshot {
    /// A globally enabled flag with no gating of any kind.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            kind: FlagKind::Feature,
            globally_enabled: true,
            rollout_percentage: None,
            targeting_rules: Vec::new(),
            targeting_default: false,
            user_overrides: HashMap::new(),
            environments: all_environments(),
            dependencies: BTreeSet::new(),
            start_at: None,
            end_at: None,
            variants: Vec::new(),
            config: Map::new(),
        }
    }

    /// Returns true if the flag may be evaluated in `environment`.
    ///
    /// An empty environment set allows no environment at all.
    pub fn allows_environment(&self, environment: &str) -> bool {
        self.environments.contains(ALL_ENVIRONMENTS) || self.environments.contains(environment)
    }

    /// The configured rollout percentage if it actually restricts anyone.
    pub(crate) fn effective_rollout(&self) -> Option<u8> {
        self.rollout_percentage.filter(|pct| *pct < 100)
    }

    pub(crate) fn metadata(&self) -> Option<Map<String, Value>> {
        if self.config.is_empty() {
            None
        } else {
            Some(self.config.clone())
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_kind(mut self, kind: FlagKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.globally_enabled = false;
        self
    }

    pub fn with_rollout(mut self, percentage: u8) -> Self {
        self.rollout_percentage = Some(percentage);
        self
    }

    pub fn with_rule(mut self, rule: impl Into<RuleOrMalformed>) -> Self {
        self.targeting_rules.push(rule.into());
        self
    }

    pub fn with_targeting_default(mut self, default: bool) -> Self {
        self.targeting_default = default;
        self
    }

    pub fn with_override(mut self, user_id: impl Into<String>, enabled: bool) -> Self {
        self.user_overrides.insert(user_id.into(), enabled);
        self
    }

    /// Restricts the flag to the given environments, replacing the default of [ALL_ENVIRONMENTS].
    pub fn with_environments<I, S>(mut self, environments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.environments = environments.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.insert(name.into());
        self
    }

    pub fn with_window(
        mut self,
        start_at: Option<DateTime<Utc>>,
        end_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.start_at = start_at;
        self.end_at = end_at;
        self
    }

    pub fn with_variant(mut self, name: impl Into<String>, weight: u32) -> Self {
        self.variants.push(WeightedVariant::new(name, weight));
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}
