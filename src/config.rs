use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};

/// How long a cached snapshot is served before it is refreshed from the store.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// What to answer when the store cannot be reached and no snapshot of the flag has ever been
/// cached.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreFailurePolicy {
    /// Report the flag as disabled.
    #[default]
    FailClosed,
    /// Report the flag as enabled.
    FailOpen,
}

impl StoreFailurePolicy {
    pub fn fallback(&self) -> bool {
        matches!(self, StoreFailurePolicy::FailOpen)
    }
}

/// Settings for an [crate::EvaluationEngine].
///
/// Every field has a default, so an empty document is a valid configuration:
///
/// ```
/// # use flag_evaluation::EngineConfig;
/// let config: EngineConfig = serde_json::from_str(r#"{"cache_ttl": 60}"#).unwrap();
/// assert_eq!(config.cache_ttl, Some(std::time::Duration::from_secs(60)));
/// ```
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub store_failure_policy: StoreFailurePolicy,
    /// Maximum age of a cached snapshot, in seconds. Omitted means [DEFAULT_CACHE_TTL]; `null`
    /// keeps entries until they are explicitly invalidated.
    #[serde_as(as = "Option<DurationSeconds<u64>>", no_default)]
    pub cache_ttl: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_failure_policy: StoreFailurePolicy::default(),
            cache_ttl: Some(DEFAULT_CACHE_TTL),
        }
    }
}

impl EngineConfig {
    pub fn with_store_failure_policy(mut self, policy: StoreFailurePolicy) -> Self {
        self.store_failure_policy = policy;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.cache_ttl = ttl;
        self
    }
}
