use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::skip_serializing_none;

use crate::bucket::RolloutBucketer;
use crate::cache::{CacheLookup, EvaluationCache};
use crate::config::EngineConfig;
use crate::context::EvaluationContext;
use crate::dependency::{DependencyResolver, EvaluationStack};
use crate::flag::FlagSnapshot;
use crate::overrides::OverrideResolver;
use crate::rule::first_matching_rule;
use crate::store::FlagStore;
use crate::variation::select_variant;

/// Reason describes which step of the evaluation decided the result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// No flag with the requested name exists.
    NotFound,
    /// The caller's user id has an explicit override on the flag.
    UserOverride,
    /// The flag's `start_at` is in the future.
    NotStarted,
    /// The flag's `end_at` has passed.
    Ended,
    /// The flag is not available in the context's environment.
    EnvironmentExcluded,
    /// The flag's global switch is off.
    GloballyDisabled,
    /// At least one dependency of the flag did not evaluate to enabled.
    DependencyNotMet,
    /// The flag's dependencies loop back onto a flag already being evaluated.
    DependencyCycle,
    /// A targeting rule matched the context.
    TargetingMatched,
    /// No targeting rule matched, so the rule set's default applied.
    TargetingDefault,
    /// The context's rollout bucket is outside the rollout percentage.
    RolloutExcluded,
    /// Nothing restricted the flag.
    Enabled,
    /// The flag store could not be reached and no snapshot of the flag was cached. The result
    /// follows the configured [crate::StoreFailurePolicy].
    StoreUnavailable,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::NotFound => "not_found",
            Reason::UserOverride => "user_override",
            Reason::NotStarted => "not_started",
            Reason::Ended => "ended",
            Reason::EnvironmentExcluded => "environment_excluded",
            Reason::GloballyDisabled => "globally_disabled",
            Reason::DependencyNotMet => "dependency_not_met",
            Reason::DependencyCycle => "dependency_cycle",
            Reason::TargetingMatched => "targeting_matched",
            Reason::TargetingDefault => "targeting_default",
            Reason::RolloutExcluded => "rollout_excluded",
            Reason::Enabled => "enabled",
            Reason::StoreUnavailable => "store_unavailable",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of evaluating one flag for one context.
#[skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct EvaluationResult {
    pub flag_name: String,
    pub enabled: bool,
    pub reason: Reason,
    /// The variant served to the context. Only set when the flag is enabled and declares
    /// variants.
    pub variant: Option<String>,
    /// The flag's `config`, passed through untouched.
    pub metadata: Option<Map<String, Value>>,
}

impl EvaluationResult {
    pub fn new(flag_name: impl Into<String>, enabled: bool, reason: Reason) -> Self {
        Self {
            flag_name: flag_name.into(),
            enabled,
            reason,
            variant: None,
            metadata: None,
        }
    }
}

enum Lookup {
    Snapshot(Arc<FlagSnapshot>),
    NotFound,
    Unavailable,
}

/// EvaluationEngine answers "is this flag on for this context?".
///
/// Evaluation never fails: every problem it meets, from a missing flag to an unreachable store,
/// is folded into the [Reason] of the returned [EvaluationResult]. The engine is `Send + Sync`
/// and is meant to be shared behind an [Arc].
///
/// Snapshots are cached by flag name. Writes to the store are not seen until the entry is
/// invalidated, the cache is cleared, or the entry outlives the configured TTL.
pub struct EvaluationEngine {
    store: Arc<dyn FlagStore>,
    cache: EvaluationCache,
    config: EngineConfig,
    // Bucketing identifier for contexts with neither a user id nor a session id. Drawn once so
    // that such callers see a consistent answer for the lifetime of the engine.
    anonymous_id: String,
}

impl EvaluationEngine {
    pub fn new(store: Arc<dyn FlagStore>, config: EngineConfig) -> Self {
        Self {
            store,
            cache: EvaluationCache::new(config.cache_ttl),
            config,
            anonymous_id: format!("anonymous-{:016x}", rand::random::<u64>()),
        }
    }

    /// Evaluate the flag called `name` for `context` at the current time.
    pub fn evaluate(&self, name: &str, context: &EvaluationContext) -> EvaluationResult {
        self.evaluate_at(name, context, Utc::now())
    }

    /// Evaluate the flag called `name` for `context` as of `now`. Time windows, date range rules
    /// and cache expiry are all judged against `now`.
    pub fn evaluate_at(
        &self,
        name: &str,
        context: &EvaluationContext,
        now: DateTime<Utc>,
    ) -> EvaluationResult {
        let mut evaluation_stack = EvaluationStack::default();
        self.evaluate_internal(name, context, now, &mut evaluation_stack)
    }

    fn evaluate_internal(
        &self,
        name: &str,
        context: &EvaluationContext,
        now: DateTime<Utc>,
        evaluation_stack: &mut EvaluationStack,
    ) -> EvaluationResult {
        let flag = match self.load(name, now) {
            Lookup::Snapshot(flag) => flag,
            Lookup::NotFound => {
                debug!("flag {} not found", name);
                return EvaluationResult::new(name, false, Reason::NotFound);
            }
            Lookup::Unavailable => {
                let enabled = self.config.store_failure_policy.fallback();
                return EvaluationResult::new(name, enabled, Reason::StoreUnavailable);
            }
        };

        if let Some(enabled) = OverrideResolver::resolve(&flag, context) {
            return self.finish(&flag, context, enabled, Reason::UserOverride);
        }

        if matches!(flag.start_at, Some(start_at) if now < start_at) {
            return self.finish(&flag, context, false, Reason::NotStarted);
        }
        if matches!(flag.end_at, Some(end_at) if now > end_at) {
            return self.finish(&flag, context, false, Reason::Ended);
        }

        if !flag.allows_environment(&context.environment) {
            return self.finish(&flag, context, false, Reason::EnvironmentExcluded);
        }

        if !flag.globally_enabled {
            return self.finish(&flag, context, false, Reason::GloballyDisabled);
        }

        if !flag.dependencies.is_empty() {
            evaluation_stack.dependency_chain.insert(name.to_string());
            let outcome =
                DependencyResolver::resolve(&flag, evaluation_stack, |dependency, stack| {
                    self.evaluate_internal(dependency, context, now, stack)
                });
            evaluation_stack.dependency_chain.remove(name);

            if let Some(reason) = outcome.failure_reason() {
                debug!("flag {} disabled by dependencies: {:?}", name, outcome);
                return self.finish(&flag, context, false, reason);
            }
        }

        if !flag.targeting_rules.is_empty() {
            return match first_matching_rule(&flag.name, &flag.targeting_rules, context, now) {
                Some(rule_index) => {
                    debug!("flag {} matched targeting rule {}", name, rule_index);
                    self.finish(&flag, context, true, Reason::TargetingMatched)
                }
                None => {
                    self.finish(&flag, context, flag.targeting_default, Reason::TargetingDefault)
                }
            };
        }

        if let Some(percentage) = flag.effective_rollout() {
            let bucket = RolloutBucketer::bucket(&flag.name, self.identifier(context));
            if bucket >= percentage {
                return self.finish(&flag, context, false, Reason::RolloutExcluded);
            }
        }

        self.finish(&flag, context, true, Reason::Enabled)
    }

    fn finish(
        &self,
        flag: &FlagSnapshot,
        context: &EvaluationContext,
        enabled: bool,
        reason: Reason,
    ) -> EvaluationResult {
        let mut result = EvaluationResult::new(&flag.name, enabled, reason);
        if enabled {
            result.variant = select_variant(&flag.name, self.identifier(context), &flag.variants)
                .map(|variant| variant.name.clone());
        }
        result.metadata = flag.metadata();
        result
    }

    fn identifier<'a>(&'a self, context: &'a EvaluationContext) -> &'a str {
        context.bucketing_key().unwrap_or(&self.anonymous_id)
    }

    fn load(&self, name: &str, now: DateTime<Utc>) -> Lookup {
        let stale = match self.cache.lookup(name, now) {
            CacheLookup::Fresh(flag) => return Lookup::Snapshot(flag),
            CacheLookup::Expired(flag) => Some(flag),
            CacheLookup::Miss => None,
        };

        let ticket = self.cache.ticket();
        match self.store.snapshot(name) {
            Ok(Some(flag)) => {
                let flag = Arc::new(flag);
                if !self.cache.put_fetched(ticket, name, flag.clone(), now) {
                    debug!("not caching flag {}: invalidated while it was being fetched", name);
                }
                Lookup::Snapshot(flag)
            }
            Ok(None) => {
                self.cache.release(ticket);
                if stale.is_some() {
                    self.cache.evict(name);
                }
                Lookup::NotFound
            }
            Err(e) => {
                self.cache.release(ticket);
                match stale {
                    Some(flag) => {
                        warn!("serving stale snapshot of flag {}: {}", name, e);
                        Lookup::Snapshot(flag)
                    }
                    None => {
                        error!("unable to load flag {}: {}", name, e);
                        Lookup::Unavailable
                    }
                }
            }
        }
    }

    /// Evaluate several flags for one context.
    ///
    /// With no `names`, every flag the store lists is evaluated. If the store cannot list its
    /// flags, the flags currently cached are evaluated instead.
    pub fn evaluate_all(
        &self,
        names: Option<&[String]>,
        context: &EvaluationContext,
    ) -> HashMap<String, bool> {
        self.evaluate_all_detailed(names, context)
            .into_iter()
            .map(|(name, result)| (name, result.enabled))
            .collect()
    }

    /// Like [EvaluationEngine::evaluate_all], but keeps the full result for each flag.
    pub fn evaluate_all_detailed(
        &self,
        names: Option<&[String]>,
        context: &EvaluationContext,
    ) -> HashMap<String, EvaluationResult> {
        let now = Utc::now();
        let names = match names {
            Some(names) => names.to_vec(),
            None => self.known_flag_names(),
        };

        names
            .into_iter()
            .map(|name| {
                let result = self.evaluate_at(&name, context, now);
                (name, result)
            })
            .collect()
    }

    fn known_flag_names(&self) -> Vec<String> {
        match self.store.snapshots() {
            Ok(flags) => flags.into_iter().map(|flag| flag.name).collect(),
            Err(e) => {
                warn!("unable to list flags, evaluating cached flags only: {}", e);
                self.cache.names()
            }
        }
    }

    /// Drop the cached snapshot of `name`, so the next evaluation reads it from the store.
    /// Returns true if a snapshot was cached.
    pub fn invalidate_cache(&self, name: &str) -> bool {
        debug!("invalidating cached flag {}", name);
        self.cache.invalidate(name)
    }

    pub fn clear_cache(&self) {
        debug!("clearing flag cache");
        self.cache.clear();
    }

    pub fn cache(&self) -> &EvaluationCache {
        &self.cache
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
