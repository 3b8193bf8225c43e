#![cfg(test)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use maplit::hashmap;
use parking_lot::RwLock;

use crate::flag::FlagSnapshot;
use crate::store::{FlagStore, StoreError};

pub struct TestStore {
    flags: RwLock<HashMap<String, FlagSnapshot>>,
    unavailable: AtomicBool,
    fetches: AtomicUsize,
}

impl TestStore {
    pub fn new() -> Self {
        Self::from_flags(hashmap! {
            "always-on".to_string() => serde_json::from_str(r#"{
                    "name": "always-on",
                    "globally_enabled": true
                }"#).unwrap(),
            "kill-switch".to_string() => serde_json::from_str(r#"{
                    "name": "kill-switch",
                    "kind": "operational",
                    "globally_enabled": false
                }"#).unwrap(),
            "fifty-fifty".to_string() => serde_json::from_str(r#"{
                    "name": "fifty-fifty",
                    "globally_enabled": true,
                    "rollout_percentage": 50
                }"#).unwrap(),
            "dark-launch".to_string() => serde_json::from_str(r#"{
                    "name": "dark-launch",
                    "globally_enabled": true,
                    "rollout_percentage": 0
                }"#).unwrap(),
            "beta-users".to_string() => serde_json::from_str(r#"{
                    "name": "beta-users",
                    "globally_enabled": true,
                    "rollout_percentage": 0,
                    "targeting_rules": [
                        {"kind": "user", "operator": "in", "values": ["u1", "u2", "u3"]}
                    ],
                    "targeting_default": false
                }"#).unwrap(),
            "flag-with-malformed-rule".to_string() => serde_json::from_str(r#"{
                    "name": "flag-with-malformed-rule",
                    "globally_enabled": true,
                    "targeting_rules": [
                        {"kind": "device", "operator": "in", "values": ["yes", "no"]},
                        {"kind": "user", "operator": "equals"},
                        {"kind": "user", "operator": "in", "values": ["yes"]}
                    ]
                }"#).unwrap(),
            "staging-only".to_string() => serde_json::from_str(r#"{
                    "name": "staging-only",
                    "globally_enabled": true,
                    "environments": ["staging", "development"]
                }"#).unwrap(),
            "holiday-sale".to_string() => serde_json::from_str(r#"{
                    "name": "holiday-sale",
                    "globally_enabled": true,
                    "start_at": "2026-11-20T00:00:00Z",
                    "end_at": "2026-12-01T00:00:00Z"
                }"#).unwrap(),
            "special-access".to_string() => serde_json::from_str(r#"{
                    "name": "special-access",
                    "kind": "permission",
                    "globally_enabled": false,
                    "user_overrides": {"special_user": true, "blocked_user": false}
                }"#).unwrap(),
            "new-ui".to_string() => serde_json::from_str(r#"{
                    "name": "new-ui",
                    "globally_enabled": true
                }"#).unwrap(),
            "checkout-v2".to_string() => serde_json::from_str(r#"{
                    "name": "checkout-v2",
                    "globally_enabled": true,
                    "dependencies": ["new-ui"]
                }"#).unwrap(),
            "legacy-checkout".to_string() => serde_json::from_str(r#"{
                    "name": "legacy-checkout",
                    "globally_enabled": true,
                    "dependencies": ["kill-switch"]
                }"#).unwrap(),
            "orphan-dependency".to_string() => serde_json::from_str(r#"{
                    "name": "orphan-dependency",
                    "globally_enabled": true,
                    "dependencies": ["missing-flag"]
                }"#).unwrap(),
            "button-color".to_string() => serde_json::from_str(r#"{
                    "name": "button-color",
                    "kind": "experiment",
                    "globally_enabled": true,
                    "variants": [
                        {"name": "control", "weight": 50000},
                        {"name": "treatment", "weight": 50000}
                    ],
                    "config": {"palette": "warm"}
                }"#).unwrap(),
        })
    }

    pub fn new_from_json_str(flag_json: &str) -> Self {
        Self::from_flags(serde_json::from_str(flag_json).unwrap())
    }

    fn from_flags(flags: HashMap<String, FlagSnapshot>) -> Self {
        Self {
            flags: RwLock::new(flags),
            unavailable: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Reads a fixture directly, without counting it as a fetch.
    pub fn flag(&self, name: &str) -> FlagSnapshot {
        self.flags.read().get(name).cloned().unwrap()
    }

    pub fn update_flag(&self, name: &str, fun: fn(&mut FlagSnapshot)) {
        let mut flags = self.flags.write();
        let flag = flags.get_mut(name).unwrap();
        fun(flag);
    }

    pub fn remove_flag(&self, name: &str) {
        self.flags.write().remove(name);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of single-flag fetches answered so far.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.flags.read().len()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("test store is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

impl FlagStore for TestStore {
    fn snapshot(&self, name: &str) -> Result<Option<FlagSnapshot>, StoreError> {
        self.check_available()?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.flags.read().get(name).cloned())
    }

    fn snapshots(&self) -> Result<Vec<FlagSnapshot>, StoreError> {
        self.check_available()?;
        Ok(self.flags.read().values().cloned().collect())
    }
}

#[test]
fn fixtures_are_valid() {
    use crate::validation::validate_snapshot;

    let store = TestStore::new();
    for flag in store.snapshots().unwrap() {
        if flag.name == "flag-with-malformed-rule" {
            assert!(validate_snapshot(&flag).is_err());
        } else {
            assert!(validate_snapshot(&flag).is_ok(), "{} should validate", flag.name);
        }
    }
}
