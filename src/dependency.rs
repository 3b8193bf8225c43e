use std::collections::HashSet;

use log::warn;

use crate::eval::{EvaluationResult, Reason};
use crate::flag::FlagSnapshot;

const PREALLOCATED_DEPENDENCY_CHAIN_SIZE: usize = 20;

/// Tracks the flags currently being evaluated on this call path, so that a dependency pointing
/// back into the chain is detected instead of recursing forever.
pub(crate) struct EvaluationStack {
    pub(crate) dependency_chain: HashSet<String>,
}

impl EvaluationStack {
    fn new() -> Self {
        Self {
            dependency_chain: HashSet::with_capacity(PREALLOCATED_DEPENDENCY_CHAIN_SIZE),
        }
    }
}

impl Default for EvaluationStack {
    fn default() -> Self {
        Self::new()
    }
}

/// The outcome of checking every dependency of a flag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DependencyOutcome {
    Met,
    NotMet { dependency: String },
    Cycle { dependency: String },
    StoreUnavailable { dependency: String },
}

impl DependencyOutcome {
    /// The reason a flag is disabled by this outcome, or None when all dependencies are met.
    pub fn failure_reason(&self) -> Option<Reason> {
        match self {
            DependencyOutcome::Met => None,
            DependencyOutcome::NotMet { .. } => Some(Reason::DependencyNotMet),
            DependencyOutcome::Cycle { .. } => Some(Reason::DependencyCycle),
            DependencyOutcome::StoreUnavailable { .. } => Some(Reason::StoreUnavailable),
        }
    }
}

pub(crate) struct DependencyResolver;

impl DependencyResolver {
    /// Evaluates each dependency of `flag` through `evaluate`, stopping at the first one that is
    /// not enabled.
    ///
    /// The caller must have pushed `flag` onto `stack` before calling and pops it afterwards.
    pub(crate) fn resolve<F>(
        flag: &FlagSnapshot,
        stack: &mut EvaluationStack,
        mut evaluate: F,
    ) -> DependencyOutcome
    where
        F: FnMut(&str, &mut EvaluationStack) -> EvaluationResult,
    {
        for dependency in &flag.dependencies {
            if stack.dependency_chain.contains(dependency) {
                warn!(
                    "dependency relationship from {} to {} caused a circular reference",
                    flag.name, dependency
                );
                return DependencyOutcome::Cycle {
                    dependency: dependency.clone(),
                };
            }

            let result = evaluate(dependency, stack);
            if result.enabled {
                continue;
            }

            let dependency = dependency.clone();
            return match result.reason {
                Reason::DependencyCycle => DependencyOutcome::Cycle { dependency },
                Reason::StoreUnavailable => DependencyOutcome::StoreUnavailable { dependency },
                _ => DependencyOutcome::NotMet { dependency },
            };
        }

        DependencyOutcome::Met
    }
}
