use crate::context::EvaluationContext;
use crate::flag::FlagSnapshot;

/// OverrideResolver looks up explicit per-user exceptions to a flag's computed result.
pub struct OverrideResolver;

impl OverrideResolver {
    /// Returns the override for the context's user, if the flag has one.
    ///
    /// Contexts without a user id never have an override, even when the flag carries an entry
    /// for the empty string.
    pub fn resolve(flag: &FlagSnapshot, context: &EvaluationContext) -> Option<bool> {
        let user_id = context.user_id.as_deref()?;
        flag.user_overrides.get(user_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectral::prelude::*;

    #[test]
    fn resolves_overrides_by_user_id() {
        let flag = FlagSnapshot::new("beta")
            .disabled()
            .with_override("special_user", true)
            .with_override("blocked_user", false);

        let context = |user: &str| EvaluationContext::new().with_user_id(user);

        let resolve = |user: &str| OverrideResolver::resolve(&flag, &context(user));

        assert_that!(resolve("special_user")).contains_value(true);
        assert_that!(resolve("blocked_user")).contains_value(false);
        assert_that!(resolve("someone_else")).is_none();
    }

    #[test]
    fn session_id_is_not_an_override_key() {
        let flag = FlagSnapshot::new("beta").with_override("s1", true);
        let context = EvaluationContext::new().with_session_id("s1");

        assert_that!(OverrideResolver::resolve(&flag, &context)).is_none();
        assert_that!(OverrideResolver::resolve(&flag, &EvaluationContext::new())).is_none();
    }
}
