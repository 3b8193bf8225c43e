use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::AttributeValue;

/// The environment assumed when the caller does not name one.
pub const DEFAULT_ENVIRONMENT: &str = "production";

fn default_environment() -> String {
    DEFAULT_ENVIRONMENT.to_string()
}

/// EvaluationContext describes the caller a flag is evaluated for.
///
/// Every field is optional. A missing field never causes an error; it only reduces which
/// [crate::TargetingRule]s can match. The environment defaults to [DEFAULT_ENVIRONMENT] both when
/// built in code and when deserialized from a payload that omits it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom_attributes: HashMap<String, AttributeValue>,
}

impl Default for EvaluationContext {
    fn default() -> Self {
        Self {
            user_id: None,
            user_email: None,
            user_role: None,
            jurisdiction: None,
            environment: default_environment(),
            session_id: None,
            device_type: None,
            platform: None,
            browser: None,
            custom_attributes: HashMap::new(),
        }
    }
}

impl EvaluationContext {
    /// An anonymous context in the default environment.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_user_email(mut self, email: impl Into<String>) -> Self {
        self.user_email = Some(email.into());
        self
    }

    pub fn with_user_role(mut self, role: impl Into<String>) -> Self {
        self.user_role = Some(role.into());
        self
    }

    pub fn with_jurisdiction(mut self, jurisdiction: impl Into<String>) -> Self {
        self.jurisdiction = Some(jurisdiction.into());
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = Some(device_type.into());
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn with_browser(mut self, browser: impl Into<String>) -> Self {
        self.browser = Some(browser.into());
        self
    }

    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.custom_attributes.insert(key.into(), value.into());
        self
    }

    /// The identifier used to bucket this caller for percentage rollouts: the user id when
    /// present, otherwise the session id.
    pub fn bucketing_key(&self) -> Option<&str> {
        self.user_id.as_deref().or(self.session_id.as_deref())
    }
}
