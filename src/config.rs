//! Synchronizer configuration

use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};

/// User-facing strings and routing target for a `SessionSynchronizer`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Route opened when a session appears (default: `/`)
    #[serde(default = "default_route")]
    pub default_route: String,

    /// Shown when the provider rejects a sign-in without a message
    #[serde(default = "default_sign_in_failed")]
    pub sign_in_failed_message: String,

    /// Shown when the provider rejects a sign-up without a message
    #[serde(default = "default_sign_up_failed")]
    pub sign_up_failed_message: String,

    /// Notice set after a successful sign-up
    #[serde(default = "default_confirmation_notice")]
    pub confirmation_notice: String,
}

fn default_route() -> String {
    "/".to_string()
}

fn default_sign_in_failed() -> String {
    "Sign in failed".to_string()
}

fn default_sign_up_failed() -> String {
    "Sign up failed".to_string()
}

fn default_confirmation_notice() -> String {
    "Check your email to confirm your account.".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_route: default_route(),
            sign_in_failed_message: default_sign_in_failed(),
            sign_up_failed_message: default_sign_up_failed(),
            confirmation_notice: default_confirmation_notice(),
        }
    }
}

impl SyncConfig {
    /// Parse and validate a JSON config. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SyncConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the route opened on sign-in
    pub fn with_default_route(mut self, route: impl Into<String>) -> Self {
        self.default_route = route.into();
        self
    }

    /// Check that the route is absolute and no message is blank
    pub fn validate(&self) -> Result<()> {
        if !self.default_route.starts_with('/') {
            return Err(SessionError::Config(format!(
                "default route must start with '/': {:?}",
                self.default_route
            )));
        }

        let messages = [
            ("signInFailedMessage", &self.sign_in_failed_message),
            ("signUpFailedMessage", &self.sign_up_failed_message),
            ("confirmationNotice", &self.confirmation_notice),
        ];
        for (field, value) in messages {
            if value.trim().is_empty() {
                return Err(SessionError::Config(format!("{} must not be empty", field)));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.default_route, "/");
        assert_eq!(config.sign_in_failed_message, "Sign in failed");
        assert_eq!(config.sign_up_failed_message, "Sign up failed");
        assert_eq!(
            config.confirmation_notice,
            "Check your email to confirm your account."
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = SyncConfig::from_json(r#"{"defaultRoute": "/dashboard"}"#).unwrap();
        assert_eq!(config.default_route, "/dashboard");
        assert_eq!(config.sign_in_failed_message, "Sign in failed");
    }

    #[test]
    fn test_from_json_empty_object() {
        let config = SyncConfig::from_json("{}").unwrap();
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn test_from_json_invalid() {
        let err = SyncConfig::from_json("not json").unwrap_err();
        assert!(matches!(err, SessionError::Serialization(_)));
    }

    #[test]
    fn test_relative_route_rejected() {
        let err = SyncConfig::default()
            .with_default_route("dashboard")
            .validate()
            .unwrap_err();
        assert!(matches!(err, SessionError::Config(_)));
    }

    #[test]
    fn test_blank_message_rejected() {
        let config = SyncConfig {
            confirmation_notice: "  ".to_string(),
            ..SyncConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("confirmationNotice"));
    }
}
