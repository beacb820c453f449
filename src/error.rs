//! Error types for a3s-session

use thiserror::Error;

/// Errors that can occur while synchronizing session state
#[derive(Debug, Error)]
pub enum SessionError {
    /// The identity provider rejected the request (bad credentials, unconfirmed
    /// account, rate limit, ...). `message` is shown to the user verbatim.
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    /// Provider-specific backend error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Change-notification registration failure
    #[error("Failed to subscribe to session changes on '{provider}': {reason}")]
    Subscribe { provider: String, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Email or password missing
    #[error("Email and password are required")]
    MissingCredentials,

    /// A sign-in or sign-up is already in flight
    #[error("Another authentication request is in progress")]
    Busy,

    /// `activate` called on an active synchronizer
    #[error("Session synchronizer is already active")]
    AlreadyActive,

    /// No async runtime available to run the bootstrap query
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl SessionError {
    /// Build an `Auth` error from a provider message
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Text suitable for the view's error line.
    ///
    /// Provider rejections carry their own message; everything else falls
    /// back to the `Display` form.
    pub fn user_message(&self) -> String {
        match self {
            Self::Auth { message } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_user_message_is_raw() {
        let err = SessionError::auth("Invalid login credentials");
        assert_eq!(err.user_message(), "Invalid login credentials");
        assert_eq!(
            err.to_string(),
            "Authentication failed: Invalid login credentials"
        );
    }

    #[test]
    fn test_other_user_message_uses_display() {
        let err = SessionError::Provider("auth.example.com: refused".to_string());
        assert_eq!(err.user_message(), "Provider error: auth.example.com: refused");
    }

    #[test]
    fn test_serialization_from() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{nope").unwrap_err();
        let err: SessionError = parse_err.into();
        assert!(matches!(err, SessionError::Serialization(_)));
    }
}
