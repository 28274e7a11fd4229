//! Error types for the raidguard bot.
//!
//! Two layers: [`RaidGuardError`] for operations that can fail as a whole
//! (startup, backup I/O, restore), and [`ActionError`] for a single platform
//! call. Action errors are logged where they happen and never escalated.

use thiserror::Error;

/// Central error type for raidguard operations.
#[derive(Debug, Error)]
pub enum RaidGuardError {
    /// Discord API error from serenity.
    #[error("Discord API error: {0}")]
    DiscordApi(#[from] Box<serenity::Error>),

    /// A single platform action failed.
    #[error("Platform action failed: {0}")]
    Action(#[from] ActionError),

    /// Configuration error (missing env vars, invalid values).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal state error (invalid state transitions, closed channels).
    #[error("Internal state error: {0}")]
    InternalState(String),

    /// Keyword pattern compilation error.
    #[error("Keyword pattern error: {0}")]
    KeywordPattern(#[from] regex::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(String),

    /// Backup error.
    #[error("Backup error: {0}")]
    Backup(String),

    /// Restore was not confirmed in time.
    #[error("Restore cancelled: {0}")]
    RestoreCancelled(String),
}

impl RaidGuardError {
    /// Log error with full context using tracing.
    pub fn log_with_context(&self, context: &ErrorContext) {
        match self {
            Self::InternalState(_) | Self::Backup(_) => {
                tracing::error!(
                    error = %self,
                    request_id = %context.request_id,
                    user_id = ?context.user_id,
                    guild_id = ?context.guild_id,
                    operation = %context.operation,
                    "Critical error occurred"
                );
            }
            Self::DiscordApi(_) | Self::Action(_) => {
                tracing::error!(
                    error = %self,
                    request_id = %context.request_id,
                    user_id = ?context.user_id,
                    guild_id = ?context.guild_id,
                    operation = %context.operation,
                    "External API error"
                );
            }
            Self::Config(_) | Self::KeywordPattern(_) => {
                tracing::error!(
                    error = %self,
                    request_id = %context.request_id,
                    operation = %context.operation,
                    "Configuration error"
                );
            }
            Self::RestoreCancelled(_) => {
                tracing::info!(
                    error = %self,
                    request_id = %context.request_id,
                    user_id = ?context.user_id,
                    guild_id = ?context.guild_id,
                    operation = %context.operation,
                    "Operation cancelled"
                );
            }
            Self::Json(_) | Self::Io(_) => {
                tracing::error!(
                    error = %self,
                    request_id = %context.request_id,
                    user_id = ?context.user_id,
                    guild_id = ?context.guild_id,
                    operation = %context.operation,
                    "Data processing error"
                );
            }
        }
    }

    /// Check if this error is critical and requires alerting.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::InternalState(_) | Self::Backup(_))
    }

    /// Get user-friendly error message (hides internal details).
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::DiscordApi(_) => "Discord service temporarily unavailable",
            Self::Action(ActionError::Forbidden) => "I am missing permissions for that",
            Self::Action(_) => "Discord rejected the request",
            Self::Config(_) => "Service configuration error",
            Self::InternalState(_) => "Internal service error",
            Self::KeywordPattern(_) => "Invalid keyword configuration",
            Self::Json(_) => "Data format error",
            Self::Io(_) => "File system error",
            Self::Backup(_) => "Backup service error",
            Self::RestoreCancelled(_) => "Restore cancelled",
        }
    }
}

/// Failure taxonomy for a single platform action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    /// The target no longer exists.
    #[error("not found")]
    NotFound,

    /// Missing privilege for the action.
    #[error("forbidden")]
    Forbidden,

    /// Rate limited or otherwise transient.
    #[error("rate limited")]
    RateLimited,

    /// Anything else.
    #[error("{0}")]
    Unknown(String),
}

impl ActionError {
    /// Classify a serenity error by its HTTP status.
    pub fn from_serenity(error: &serenity::Error) -> Self {
        use serenity::http::HttpError;

        match error {
            serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) => {
                Self::from_status(response.status_code.as_u16(), &response.error.message)
            }
            serenity::Error::Model(serenity::model::ModelError::InvalidPermissions { .. }) => {
                Self::Forbidden
            }
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Classify an HTTP status code.
    pub fn from_status(status: u16, message: &str) -> Self {
        match status {
            404 => Self::NotFound,
            401 | 403 => Self::Forbidden,
            429 | 502 | 503 | 504 => Self::RateLimited,
            _ => Self::Unknown(format!("HTTP {}: {}", status, message)),
        }
    }

    /// Short label used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Forbidden => "forbidden",
            Self::RateLimited => "rate_limited",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl From<serenity::Error> for ActionError {
    fn from(error: serenity::Error) -> Self {
        Self::from_serenity(&error)
    }
}

/// Context information for error logging.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Unique request identifier for correlation
    pub request_id: String,
    /// User ID if available
    pub user_id: Option<u64>,
    /// Guild ID if available
    pub guild_id: Option<u64>,
    /// Operation being performed
    pub operation: String,
}

impl ErrorContext {
    /// Create a new error context
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            user_id: None,
            guild_id: None,
            operation: operation.into(),
        }
    }

    /// Set user ID
    pub fn with_user_id(mut self, user_id: u64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Set guild ID
    pub fn with_guild_id(mut self, guild_id: u64) -> Self {
        self.guild_id = Some(guild_id);
        self
    }
}

/// Result type alias for raidguard operations.
pub type Result<T> = std::result::Result<T, RaidGuardError>;

/// Result of a single platform action.
pub type ActionResult<T> = std::result::Result<T, ActionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_config() {
        let err = RaidGuardError::Config("DISCORD_TOKEN not set".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: DISCORD_TOKEN not set"
        );
    }

    #[test]
    fn error_display_action() {
        let err = RaidGuardError::from(ActionError::Forbidden);
        assert_eq!(err.to_string(), "Platform action failed: forbidden");
    }

    #[test]
    fn status_classification() {
        assert_eq!(ActionError::from_status(404, ""), ActionError::NotFound);
        assert_eq!(ActionError::from_status(403, ""), ActionError::Forbidden);
        assert_eq!(ActionError::from_status(401, ""), ActionError::Forbidden);
        assert_eq!(ActionError::from_status(429, ""), ActionError::RateLimited);
        assert_eq!(ActionError::from_status(503, ""), ActionError::RateLimited);
        assert!(matches!(
            ActionError::from_status(400, "Invalid Form Body"),
            ActionError::Unknown(msg) if msg.contains("Invalid Form Body")
        ));
    }

    #[test]
    fn action_error_kind_labels() {
        assert_eq!(ActionError::NotFound.kind(), "not_found");
        assert_eq!(ActionError::Unknown("x".into()).kind(), "unknown");
    }

    #[test]
    fn error_is_critical() {
        assert!(RaidGuardError::Backup("disk full".to_string()).is_critical());
        assert!(RaidGuardError::InternalState("test".to_string()).is_critical());
        assert!(!RaidGuardError::Config("test".to_string()).is_critical());
        assert!(!RaidGuardError::RestoreCancelled("timeout".to_string()).is_critical());
    }

    #[test]
    fn error_user_message_hides_details() {
        let err = RaidGuardError::Backup("/var/secret/path.json".to_string());
        assert_eq!(err.user_message(), "Backup service error");
        assert!(!err.user_message().contains("secret"));
    }

    #[test]
    fn error_context_builder() {
        let ctx = ErrorContext::new("restore")
            .with_user_id(12345)
            .with_guild_id(67890);

        assert_eq!(ctx.operation, "restore");
        assert_eq!(ctx.user_id, Some(12345));
        assert_eq!(ctx.guild_id, Some(67890));
        assert!(!ctx.request_id.is_empty());
    }
}
