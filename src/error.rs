use crate::error_code::ErrorKind;
use crate::resilience::fallback::AttemptRecord;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "retry.max_attempts")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "config_loader", "usage_ledger")
    pub source: Option<String>,
    /// Provider the failure is attributed to, if any
    pub provider: Option<String>,
    /// Upstream status code, if the failure came from an HTTP-like backend
    pub status_code: Option<u16>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_status_code(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }
}

/// Unified error type for the orchestration layer.
///
/// Low-level provider failures are kept verbatim (message + status) so the
/// classifier can derive an [`ErrorKind`] from them; everything the layer
/// itself raises has a dedicated variant.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Provider error: {message}{}", format_status(.status))]
    Provider {
        message: String,
        status: Option<u16>,
        context: ErrorContext,
    },

    #[error("Attempt timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Circuit breaker open for provider '{provider}'")]
    CircuitOpen { provider: String },

    #[error("Failed to resolve model '{provider}/{model}' ({kind}): {message}")]
    ModelResolution {
        provider: String,
        model: String,
        kind: ErrorKind,
        message: String,
    },

    #[error("All providers exhausted for '{operation}' after {} attempts: {last}", .attempts.len())]
    Exhausted {
        operation: String,
        attempts: Vec<AttemptRecord>,
        last: Box<Error>,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn format_status(status: &Option<u16>) -> String {
    match status {
        Some(s) => format!(" (HTTP {})", s),
        None => String::new(),
    }
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if let Some(ref provider) = ctx.provider {
        parts.push(format!("provider: {}", provider));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Raw failure reported by a backend (what an SDK call surfaced).
    pub fn provider(message: impl Into<String>) -> Self {
        Error::Provider {
            message: message.into(),
            status: None,
            context: ErrorContext::new(),
        }
    }

    /// Raw failure with an HTTP-like status code.
    pub fn provider_status(status: u16, message: impl Into<String>) -> Self {
        Error::Provider {
            message: message.into(),
            status: Some(status),
            context: ErrorContext::new().with_status_code(status),
        }
    }

    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Provider { context, .. }
            | Error::Configuration { context, .. }
            | Error::Validation { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Status code carried by a provider failure.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Provider { status, .. } => *status,
            _ => None,
        }
    }

    /// Attempt trail of an exhausted fallback sequence.
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            Error::Exhausted { attempts, .. } => attempts,
            _ => &[],
        }
    }

    /// Generic message suitable for end users; never exposes provider diagnostics.
    pub fn user_message(&self) -> &'static str {
        match self {
            Error::Cancelled => "The request was cancelled.",
            Error::Validation { .. } => "The request could not be processed.",
            _ => "The AI service is temporarily unavailable. Please try again shortly.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_display_includes_status() {
        let err = Error::provider_status(503, "upstream overloaded");
        assert_eq!(
            err.to_string(),
            "Provider error: upstream overloaded (HTTP 503)"
        );
        assert_eq!(err.status(), Some(503));
    }

    #[test]
    fn test_context_formatting() {
        let err = Error::configuration_with_context(
            "max_attempts must be at least 1",
            ErrorContext::new()
                .with_field_path("retry.max_attempts")
                .with_source("config"),
        );
        let text = err.to_string();
        assert!(text.contains("field: retry.max_attempts"));
        assert!(text.contains("source: config"));
    }

    #[test]
    fn test_user_message_hides_details() {
        let err = Error::Exhausted {
            operation: "summarize".into(),
            attempts: Vec::new(),
            last: Box::new(Error::provider("invalid api key sk-123")),
        };
        assert!(!err.user_message().contains("sk-123"));
        assert!(err.attempts().is_empty());
    }
}
