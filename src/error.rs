use crate::error_class::ErrorClass;
use std::time::Duration;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "descriptor.payload", "config.jitter_band")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "key_deriver", "config_loader")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
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
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the cache / retry layer.
///
/// Transport-level failures carry enough information for the retry policy to
/// classify them; everything else is terminal.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid request descriptor: {message}{}", format_context(.context))]
    InvalidDescriptor {
        message: String,
        context: ErrorContext,
    },

    #[error("Transient transport error: {message}")]
    Transport { message: String },

    #[error("Attempt timed out after {}ms", .after.as_millis())]
    Timeout { after: Duration },

    #[error("Rate limited (HTTP 429): {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Server error: HTTP {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Client error: HTTP {status}: {message}")]
    Client { status: u16, message: String },

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<Error> },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
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
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn invalid_descriptor(msg: impl Into<String>) -> Self {
        Self::invalid_descriptor_with_context(msg, ErrorContext::new())
    }

    pub fn invalid_descriptor_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::InvalidDescriptor {
            message: msg.into(),
            context,
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::configuration_with_context(msg, ErrorContext::new())
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::runtime_with_context(msg, ErrorContext::new())
    }

    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Error::Transport {
            message: msg.into(),
        }
    }

    /// Build the error for a non-success HTTP status.
    ///
    /// `retry_after` is only kept for 429 responses.
    pub fn from_status(status: u16, message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let message = message.into();
        match ErrorClass::from_http_status(status) {
            ErrorClass::RateLimited => Error::RateLimited {
                message,
                retry_after,
            },
            ErrorClass::ServerError => Error::Server { status, message },
            _ => Error::Client { status, message },
        }
    }

    /// Classify this error.
    ///
    /// `RetriesExhausted` reports the class of the error it wraps.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Transport { .. } => ErrorClass::Network,
            Error::Timeout { .. } => ErrorClass::Timeout,
            Error::RateLimited { .. } => ErrorClass::RateLimited,
            Error::Server { .. } => ErrorClass::ServerError,
            Error::Client { status, .. } => match ErrorClass::from_http_status(*status) {
                ErrorClass::Authentication => ErrorClass::Authentication,
                _ => ErrorClass::ClientError,
            },
            Error::RetriesExhausted { last, .. } => last.class(),
            Error::Cancelled => ErrorClass::Cancelled,
            Error::InvalidDescriptor { .. } | Error::Configuration { .. } => {
                ErrorClass::InvalidRequest
            }
            Error::Runtime { .. }
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::Yaml(_) => ErrorClass::Unknown,
        }
    }

    /// Whether a single failed attempt with this error may be retried.
    ///
    /// Always false for `RetriesExhausted`: the budget is already spent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::RetriesExhausted { .. } => false,
            other => other.class().retryable(),
        }
    }

    /// Provider-supplied retry delay, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// HTTP status code carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::RateLimited { .. } => Some(429),
            Error::Server { status, .. } | Error::Client { status, .. } => Some(*status),
            Error::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::InvalidDescriptor { context, .. }
            | Error::Configuration { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }
}
