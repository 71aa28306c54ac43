//! Error classes and their retry semantics.
//!
//! Every failure surfaced by the executor maps to exactly one [`ErrorClass`].
//! The class decides whether the retry policy may try again:
//!
//! | Class            | Source                                 | Retryable |
//! |------------------|----------------------------------------|-----------|
//! | `network`        | connect / reset / DNS failure          | yes       |
//! | `timeout`        | per-attempt timeout elapsed            | yes       |
//! | `rate_limited`   | HTTP 429                               | yes       |
//! | `server_error`   | HTTP 500-599                           | yes       |
//! | `authentication` | HTTP 401, 403                          | no        |
//! | `client_error`   | other HTTP 4xx                         | no        |
//! | `invalid_request`| malformed descriptor, bad config       | no        |
//! | `cancelled`      | caller cancelled the call              | no        |
//! | `unknown`        | anything else                          | no        |
//!
//! ## Example
//!
//! ```rust
//! use ai_response_cache::error_class::ErrorClass;
//!
//! let class = ErrorClass::from_http_status(503);
//! assert_eq!(class, ErrorClass::ServerError);
//! assert!(class.retryable());
//! assert!(!ErrorClass::from_http_status(400).retryable());
//! ```

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Connection could not be established or was dropped mid-flight.
    Network,
    /// The attempt did not finish within the per-attempt timeout.
    Timeout,
    /// HTTP 429.
    RateLimited,
    /// HTTP 5xx.
    ServerError,
    /// HTTP 401 / 403.
    Authentication,
    /// Any other HTTP 4xx.
    ClientError,
    /// The request never left the process (bad descriptor or configuration).
    InvalidRequest,
    Cancelled,
    Unknown,
}

impl ErrorClass {
    /// Returns the stable snake_case name used in log fields.
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::Authentication => "authentication",
            Self::ClientError => "client_error",
            Self::InvalidRequest => "invalid_request",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }

    /// Whether a failure of this class may be retried.
    #[inline]
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::RateLimited | Self::ServerError
        )
    }

    /// Classify a non-success HTTP status code.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            429 => Self::RateLimited,
            401 | 403 => Self::Authentication,
            400..=499 => Self::ClientError,
            500..=599 => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    /// Parse a class from its snake_case name.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "network" => Self::Network,
            "timeout" => Self::Timeout,
            "rate_limited" => Self::RateLimited,
            "server_error" => Self::ServerError,
            "authentication" => Self::Authentication,
            "client_error" => Self::ClientError,
            "invalid_request" => Self::InvalidRequest,
            "cancelled" => Self::Cancelled,
            "unknown" => Self::Unknown,
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
