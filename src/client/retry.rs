//! Failure classification and retry message formatting.
//!
//! Every failed attempt is classified into a [`FailureKind`], which decides
//! whether the client retries and provides the wording used in log messages
//! and in the final error report.

use std::fmt;
use std::time::Duration;

/// Classification of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Request timed out
    NetworkTimeout,
    /// Connection refused, DNS failure, or other offline scenarios
    NetworkOffline,
    /// Connection dropped or body could not be read
    NetworkGeneric,
    /// HTTP 429 rate limit exceeded
    RateLimit,
    /// HTTP 5xx server error
    ServerError(u16),
    /// HTTP 400 or 422 invalid request
    InvalidRequest(u16),
    /// Authentication failures (401/403)
    AuthFailed(u16),
    /// Other non-success statuses (404, 3xx without redirect, ...)
    ClientError(u16),
    /// Response body did not match the expected shape
    Decode,
}

impl FailureKind {
    /// Classify an HTTP status. Returns `None` for success statuses.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            400 | 422 => Some(Self::InvalidRequest(status)),
            401 | 403 => Some(Self::AuthFailed(status)),
            429 => Some(Self::RateLimit),
            500..=599 => Some(Self::ServerError(status)),
            other => Some(Self::ClientError(other)),
        }
    }

    /// HTTP status associated with the failure, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimit => Some(429),
            Self::ServerError(code)
            | Self::InvalidRequest(code)
            | Self::AuthFailed(code)
            | Self::ClientError(code) => Some(*code),
            _ => None,
        }
    }

    /// Short description used inside log messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network timeout",
            Self::NetworkOffline => "connection failed",
            Self::NetworkGeneric => "network error",
            Self::RateLimit => "rate limit exceeded",
            Self::ServerError(code) => match code {
                500 => "internal server error",
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::InvalidRequest(_) => "invalid request",
            Self::AuthFailed(code) => match code {
                401 => "authentication failed (401)",
                403 => "permission denied (403)",
                _ => "authentication failed",
            },
            Self::ClientError(code) => match code {
                404 => "resource not found",
                _ => "unexpected response status",
            },
            Self::Decode => "malformed response",
        }
    }

    /// Remediation hint shown after a final failure.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Check your network connection and firewall settings",
            Self::NetworkOffline => "Verify internet connectivity and DNS resolution",
            Self::NetworkGeneric => "Check network connectivity and try again",
            Self::RateLimit => "Increase --request-interval-ms or wait before retrying",
            Self::ServerError(_) => "Airtable may be experiencing issues, try again later",
            Self::InvalidRequest(_) => "The request was rejected; check base and table access",
            Self::AuthFailed(_) => "Verify AIRTABLE_API_TOKEN and its scopes (data.records:read, schema.bases:read)",
            Self::ClientError(_) => "The resource may have been deleted or renamed during the run",
            Self::Decode => "The API response format changed; upgrade airtable-backup",
        }
    }

    /// Whether the failure is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkTimeout
                | Self::NetworkOffline
                | Self::NetworkGeneric
                | Self::RateLimit
                | Self::ServerError(_)
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Context for formatting retry messages.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Attempts made so far
    pub attempt: u32,
    /// Maximum number of attempts configured
    pub max_attempts: u32,
    /// Failure that triggered the retry
    pub kind: FailureKind,
    /// Backoff duration until the next attempt
    pub backoff: Duration,
    /// URL that failed
    pub endpoint: String,
}

impl RetryContext {
    /// Format the standardized retry message.
    pub fn format_retry(&self) -> String {
        format!(
            "Retrying (attempt {}/{}) after {} - waiting {:.1} seconds... [{}]",
            self.attempt + 1,
            self.max_attempts,
            self.kind.description(),
            self.backoff.as_secs_f64(),
            self.endpoint
        )
    }

    /// Format the final failure summary with a remediation hint.
    pub fn format_failure(&self) -> String {
        format!(
            "[FAILED] Request failed after {} attempts: {} [{}]\n  Suggestion: {}",
            self.attempt,
            self.kind.description(),
            self.endpoint,
            self.kind.suggestion()
        )
    }
}
