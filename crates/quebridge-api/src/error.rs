use thiserror::Error;

/// Top-level error type for the `quebridge-api` crate.
///
/// Covers every failure mode of the cloud API surface: authentication,
/// transport, circuit breaking, and response decoding. `quebridge-core`
/// maps these into session-level errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The service rejected the credentials or bearer token (HTTP 401).
    #[error("Unauthorized -- the cloud service rejected the credentials")]
    Unauthorized,

    /// The service rejected the request body (HTTP 400).
    #[error("Bad request: {message}")]
    BadRequest { message: String },

    /// An authorized call was attempted with no bearer token available.
    #[error("No bearer token available")]
    NoToken,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    /// The circuit breaker is open and calls are failing fast.
    #[error("Circuit open -- cloud calls suspended for {retry_in_secs}s")]
    CircuitOpen { retry_in_secs: u64 },

    // ── API ─────────────────────────────────────────────────────────
    /// The requested resource (usually a unit serial) does not exist.
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// Any other non-success status.
    #[error("Cloud API error (HTTP {status}): {message}")]
    Status { status: u16, message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if the service answered 401.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// Returns `true` if the service answered 400.
    pub fn is_bad_request(&self) -> bool {
        matches!(self, Self::BadRequest { .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    ///
    /// Timeouts, connection failures, 408, 429, and every 5xx qualify.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Timeout { .. } => true,
            Self::Status { status, .. } => is_transient_status(*status),
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            _ => false,
        }
    }

    /// The HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized => Some(401),
            Self::BadRequest { .. } => Some(400),
            Self::NotFound { .. } => Some(404),
            Self::Status { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub(crate) fn is_transient_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}
