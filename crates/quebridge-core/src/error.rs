// ── Core error types ──
//
// Session-level errors from quebridge-core. Consumers never see raw HTTP
// status codes; the `From<quebridge_api::Error>` impl sorts transport
// failures into the handful of outcomes the session loops act on.

use thiserror::Error;

use crate::store::StoreError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Authentication ───────────────────────────────────────────────
    /// The bearer token was rejected; a refresh may fix it.
    #[error("Bearer token expired or rejected")]
    AuthExpired,

    /// The pairing token or account credentials were rejected.
    #[error("Credentials rejected: {message}")]
    AuthCredentialInvalid { message: String },

    // ── Transport ────────────────────────────────────────────────────
    /// A network-level failure that may succeed on a later cycle.
    #[error("Transient failure: {message}")]
    Transient { message: String },

    // ── Data ─────────────────────────────────────────────────────────
    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Unknown unit: {serial}")]
    UnknownUnit { serial: String },

    #[error("Rejected by the cloud service: {message}")]
    Rejected { message: String },

    #[error("Invalid command: {message}")]
    InvalidCommand { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    // ── Persistence ──────────────────────────────────────────────────
    #[error("Credential store error: {0}")]
    Persistence(#[from] StoreError),

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Returns `true` if a bearer refresh might resolve this error.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::AuthExpired)
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::UnknownUnit { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<quebridge_api::Error> for CoreError {
    fn from(err: quebridge_api::Error) -> Self {
        use quebridge_api::Error as Api;

        match err {
            Api::Unauthorized | Api::NoToken => CoreError::AuthExpired,
            Api::BadRequest { message } => CoreError::Rejected { message },
            Api::NotFound { message } => CoreError::NotFound { message },
            Api::Deserialization { message, body: _ } => CoreError::Serialization { message },
            Api::InvalidUrl(e) => CoreError::Internal(format!("Invalid URL: {e}")),
            Api::ClientBuild(message) => CoreError::Internal(message),
            err @ (Api::Transport(_)
            | Api::Timeout { .. }
            | Api::CircuitOpen { .. }
            | Api::Status { .. }) => CoreError::Transient {
                message: err.to_string(),
            },
        }
    }
}
