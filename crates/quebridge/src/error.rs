//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use quebridge_config::ConfigError;
use quebridge_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the cloud service: {message}")]
    #[diagnostic(
        code(quebridge::connection_failed),
        help("Check network access to the cloud API and try again.")
    )]
    ConnectionFailed { message: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(quebridge::auth_failed),
        help(
            "Verify the account username and password.\n\
             Run: quebridge config set-password\n\
             Then: quebridge pair --force"
        )
    )]
    AuthFailed { message: String },

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(quebridge::no_credentials),
        help(
            "Configure a profile with: quebridge config init --username <email>\n\
             Then store the password with: quebridge config set-password\n\
             Or set QUEBRIDGE_PASSWORD."
        )
    )]
    NoCredentials { profile: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("Not found: {message}")]
    #[diagnostic(
        code(quebridge::not_found),
        help("Run: quebridge status to see the units on this account")
    )]
    NotFound { message: String },

    #[error("Cloud service error: {message}")]
    #[diagnostic(code(quebridge::api_error))]
    ApiError { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(quebridge::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(quebridge::profile_not_found),
        help(
            "Create one with: quebridge config init --username <email>\n\
             Expected at: {path}"
        )
    )]
    ProfileNotFound { name: String, path: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(quebridge::config))]
    Config { message: String },

    #[error("Keyring error: {message}")]
    #[diagnostic(
        code(quebridge::keyring),
        help("Set QUEBRIDGE_PASSWORD or put the password in the profile instead.")
    )]
    Keyring { message: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(quebridge::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } | Self::Keyring { .. } => {
                exit_code::AUTH
            }
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } | Self::ProfileNotFound { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::AuthExpired => CliError::AuthFailed {
                message: "bearer token rejected".into(),
            },
            CoreError::AuthCredentialInvalid { message } => CliError::AuthFailed { message },
            CoreError::Transient { message } => CliError::ConnectionFailed { message },
            CoreError::NotFound { message } => CliError::NotFound { message },
            CoreError::UnknownUnit { serial } => CliError::NotFound {
                message: format!("unit {serial}"),
            },
            CoreError::InvalidCommand { message } => CliError::Validation {
                field: "command".into(),
                reason: message,
            },
            other => CliError::ApiError {
                message: other.to_string(),
            },
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
            ConfigError::UnknownProfile { profile } => CliError::ProfileNotFound {
                name: profile,
                path: quebridge_config::config_path().display().to_string(),
            },
            ConfigError::Keyring(e) => CliError::Keyring {
                message: e.to_string(),
            },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config {
                message: other.to_string(),
            },
        }
    }
}
