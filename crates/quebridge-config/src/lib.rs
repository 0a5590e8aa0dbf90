//! Configuration for the quebridge bridge.
//!
//! TOML profiles merged with `QUEBRIDGE_` environment variables, password
//! resolution (env + keyring + plaintext), translation to
//! `quebridge_core::SessionConfig`, and the file-backed credential store
//! the session persists its tokens in.

mod store;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use quebridge_core::{AccountCredentials, DrainPolicy, PollMode, SessionConfig};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use store::FileCredentialStore;

const KEYRING_SERVICE: &str = "quebridge";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{profile}' not found")]
    UnknownProfile { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named on the command line.
    pub default_profile: Option<String>,

    /// Named account profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// The named profile, or the default one.
    pub fn profile<'a>(&'a self, name: Option<&'a str>) -> Result<(&'a str, &'a Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get(name)
            .map(|profile| (name, profile))
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.into(),
            })
    }
}

/// One cloud account and how to drive it. Durations are humantime
/// strings ("30s", "5m"); absent values take the session defaults.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// Account username (email).
    pub username: Option<String>,

    /// Account password (plaintext; prefer keyring or env var).
    pub password: Option<String>,

    /// Cloud API base URL override.
    pub base_url: Option<String>,

    /// Manage only this unit.
    pub serial: Option<String>,

    /// Name this installation registers under when pairing.
    pub device_name: Option<String>,

    pub poll_mode: Option<PollMode>,
    pub drain_policy: Option<DrainPolicy>,
    pub queue_capacity: Option<usize>,

    pub poll_interval_on: Option<String>,
    pub poll_interval_off: Option<String>,
    pub auth_interval: Option<String>,
    pub queue_interval: Option<String>,
    pub command_expiry: Option<String>,
    pub suppression: Option<String>,
    pub settle_delay: Option<String>,
    pub startup_delay: Option<String>,
    pub request_timeout: Option<String>,

    /// Retries after a timeout, connection error, or 5xx.
    pub max_transient_retries: Option<u32>,
    /// Backoff before each retry; the last entry repeats.
    pub retry_delays: Option<Vec<String>>,
    /// Consecutive transient failures that open the circuit breaker.
    pub circuit_breaker_threshold: Option<u32>,
    pub circuit_breaker_cooldown: Option<String>,

    /// Rejected bearer exchanges tolerated before re-pairing.
    pub bearer_failure_max: Option<u32>,
    pub refresh_margin: Option<String>,
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "quebridge", "quebridge")
}

fn home_fallback(parts: &[&str]) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.extend(parts);
    p
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(&[".config", "quebridge", "config.toml"]),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Where persisted credentials live.
pub fn data_dir() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(&[".local", "share", "quebridge"]),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

// ── Loading and saving ──────────────────────────────────────────────

/// Load the config from the canonical path and the environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the config from `path` merged with `QUEBRIDGE_` variables.
/// Nested keys use a double underscore:
/// `QUEBRIDGE_PROFILES__HOME__SERIAL`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("QUEBRIDGE_").split("__"));

    Ok(figment.extract()?)
}

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string_pretty(cfg)?)?;
    Ok(())
}

pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

// ── Credential resolution ───────────────────────────────────────────

/// Account credentials for a profile. The password comes from the first
/// of: `QUEBRIDGE_PASSWORD`, the system keyring, the profile itself.
pub fn resolve_credentials(
    profile: &Profile,
    profile_name: &str,
) -> Result<AccountCredentials, ConfigError> {
    let env_password = std::env::var("QUEBRIDGE_PASSWORD").ok();
    let keyring_password = if env_password.is_some() {
        None
    } else {
        keyring::Entry::new(KEYRING_SERVICE, &keyring_user(profile_name))
            .and_then(|entry| entry.get_password())
            .ok()
    };
    let username = profile
        .username
        .clone()
        .or_else(|| std::env::var("QUEBRIDGE_USERNAME").ok());

    credentials_from(profile, profile_name, username, env_password, keyring_password)
}

fn credentials_from(
    profile: &Profile,
    profile_name: &str,
    username: Option<String>,
    env_password: Option<String>,
    keyring_password: Option<String>,
) -> Result<AccountCredentials, ConfigError> {
    let missing = || ConfigError::NoCredentials {
        profile: profile_name.into(),
    };
    let username = username.filter(|u| !u.is_empty()).ok_or_else(missing)?;
    let password = env_password
        .or(keyring_password)
        .or_else(|| profile.password.clone())
        .ok_or_else(missing)?;

    Ok(AccountCredentials {
        username,
        password: SecretString::from(password),
    })
}

/// Store a profile's password in the system keyring.
pub fn store_password(profile_name: &str, password: &str) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &keyring_user(profile_name))?.set_password(password)?;
    Ok(())
}

fn keyring_user(profile_name: &str) -> String {
    format!("{profile_name}/password")
}

// ── Translation ─────────────────────────────────────────────────────

/// Build a `SessionConfig` from a profile, resolving credentials.
pub fn to_session_config(profile: &Profile, profile_name: &str) -> Result<SessionConfig, ConfigError> {
    let account = resolve_credentials(profile, profile_name)?;
    session_config_with(profile, account)
}

/// Build a `SessionConfig` from a profile with the given credentials.
pub fn session_config_with(
    profile: &Profile,
    account: AccountCredentials,
) -> Result<SessionConfig, ConfigError> {
    let defaults = SessionConfig::default();

    let base_url = profile
        .base_url
        .clone()
        .unwrap_or_else(|| defaults.base_url.clone());
    url::Url::parse(&base_url).map_err(|e| ConfigError::Validation {
        field: "base_url".into(),
        reason: format!("{e}: {base_url}"),
    })?;

    let queue_capacity = profile.queue_capacity.unwrap_or(defaults.queue_capacity);
    if queue_capacity == 0 {
        return Err(ConfigError::Validation {
            field: "queue_capacity".into(),
            reason: "must be at least 1".into(),
        });
    }

    let retry_delays = match &profile.retry_delays {
        None => defaults.retry_delays.clone(),
        Some(raw) if raw.is_empty() => {
            return Err(ConfigError::Validation {
                field: "retry_delays".into(),
                reason: "must list at least one delay".into(),
            });
        }
        Some(raw) => raw
            .iter()
            .map(|delay| parse_duration("retry_delays", delay))
            .collect::<Result<_, _>>()?,
    };

    Ok(SessionConfig {
        poll_interval_on: duration(
            "poll_interval_on",
            profile.poll_interval_on.as_deref(),
            defaults.poll_interval_on,
        )?,
        poll_interval_off: duration(
            "poll_interval_off",
            profile.poll_interval_off.as_deref(),
            defaults.poll_interval_off,
        )?,
        auth_interval: duration(
            "auth_interval",
            profile.auth_interval.as_deref(),
            defaults.auth_interval,
        )?,
        queue_interval: duration(
            "queue_interval",
            profile.queue_interval.as_deref(),
            defaults.queue_interval,
        )?,
        settle_delay: duration(
            "settle_delay",
            profile.settle_delay.as_deref(),
            defaults.settle_delay,
        )?,
        command_expiry: duration(
            "command_expiry",
            profile.command_expiry.as_deref(),
            defaults.command_expiry,
        )?,
        suppression: duration(
            "suppression",
            profile.suppression.as_deref(),
            defaults.suppression,
        )?,
        startup_delay: duration(
            "startup_delay",
            profile.startup_delay.as_deref(),
            defaults.startup_delay,
        )?,
        request_timeout: duration(
            "request_timeout",
            profile.request_timeout.as_deref(),
            defaults.request_timeout,
        )?,
        circuit_breaker_cooldown: duration(
            "circuit_breaker_cooldown",
            profile.circuit_breaker_cooldown.as_deref(),
            defaults.circuit_breaker_cooldown,
        )?,
        refresh_margin: duration(
            "refresh_margin",
            profile.refresh_margin.as_deref(),
            defaults.refresh_margin,
        )?,
        max_transient_retries: profile
            .max_transient_retries
            .unwrap_or(defaults.max_transient_retries),
        circuit_breaker_threshold: at_least_one(
            "circuit_breaker_threshold",
            profile.circuit_breaker_threshold,
            defaults.circuit_breaker_threshold,
        )?,
        bearer_failure_max: at_least_one(
            "bearer_failure_max",
            profile.bearer_failure_max,
            defaults.bearer_failure_max,
        )?,
        retry_delays,
        poll_mode: profile.poll_mode.unwrap_or(defaults.poll_mode),
        drain_policy: profile.drain_policy.unwrap_or(defaults.drain_policy),
        device_name: profile
            .device_name
            .clone()
            .unwrap_or_else(|| defaults.device_name.clone()),
        serial: profile.serial.clone(),
        base_url,
        account,
        queue_capacity,
        ..defaults
    })
}

fn duration(field: &str, raw: Option<&str>, default: Duration) -> Result<Duration, ConfigError> {
    raw.map_or(Ok(default), |raw| parse_duration(field, raw))
}

fn parse_duration(field: &str, raw: &str) -> Result<Duration, ConfigError> {
    let parsed = humantime::parse_duration(raw.trim()).map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("{e}: '{raw}'"),
    })?;
    if parsed.is_zero() {
        return Err(ConfigError::Validation {
            field: field.into(),
            reason: "must be greater than zero".into(),
        });
    }
    Ok(parsed)
}

fn at_least_one(field: &str, value: Option<u32>, default: u32) -> Result<u32, ConfigError> {
    match value {
        None => Ok(default),
        Some(0) => Err(ConfigError::Validation {
            field: field.into(),
            reason: "must be at least 1".into(),
        }),
        Some(n) => Ok(n),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    fn account() -> AccountCredentials {
        AccountCredentials {
            username: "user@example.com".into(),
            password: SecretString::from("pw"),
        }
    }

    #[test]
    fn loads_profiles_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
default_profile = "home"

[profiles.home]
username = "user@example.com"
serial = "ABC123"
poll_mode = "events"
drain_policy = "drop-failed"
poll_interval_on = "45s"
"#,
        )
        .unwrap();

        let cfg = load_config_from(&path).unwrap();
        let (name, profile) = cfg.profile(None).unwrap();
        assert_eq!(name, "home");
        assert_eq!(profile.serial.as_deref(), Some("ABC123"));

        let session = session_config_with(profile, account()).unwrap();
        assert_eq!(session.poll_mode, PollMode::Events);
        assert_eq!(session.drain_policy, DrainPolicy::DropFailed);
        assert_eq!(session.poll_interval_on, Duration::from_secs(45));
        assert_eq!(session.poll_interval_off, Duration::from_secs(300));
        assert_eq!(session.serial.as_deref(), Some("ABC123"));
    }

    #[test]
    fn missing_file_yields_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.default_profile.as_deref(), Some("default"));
        assert!(matches!(
            cfg.profile(None),
            Err(ConfigError::UnknownProfile { .. })
        ));
    }

    #[test]
    fn saved_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.profiles.insert(
            "default".into(),
            Profile {
                username: Some("user@example.com".into()),
                suppression: Some("8s".into()),
                startup_delay: Some("2s".into()),
                max_transient_retries: Some(2),
                retry_delays: Some(vec!["500ms".into(), "3s".into()]),
                circuit_breaker_threshold: Some(4),
                circuit_breaker_cooldown: Some("1m".into()),
                bearer_failure_max: Some(6),
                refresh_margin: Some("2m".into()),
                ..Profile::default()
            },
        );

        save_config_to(&cfg, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();
        let (_, profile) = loaded.profile(Some("default")).unwrap();
        assert_eq!(profile.suppression.as_deref(), Some("8s"));

        let session = session_config_with(profile, account()).unwrap();
        assert_eq!(session.suppression, Duration::from_secs(8));
        assert_eq!(session.startup_delay, Duration::from_secs(2));
        assert_eq!(session.max_transient_retries, 2);
        assert_eq!(
            session.retry_delays,
            vec![Duration::from_millis(500), Duration::from_secs(3)]
        );
        assert_eq!(session.circuit_breaker_threshold, 4);
        assert_eq!(session.circuit_breaker_cooldown, Duration::from_secs(60));
        assert_eq!(session.bearer_failure_max, 6);
        assert_eq!(session.refresh_margin, Duration::from_secs(120));

        let transport = session.transport();
        assert_eq!(transport.breaker_threshold, 4);
        assert_eq!(transport.max_transient_retries, 2);
    }

    #[test]
    fn transport_and_token_knobs_default() {
        let session = session_config_with(&Profile::default(), account()).unwrap();
        assert_eq!(session.max_transient_retries, 3);
        assert_eq!(session.circuit_breaker_threshold, 5);
        assert_eq!(session.bearer_failure_max, 10);
        assert_eq!(session.startup_delay, Duration::from_secs(5));
    }

    #[test]
    fn rejects_bad_values() {
        let bad_duration = Profile {
            command_expiry: Some("soon".into()),
            ..Profile::default()
        };
        assert!(matches!(
            session_config_with(&bad_duration, account()),
            Err(ConfigError::Validation { field, .. }) if field == "command_expiry"
        ));

        let zero_capacity = Profile {
            queue_capacity: Some(0),
            ..Profile::default()
        };
        assert!(session_config_with(&zero_capacity, account()).is_err());

        let zero_threshold = Profile {
            circuit_breaker_threshold: Some(0),
            ..Profile::default()
        };
        assert!(matches!(
            session_config_with(&zero_threshold, account()),
            Err(ConfigError::Validation { field, .. }) if field == "circuit_breaker_threshold"
        ));

        let bad_delay = Profile {
            retry_delays: Some(vec!["1s".into(), "later".into()]),
            ..Profile::default()
        };
        assert!(matches!(
            session_config_with(&bad_delay, account()),
            Err(ConfigError::Validation { field, .. }) if field == "retry_delays"
        ));

        let no_delays = Profile {
            retry_delays: Some(Vec::new()),
            ..Profile::default()
        };
        assert!(session_config_with(&no_delays, account()).is_err());

        let bad_url = Profile {
            base_url: Some("not a url".into()),
            ..Profile::default()
        };
        assert!(session_config_with(&bad_url, account()).is_err());
    }

    #[test]
    fn password_chain_prefers_env_then_keyring() {
        let profile = Profile {
            password: Some("plain".into()),
            ..Profile::default()
        };
        let user = || Some("user@example.com".to_owned());

        let from_env =
            credentials_from(&profile, "p", user(), Some("env".into()), Some("ring".into())).unwrap();
        assert_eq!(from_env.password.expose_secret(), "env");

        let from_ring = credentials_from(&profile, "p", user(), None, Some("ring".into())).unwrap();
        assert_eq!(from_ring.password.expose_secret(), "ring");

        let from_file = credentials_from(&profile, "p", user(), None, None).unwrap();
        assert_eq!(from_file.password.expose_secret(), "plain");

        assert!(matches!(
            credentials_from(&Profile::default(), "p", user(), None, None),
            Err(ConfigError::NoCredentials { .. })
        ));
        assert!(credentials_from(&profile, "p", None, None, None).is_err());
    }
}
