// ── Runtime session configuration ──
//
// These types describe how the session talks to the cloud and how its
// loops are paced. They carry credential data and tuning, but never touch
// disk. The binary builds a `SessionConfig` and hands it in.

use std::time::Duration;

use quebridge_api::TransportConfig;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Account credentials exchanged for a pairing token.
#[derive(Debug, Clone)]
pub struct AccountCredentials {
    pub username: String,
    pub password: SecretString,
}

/// How the device loop refreshes unit state between full polls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum PollMode {
    /// Fetch the full status document every poll.
    #[default]
    FullStatus,
    /// Fetch the full status once, then follow the incremental event feed.
    Events,
}

/// What the queue loop does when a dispatch fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum DrainPolicy {
    /// Stop draining and keep the failed command at the head for the next
    /// tick. It leaves only by succeeding or by expiring.
    #[default]
    HoldHead,
    /// Drop the failed command, report it, and keep draining.
    DropFailed,
}

/// Configuration for one bridge session.
///
/// Built by the binary, passed to `Session` -- core never reads config files.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Cloud API base URL.
    pub base_url: String,
    pub account: AccountCredentials,
    /// Name this installation registers under when pairing.
    pub device_name: String,
    /// Only manage this unit, when set.
    pub serial: Option<String>,

    // ── Loop pacing ──
    pub poll_interval_on: Duration,
    pub poll_interval_off: Duration,
    pub auth_interval: Duration,
    pub queue_interval: Duration,
    /// Delay before the first device poll.
    pub startup_delay: Duration,
    /// Wait after a successful command before re-reading state.
    pub settle_delay: Duration,
    pub poll_mode: PollMode,

    // ── Commands ──
    pub command_expiry: Duration,
    pub queue_capacity: usize,
    pub suppression: Duration,
    pub drain_policy: DrainPolicy,

    // ── Transport ──
    pub request_timeout: Duration,
    pub max_transient_retries: u32,
    pub retry_delays: Vec<Duration>,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,

    // ── Tokens ──
    pub bearer_failure_max: u32,
    /// A bearer expiring within this margin is refreshed proactively.
    pub refresh_margin: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: quebridge_api::DEFAULT_BASE_URL.into(),
            account: AccountCredentials {
                username: String::new(),
                password: SecretString::from(String::new()),
            },
            device_name: "quebridge".into(),
            serial: None,
            poll_interval_on: Duration::from_secs(30),
            poll_interval_off: Duration::from_secs(300),
            auth_interval: Duration::from_secs(60),
            queue_interval: Duration::from_secs(4),
            startup_delay: Duration::from_secs(5),
            settle_delay: Duration::from_secs(10),
            poll_mode: PollMode::default(),
            command_expiry: Duration::from_secs(12),
            queue_capacity: 50,
            suppression: Duration::from_secs(6),
            drain_policy: DrainPolicy::default(),
            request_timeout: Duration::from_secs(15),
            max_transient_retries: 3,
            retry_delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(5),
                Duration::from_secs(15),
            ],
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown: Duration::from_secs(30),
            bearer_failure_max: 10,
            refresh_margin: Duration::from_secs(5 * 60),
        }
    }
}

impl SessionConfig {
    /// Transport settings derived from this config.
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            timeout: self.request_timeout,
            max_transient_retries: self.max_transient_retries,
            retry_delays: self.retry_delays.clone(),
            breaker_threshold: self.circuit_breaker_threshold,
            breaker_cooldown: self.circuit_breaker_cooldown,
            ..TransportConfig::default()
        }
    }
}
