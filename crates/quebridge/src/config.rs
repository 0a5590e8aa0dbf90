//! CLI configuration -- thin wrapper around `quebridge_config` that applies
//! `GlobalOpts` and per-command overrides.

use quebridge_core::SessionConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use quebridge_config::{
    Config, FileCredentialStore, Profile, config_path, load_config, save_config, store_password,
};

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Load the active profile and build a `SessionConfig` from it.
/// Returns the profile name alongside, for the credential store path.
pub fn session_config(
    global: &GlobalOpts,
    serial: Option<String>,
) -> Result<(String, SessionConfig), CliError> {
    let cfg = load_config()?;
    let name = active_profile_name(global, &cfg);
    let (_, profile) = cfg.profile(Some(&name))?;

    let mut profile = profile.clone();
    if serial.is_some() {
        profile.serial = serial;
    }
    let session = quebridge_config::to_session_config(&profile, &name)?;
    Ok((name, session))
}
