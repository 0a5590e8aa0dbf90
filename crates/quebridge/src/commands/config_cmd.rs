//! Config subcommand handlers.

use std::fmt::Write as _;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config, Profile};
use crate::error::CliError;

/// Format config for display, masking the password.
fn format_config_redacted(cfg: &Config) -> String {
    let mut out = String::new();

    if let Some(ref default) = cfg.default_profile {
        let _ = writeln!(out, "default_profile = \"{default}\"");
    }

    let mut names: Vec<_> = cfg.profiles.keys().collect();
    names.sort();
    for name in names {
        let p = &cfg.profiles[name];
        let _ = writeln!(out);
        let _ = writeln!(out, "[profiles.{name}]");
        let mut field = |key: &str, value: Option<&str>| {
            if let Some(value) = value {
                let _ = writeln!(out, "{key} = \"{value}\"");
            }
        };
        field("username", p.username.as_deref());
        field("password", p.password.as_ref().map(|_| "****"));
        field("base_url", p.base_url.as_deref());
        field("serial", p.serial.as_deref());
        field("device_name", p.device_name.as_deref());
        field("poll_interval_on", p.poll_interval_on.as_deref());
        field("poll_interval_off", p.poll_interval_off.as_deref());
        field("auth_interval", p.auth_interval.as_deref());
        field("queue_interval", p.queue_interval.as_deref());
        field("command_expiry", p.command_expiry.as_deref());
        field("suppression", p.suppression.as_deref());
        field("settle_delay", p.settle_delay.as_deref());
        field("startup_delay", p.startup_delay.as_deref());
        field("request_timeout", p.request_timeout.as_deref());
        field("circuit_breaker_cooldown", p.circuit_breaker_cooldown.as_deref());
        field("refresh_margin", p.refresh_margin.as_deref());
        if let Some(mode) = p.poll_mode {
            let _ = writeln!(out, "poll_mode = \"{mode}\"");
        }
        if let Some(policy) = p.drain_policy {
            let _ = writeln!(out, "drain_policy = \"{policy}\"");
        }
        if let Some(delays) = &p.retry_delays {
            let quoted: Vec<String> = delays.iter().map(|d| format!("\"{d}\"")).collect();
            let _ = writeln!(out, "retry_delays = [{}]", quoted.join(", "));
        }
        if let Some(capacity) = p.queue_capacity {
            let _ = writeln!(out, "queue_capacity = {capacity}");
        }
        let counts = [
            ("max_transient_retries", p.max_transient_retries),
            ("circuit_breaker_threshold", p.circuit_breaker_threshold),
            ("bearer_failure_max", p.bearer_failure_max),
        ];
        for (key, value) in counts {
            if let Some(value) = value {
                let _ = writeln!(out, "{key} = {value}");
            }
        }
    }

    out
}

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            println!("{}", config::config_path().display());
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = config::load_config()?;
            print!("{}", format_config_redacted(&cfg));
            Ok(())
        }

        ConfigCommand::Init {
            username,
            serial,
            force,
        } => {
            if username.trim().is_empty() {
                return Err(CliError::Validation {
                    field: "username".into(),
                    reason: "cannot be empty".into(),
                });
            }

            let mut cfg = config::load_config()?;
            let name = config::active_profile_name(global, &cfg);
            if cfg.profiles.contains_key(&name) && !force {
                return Err(CliError::Validation {
                    field: "profile".into(),
                    reason: format!("'{name}' already exists, pass --force to replace it"),
                });
            }

            cfg.profiles.insert(
                name.clone(),
                Profile {
                    username: Some(username),
                    serial,
                    ..Profile::default()
                },
            );
            if cfg.default_profile.is_none() {
                cfg.default_profile = Some(name.clone());
            }
            config::save_config(&cfg)?;

            eprintln!("profile '{name}' written to {}", config::config_path().display());
            eprintln!("store the password with: quebridge config set-password --profile {name}");
            Ok(())
        }

        ConfigCommand::SetPassword => {
            let cfg = config::load_config()?;
            let name = config::active_profile_name(global, &cfg);
            cfg.profile(Some(&name))?;

            let password = rpassword::prompt_password("Password: ")?;
            if password.is_empty() {
                return Err(CliError::Validation {
                    field: "password".into(),
                    reason: "cannot be empty".into(),
                });
            }
            config::store_password(&name, &password)?;
            eprintln!("password for '{name}' stored in system keyring");
            Ok(())
        }
    }
}
