//! Subcommand handlers.

pub mod config_cmd;
pub mod pair;
pub mod run;
pub mod status;

use std::sync::Arc;

use quebridge_core::{PublishSink, Session};

use crate::cli::GlobalOpts;
use crate::config::{self, FileCredentialStore};
use crate::error::CliError;

/// Build an HTTP-backed session for the active profile. Credentials are
/// persisted under the profile's data directory.
fn open_session(
    global: &GlobalOpts,
    serial: Option<String>,
    sink: Arc<dyn PublishSink>,
) -> Result<(Session, Arc<FileCredentialStore>), CliError> {
    let (profile_name, session_config) = config::session_config(global, serial)?;
    let store = Arc::new(FileCredentialStore::for_profile(&profile_name));
    tracing::debug!(profile = %profile_name, store = %store.dir().display(), "opening session");

    let session = Session::with_http(session_config, store.clone(), sink)?;
    Ok((session, store))
}
