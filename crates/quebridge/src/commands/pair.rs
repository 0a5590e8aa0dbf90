//! One-shot pairing.

use std::sync::Arc;

use quebridge_core::{CoreError, CredentialKey, CredentialStore, NullSink};

use crate::cli::{GlobalOpts, PairArgs};
use crate::error::CliError;

pub async fn handle(args: PairArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (session, store) = super::open_session(global, None, Arc::new(NullSink))?;

    if args.force {
        store
            .write(CredentialKey::PairingToken, None)
            .and_then(|()| store.write(CredentialKey::BearerToken, None))
            .map_err(CoreError::from)?;
    }

    let tokens = session.tokens();
    tokens.restore();
    session.token_cycle().await?;

    println!("paired as device {}", tokens.device_id().unwrap_or_default());
    println!("token state: {}", tokens.state());
    println!("credentials stored in {}", store.dir().display());
    Ok(())
}
