//! One-shot poll of every unit.

use std::sync::Arc;

use quebridge_core::NullSink;

use crate::cli::{GlobalOpts, RunArgs};
use crate::error::CliError;

pub async fn handle(args: RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (session, _) = super::open_session(global, args.serial, Arc::new(NullSink))?;

    session.tokens().restore();
    session.token_cycle().await?;
    session.poll_cycle().await?;

    let units = session.units();
    if units.is_empty() {
        eprintln!("no units found on this account");
    }
    println!("{}", serde_json::to_string_pretty(&units)?);
    Ok(())
}
