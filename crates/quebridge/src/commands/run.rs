//! The long-running bridge.
//!
//! Unit state goes to stdout as `{"topic": ..., "payload": ...}` lines.
//! Commands arrive on stdin, one JSON object per line:
//!
//! ```text
//! {"serial": "ABC123", "action": "set_away_mode", "on": true}
//! {"action": "set_temperature", "zone": 2, "temperature": 22.5}
//! ```
//!
//! `serial` may be omitted when the account has exactly one unit.

use std::sync::Arc;

use quebridge_core::{Command, CommandFailure, CoreError, Session};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::{GlobalOpts, RunArgs};
use crate::error::CliError;
use crate::sink::JsonLineSink;

#[derive(Serialize)]
struct FailureLine<'a> {
    event: &'static str,
    #[serde(flatten)]
    failure: &'a CommandFailure,
}

pub async fn handle(args: RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let sink = Arc::new(JsonLineSink);
    let (session, _) = super::open_session(global, args.serial, sink.clone())?;

    session.start().await;
    let failures = tokio::spawn(report_failures(
        session.failures(),
        session.cancellation_token(),
        sink,
    ));

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            biased;
            _ = &mut interrupt => {
                info!("interrupt received, shutting down");
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => submit(&session, &line),
                Ok(None) => {
                    debug!("stdin closed, no further commands will be read");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!(error = %e, "stdin read failed, no further commands will be read");
                    stdin_open = false;
                }
            },
        }
    }

    session.shutdown().await;
    if let Err(e) = failures.await {
        debug!(error = %e, "failure reporter ended abnormally");
    }
    Ok(())
}

fn submit(session: &Session, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    match parse_command_line(session, line) {
        Ok((serial, command)) => match session.enqueue(&serial, &command) {
            Ok(ids) => debug!(unit = %serial, queued = ids.len(), "command accepted"),
            Err(e) => warn!(unit = %serial, error = %e, "command refused"),
        },
        Err(e) => warn!(error = %e, input = line, "unreadable command"),
    }
}

/// Split a command line into its target serial and the command itself.
fn parse_command_line(session: &Session, line: &str) -> Result<(String, Command), CoreError> {
    let invalid = |message: String| CoreError::InvalidCommand { message };

    let mut value: Value = serde_json::from_str(line).map_err(|e| invalid(e.to_string()))?;
    let serial = match value.as_object_mut().and_then(|obj| obj.remove("serial")) {
        Some(Value::String(serial)) => serial,
        Some(other) => return Err(invalid(format!("serial must be a string, got {other}"))),
        None => only_unit(session).ok_or_else(|| {
            invalid("serial is required when more than one unit is known".into())
        })?,
    };
    let command = serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;
    Ok((serial, command))
}

fn only_unit(session: &Session) -> Option<String> {
    let units = session.units();
    match units.as_slice() {
        [unit] => Some(unit.serial.clone()),
        _ => None,
    }
}

async fn report_failures(
    mut failures: broadcast::Receiver<CommandFailure>,
    cancel: CancellationToken,
    sink: Arc<JsonLineSink>,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            received = failures.recv() => match received {
                Ok(failure) => sink.emit(&FailureLine {
                    event: "command_failed",
                    failure: &failure,
                }),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "failure reports dropped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}
