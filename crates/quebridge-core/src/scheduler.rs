// ── Background loops ──
//
// Three independent loops drive a started session. Each waits on its own
// timer, its wake-up signal, and the session's cancellation token, and
// never holds a lock across an await.
//
//   token   pairing and bearer upkeep, woken early by auth failures
//   device  unit discovery and polling, woken by successful commands
//   queue   command dispatch, woken by enqueues

use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::error::CoreError;
use crate::session::Session;

pub(crate) async fn token_loop(session: Session) {
    let inner = session.inner();
    let cancel = inner.cancel.clone();

    loop {
        match session.token_cycle().await {
            Ok(()) => {}
            Err(CoreError::AuthCredentialInvalid { message }) => {
                error!(%message, "account credentials rejected, check username and password");
            }
            Err(e) => warn!(error = %e, "token refresh failed"),
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = inner.signals.auth_failure.notified() => {
                debug!("auth failure reported, running token cycle early");
            }
            () = sleep(inner.config.auth_interval) => {}
        }
    }
    debug!("token loop stopped");
}

pub(crate) async fn device_loop(session: Session) {
    let inner = session.inner();
    let cancel = inner.cancel.clone();

    tokio::select! {
        biased;
        () = cancel.cancelled() => return,
        () = sleep(inner.config.startup_delay) => {}
    }
    poll(&session).await;

    loop {
        let interval = session.poll_interval();
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = inner.signals.update_requested.notified() => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = sleep(inner.config.settle_delay) => {}
                }
                debug!("refreshing units after command");
                session.refresh_after_command().await;
            }
            () = sleep(interval) => poll(&session).await,
        }
    }
    debug!("device loop stopped");
}

async fn poll(session: &Session) {
    if !session.tokens().is_paired() {
        debug!("not paired yet, skipping poll");
        return;
    }
    if let Err(e) = session.poll_cycle().await {
        warn!(error = %e, "device poll failed");
    }
}

pub(crate) async fn queue_loop(session: Session) {
    let inner = session.inner();
    let cancel = inner.cancel.clone();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = inner.signals.queue_changed.notified() => {}
            () = sleep(inner.config.queue_interval) => {}
        }

        if session.queue_len() == 0 {
            continue;
        }
        if !session.tokens().is_token_valid() {
            debug!(queued = session.queue_len(), "no valid bearer, holding queue");
            continue;
        }
        if session.drain_queue().await > 0 {
            inner.signals.update_requested.notify_one();
        }
    }
    debug!("queue loop stopped");
}
