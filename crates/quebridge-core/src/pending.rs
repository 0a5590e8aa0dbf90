// ── Optimistic update coordinator ──
//
// On enqueue, the predicted state is published right away and each field
// is recorded as an expectation. Polls for that unit are held back while a
// suppression window is open so a stale read cannot overwrite the
// prediction. Confirming field changes from the cloud remove expectations
// one field at a time; once none remain the window closes early.
//
// Lock order is always `pending` then `windows`. A window is only opened
// or closed while the `pending` guard is held, so no unit stays suppressed
// once its last expectation is gone.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::{self, Clock};
use crate::field_path::FieldPath;
use crate::publish::StatePublisher;
use crate::queue::QueuedCommand;

/// Expected values for one enqueued command.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingExpectation {
    pub command_id: Uuid,
    pub unit: String,
    /// Field path to normalized expected value.
    pub expected: IndexMap<String, String>,
    pub expires_at: DateTime<Utc>,
}

pub struct OptimisticCoordinator {
    publisher: Arc<StatePublisher>,
    clock: Arc<dyn Clock>,
    suppression: Duration,
    pending: Mutex<Vec<PendingExpectation>>,
    windows: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl OptimisticCoordinator {
    pub fn new(publisher: Arc<StatePublisher>, clock: Arc<dyn Clock>, suppression: Duration) -> Self {
        Self {
            publisher,
            clock,
            suppression,
            pending: Mutex::new(Vec::new()),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Publish the predicted state for `command`, record what the cloud is
    /// expected to confirm, and open the unit's suppression window.
    pub fn on_enqueue(&self, command: &QueuedCommand) {
        let now = self.clock.now();
        let mut expected = IndexMap::with_capacity(command.fields.len());

        for (path, value) in &command.fields {
            match path.parse::<FieldPath>() {
                Ok(parsed) => self.publisher.publish_optimistic(&command.unit, &parsed, value),
                Err(e) => warn!(command_id = %command.id, error = %e, "no projection for field"),
            }
            expected.insert(path.clone(), normalize(value));
        }

        let count = expected.len();
        let until = clock::after(now, self.suppression);
        {
            let mut pending = lock(&self.pending);
            pending.retain(|record| record.expires_at > now);
            pending.push(PendingExpectation {
                command_id: command.id,
                unit: command.unit.clone(),
                expected,
                expires_at: until,
            });
            lock(&self.windows).insert(command.unit.clone(), until);
        }
        debug!(unit = %command.unit, command_id = %command.id, fields = count, %until, "unit suppressed");
    }

    /// Remove every live expectation on `unit` that this change satisfies.
    /// Closes the unit's window when nothing is left pending.
    pub fn on_confirming_event(&self, unit: &str, path: &str, value: &Value) {
        let now = self.clock.now();
        let actual = normalize(value);

        let mut pending = lock(&self.pending);
        pending.retain_mut(|record| {
            if record.expires_at <= now {
                return false;
            }
            if record.unit != unit {
                return true;
            }
            let confirmed = record
                .expected
                .get(path)
                .is_some_and(|expected| expected.eq_ignore_ascii_case(&actual));
            if confirmed {
                record.expected.shift_remove(path);
                debug!(unit, path, command_id = %record.command_id, "field confirmed");
            }
            !record.expected.is_empty()
        });
        self.close_window_if_idle(&pending, unit);
    }

    /// Forget the expectation recorded for a command that will never be
    /// sent.
    pub fn withdraw(&self, command_id: Uuid) {
        let mut pending = lock(&self.pending);
        let Some(index) = pending.iter().position(|record| record.command_id == command_id) else {
            return;
        };
        let record = pending.remove(index);
        debug!(unit = %record.unit, %command_id, "expectation withdrawn");
        self.close_window_if_idle(&pending, &record.unit);
    }

    fn close_window_if_idle(&self, pending: &[PendingExpectation], unit: &str) {
        if pending.iter().any(|record| record.unit == unit) {
            return;
        }
        if lock(&self.windows).remove(unit).is_some() {
            debug!(unit, "no pending expectations, suppression cleared");
        }
    }

    pub fn is_suppressed(&self, unit: &str) -> bool {
        let now = self.clock.now();
        lock(&self.windows).get(unit).is_some_and(|until| *until > now)
    }

    pub fn pending(&self) -> Vec<PendingExpectation> {
        lock(&self.pending).clone()
    }
}

/// Stringify a value for expectation matching: strings raw, bools as
/// `true`/`false`, numbers in shortest float form, null as empty.
pub fn normalize(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.as_f64().map_or_else(|| n.to_string(), |f| f.to_string()),
        other => other.to_string(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
