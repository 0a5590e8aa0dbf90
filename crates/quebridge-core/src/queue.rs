// ── Command queue ──
//
// Bounded FIFO of outbound settings mutations. Overflow drops the oldest
// command. Each command carries its own expiry; the drain loop discards
// expired heads without dispatching them.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use tracing::error;
use uuid::Uuid;

use crate::clock;

/// One outbound settings mutation for one unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedCommand {
    pub id: Uuid,
    /// The caller-facing id this command was split from, when different.
    pub original_id: Uuid,
    pub unit: String,
    /// Wire field path to new value, in insertion order.
    pub fields: IndexMap<String, Value>,
    pub enqueued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl QueuedCommand {
    pub fn new(
        unit: impl Into<String>,
        fields: IndexMap<String, Value>,
        now: DateTime<Utc>,
        expiry: Duration,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            original_id: id,
            unit: unit.into(),
            fields,
            enqueued_at: now,
            expires_at: clock::after(now, expiry),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// What to do with the head of the queue.
#[derive(Debug)]
pub enum Head {
    Empty,
    Expired(QueuedCommand),
    Ready(QueuedCommand),
}

#[derive(Debug)]
pub struct CommandQueue {
    capacity: usize,
    items: Mutex<VecDeque<QueuedCommand>>,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Append, dropping the oldest commands past capacity. Returns the
    /// dropped commands.
    pub fn push(&self, command: QueuedCommand) -> Vec<QueuedCommand> {
        let mut items = self.lock();
        items.push_back(command);
        let mut dropped = Vec::new();
        while items.len() > self.capacity {
            if let Some(old) = items.pop_front() {
                error!(command_id = %old.id, unit = %old.unit, "command queue full, dropping oldest command");
                dropped.push(old);
            }
        }
        dropped
    }

    /// Inspect the head. An expired head is removed and returned; a ready
    /// head is cloned and stays queued until `complete` removes it.
    pub fn head(&self, now: DateTime<Utc>) -> Head {
        let mut items = self.lock();
        match items.front() {
            None => Head::Empty,
            Some(head) if head.is_expired_at(now) => {
                items.pop_front().map_or(Head::Empty, Head::Expired)
            }
            Some(head) => Head::Ready(head.clone()),
        }
    }

    /// Remove the head if it is still `id`. Returns whether it was removed.
    pub fn complete(&self, id: Uuid) -> bool {
        let mut items = self.lock();
        if items.front().is_some_and(|head| head.id == id) {
            items.pop_front();
            true
        } else {
            false
        }
    }

    pub fn snapshot(&self) -> Vec<QueuedCommand> {
        self.lock().iter().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<QueuedCommand>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn command(name: &str, now: DateTime<Utc>) -> QueuedCommand {
        let mut fields = IndexMap::new();
        fields.insert(name.to_string(), json!(true));
        QueuedCommand::new("S1", fields, now, Duration::from_secs(12))
    }

    #[test]
    fn drops_oldest_past_capacity() {
        let now = Utc::now();
        let queue = CommandQueue::new(3);
        for name in ["A", "B", "C"] {
            assert!(queue.push(command(name, now)).is_empty());
        }
        let dropped = queue.push(command("D", now));

        assert_eq!(dropped.len(), 1);
        assert!(dropped[0].fields.contains_key("A"));
        let names: Vec<_> = queue
            .snapshot()
            .into_iter()
            .map(|c| c.fields.keys().next().unwrap().clone())
            .collect();
        assert_eq!(names, ["B", "C", "D"]);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn expired_head_is_removed_on_inspection() {
        let now = Utc::now();
        let queue = CommandQueue::new(5);
        queue.push(command("A", now));

        let later = clock::after(now, Duration::from_secs(12));
        assert!(matches!(queue.head(later), Head::Expired(_)));
        assert!(queue.is_empty());
    }

    #[test]
    fn ready_head_stays_until_completed() {
        let now = Utc::now();
        let queue = CommandQueue::new(5);
        queue.push(command("A", now));

        let Head::Ready(head) = queue.head(now) else {
            panic!("expected a ready head");
        };
        assert_eq!(queue.len(), 1);
        assert!(queue.complete(head.id));
        assert!(!queue.complete(head.id));
        assert!(queue.is_empty());
    }
}
