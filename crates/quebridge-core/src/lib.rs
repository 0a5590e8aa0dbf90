//! Session orchestration engine for the quebridge air-conditioner bridge.
//!
//! A [`Session`] sits between the cloud API client (`quebridge-api`) and
//! whatever publishes unit state (MQTT, logs, tests):
//!
//! - **[`TokenManager`]** pairs the installation with the account and keeps
//!   a short-lived bearer token fresh. Concurrent refreshes collapse into a
//!   single exchange.
//!
//! - **[`CommandQueue`]** holds user commands in FIFO order with a fixed
//!   capacity and a per-command expiry.
//!
//! - **[`OptimisticCoordinator`]** publishes the predicted state as soon as a
//!   command is queued and holds back polls until the cloud confirms it.
//!
//! - **Background loops** ([`Session::start`]) pace token upkeep, device
//!   polling, and queue draining independently.
//!
//! Disk, clock, and network access go through injected traits
//! ([`CredentialStore`], [`Clock`], [`CloudApi`](quebridge_api::CloudApi),
//! [`PublishSink`]) so the whole engine runs in-process under test.

pub mod clock;
pub mod command;
pub mod config;
pub mod decode;
pub mod error;
pub mod field_path;
pub mod model;
pub mod pending;
pub mod publish;
pub mod queue;
mod scheduler;
pub mod session;
pub mod store;
pub mod token;

// ── Primary re-exports ──────────────────────────────────────────────
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{Command, CommandFailure, FailureReason};
pub use config::{AccountCredentials, DrainPolicy, PollMode, SessionConfig};
pub use error::CoreError;
pub use field_path::FieldPath;
pub use pending::{OptimisticCoordinator, PendingExpectation};
pub use publish::{NullSink, PublishSink, StatePublisher};
pub use queue::{CommandQueue, QueuedCommand};
pub use session::Session;
pub use store::{CredentialKey, CredentialStore, MemoryCredentialStore, StoreError};
pub use token::{TokenManager, TokenState};

pub use model::{ClimateMode, DeviceUnit, FanMode, FanSpeed, Sensor, SetpointKind, UnitState, Zone};
