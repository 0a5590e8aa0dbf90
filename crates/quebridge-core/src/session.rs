// ── Session ──
//
// One `Session` owns everything a running bridge needs: the token manager,
// the command queue, the optimistic coordinator, the unit snapshots, and
// the three background loops. Collaborators (cloud API, credential store,
// publish sink, clock) are injected so tests can run it without a network.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use quebridge_api::{CloudApi, CloudClient, UnitSummary};
use serde_json::Value;
use tokio::sync::{Mutex, Notify, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::command::{Command, CommandFailure, FailureReason};
use crate::config::{DrainPolicy, PollMode, SessionConfig};
use crate::decode;
use crate::error::CoreError;
use crate::field_path::FieldPath;
use crate::model::{ClimateMode, DeviceUnit, FanSpeed, SetpointKind};
use crate::pending::{OptimisticCoordinator, PendingExpectation};
use crate::publish::{PublishSink, StatePublisher};
use crate::queue::{CommandQueue, Head, QueuedCommand};
use crate::scheduler;
use crate::store::CredentialStore;
use crate::token::{TokenManager, TokenSettings};

const FAILURE_CHANNEL_SIZE: usize = 64;

/// Cross-loop wake-ups. Each holds at most one stored permit.
#[derive(Default)]
pub(crate) struct Signals {
    pub queue_changed: Notify,
    pub update_requested: Notify,
    pub auth_failure: Notify,
}

/// Handle to a running (or not yet started) bridge session.
///
/// Cheaply cloneable; all clones drive the same state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    pub(crate) config: SessionConfig,
    api: Arc<dyn CloudApi>,
    clock: Arc<dyn Clock>,
    tokens: Arc<TokenManager>,
    queue: CommandQueue,
    coordinator: OptimisticCoordinator,
    publisher: Arc<StatePublisher>,
    units: RwLock<BTreeMap<String, DeviceUnit>>,
    pub(crate) signals: Signals,
    failures: broadcast::Sender<CommandFailure>,
    pub(crate) cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        api: Arc<dyn CloudApi>,
        store: Arc<dyn CredentialStore>,
        sink: Arc<dyn PublishSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let tokens = Arc::new(TokenManager::new(
            Arc::clone(&api),
            store,
            Arc::clone(&clock),
            TokenSettings {
                account: config.account.clone(),
                device_name: config.device_name.clone(),
                bearer_failure_max: config.bearer_failure_max,
                refresh_margin: config.refresh_margin,
            },
        ));
        let publisher = Arc::new(StatePublisher::new(sink));
        let coordinator = OptimisticCoordinator::new(
            Arc::clone(&publisher),
            Arc::clone(&clock),
            config.suppression,
        );
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_SIZE);

        Self {
            inner: Arc::new(SessionInner {
                queue: CommandQueue::new(config.queue_capacity),
                config,
                api,
                clock,
                tokens,
                coordinator,
                publisher,
                units: RwLock::new(BTreeMap::new()),
                signals: Signals::default(),
                failures,
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A session against the real cloud service and wall clock.
    pub fn with_http(
        config: SessionConfig,
        store: Arc<dyn CredentialStore>,
        sink: Arc<dyn PublishSink>,
    ) -> Result<Self, CoreError> {
        let client = CloudClient::new(&config.base_url, config.transport())?;
        Ok(Self::new(
            config,
            Arc::new(client),
            store,
            sink,
            Arc::new(SystemClock),
        ))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.inner.tokens
    }

    /// Every command that fails from now on.
    pub fn failures(&self) -> broadcast::Receiver<CommandFailure> {
        self.inner.failures.subscribe()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Restore persisted credentials and spawn the token, device, and
    /// queue loops. Returns immediately.
    pub async fn start(&self) {
        self.inner.tokens.restore();

        let mut handles = self.inner.task_handles.lock().await;
        handles.push(tokio::spawn(scheduler::token_loop(self.clone())));
        handles.push(tokio::spawn(scheduler::device_loop(self.clone())));
        handles.push(tokio::spawn(scheduler::queue_loop(self.clone())));
        info!("session started");
    }

    /// Signal every loop to stop and wait for them to exit.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "session task ended abnormally");
            }
        }
        debug!("session stopped");
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    pub(crate) fn inner(&self) -> &SessionInner {
        &self.inner
    }

    // ── Snapshots ────────────────────────────────────────────────────

    pub fn units(&self) -> Vec<DeviceUnit> {
        self.read_units().values().cloned().collect()
    }

    pub fn unit(&self, serial: &str) -> Option<DeviceUnit> {
        self.read_units().get(serial).cloned()
    }

    /// Register a unit directly, bypassing discovery.
    pub fn insert_unit(&self, unit: DeviceUnit) {
        self.write_units().insert(unit.serial.clone(), unit);
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn queued(&self) -> Vec<QueuedCommand> {
        self.inner.queue.snapshot()
    }

    /// Expectations still awaiting confirmation from the cloud.
    pub fn pending(&self) -> Vec<PendingExpectation> {
        self.inner.coordinator.pending()
    }

    pub fn is_suppressed(&self, serial: &str) -> bool {
        self.inner.coordinator.is_suppressed(serial)
    }

    /// Poll pacing: fast while any unit is powered on.
    pub fn poll_interval(&self) -> Duration {
        let any_on = self.read_units().values().any(|unit| unit.state.power);
        if any_on {
            self.inner.config.poll_interval_on
        } else {
            self.inner.config.poll_interval_off
        }
    }

    fn read_units(&self) -> RwLockReadGuard<'_, BTreeMap<String, DeviceUnit>> {
        self.inner.units.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_units(&self) -> RwLockWriteGuard<'_, BTreeMap<String, DeviceUnit>> {
        self.inner.units.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Command API ──────────────────────────────────────────────────

    /// Queue `command` for `serial`. The predicted state is published
    /// before this returns. Returns the ids of the queued commands; empty
    /// when the command is a no-op in the unit's current mode.
    pub fn enqueue(&self, serial: &str, command: &Command) -> Result<Vec<Uuid>, CoreError> {
        let field_sets = {
            let units = self.read_units();
            let unit = units.get(serial).ok_or_else(|| CoreError::UnknownUnit {
                serial: serial.to_owned(),
            })?;
            command.field_sets(unit)?
        };
        if field_sets.is_empty() {
            debug!(unit = serial, ?command, "command is a no-op in the current mode");
            return Ok(Vec::new());
        }

        let now = self.inner.clock.now();
        let mut original_id = None;
        let mut ids = Vec::with_capacity(field_sets.len());
        for fields in field_sets {
            let mut queued =
                QueuedCommand::new(serial, fields, now, self.inner.config.command_expiry);
            let original = *original_id.get_or_insert(queued.id);
            queued.original_id = original;
            info!(unit = serial, command_id = %queued.id, ?command, "command queued");

            self.inner.coordinator.on_enqueue(&queued);
            ids.push(queued.id);
            for dropped in self.inner.queue.push(queued) {
                self.report_failure(&dropped, FailureReason::QueueFull);
            }
        }
        self.inner.signals.queue_changed.notify_one();
        Ok(ids)
    }

    pub fn set_mode(&self, serial: &str, mode: ClimateMode) -> Result<Vec<Uuid>, CoreError> {
        self.enqueue(serial, &Command::SetMode { mode })
    }

    pub fn set_fan_mode(&self, serial: &str, speed: FanSpeed) -> Result<Vec<Uuid>, CoreError> {
        self.enqueue(serial, &Command::SetFanMode { speed })
    }

    pub fn set_constant_fan(&self, serial: &str, on: bool) -> Result<Vec<Uuid>, CoreError> {
        self.enqueue(serial, &Command::SetConstantFan { on })
    }

    /// Zone 0 targets the master setpoint.
    pub fn set_temperature(
        &self,
        serial: &str,
        zone: usize,
        temperature: f64,
        kind: SetpointKind,
    ) -> Result<Vec<Uuid>, CoreError> {
        self.enqueue(
            serial,
            &Command::SetTemperature {
                zone,
                temperature,
                kind,
            },
        )
    }

    pub fn set_zone(&self, serial: &str, zone: usize, on: bool) -> Result<Vec<Uuid>, CoreError> {
        self.enqueue(serial, &Command::SetZone { zone, on })
    }

    pub fn set_control_all_zones(&self, serial: &str, on: bool) -> Result<Vec<Uuid>, CoreError> {
        self.enqueue(serial, &Command::SetControlAllZones { on })
    }

    pub fn set_away_mode(&self, serial: &str, on: bool) -> Result<Vec<Uuid>, CoreError> {
        self.enqueue(serial, &Command::SetAwayMode { on })
    }

    pub fn set_quiet_mode(&self, serial: &str, on: bool) -> Result<Vec<Uuid>, CoreError> {
        self.enqueue(serial, &Command::SetQuietMode { on })
    }

    /// Log, publish, and broadcast a command that will never be sent, and
    /// withdraw its optimistic expectation.
    fn report_failure(&self, command: &QueuedCommand, reason: FailureReason) {
        warn!(unit = %command.unit, command_id = %command.id, %reason, "command failed");
        self.inner.coordinator.withdraw(command.id);
        self.inner
            .publisher
            .publish_failed_command(&command.unit, &command.id.to_string());
        let _ = self.inner.failures.send(CommandFailure {
            command_id: command.id,
            original_id: command.original_id,
            unit: command.unit.clone(),
            reason,
        });
    }

    // ── Token cycle ──────────────────────────────────────────────────

    /// One pass of the token loop: pair if needed, then make sure a bearer
    /// is cached and not about to expire.
    pub async fn token_cycle(&self) -> Result<(), CoreError> {
        let tokens = &self.inner.tokens;
        if !tokens.is_paired() {
            tokens.pair().await?;
            tokens.get_token().await?;
        } else if !tokens.is_token_valid() {
            tokens.get_token().await?;
        } else if tokens.expiring_soon() {
            debug!("bearer token expiring soon, refreshing");
            tokens.force_refresh().await?;
        }
        Ok(())
    }

    // ── Queue drain ──────────────────────────────────────────────────

    /// Dispatch queued commands from the head until the queue is empty or
    /// a dispatch fails. Returns the number dispatched successfully.
    pub async fn drain_queue(&self) -> usize {
        let mut sent = 0;
        loop {
            let command = match self.inner.queue.head(self.inner.clock.now()) {
                Head::Empty => break,
                Head::Expired(command) => {
                    self.report_failure(&command, FailureReason::Expired);
                    continue;
                }
                Head::Ready(command) => command,
            };

            match self.dispatch(&command).await {
                Ok(()) => {
                    self.inner.queue.complete(command.id);
                    info!(unit = %command.unit, command_id = %command.id, "command sent");
                    sent += 1;
                }
                Err(CoreError::Serialization { message }) => {
                    self.inner.queue.complete(command.id);
                    self.report_failure(&command, FailureReason::Serialization(message));
                }
                Err(e) => {
                    self.note_auth_error(&e);
                    if e.is_not_found() {
                        error!(unit = %command.unit, command_id = %command.id, "unit not found, check the serial");
                    }
                    match self.inner.config.drain_policy {
                        DrainPolicy::HoldHead => {
                            warn!(command_id = %command.id, error = %e, "dispatch failed, holding command");
                            break;
                        }
                        DrainPolicy::DropFailed => {
                            self.inner.queue.complete(command.id);
                            self.report_failure(&command, FailureReason::Dispatch(e.to_string()));
                        }
                    }
                }
            }
        }
        sent
    }

    async fn dispatch(&self, command: &QueuedCommand) -> Result<(), CoreError> {
        serde_json::to_vec(&command.fields).map_err(|e| CoreError::Serialization {
            message: e.to_string(),
        })?;
        debug!(unit = %command.unit, command_id = %command.id, original_id = %command.original_id, "dispatching command");
        self.inner
            .api
            .send_command(self.inner.tokens.as_ref(), &command.unit, &command.fields)
            .await
            .map_err(CoreError::from)
    }

    // ── Device polling ───────────────────────────────────────────────

    /// One timed pass of the device loop: discover units and zones as
    /// needed, then refresh and publish every unit.
    pub async fn poll_cycle(&self) -> Result<(), CoreError> {
        if self.read_units().is_empty() {
            self.discover_units()
                .await
                .inspect_err(|e| self.note_auth_error(e))?;
        }

        for serial in self.serials() {
            let zones_known = self.read_units().get(&serial).is_some_and(DeviceUnit::zones_known);
            if !zones_known {
                if let Err(e) = self.discover_zones(&serial).await {
                    self.note_fetch_error(&serial, &e);
                    continue;
                }
            }
            if let Err(e) = self.refresh_unit(&serial, false).await {
                self.note_fetch_error(&serial, &e);
            }
        }
        Ok(())
    }

    /// The post-command pass: a full status read of every unit.
    pub async fn refresh_after_command(&self) {
        for serial in self.serials() {
            if let Err(e) = self.refresh_unit(&serial, true).await {
                self.note_fetch_error(&serial, &e);
            }
        }
    }

    fn serials(&self) -> Vec<String> {
        self.read_units().keys().cloned().collect()
    }

    fn note_fetch_error(&self, serial: &str, e: &CoreError) {
        self.note_auth_error(e);
        warn!(unit = serial, error = %e, "unit refresh failed");
    }

    /// A rejected bearer wakes the token loop early.
    fn note_auth_error(&self, e: &CoreError) {
        if e.is_auth_expired() {
            self.inner.tokens.invalidate();
            self.inner.signals.auth_failure.notify_one();
        }
    }

    async fn discover_units(&self) -> Result<(), CoreError> {
        let summaries = self
            .inner
            .api
            .list_units(self.inner.tokens.as_ref())
            .await?;
        let wanted = self.inner.config.serial.as_deref();
        let selected: Vec<UnitSummary> = summaries
            .into_iter()
            .filter(|summary| wanted.is_none_or(|serial| serial.eq_ignore_ascii_case(&summary.serial)))
            .collect();

        if selected.is_empty() {
            warn!(filter = ?wanted, "no units found on the account");
            return Ok(());
        }

        let mut units = self.write_units();
        for summary in selected {
            let name = if summary.description.is_empty() {
                summary.serial.clone()
            } else {
                summary.description.clone()
            };
            info!(unit = %summary.serial, %name, kind = %summary.kind, "discovered unit");
            units
                .entry(summary.serial.clone())
                .or_insert_with(|| DeviceUnit::new(summary.serial, name));
        }
        Ok(())
    }

    async fn discover_zones(&self, serial: &str) -> Result<(), CoreError> {
        let status = self
            .inner
            .api
            .fetch_status(self.inner.tokens.as_ref(), serial)
            .await?;
        let zones = decode::zone_topology(&status);
        if zones.is_empty() {
            warn!(unit = serial, "status carried no zone information");
            return Ok(());
        }

        let mut units = self.write_units();
        let Some(unit) = units.get_mut(serial) else {
            return Ok(());
        };
        info!(unit = serial, zones = zones.values().filter(|z| z.exists).count(), "registered zones");
        unit.zones = zones;
        if !unit.discovery_published {
            self.inner.publisher.publish_discovery(unit);
            unit.discovery_published = true;
        }
        Ok(())
    }

    /// Read a unit from the cloud, apply the changes, confirm pending
    /// expectations, and publish unless the unit is suppressed.
    async fn refresh_unit(&self, serial: &str, force_full: bool) -> Result<(), CoreError> {
        let follow_events = !force_full
            && self.inner.config.poll_mode == PollMode::Events
            && self
                .read_units()
                .get(serial)
                .is_some_and(|unit| unit.state.last_updated.is_some());

        let changes = if follow_events {
            self.fetch_event_changes(serial).await?
        } else {
            self.fetch_status_changes(serial).await?
        };
        self.apply_changes(serial, &changes);
        Ok(())
    }

    async fn fetch_status_changes(&self, serial: &str) -> Result<Vec<(FieldPath, Value)>, CoreError> {
        let status = self
            .inner
            .api
            .fetch_status(self.inner.tokens.as_ref(), serial)
            .await?;
        let zones = self
            .read_units()
            .get(serial)
            .map(|unit| unit.zones.clone())
            .unwrap_or_default();
        Ok(decode::status_changes(&status, &zones))
    }

    async fn fetch_event_changes(&self, serial: &str) -> Result<Vec<(FieldPath, Value)>, CoreError> {
        let cursor = self
            .read_units()
            .get(serial)
            .and_then(|unit| unit.event_cursor.clone());
        let page = self
            .inner
            .api
            .fetch_events(self.inner.tokens.as_ref(), serial, cursor.as_deref())
            .await?;

        let mut changes = Vec::new();
        for event in page.events.iter().filter(|event| event.is_status_change()) {
            for (path, value) in &event.data {
                match path.parse::<FieldPath>() {
                    Ok(parsed) => changes.push((parsed, value.clone())),
                    Err(e) => trace!(unit = serial, error = %e, "skipping event field"),
                }
            }
        }
        if let Some(next) = page.next_cursor {
            if let Some(unit) = self.write_units().get_mut(serial) {
                unit.event_cursor = Some(next);
            }
        }
        debug!(unit = serial, events = page.events.len(), changes = changes.len(), "read event feed");
        Ok(changes)
    }

    fn apply_changes(&self, serial: &str, changes: &[(FieldPath, Value)]) {
        {
            let mut units = self.write_units();
            let Some(unit) = units.get_mut(serial) else {
                return;
            };
            for (path, value) in changes {
                unit.apply(path, value);
            }
            unit.state.last_updated = Some(self.inner.clock.now());
        }

        for (path, value) in changes {
            self.inner
                .coordinator
                .on_confirming_event(serial, &path.to_string(), value);
        }

        if self.inner.coordinator.is_suppressed(serial) {
            debug!(unit = serial, "unit suppressed, skipping publish");
            return;
        }
        let units = self.read_units();
        if let Some(unit) = units.get(serial) {
            self.inner.publisher.publish_unit(unit);
        }
    }
}
