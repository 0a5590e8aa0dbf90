// ── Token lifecycle ──
//
// Pairing token (long-lived, bound to a device identifier and account) and
// bearer token (short-lived, derived from the pairing token). Bearer reads
// are lock-free through `ArcSwapOption`; exchanges are single-flight behind
// an async gate with a generation counter so callers that queued behind a
// refresh reuse its result instead of exchanging again.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quebridge_api::{CloudApi, PairingRequest, TokenSource};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{self, Clock};
use crate::config::AccountCredentials;
use crate::error::CoreError;
use crate::store::{CredentialKey, CredentialStore};

const DEVICE_ID_DIGITS: u32 = 25;

/// A cached bearer token.
#[derive(Debug, Clone)]
pub struct BearerToken {
    pub value: SecretString,
    pub expires_at: DateTime<Utc>,
}

impl BearerToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedBearer {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Coarse lifecycle position, for logging and status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TokenState {
    Unpaired,
    Paired,
    Authorized,
    Expiring,
}

/// Knobs the token manager needs from `SessionConfig`.
#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub account: AccountCredentials,
    pub device_name: String,
    pub bearer_failure_max: u32,
    pub refresh_margin: Duration,
}

pub struct TokenManager {
    api: Arc<dyn CloudApi>,
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    settings: TokenSettings,
    device_id: RwLock<Option<String>>,
    pairing: RwLock<Option<SecretString>>,
    bearer: ArcSwapOption<BearerToken>,
    refresh_gate: Mutex<()>,
    generation: AtomicU64,
    bearer_failures: AtomicU32,
}

impl TokenManager {
    pub fn new(
        api: Arc<dyn CloudApi>,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
        settings: TokenSettings,
    ) -> Self {
        Self {
            api,
            store,
            clock,
            settings,
            device_id: RwLock::new(None),
            pairing: RwLock::new(None),
            bearer: ArcSwapOption::empty(),
            refresh_gate: Mutex::new(()),
            generation: AtomicU64::new(0),
            bearer_failures: AtomicU32::new(0),
        }
    }

    // ── Startup restore ──────────────────────────────────────────────

    /// Load persisted credentials.
    ///
    /// The stored device identifier is `"<account>,<id>"`. When it belongs
    /// to a different account it is discarded together with the pairing
    /// token, which was issued to that account.
    pub fn restore(&self) {
        let stored = self.read_persisted(CredentialKey::DeviceId);
        let device_id = stored.and_then(|record| {
            let (account, id) = record.split_once(',')?;
            if account == self.settings.account.username && !id.is_empty() {
                Some(id.to_owned())
            } else {
                info!("stored device identifier belongs to another account, discarding");
                None
            }
        });

        if device_id.is_some() {
            if let Some(pairing) = self.read_persisted(CredentialKey::PairingToken) {
                debug!("restored pairing token");
                *write(&self.pairing) = Some(SecretString::from(pairing));
            }
        }
        *write(&self.device_id) = device_id;

        if let Some(record) = self.read_persisted(CredentialKey::BearerToken) {
            match serde_json::from_str::<PersistedBearer>(&record) {
                Ok(persisted) => {
                    debug!(expires_at = %persisted.expires_at, "restored bearer token");
                    self.bearer.store(Some(Arc::new(BearerToken {
                        value: SecretString::from(persisted.token),
                        expires_at: persisted.expires_at,
                    })));
                }
                Err(e) => warn!(error = %e, "ignoring unreadable bearer token record"),
            }
        }
    }

    // ── State queries ────────────────────────────────────────────────

    pub fn is_paired(&self) -> bool {
        read(&self.pairing).is_some()
    }

    pub fn is_token_valid(&self) -> bool {
        self.valid_bearer().is_some()
    }

    /// A valid bearer that expires within the refresh margin.
    pub fn expiring_soon(&self) -> bool {
        let margin_edge = clock::after(self.clock.now(), self.settings.refresh_margin);
        self.valid_bearer()
            .is_some_and(|token| token.expires_at <= margin_edge)
    }

    pub fn state(&self) -> TokenState {
        if !self.is_paired() {
            TokenState::Unpaired
        } else if !self.is_token_valid() {
            TokenState::Paired
        } else if self.expiring_soon() {
            TokenState::Expiring
        } else {
            TokenState::Authorized
        }
    }

    pub fn device_id(&self) -> Option<String> {
        read(&self.device_id).clone()
    }

    fn valid_bearer(&self) -> Option<Arc<BearerToken>> {
        let now = self.clock.now();
        self.bearer
            .load_full()
            .filter(|token| token.is_valid_at(now))
    }

    // ── Pairing ──────────────────────────────────────────────────────

    /// Exchange account credentials for a pairing token. A no-op when a
    /// pairing token is already held. No internal retry.
    pub async fn pair(&self) -> Result<(), CoreError> {
        if self.is_paired() {
            return Ok(());
        }

        let device_id = self.ensure_device_id();
        info!(device_id = %device_id, "pairing with cloud service");

        let request = PairingRequest {
            username: self.settings.account.username.clone(),
            password: self.settings.account.password.clone(),
            device_name: self.settings.device_name.clone(),
            device_id,
        };
        let pairing = self.api.exchange_pairing(&request).await.map_err(|e| {
            warn!(error = %e, "pairing failed");
            match e {
                quebridge_api::Error::Unauthorized | quebridge_api::Error::BadRequest { .. } => {
                    CoreError::AuthCredentialInvalid {
                        message: e.to_string(),
                    }
                }
                other => other.into(),
            }
        })?;

        self.persist(CredentialKey::PairingToken, Some(pairing.expose_secret()));
        *write(&self.pairing) = Some(pairing);
        self.bearer_failures.store(0, Ordering::SeqCst);
        info!("paired");
        Ok(())
    }

    fn ensure_device_id(&self) -> String {
        if let Some(id) = read(&self.device_id).clone() {
            return id;
        }
        let id = generate_device_id();
        self.persist(
            CredentialKey::DeviceId,
            Some(&format!("{},{id}", self.settings.account.username)),
        );
        *write(&self.device_id) = Some(id.clone());
        id
    }

    // ── Bearer tokens ────────────────────────────────────────────────

    /// The cached bearer if still valid, otherwise a single-flight exchange.
    pub async fn get_token(&self) -> Result<SecretString, CoreError> {
        if let Some(token) = self.valid_bearer() {
            return Ok(token.value.clone());
        }
        self.refresh(false).await
    }

    /// Exchange for a new bearer regardless of the cached one.
    pub async fn force_refresh(&self) -> Result<SecretString, CoreError> {
        self.refresh(true).await
    }

    /// Drop the cached bearer. The pairing token is kept.
    pub fn invalidate(&self) {
        debug!("bearer token invalidated");
        self.bearer.store(None);
    }

    async fn refresh(&self, forced: bool) -> Result<SecretString, CoreError> {
        let seen = self.generation.load(Ordering::SeqCst);
        let _gate = self.refresh_gate.lock().await;

        if self.generation.load(Ordering::SeqCst) != seen {
            // Another caller finished an exchange while we waited.
            return self
                .valid_bearer()
                .map(|token| token.value.clone())
                .ok_or(CoreError::AuthExpired);
        }
        if !forced {
            if let Some(token) = self.valid_bearer() {
                return Ok(token.value.clone());
            }
        }

        let result = self.exchange_bearer().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn exchange_bearer(&self) -> Result<SecretString, CoreError> {
        let Some(pairing) = read(&self.pairing).clone() else {
            return Err(CoreError::AuthCredentialInvalid {
                message: "not paired".into(),
            });
        };

        debug!("exchanging pairing token for bearer token");
        match self.api.exchange_bearer(&pairing).await {
            Ok(grant) => {
                self.bearer_failures.store(0, Ordering::SeqCst);
                let token = BearerToken {
                    value: grant.access_token,
                    expires_at: clock::after(
                        self.clock.now(),
                        Duration::from_secs(grant.expires_in_secs),
                    ),
                };
                let record = serde_json::to_string(&PersistedBearer {
                    token: token.value.expose_secret().to_owned(),
                    expires_at: token.expires_at,
                });
                match record {
                    Ok(record) => self.persist(CredentialKey::BearerToken, Some(&record)),
                    Err(e) => warn!(error = %e, "unable to encode bearer token record"),
                }
                info!(expires_at = %token.expires_at, "bearer token refreshed");
                let value = token.value.clone();
                self.bearer.store(Some(Arc::new(token)));
                Ok(value)
            }
            Err(quebridge_api::Error::Unauthorized) => {
                warn!("pairing token rejected, re-pairing required");
                self.clear_pairing();
                Err(CoreError::AuthCredentialInvalid {
                    message: "pairing token rejected".into(),
                })
            }
            Err(quebridge_api::Error::BadRequest { message }) => {
                let failures = self.bearer_failures.fetch_add(1, Ordering::SeqCst) + 1;
                let max = self.settings.bearer_failure_max;
                if failures >= max {
                    warn!(failures, max, "bearer exchange failed too often, clearing pairing token");
                    self.clear_pairing();
                } else {
                    warn!(failures, max, %message, "bearer exchange rejected");
                }
                Err(CoreError::Rejected { message })
            }
            Err(e) => {
                warn!(error = %e, "bearer exchange failed");
                Err(e.into())
            }
        }
    }

    fn clear_pairing(&self) {
        *write(&self.pairing) = None;
        self.bearer_failures.store(0, Ordering::SeqCst);
        self.persist(CredentialKey::PairingToken, None);
    }

    // ── Persistence ──────────────────────────────────────────────────

    fn read_persisted(&self, key: CredentialKey) -> Option<String> {
        self.store.read(key).unwrap_or_else(|e| {
            warn!(error = %e, %key, "unable to read credential");
            None
        })
    }

    fn persist(&self, key: CredentialKey, value: Option<&str>) {
        if let Err(e) = self.store.write(key, value) {
            warn!(error = %e, %key, "unable to persist credential");
        }
    }
}

#[async_trait]
impl TokenSource for TokenManager {
    async fn bearer(&self) -> Option<SecretString> {
        self.get_token().await.ok()
    }

    async fn force_refresh(&self) -> Option<SecretString> {
        TokenManager::force_refresh(self).await.ok()
    }
}

/// A fresh 25-digit installation identifier.
pub fn generate_device_id() -> String {
    let modulus = 10u128.pow(DEVICE_ID_DIGITS);
    format!("{:025}", Uuid::new_v4().as_u128() % modulus)
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
