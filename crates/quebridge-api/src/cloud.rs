use async_trait::async_trait;
use indexmap::IndexMap;
use secrecy::SecretString;
use serde_json::Value;

use crate::auth::TokenSource;
use crate::error::Error;
use crate::models::{BearerGrant, EventPage, PairingRequest, UnitSummary};

/// The cloud operations the session engine depends on.
///
/// [`CloudClient`](crate::CloudClient) is the HTTP implementation; tests
/// substitute in-memory fakes. Authorized operations take a token source so
/// the implementation can attach bearers and refresh on 401.
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Exchange account credentials for a long-lived pairing token.
    async fn exchange_pairing(&self, request: &PairingRequest) -> Result<SecretString, Error>;

    /// Exchange a pairing token for a short-lived bearer token.
    async fn exchange_bearer(&self, pairing_token: &SecretString) -> Result<BearerGrant, Error>;

    /// List the units registered to the account.
    async fn list_units(&self, auth: &dyn TokenSource) -> Result<Vec<UnitSummary>, Error>;

    /// Fetch the full last-known state document for one unit.
    async fn fetch_status(&self, auth: &dyn TokenSource, serial: &str) -> Result<Value, Error>;

    /// Fetch one page of the incremental event feed. `cursor` is the
    /// `next_cursor` of the previous page, or `None` to start from latest.
    async fn fetch_events(
        &self,
        auth: &dyn TokenSource,
        serial: &str,
        cursor: Option<&str>,
    ) -> Result<EventPage, Error>;

    /// Post a settings mutation.
    async fn send_command(
        &self,
        auth: &dyn TokenSource,
        serial: &str,
        fields: &IndexMap<String, Value>,
    ) -> Result<(), Error>;
}
