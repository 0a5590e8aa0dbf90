// Cloud API HTTP client
//
// Wraps `ResilientTransport` with URL construction and envelope decoding
// for the pairing, bearer, unit, status, event, and command endpoints.

use async_trait::async_trait;
use indexmap::IndexMap;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::auth::TokenSource;
use crate::cloud::CloudApi;
use crate::error::Error;
use crate::models::{
    BearerGrant, BearerResponse, CommandBody, CommandEnvelope, DEFAULT_EXPIRES_IN_SECS, EventFeed,
    EventPage, PairingRequest, PairingResponse, StatusResponse, UnitList, UnitSummary,
};
use crate::transport::{ResilientTransport, TransportConfig};

/// Production cloud endpoint.
pub const DEFAULT_BASE_URL: &str = "https://que.actronair.com.au/";

const PAIRING_PATH: &str = "api/v0/client/user-devices";
const TOKEN_PATH: &str = "api/v0/oauth/token";
const UNITS_PATH: &str = "api/v0/client/ac-systems?includeAcms=true&includeNeo=true";
const STATUS_PATH: &str = "api/v0/client/ac-systems/status/latest";
const EVENTS_PATH: &str = "api/v0/client/ac-systems/events/latest";
const COMMAND_PATH: &str = "api/v0/client/ac-systems/cmds/send";
const NEWER_EVENTS_LINK: &str = "ac-newer-events";
const CLIENT_KIND: &str = "ios";
const OAUTH_CLIENT_ID: &str = "app";
const COMMAND_TYPE: &str = "set-settings";

/// HTTP client for the cloud air-conditioner API.
#[derive(Debug)]
pub struct CloudClient {
    transport: ResilientTransport,
    base_url: Url,
}

impl CloudClient {
    /// Create a client from a `TransportConfig`. The base URL must end with
    /// `/` so relative endpoint paths join beneath it.
    pub fn new(base_url: &str, transport: TransportConfig) -> Result<Self, Error> {
        let base_url = normalize_base(base_url)?;
        let transport = ResilientTransport::new(transport)?;
        Ok(Self {
            transport,
            base_url,
        })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn from_reqwest(
        base_url: &str,
        http: reqwest::Client,
        transport: TransportConfig,
    ) -> Result<Self, Error> {
        Ok(Self {
            transport: ResilientTransport::with_client(http, transport),
            base_url: normalize_base(base_url)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn transport(&self) -> &ResilientTransport {
        &self.transport
    }

    // ── URL builders ─────────────────────────────────────────────────

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    fn serial_url(&self, path: &str, serial: &str) -> Result<Url, Error> {
        let mut url = self.url(path)?;
        url.query_pairs_mut().append_pair("serial", serial);
        Ok(url)
    }
}

fn normalize_base(base_url: &str) -> Result<Url, Error> {
    let mut base = base_url.to_owned();
    if !base.ends_with('/') {
        base.push('/');
    }
    Ok(Url::parse(&base)?)
}

#[async_trait]
impl CloudApi for CloudClient {
    async fn exchange_pairing(&self, request: &PairingRequest) -> Result<SecretString, Error> {
        let url = self.url(PAIRING_PATH)?;
        debug!("POST {}", url);

        let form = [
            ("username", request.username.as_str()),
            ("password", request.password.expose_secret()),
            ("deviceName", request.device_name.as_str()),
            ("client", CLIENT_KIND),
            ("deviceUniqueIdentifier", request.device_id.as_str()),
        ];
        let resp: PairingResponse = self
            .transport
            .send_json(|http| http.post(url.clone()).form(&form), None)
            .await?;

        resp.pairing_token
            .filter(|t| !t.is_empty())
            .map(SecretString::from)
            .ok_or_else(|| Error::Deserialization {
                message: "pairingToken missing from response".into(),
                body: String::new(),
            })
    }

    async fn exchange_bearer(&self, pairing_token: &SecretString) -> Result<BearerGrant, Error> {
        let url = self.url(TOKEN_PATH)?;
        debug!("POST {}", url);

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", pairing_token.expose_secret()),
            ("client_id", OAUTH_CLIENT_ID),
        ];
        let resp: BearerResponse = self
            .transport
            .send_json(|http| http.post(url.clone()).form(&form), None)
            .await?;

        let access_token = resp
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Deserialization {
                message: "access_token missing from response".into(),
                body: String::new(),
            })?;
        let expires_in_secs = resp.expires_in.unwrap_or_else(|| {
            warn!(
                fallback_secs = DEFAULT_EXPIRES_IN_SECS,
                "expires_in missing or unparseable, using fallback"
            );
            DEFAULT_EXPIRES_IN_SECS
        });

        Ok(BearerGrant {
            access_token: SecretString::from(access_token),
            expires_in_secs,
        })
    }

    async fn list_units(&self, auth: &dyn TokenSource) -> Result<Vec<UnitSummary>, Error> {
        let url = self.url(UNITS_PATH)?;
        debug!("GET {}", url);

        let list: UnitList = self
            .transport
            .send_json(|http| http.get(url.clone()), Some(auth))
            .await?;
        Ok(list.embedded.systems)
    }

    async fn fetch_status(&self, auth: &dyn TokenSource, serial: &str) -> Result<Value, Error> {
        let url = self.serial_url(STATUS_PATH, serial)?;
        debug!("GET {}", url);

        let status: StatusResponse = self
            .transport
            .send_json(|http| http.get(url.clone()), Some(auth))
            .await?;
        Ok(status.last_known_state)
    }

    async fn fetch_events(
        &self,
        auth: &dyn TokenSource,
        serial: &str,
        cursor: Option<&str>,
    ) -> Result<EventPage, Error> {
        let url = match cursor {
            Some(cursor) => self.url(cursor)?,
            None => self.serial_url(EVENTS_PATH, serial)?,
        };
        debug!("GET {}", url);

        let feed: EventFeed = self
            .transport
            .send_json(|http| http.get(url.clone()), Some(auth))
            .await?;

        let next_cursor = feed
            .links
            .get(NEWER_EVENTS_LINK)
            .and_then(|link| link.href.as_deref())
            .map(|href| href.trim_start_matches('/').to_owned())
            .filter(|href| !href.is_empty());

        // The feed lists newest first.
        let mut events = feed.events;
        events.reverse();

        Ok(EventPage {
            events,
            next_cursor,
        })
    }

    async fn send_command(
        &self,
        auth: &dyn TokenSource,
        serial: &str,
        fields: &IndexMap<String, Value>,
    ) -> Result<(), Error> {
        let url = self.serial_url(COMMAND_PATH, serial)?;
        debug!("POST {}", url);

        let envelope = CommandEnvelope {
            command: CommandBody {
                fields,
                kind: COMMAND_TYPE,
            },
        };
        self.transport
            .send(|http| http.post(url.clone()).json(&envelope), Some(auth))
            .await?;
        Ok(())
    }
}
