// Wire types for the cloud API.
//
// Only the envelope shapes are typed; unit status bodies stay as
// `serde_json::Value` because their schema varies by model and firmware.

use std::collections::HashMap;

use indexmap::IndexMap;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Default bearer lifetime when the service omits or garbles `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

// ── Authentication ──────────────────────────────────────────────────

/// Account credentials plus the per-installation identity sent when pairing.
#[derive(Debug, Clone)]
pub struct PairingRequest {
    pub username: String,
    pub password: SecretString,
    pub device_name: String,
    pub device_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PairingResponse {
    pub pairing_token: Option<String>,
}

/// Result of exchanging a pairing token for a bearer token.
#[derive(Debug, Clone)]
pub struct BearerGrant {
    pub access_token: SecretString,
    pub expires_in_secs: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BearerResponse {
    pub access_token: Option<String>,
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub expires_in: Option<u64>,
}

/// `expires_in` arrives as a number or a numeric string depending on the
/// service version. Anything else decodes as absent.
fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

// ── Units ───────────────────────────────────────────────────────────

/// One air-conditioning system registered to the account.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UnitSummary {
    pub serial: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub kind: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UnitList {
    #[serde(rename = "_embedded", default)]
    pub embedded: UnitListEmbedded,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct UnitListEmbedded {
    #[serde(rename = "ac-system", default)]
    pub systems: Vec<UnitSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StatusResponse {
    #[serde(default)]
    pub last_known_state: Value,
}

// ── Events ──────────────────────────────────────────────────────────

/// One page of the incremental event feed.
#[derive(Debug, Clone, Default)]
pub struct EventPage {
    /// Events oldest first.
    pub events: Vec<UnitEvent>,
    /// Relative path of the next page, when the service supplied one.
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UnitEvent {
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Field path to new value, for `status-change-broadcast` events.
    #[serde(default)]
    pub data: IndexMap<String, Value>,
}

impl UnitEvent {
    pub const STATUS_CHANGE: &'static str = "status-change-broadcast";

    pub fn is_status_change(&self) -> bool {
        self.kind == Self::STATUS_CHANGE
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventFeed {
    #[serde(rename = "_links", default)]
    pub links: HashMap<String, Link>,
    #[serde(default)]
    pub events: Vec<UnitEvent>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Link {
    pub href: Option<String>,
}

// ── Commands ────────────────────────────────────────────────────────

/// `{"command": {...fields, "type": "set-settings"}}`
#[derive(Debug, Serialize)]
pub(crate) struct CommandEnvelope<'a> {
    pub command: CommandBody<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct CommandBody<'a> {
    #[serde(flatten)]
    pub fields: &'a IndexMap<String, Value>,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expires_in_accepts_number_or_string() {
        let numeric: BearerResponse =
            serde_json::from_value(json!({"access_token": "a", "expires_in": 1800})).unwrap();
        assert_eq!(numeric.expires_in, Some(1800));

        let text: BearerResponse =
            serde_json::from_value(json!({"access_token": "a", "expires_in": "900"})).unwrap();
        assert_eq!(text.expires_in, Some(900));

        let junk: BearerResponse =
            serde_json::from_value(json!({"access_token": "a", "expires_in": "soon"})).unwrap();
        assert_eq!(junk.expires_in, None);
    }

    #[test]
    fn command_body_appends_type_after_fields() {
        let mut fields = IndexMap::new();
        fields.insert("UserAirconSettings.AwayMode".to_string(), json!(true));
        let envelope = CommandEnvelope {
            command: CommandBody {
                fields: &fields,
                kind: "set-settings",
            },
        };
        let body = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            body,
            json!({"command": {"UserAirconSettings.AwayMode": true, "type": "set-settings"}})
        );
    }
}
