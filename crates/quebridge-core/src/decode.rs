// ── Status document decoding ──
//
// A full status document is flattened into the same `(path, value)` field
// changes the event feed delivers, so both sources go through one apply and
// confirmation path.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::field_path::FieldPath;
use crate::model::unit::as_bool;
use crate::model::{MAX_ZONES, Sensor, Zone};

/// Unindexed fields read from every status document.
const GLOBAL_FIELDS: &[&str] = &[
    "LiveAircon.CompressorMode",
    "LiveAircon.CompressorCapacity",
    "LiveAircon.OutdoorUnit.CompPower",
    "LiveAircon.CoilInlet",
    "LiveAircon.FanPWM",
    "LiveAircon.FanRPM",
    "UserAirconSettings.isOn",
    "UserAirconSettings.Mode",
    "UserAirconSettings.FanMode",
    "UserAirconSettings.AwayMode",
    "UserAirconSettings.QuietMode",
    "UserAirconSettings.TemperatureSetpoint_Cool_oC",
    "UserAirconSettings.TemperatureSetpoint_Heat_oC",
    "MasterInfo.ControlAllZones",
    "MasterInfo.LiveTemp_oC",
    "MasterInfo.LiveOutdoorTemp_oC",
    "MasterInfo.LiveHumidity_pc",
    "Alerts.CleanFilter",
    "ACStats.NV_FanRunTime_10m",
];

const ZONE_FIELDS: &[&str] = &[
    "LiveTemp_oC",
    "TemperatureSetpoint_Cool_oC",
    "TemperatureSetpoint_Heat_oC",
    "ZonePosition",
];

/// Follow a dotted path through nested objects.
fn lookup<'a>(state: &'a Value, dotted: &str) -> Option<&'a Value> {
    dotted
        .split('.')
        .try_fold(state, |node, segment| node.get(segment))
        .filter(|v| !v.is_null())
}

/// Flatten a status document into field changes for the given zones.
pub fn status_changes(state: &Value, zones: &BTreeMap<usize, Zone>) -> Vec<(FieldPath, Value)> {
    let mut changes = Vec::with_capacity(GLOBAL_FIELDS.len() + zones.len() * 8);

    for name in GLOBAL_FIELDS {
        match lookup(state, name) {
            Some(value) => changes.push((FieldPath::global(*name), value.clone())),
            None => debug!(field = name, "status field missing"),
        }
    }

    let enabled = lookup(state, "UserAirconSettings.EnabledZones").and_then(Value::as_array);
    let zone_info = state.get("RemoteZoneInfo").and_then(Value::as_array);

    for zone in zones.values().filter(|z| z.exists) {
        let index = zone.wire_index();
        if let Some(flag) = enabled.and_then(|flags| flags.get(index)) {
            changes.push((FieldPath::ZoneEnabled(index), flag.clone()));
        }
        let Some(info) = zone_info.and_then(|zones| zones.get(index)) else {
            continue;
        };
        for field in ZONE_FIELDS {
            if let Some(value) = info.get(*field).filter(|v| !v.is_null()) {
                changes.push((FieldPath::zone_field(index, *field), value.clone()));
            }
        }
        for sensor in zone.sensors.keys() {
            if let Some(value) = info
                .get("RemoteTemperatures_oC")
                .and_then(|temps| temps.get(sensor))
                .filter(|v| !v.is_null())
            {
                changes.push((
                    FieldPath::SensorTemperature {
                        zone: index,
                        sensor: sensor.clone(),
                    },
                    value.clone(),
                ));
            }
            if let Some(value) = info
                .get("Sensors")
                .and_then(|sensors| sensors.get(sensor))
                .and_then(|s| s.get("Battery_pc"))
                .filter(|v| !v.is_null())
            {
                changes.push((
                    FieldPath::SensorField {
                        zone: index,
                        sensor: sensor.clone(),
                        field: "Battery_pc".into(),
                    },
                    value.clone(),
                ));
            }
        }
    }
    changes
}

/// Zone topology from `RemoteZoneInfo`. Every reported slot becomes a zone;
/// only slots with `NV_Exists` are marked as existing.
pub fn zone_topology(state: &Value) -> BTreeMap<usize, Zone> {
    let Some(slots) = state.get("RemoteZoneInfo").and_then(Value::as_array) else {
        return BTreeMap::new();
    };

    slots
        .iter()
        .take(MAX_ZONES)
        .enumerate()
        .map(|(index, info)| {
            let number = index + 1;
            let exists = info.get("NV_Exists").and_then(as_bool).unwrap_or(false);
            if !exists {
                return (
                    number,
                    Zone {
                        number,
                        ..Zone::default()
                    },
                );
            }

            let name = info
                .get("NV_Title")
                .and_then(Value::as_str)
                .filter(|title| !title.trim().is_empty())
                .map_or_else(|| format!("Zone {number}"), str::to_owned);
            let sensors: IndexMap<String, Sensor> = info
                .get("Sensors")
                .and_then(Value::as_object)
                .map(|sensors| {
                    sensors
                        .keys()
                        .map(|id| {
                            (
                                id.clone(),
                                Sensor {
                                    id: id.clone(),
                                    ..Sensor::default()
                                },
                            )
                        })
                        .collect()
                })
                .unwrap_or_default();
            debug!(zone = number, %name, sensors = sensors.len(), "discovered zone");

            (
                number,
                Zone {
                    number,
                    name,
                    exists,
                    sensors,
                    ..Zone::default()
                },
            )
        })
        .collect()
}
