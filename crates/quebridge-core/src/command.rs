// ── Command API ──
//
// Every user-issued mutation is a `Command`. `Command::field_sets` turns it
// into one or more wire field maps against the current unit snapshot; the
// session queues one `QueuedCommand` per map.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::{ClimateMode, DeviceUnit, FanMode, FanSpeed, MAX_ZONES, SetpointKind};

const COOL_SETPOINT: &str = "TemperatureSetpoint_Cool_oC";
const HEAT_SETPOINT: &str = "TemperatureSetpoint_Heat_oC";
const MASTER_PREFIX: &str = "UserAirconSettings";
const CONTROL_ALL_ZONES: &str = "MasterInfo.ControlAllZones";

/// A settings change for one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    SetMode {
        mode: ClimateMode,
    },
    SetFanMode {
        speed: FanSpeed,
    },
    SetConstantFan {
        on: bool,
    },
    /// Zone 0 is the master setpoint; zones 1..=8 are individual zones.
    SetTemperature {
        #[serde(default)]
        zone: usize,
        temperature: f64,
        #[serde(default)]
        kind: SetpointKind,
    },
    SetZone {
        zone: usize,
        on: bool,
    },
    SetControlAllZones {
        on: bool,
    },
    SetAwayMode {
        on: bool,
    },
    SetQuietMode {
        on: bool,
    },
}

impl Command {
    /// Wire field maps for this command, in enqueue order. Empty when the
    /// command is a no-op in the unit's current mode.
    pub fn field_sets(&self, unit: &DeviceUnit) -> Result<Vec<IndexMap<String, Value>>, CoreError> {
        let single = |path: &str, value: Value| {
            let mut fields = IndexMap::with_capacity(1);
            fields.insert(path.to_owned(), value);
            vec![fields]
        };

        Ok(match self {
            Self::SetMode { mode } => {
                let mut fields = IndexMap::with_capacity(2);
                match mode.wire() {
                    None => {
                        fields.insert("UserAirconSettings.isOn".into(), json!(false));
                    }
                    Some(wire) => {
                        fields.insert("UserAirconSettings.isOn".into(), json!(true));
                        fields.insert("UserAirconSettings.Mode".into(), json!(wire));
                    }
                }
                vec![fields]
            }
            Self::SetFanMode { speed } => {
                let fan = FanMode::new(*speed, unit.state.constant_fan());
                single("UserAirconSettings.FanMode", json!(fan.to_string()))
            }
            Self::SetConstantFan { on } => {
                let fan = FanMode::new(unit.state.fan().speed, *on);
                single("UserAirconSettings.FanMode", json!(fan.to_string()))
            }
            Self::SetTemperature {
                zone,
                temperature,
                kind,
            } => return temperature_field_sets(unit, *zone, *temperature, *kind),
            Self::SetZone { zone, on } => {
                let index = zone_index(unit, *zone)?;
                single(
                    &format!("UserAirconSettings.EnabledZones[{index}]"),
                    json!(on),
                )
            }
            Self::SetControlAllZones { on } => single(CONTROL_ALL_ZONES, json!(on)),
            Self::SetAwayMode { on } => single("UserAirconSettings.AwayMode", json!(on)),
            Self::SetQuietMode { on } => single("UserAirconSettings.QuietMode", json!(on)),
        })
    }
}

fn temperature_field_sets(
    unit: &DeviceUnit,
    zone: usize,
    temperature: f64,
    kind: SetpointKind,
) -> Result<Vec<IndexMap<String, Value>>, CoreError> {
    if !temperature.is_finite() {
        return Err(CoreError::InvalidCommand {
            message: format!("temperature {temperature} is not a number"),
        });
    }
    let prefix = if zone == 0 {
        MASTER_PREFIX.to_owned()
    } else {
        format!("RemoteZoneInfo[{}]", zone_index(unit, zone)?)
    };

    let targets: &[&str] = match kind {
        SetpointKind::High => &[COOL_SETPOINT],
        SetpointKind::Low => &[HEAT_SETPOINT],
        // Follows the unit's mode setting, not its power state.
        SetpointKind::Default => match ClimateMode::from_wire(&unit.state.mode) {
            Some(ClimateMode::Cool) => &[COOL_SETPOINT],
            Some(ClimateMode::Heat) => &[HEAT_SETPOINT],
            Some(ClimateMode::Auto) => &[HEAT_SETPOINT, COOL_SETPOINT],
            _ => return Ok(Vec::new()),
        },
    };

    let fields = targets
        .iter()
        .map(|field| (format!("{prefix}.{field}"), json!(temperature)))
        .collect();
    let mut sets = vec![fields];

    if zone == 0 && !unit.state.control_all_zones {
        let mut caz = IndexMap::with_capacity(1);
        caz.insert(CONTROL_ALL_ZONES.to_owned(), json!(true));
        sets.push(caz);
    }
    Ok(sets)
}

/// 0-based wire index for a 1-based zone number, validated against the
/// unit's known topology.
fn zone_index(unit: &DeviceUnit, zone: usize) -> Result<usize, CoreError> {
    if zone == 0 || zone > MAX_ZONES {
        return Err(CoreError::InvalidCommand {
            message: format!("zone {zone} out of range 1..={MAX_ZONES}"),
        });
    }
    if unit.zones_known() && !unit.zones.get(&zone).is_some_and(|z| z.exists) {
        return Err(CoreError::InvalidCommand {
            message: format!("unit {} has no zone {zone}", unit.serial),
        });
    }
    Ok(zone - 1)
}

// ── Failure notifications ───────────────────────────────────────────

/// Why a queued command never reached the cloud.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    Expired,
    QueueFull,
    Dispatch(String),
    Serialization(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expired => f.write_str("expired before dispatch"),
            Self::QueueFull => f.write_str("dropped, command queue full"),
            Self::Dispatch(detail) => write!(f, "dispatch failed: {detail}"),
            Self::Serialization(detail) => write!(f, "payload could not be serialized: {detail}"),
        }
    }
}

/// Sent on the session's failure channel for every command that fails.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandFailure {
    pub command_id: Uuid,
    pub original_id: Uuid,
    pub unit: String,
    #[serde(flatten)]
    pub reason: FailureReason,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::Zone;

    fn unit(mode: &str, fan: &str, control_all_zones: bool) -> DeviceUnit {
        let mut unit = DeviceUnit::new("S1", "Home");
        unit.state.power = true;
        unit.state.mode = mode.into();
        unit.state.fan_mode = fan.into();
        unit.state.control_all_zones = control_all_zones;
        unit.zones.insert(
            2,
            Zone {
                number: 2,
                exists: true,
                ..Zone::default()
            },
        );
        unit
    }

    fn keys(sets: &[IndexMap<String, Value>]) -> Vec<Vec<&str>> {
        sets.iter()
            .map(|set| set.keys().map(String::as_str).collect())
            .collect()
    }

    #[test]
    fn mode_off_only_powers_down() {
        let sets = Command::SetMode {
            mode: ClimateMode::Off,
        }
        .field_sets(&unit("COOL", "AUTO", true))
        .unwrap();
        assert_eq!(sets[0]["UserAirconSettings.isOn"], json!(false));
        assert_eq!(sets[0].len(), 1);
    }

    #[test]
    fn fan_changes_preserve_the_other_half() {
        let current = unit("COOL", "LOW+CONT", true);
        let speed = Command::SetFanMode {
            speed: FanSpeed::High,
        }
        .field_sets(&current)
        .unwrap();
        assert_eq!(speed[0]["UserAirconSettings.FanMode"], json!("HIGH+CONT"));

        let constant = Command::SetConstantFan { on: false }
            .field_sets(&current)
            .unwrap();
        assert_eq!(constant[0]["UserAirconSettings.FanMode"], json!("LOW"));
    }

    #[test]
    fn default_setpoint_follows_mode() {
        let set = |mode: &str| {
            Command::SetTemperature {
                zone: 0,
                temperature: 22.5,
                kind: SetpointKind::Default,
            }
            .field_sets(&unit(mode, "AUTO", true))
            .unwrap()
        };

        assert_eq!(
            keys(&set("COOL")),
            vec![vec!["UserAirconSettings.TemperatureSetpoint_Cool_oC"]]
        );
        assert_eq!(
            keys(&set("AUTO")),
            vec![vec![
                "UserAirconSettings.TemperatureSetpoint_Heat_oC",
                "UserAirconSettings.TemperatureSetpoint_Cool_oC",
            ]]
        );
        assert!(set("FAN").is_empty());
        assert!(set("OFF").is_empty());
    }

    #[test]
    fn master_setpoint_enables_control_all_zones() {
        let sets = Command::SetTemperature {
            zone: 0,
            temperature: 21.0,
            kind: SetpointKind::Low,
        }
        .field_sets(&unit("HEAT", "AUTO", false))
        .unwrap();
        assert_eq!(
            keys(&sets),
            vec![
                vec!["UserAirconSettings.TemperatureSetpoint_Heat_oC"],
                vec!["MasterInfo.ControlAllZones"],
            ]
        );
    }

    #[test]
    fn zone_commands_use_wire_indexes() {
        let sets = Command::SetZone { zone: 2, on: true }
            .field_sets(&unit("COOL", "AUTO", true))
            .unwrap();
        assert_eq!(keys(&sets), vec![vec!["UserAirconSettings.EnabledZones[1]"]]);

        let zone_setpoint = Command::SetTemperature {
            zone: 2,
            temperature: 24.0,
            kind: SetpointKind::High,
        }
        .field_sets(&unit("COOL", "AUTO", false))
        .unwrap();
        assert_eq!(
            keys(&zone_setpoint),
            vec![vec!["RemoteZoneInfo[1].TemperatureSetpoint_Cool_oC"]]
        );
    }

    #[test]
    fn rejects_unknown_zones() {
        let current = unit("COOL", "AUTO", true);
        for zone in [0, 1, 9] {
            assert!(
                Command::SetZone { zone, on: true }
                    .field_sets(&current)
                    .is_err()
            );
        }
    }

    #[test]
    fn commands_deserialize_from_json() {
        let command: Command =
            serde_json::from_str(r#"{"action":"set_temperature","temperature":22,"kind":"high"}"#)
                .unwrap();
        assert_eq!(
            command,
            Command::SetTemperature {
                zone: 0,
                temperature: 22.0,
                kind: SetpointKind::High
            }
        );
    }
}
