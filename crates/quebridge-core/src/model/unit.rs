// ── Unit domain types ──

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use tracing::trace;

use super::modes::{ClimateMode, FanMode};
use crate::field_path::FieldPath;

/// Zones a unit can report.
pub const MAX_ZONES: usize = 8;

/// Latest known values for one unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct UnitState {
    pub power: bool,
    /// Raw `UserAirconSettings.Mode`, e.g. `COOL`.
    pub mode: String,
    /// Raw `UserAirconSettings.FanMode`, e.g. `HIGH+CONT`.
    pub fan_mode: String,
    pub away_mode: bool,
    pub quiet_mode: bool,
    pub control_all_zones: bool,
    pub cool_setpoint: f64,
    pub heat_setpoint: f64,
    pub temperature: f64,
    pub outdoor_temperature: f64,
    pub humidity: f64,
    pub compressor_mode: String,
    pub compressor_capacity: f64,
    pub compressor_power: f64,
    pub coil_inlet_temperature: f64,
    pub fan_pwm: f64,
    pub fan_rpm: f64,
    pub clean_filter: bool,
    /// Fan run time since the filter was cleaned, in 10-minute units.
    pub fan_run_time_10m: f64,
    /// Unset until the first successful read; gates the first publish.
    pub last_updated: Option<DateTime<Utc>>,
}

impl UnitState {
    /// The active climate mode, with power folded in.
    pub fn climate_mode(&self) -> Option<ClimateMode> {
        if self.power {
            ClimateMode::from_wire(&self.mode)
        } else {
            Some(ClimateMode::Off)
        }
    }

    pub fn fan(&self) -> FanMode {
        self.fan_mode.parse().unwrap_or_default()
    }

    pub fn constant_fan(&self) -> bool {
        self.fan_mode.to_ascii_uppercase().contains("+CONT")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Sensor {
    pub id: String,
    pub temperature: f64,
    pub battery: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Zone {
    /// 1-based zone number.
    pub number: usize,
    pub name: String,
    pub exists: bool,
    pub enabled: bool,
    pub temperature: f64,
    pub cool_setpoint: f64,
    pub heat_setpoint: f64,
    /// Damper position in 5% steps.
    pub position: f64,
    pub sensors: IndexMap<String, Sensor>,
}

impl Zone {
    pub fn wire_index(&self) -> usize {
        self.number.saturating_sub(1)
    }
}

/// One managed air-conditioning unit.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceUnit {
    pub serial: String,
    pub name: String,
    pub state: UnitState,
    /// Keyed by 1-based zone number. Empty until topology is discovered.
    pub zones: BTreeMap<usize, Zone>,
    #[serde(skip)]
    pub discovery_published: bool,
    /// Relative path of the next event page when following the event feed.
    #[serde(skip)]
    pub event_cursor: Option<String>,
}

impl DeviceUnit {
    pub fn new(serial: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn zones_known(&self) -> bool {
        !self.zones.is_empty()
    }

    pub fn zone_by_index(&self, index: usize) -> Option<&Zone> {
        self.zones.get(&(index + 1))
    }

    fn zone_by_index_mut(&mut self, index: usize) -> Option<&mut Zone> {
        self.zones.get_mut(&(index + 1))
    }

    /// Apply one field change. Returns `false` when the path is not one this
    /// model tracks or the value has the wrong shape.
    pub fn apply(&mut self, path: &FieldPath, value: &Value) -> bool {
        let applied = match path {
            FieldPath::Global(name) => self.apply_global(name, value),
            FieldPath::ZoneEnabled(index) => {
                match (self.zone_by_index_mut(*index), as_bool(value)) {
                    (Some(zone), Some(on)) => {
                        zone.enabled = on;
                        true
                    }
                    _ => false,
                }
            }
            FieldPath::ZoneField { zone, field } => {
                let Some(zone) = self.zone_by_index_mut(*zone) else {
                    return false;
                };
                let Some(number) = as_f64(value) else {
                    return false;
                };
                match field.as_str() {
                    "LiveTemp_oC" => zone.temperature = number,
                    "TemperatureSetpoint_Cool_oC" => zone.cool_setpoint = number,
                    "TemperatureSetpoint_Heat_oC" => zone.heat_setpoint = number,
                    "ZonePosition" => zone.position = number,
                    _ => return false,
                }
                true
            }
            FieldPath::SensorField {
                zone,
                sensor,
                field,
            } => {
                let sensor = self
                    .zone_by_index_mut(*zone)
                    .and_then(|z| z.sensors.get_mut(sensor));
                match (sensor, field.as_str(), as_f64(value)) {
                    (Some(sensor), "Battery_pc", Some(battery)) => {
                        sensor.battery = battery;
                        true
                    }
                    _ => false,
                }
            }
            FieldPath::SensorTemperature { zone, sensor } => {
                let sensor = self
                    .zone_by_index_mut(*zone)
                    .and_then(|z| z.sensors.get_mut(sensor));
                match (sensor, as_f64(value)) {
                    (Some(sensor), Some(temperature)) => {
                        sensor.temperature = temperature;
                        true
                    }
                    _ => false,
                }
            }
        };
        if !applied {
            trace!(unit = %self.serial, %path, "ignored field change");
        }
        applied
    }

    fn apply_global(&mut self, name: &str, value: &Value) -> bool {
        let state = &mut self.state;
        match name {
            "UserAirconSettings.isOn" => set(&mut state.power, as_bool(value)),
            "UserAirconSettings.Mode" => set(&mut state.mode, as_text(value)),
            "UserAirconSettings.FanMode" => set(&mut state.fan_mode, as_text(value)),
            "UserAirconSettings.AwayMode" => set(&mut state.away_mode, as_bool(value)),
            "UserAirconSettings.QuietMode" => set(&mut state.quiet_mode, as_bool(value)),
            "UserAirconSettings.TemperatureSetpoint_Cool_oC" => {
                set(&mut state.cool_setpoint, as_f64(value))
            }
            "UserAirconSettings.TemperatureSetpoint_Heat_oC" => {
                set(&mut state.heat_setpoint, as_f64(value))
            }
            "MasterInfo.ControlAllZones" => set(&mut state.control_all_zones, as_bool(value)),
            "MasterInfo.LiveTemp_oC" => set(&mut state.temperature, as_f64(value)),
            "MasterInfo.LiveOutdoorTemp_oC" => set(&mut state.outdoor_temperature, as_f64(value)),
            "MasterInfo.LiveHumidity_pc" => set(&mut state.humidity, as_f64(value)),
            "LiveAircon.CompressorMode" => set(&mut state.compressor_mode, as_text(value)),
            "LiveAircon.CompressorCapacity" => set(&mut state.compressor_capacity, as_f64(value)),
            "LiveAircon.OutdoorUnit.CompPower" => set(&mut state.compressor_power, as_f64(value)),
            "LiveAircon.CoilInlet" => set(&mut state.coil_inlet_temperature, as_f64(value)),
            "LiveAircon.FanPWM" => set(&mut state.fan_pwm, as_f64(value)),
            "LiveAircon.FanRPM" => set(&mut state.fan_rpm, as_f64(value)),
            "Alerts.CleanFilter" => set(&mut state.clean_filter, as_bool(value)),
            "ACStats.NV_FanRunTime_10m" => set(&mut state.fan_run_time_10m, as_f64(value)),
            // Event feeds may carry the whole enable array at once.
            "UserAirconSettings.EnabledZones" => {
                let Some(flags) = value.as_array() else {
                    return false;
                };
                let mut any = false;
                for (index, flag) in flags.iter().enumerate() {
                    any |= self.apply(&FieldPath::ZoneEnabled(index), flag);
                }
                any
            }
            _ => false,
        }
    }
}

fn set<T>(slot: &mut T, value: Option<T>) -> bool {
    match value {
        Some(value) => {
            *slot = value;
            true
        }
        None => false,
    }
}

// ── Lenient value readers ────────────────────────────────────────────

pub(crate) fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

pub(crate) fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn unit_with_zone() -> DeviceUnit {
        let mut unit = DeviceUnit::new("S1", "Upstairs");
        let mut zone = Zone {
            number: 1,
            name: "Living".into(),
            exists: true,
            ..Zone::default()
        };
        zone.sensors.insert(
            "AB12".into(),
            Sensor {
                id: "AB12".into(),
                ..Sensor::default()
            },
        );
        unit.zones.insert(1, zone);
        unit
    }

    #[test]
    fn applies_global_and_zone_fields() {
        let mut unit = unit_with_zone();

        assert!(unit.apply(&"UserAirconSettings.isOn".parse().unwrap(), &json!(true)));
        assert!(unit.apply(&"UserAirconSettings.Mode".parse().unwrap(), &json!("COOL")));
        assert!(unit.apply(
            &"RemoteZoneInfo[0].TemperatureSetpoint_Cool_oC".parse().unwrap(),
            &json!("23.5")
        ));
        assert!(unit.apply(&"UserAirconSettings.EnabledZones[0]".parse().unwrap(), &json!(true)));
        assert!(unit.apply(
            &"RemoteZoneInfo[0].Sensors.AB12.Battery_pc".parse().unwrap(),
            &json!(87)
        ));

        assert_eq!(unit.state.climate_mode(), Some(ClimateMode::Cool));
        let zone = unit.zone_by_index(0).unwrap();
        assert!((zone.cool_setpoint - 23.5).abs() < f64::EPSILON);
        assert!(zone.enabled);
        assert!((zone.sensors["AB12"].battery - 87.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ignores_unknown_paths_and_bad_values() {
        let mut unit = unit_with_zone();
        assert!(!unit.apply(&FieldPath::global("Foo.Bar"), &json!(1)));
        assert!(!unit.apply(&"UserAirconSettings.isOn".parse().unwrap(), &json!("maybe")));
        assert!(!unit.apply(&"UserAirconSettings.EnabledZones[5]".parse().unwrap(), &json!(true)));
    }

    #[test]
    fn enabled_zone_array_applies_per_zone() {
        let mut unit = unit_with_zone();
        assert!(unit.apply(
            &FieldPath::global("UserAirconSettings.EnabledZones"),
            &json!([true, false, false, false, false, false, false, false])
        ));
        assert!(unit.zone_by_index(0).unwrap().enabled);
    }

    #[test]
    fn power_off_wins_over_mode() {
        let state = UnitState {
            power: false,
            mode: "HEAT".into(),
            fan_mode: "low+cont".into(),
            ..UnitState::default()
        };
        assert_eq!(state.climate_mode(), Some(ClimateMode::Off));
        assert!(state.constant_fan());
    }
}
