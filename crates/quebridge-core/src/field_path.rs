// ── Field paths ──
//
// The cloud addresses unit settings with dotted paths such as
// `UserAirconSettings.EnabledZones[3]` or
// `RemoteZoneInfo[0].Sensors.A1B2C3.Battery_pc`. `FieldPath` is the typed
// form. Indexes are the 0-based wire indexes; zone numbers shown to users
// are index + 1.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

const ENABLED_ZONES: &str = "UserAirconSettings.EnabledZones";
const ZONE_INFO: &str = "RemoteZoneInfo";
const SENSORS: &str = "Sensors";
const REMOTE_TEMPERATURES: &str = "RemoteTemperatures_oC";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldPath {
    /// An unindexed setting, e.g. `MasterInfo.ControlAllZones`.
    Global(String),
    /// `UserAirconSettings.EnabledZones[index]`
    ZoneEnabled(usize),
    /// `RemoteZoneInfo[zone].<field>`
    ZoneField { zone: usize, field: String },
    /// `RemoteZoneInfo[zone].Sensors.<sensor>.<field>`
    SensorField {
        zone: usize,
        sensor: String,
        field: String,
    },
    /// `RemoteZoneInfo[zone].RemoteTemperatures_oC.<sensor>`
    SensorTemperature { zone: usize, sensor: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid field path '{path}': {reason}")]
pub struct FieldPathError {
    pub path: String,
    pub reason: &'static str,
}

impl FieldPath {
    pub fn global(name: impl Into<String>) -> Self {
        Self::Global(name.into())
    }

    pub fn zone_field(zone: usize, field: impl Into<String>) -> Self {
        Self::ZoneField {
            zone,
            field: field.into(),
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global(name) => f.write_str(name),
            Self::ZoneEnabled(zone) => write!(f, "{ENABLED_ZONES}[{zone}]"),
            Self::ZoneField { zone, field } => write!(f, "{ZONE_INFO}[{zone}].{field}"),
            Self::SensorField {
                zone,
                sensor,
                field,
            } => write!(f, "{ZONE_INFO}[{zone}].{SENSORS}.{sensor}.{field}"),
            Self::SensorTemperature { zone, sensor } => {
                write!(f, "{ZONE_INFO}[{zone}].{REMOTE_TEMPERATURES}.{sensor}")
            }
        }
    }
}

impl FromStr for FieldPath {
    type Err = FieldPathError;

    fn from_str(path: &str) -> Result<Self, Self::Err> {
        let fail = |reason| FieldPathError {
            path: path.to_owned(),
            reason,
        };

        if path.is_empty() {
            return Err(fail("empty path"));
        }
        if path.split('.').any(str::is_empty) {
            return Err(fail("empty segment"));
        }

        let Some(open) = path.find('[') else {
            if path.contains(']') {
                return Err(fail("unbalanced bracket"));
            }
            return Ok(Self::Global(path.to_owned()));
        };

        let array = &path[..open];
        let after_open = &path[open + 1..];
        let close = after_open.find(']').ok_or_else(|| fail("unbalanced bracket"))?;
        let digits = &after_open[..close];
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(fail("index must be a non-negative integer"));
        }
        let index: usize = digits.parse().map_err(|_| fail("index out of range"))?;

        let rest = &after_open[close + 1..];
        if rest.contains('[') || rest.contains(']') {
            return Err(fail("nested or trailing brackets"));
        }

        match array {
            ENABLED_ZONES if rest.is_empty() => Ok(Self::ZoneEnabled(index)),
            ENABLED_ZONES => Err(fail("zone enable flags have no sub-fields")),
            ZONE_INFO => {
                let field = rest
                    .strip_prefix('.')
                    .ok_or_else(|| fail("zone info needs a field name"))?;
                parse_zone_field(index, field).ok_or_else(|| fail("malformed sensor path"))
            }
            _ => Err(fail("unsupported indexed field")),
        }
    }
}

fn parse_zone_field(zone: usize, field: &str) -> Option<FieldPath> {
    if let Some(sensor_path) = field.strip_prefix(SENSORS).and_then(|s| s.strip_prefix('.')) {
        let (sensor, sensor_field) = sensor_path.split_once('.')?;
        return Some(FieldPath::SensorField {
            zone,
            sensor: sensor.to_owned(),
            field: sensor_field.to_owned(),
        });
    }
    if let Some(sensor) = field
        .strip_prefix(REMOTE_TEMPERATURES)
        .and_then(|s| s.strip_prefix('.'))
    {
        if sensor.contains('.') {
            return None;
        }
        return Some(FieldPath::SensorTemperature {
            zone,
            sensor: sensor.to_owned(),
        });
    }
    Some(FieldPath::zone_field(zone, field))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(path: &str) -> FieldPath {
        path.parse().unwrap()
    }

    #[test]
    fn parses_each_shape() {
        assert_eq!(
            parse("UserAirconSettings.AwayMode"),
            FieldPath::global("UserAirconSettings.AwayMode")
        );
        assert_eq!(
            parse("UserAirconSettings.EnabledZones[3]"),
            FieldPath::ZoneEnabled(3)
        );
        assert_eq!(
            parse("RemoteZoneInfo[1].TemperatureSetpoint_Cool_oC"),
            FieldPath::zone_field(1, "TemperatureSetpoint_Cool_oC")
        );
        assert_eq!(
            parse("RemoteZoneInfo[0].Sensors.A1B2.Battery_pc"),
            FieldPath::SensorField {
                zone: 0,
                sensor: "A1B2".into(),
                field: "Battery_pc".into()
            }
        );
        assert_eq!(
            parse("RemoteZoneInfo[7].RemoteTemperatures_oC.A1B2"),
            FieldPath::SensorTemperature {
                zone: 7,
                sensor: "A1B2".into()
            }
        );
    }

    #[test]
    fn display_renders_wire_form() {
        for path in [
            "MasterInfo.ControlAllZones",
            "UserAirconSettings.EnabledZones[0]",
            "RemoteZoneInfo[2].LiveTemp_oC",
            "RemoteZoneInfo[2].Sensors.XY.Battery_pc",
            "RemoteZoneInfo[2].RemoteTemperatures_oC.XY",
        ] {
            assert_eq!(parse(path).to_string(), path);
        }
    }

    #[test]
    fn rejects_malformed_brackets() {
        for path in [
            "",
            "UserAirconSettings.EnabledZones[",
            "UserAirconSettings.EnabledZones[]",
            "UserAirconSettings.EnabledZones[-1]",
            "UserAirconSettings.EnabledZones[a]",
            "UserAirconSettings.EnabledZones]1[",
            "RemoteZoneInfo[1]",
            "RemoteZoneInfo[1][2].LiveTemp_oC",
            "RemoteZoneInfo[1].Sensors.OnlyId",
            "Unknown[1].Field",
            "MasterInfo..ControlAllZones",
        ] {
            assert!(path.parse::<FieldPath>().is_err(), "accepted {path:?}");
        }
    }
}
