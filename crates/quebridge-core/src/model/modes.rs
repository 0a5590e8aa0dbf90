// ── Operating modes ──

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// The HVAC mode a caller asks for. `Off` is expressed on the wire by
/// `isOn = false` rather than a mode value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum ClimateMode {
    Off,
    Auto,
    Cool,
    Heat,
    #[strum(to_string = "fan_only", serialize = "fan")]
    #[serde(alias = "fan")]
    FanOnly,
}

impl ClimateMode {
    /// Wire value of `UserAirconSettings.Mode`, or `None` for `Off`.
    pub fn wire(self) -> Option<&'static str> {
        match self {
            Self::Off => None,
            Self::Auto => Some("AUTO"),
            Self::Cool => Some("COOL"),
            Self::Heat => Some("HEAT"),
            Self::FanOnly => Some("FAN"),
        }
    }

    /// Parse a wire `Mode` value. `Off` is never produced.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "AUTO" => Some(Self::Auto),
            "COOL" => Some(Self::Cool),
            "HEAT" => Some(Self::Heat),
            "FAN" => Some(Self::FanOnly),
            _ => None,
        }
    }
}

/// Fan speed without the continuous flag.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum FanSpeed {
    Auto,
    Low,
    #[strum(to_string = "medium", serialize = "med")]
    #[serde(alias = "med")]
    Medium,
    High,
}

impl FanSpeed {
    pub fn wire(self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Low => "LOW",
            Self::Medium => "MED",
            Self::High => "HIGH",
        }
    }
}

const CONTINUOUS_SUFFIX: &str = "+CONT";

/// A wire `FanMode` value such as `HIGH` or `LOW+CONT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FanMode {
    pub speed: FanSpeed,
    pub continuous: bool,
}

impl FanMode {
    pub fn new(speed: FanSpeed, continuous: bool) -> Self {
        Self { speed, continuous }
    }
}

impl Default for FanMode {
    fn default() -> Self {
        Self::new(FanSpeed::Auto, false)
    }
}

impl fmt::Display for FanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.speed.wire())?;
        if self.continuous {
            f.write_str(CONTINUOUS_SUFFIX)?;
        }
        Ok(())
    }
}

impl FromStr for FanMode {
    type Err = strum::ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let upper = value.trim().to_ascii_uppercase();
        let (base, continuous) = match upper.find(CONTINUOUS_SUFFIX) {
            Some(at) => (&upper[..at], true),
            None => (upper.as_str(), false),
        };
        Ok(Self::new(base.parse()?, continuous))
    }
}

/// Which setpoint a temperature change targets.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum SetpointKind {
    /// Follow the current mode: cooling in COOL, heating in HEAT, both in AUTO.
    #[default]
    Default,
    /// The cooling (upper) setpoint.
    High,
    /// The heating (lower) setpoint.
    Low,
}
