// ── State publishing ──
//
// `PublishSink` is the outbound message bus. `StatePublisher` shapes unit
// snapshots into `<serial>/<suffix>` topics, skips payloads that have not
// changed since the last publish on the same topic, and emits the one-time
// discovery documents and failure notifications.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::{Value, json};
use tracing::debug;

use crate::field_path::FieldPath;
use crate::model::unit::{as_bool, as_f64, as_text};
use crate::model::{ClimateMode, DeviceUnit, FanMode, FanSpeed, UnitState, Zone};

/// Numeric payloads closer than this to the last published value are
/// treated as unchanged.
pub const NUMERIC_TOLERANCE: f64 = 0.1;

const DISCOVERY_PREFIX: &str = "homeassistant";

/// Outbound message bus.
pub trait PublishSink: Send + Sync {
    fn publish(&self, topic: &str, payload: &str);

    /// Ask the bus to deliver messages on `topic` to the command reader.
    fn subscribe(&self, topic: &str) {
        let _ = topic;
    }
}

/// A sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl PublishSink for NullSink {
    fn publish(&self, _topic: &str, _payload: &str) {}
}

#[derive(Debug, Clone, PartialEq)]
struct LastPublished {
    payload: String,
    numeric: Option<f64>,
}

pub struct StatePublisher {
    sink: Arc<dyn PublishSink>,
    last: DashMap<String, LastPublished>,
}

impl StatePublisher {
    pub fn new(sink: Arc<dyn PublishSink>) -> Self {
        Self {
            sink,
            last: DashMap::new(),
        }
    }

    /// Publish unless the payload matches the last one on this topic.
    /// Returns whether a message went out.
    pub fn publish_if_changed(&self, topic: &str, payload: &str) -> bool {
        let numeric = payload.trim().parse::<f64>().ok().filter(|n| n.is_finite());
        let next = LastPublished {
            payload: payload.to_owned(),
            numeric,
        };

        // The entry guard serializes concurrent publishes on one topic.
        let changed = match self.last.entry(topic.to_owned()) {
            Entry::Occupied(mut entry) => {
                let previous = entry.get();
                let same = match (previous.numeric, numeric) {
                    (Some(a), Some(b)) => (a - b).abs() <= NUMERIC_TOLERANCE,
                    _ => previous.payload == payload,
                };
                if !same {
                    entry.insert(next);
                }
                !same
            }
            Entry::Vacant(entry) => {
                entry.insert(next);
                true
            }
        };

        if changed {
            self.sink.publish(topic, payload);
        }
        changed
    }

    /// Publish unconditionally and remember the payload.
    pub fn publish_forced(&self, topic: &str, payload: &str) {
        let numeric = payload.trim().parse::<f64>().ok().filter(|n| n.is_finite());
        self.last.insert(
            topic.to_owned(),
            LastPublished {
                payload: payload.to_owned(),
                numeric,
            },
        );
        self.sink.publish(topic, payload);
    }

    // ── Optimistic ───────────────────────────────────────────────────

    /// Publish the predicted result of one pending field change.
    pub fn publish_optimistic(&self, serial: &str, path: &FieldPath, value: &Value) {
        for (suffix, payload) in optimistic_projection(path, value) {
            self.publish_forced(&format!("{serial}/{suffix}"), &payload);
        }
    }

    // ── Snapshots ────────────────────────────────────────────────────

    /// Publish every state topic for `unit`. Skipped until the unit has
    /// been read at least once. Returns the number of messages sent.
    pub fn publish_unit(&self, unit: &DeviceUnit) -> usize {
        if unit.state.last_updated.is_none() {
            debug!(unit = %unit.serial, "no state read yet, skipping publish");
            return 0;
        }
        let sent = state_topics(unit)
            .into_iter()
            .filter(|(suffix, payload)| {
                self.publish_if_changed(&format!("{}/{suffix}", unit.serial), payload)
            })
            .count();
        debug!(unit = %unit.serial, sent, "published unit state");
        sent
    }

    pub fn publish_failed_command(&self, serial: &str, description: &str) {
        self.publish_forced(&format!("{serial}/lastfailedcommand"), description);
    }

    /// Discovery documents for a unit and its zones, and command
    /// subscriptions. Callers publish these once per unit.
    pub fn publish_discovery(&self, unit: &DeviceUnit) {
        let serial = &unit.serial;
        let device = json!({
            "identifiers": [format!("quebridge_{serial}")],
            "name": unit.name,
            "manufacturer": "Actron",
            "model": "Que",
        });

        let climate = json!({
            "name": unit.name,
            "unique_id": format!("{serial}-AC"),
            "mode_command_topic": format!("{serial}/mode/set"),
            "mode_state_topic": format!("{serial}/mode"),
            "temperature_command_topic": format!("{serial}/temperature/set"),
            "temperature_state_topic": format!("{serial}/settemperature"),
            "temperature_high_state_topic": format!("{serial}/settemperature/high"),
            "temperature_low_state_topic": format!("{serial}/settemperature/low"),
            "current_temperature_topic": format!("{serial}/temperature"),
            "fan_mode_command_topic": format!("{serial}/fan/set"),
            "fan_mode_state_topic": format!("{serial}/fanmode"),
            "current_hvac_action_topic": format!("{serial}/compressor"),
            "modes": ["off", "auto", "cool", "heat", "fan_only"],
            "fan_modes": ["auto", "low", "medium", "high"],
            "min_temp": 10,
            "max_temp": 32,
            "temp_step": 0.5,
            "temperature_unit": "C",
            "device": device,
        });
        self.sink.publish(
            &format!("{DISCOVERY_PREFIX}/climate/quebridge_{serial}/config"),
            &climate.to_string(),
        );

        for switch in ["controlallzones", "awaymode", "quietmode", "constantfanmode"] {
            let doc = json!({
                "name": format!("{} {switch}", unit.name),
                "unique_id": format!("{serial}-{switch}"),
                "command_topic": format!("{serial}/{switch}/set"),
                "state_topic": format!("{serial}/{switch}"),
                "device": device,
            });
            self.sink.publish(
                &format!("{DISCOVERY_PREFIX}/switch/quebridge_{serial}/{switch}/config"),
                &doc.to_string(),
            );
        }

        for zone in unit.zones.values().filter(|z| z.exists) {
            let n = zone.number;
            let doc = json!({
                "name": zone.name,
                "unique_id": format!("{serial}-z{n}s"),
                "command_topic": format!("{serial}/zone{n}/set"),
                "state_topic": format!("{serial}/zone{n}"),
                "device": device,
            });
            self.sink.publish(
                &format!("{DISCOVERY_PREFIX}/switch/quebridge_{serial}/zone{n}/config"),
                &doc.to_string(),
            );
        }

        self.sink.subscribe(&format!("{serial}/+/set"));
        self.sink.subscribe(&format!("{serial}/+/+/set"));
    }
}

// ── Topic shaping ───────────────────────────────────────────────────

fn on_off(on: bool) -> String {
    if on { "ON" } else { "OFF" }.to_owned()
}

fn one_decimal(value: f64) -> String {
    format!("{value:.1}")
}

/// Midpoint of the two setpoints, rounded to the nearest half degree.
pub fn midpoint_setpoint(heat: f64, cool: f64) -> f64 {
    let midpoint = heat + (cool - heat) / 2.0;
    (midpoint * 2.0).round() / 2.0
}

fn fan_label(fan: FanMode) -> &'static str {
    match fan.speed {
        FanSpeed::Auto => "auto",
        FanSpeed::Low => "low",
        FanSpeed::Medium => "medium",
        FanSpeed::High => "high",
    }
}

fn compressor_action(state: &UnitState) -> &'static str {
    let idle = if state.power { "idle" } else { "off" };
    if state.compressor_capacity > 0.0 {
        match state.compressor_mode.as_str() {
            "HEAT" => "heating",
            "COOL" => "cooling",
            "OFF" => "off",
            _ => idle,
        }
    } else {
        idle
    }
}

/// Every `(suffix, payload)` state pair for a unit.
pub fn state_topics(unit: &DeviceUnit) -> Vec<(String, String)> {
    let state = &unit.state;
    let mut topics: Vec<(String, String)> = Vec::with_capacity(32);
    let mut push = |suffix: &str, payload: String| topics.push((suffix.to_owned(), payload));

    push("fanmode", fan_label(state.fan()).to_owned());
    push("temperature", one_decimal(state.temperature));
    push("outdoortemperature", one_decimal(state.outdoor_temperature));
    push("humidity", one_decimal(state.humidity));

    let midpoint = one_decimal(midpoint_setpoint(state.heat_setpoint, state.cool_setpoint));
    match state.climate_mode() {
        Some(ClimateMode::Off) => {
            push("mode", "off".into());
            push("settemperature", midpoint);
        }
        Some(ClimateMode::Auto) => {
            push("mode", "auto".into());
            push("settemperature", midpoint);
        }
        Some(ClimateMode::Cool) => {
            push("mode", "cool".into());
            push("settemperature", one_decimal(state.cool_setpoint));
        }
        Some(ClimateMode::Heat) => {
            push("mode", "heat".into());
            push("settemperature", one_decimal(state.heat_setpoint));
        }
        Some(ClimateMode::FanOnly) => {
            push("mode", "fan_only".into());
            push("settemperature", String::new());
        }
        None => debug!(unit = %unit.serial, mode = %state.mode, "unexpected mode"),
    }
    push("settemperature/high", one_decimal(state.cool_setpoint));
    push("settemperature/low", one_decimal(state.heat_setpoint));

    push("compressor", compressor_action(state).to_owned());
    push("compressorcapacity", format!("{:.1}", state.compressor_capacity));
    push("compressorpower", format!("{:.2}", state.compressor_power));
    push("coilinlettemperature", format!("{:.2}", state.coil_inlet_temperature));
    push("fanpwm", format!("{:.0}", state.fan_pwm));
    push("fanrpm", format!("{:.0}", state.fan_rpm));
    push("cleanfilter", on_off(state.clean_filter));
    push("fantsfc", format!("{:.0}", state.fan_run_time_10m / 6.0));

    push("controlallzones", on_off(state.control_all_zones));
    push("awaymode", on_off(state.away_mode));
    push("quietmode", on_off(state.quiet_mode));
    push("constantfanmode", on_off(state.constant_fan()));

    for zone in unit.zones.values().filter(|z| z.exists) {
        zone_topics(zone, &mut topics);
    }
    topics
}

fn zone_topics(zone: &Zone, topics: &mut Vec<(String, String)>) {
    let n = zone.number;
    topics.push((format!("zone{n}"), on_off(zone.enabled)));
    topics.push((format!("zone{n}/temperature"), one_decimal(zone.temperature)));
    topics.push((format!("zone{n}/position"), format!("{}", zone.position * 5.0)));
    topics.push((
        format!("zone{n}/settemperature/high"),
        one_decimal(zone.cool_setpoint),
    ));
    topics.push((
        format!("zone{n}/settemperature/low"),
        one_decimal(zone.heat_setpoint),
    ));
    for sensor in zone.sensors.values() {
        let id = &sensor.id;
        topics.push((
            format!("zone{n}sensor{id}/temperature"),
            one_decimal(sensor.temperature),
        ));
        topics.push((
            format!("zone{n}sensor{id}/battery"),
            one_decimal(sensor.battery),
        ));
    }
}

/// The topics a pending field change is predicted to move, as
/// `(suffix, payload)`. Unknown paths project to nothing.
pub fn optimistic_projection(path: &FieldPath, value: &Value) -> Vec<(String, String)> {
    let switch = |suffix: &str| {
        as_bool(value)
            .map(|on| vec![(suffix.to_owned(), on_off(on))])
            .unwrap_or_default()
    };
    let number = |v: &Value| {
        as_f64(v).map_or_else(|| as_text(v).unwrap_or_default(), one_decimal)
    };

    match path {
        FieldPath::Global(name) => match name.as_str() {
            "MasterInfo.ControlAllZones" => switch("controlallzones"),
            "UserAirconSettings.AwayMode" => switch("awaymode"),
            "UserAirconSettings.QuietMode" => switch("quietmode"),
            "UserAirconSettings.isOn" => match as_bool(value) {
                Some(false) => vec![("mode".into(), "off".into())],
                _ => Vec::new(),
            },
            "UserAirconSettings.Mode" => as_text(value)
                .and_then(|mode| ClimateMode::from_wire(&mode))
                .map(|mode| vec![("mode".into(), mode.to_string())])
                .unwrap_or_default(),
            "UserAirconSettings.FanMode" => {
                let raw = as_text(value).unwrap_or_default();
                let mut out = vec![(
                    "constantfanmode".to_owned(),
                    on_off(raw.to_ascii_uppercase().contains("+CONT")),
                )];
                if let Ok(fan) = raw.parse::<FanMode>() {
                    out.push(("fanmode".into(), fan_label(fan).into()));
                }
                out
            }
            "UserAirconSettings.TemperatureSetpoint_Cool_oC" => vec![
                ("settemperature/high".into(), number(value)),
                ("settemperature".into(), number(value)),
            ],
            "UserAirconSettings.TemperatureSetpoint_Heat_oC" => vec![
                ("settemperature/low".into(), number(value)),
                ("settemperature".into(), number(value)),
            ],
            _ => Vec::new(),
        },
        FieldPath::ZoneEnabled(index) => as_bool(value)
            .map(|on| vec![(format!("zone{}", index + 1), on_off(on))])
            .unwrap_or_default(),
        FieldPath::ZoneField { zone, field } => match field.as_str() {
            "TemperatureSetpoint_Cool_oC" => {
                vec![(format!("zone{}/settemperature/high", zone + 1), number(value))]
            }
            "TemperatureSetpoint_Heat_oC" => {
                vec![(format!("zone{}/settemperature/low", zone + 1), number(value))]
            }
            _ => Vec::new(),
        },
        FieldPath::SensorField { .. } | FieldPath::SensorTemperature { .. } => Vec::new(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use chrono::Utc;
    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(String, String)>>);

    impl PublishSink for Recorder {
        fn publish(&self, topic: &str, payload: &str) {
            self.0
                .lock()
                .unwrap()
                .push((topic.to_owned(), payload.to_owned()));
        }
    }

    fn projection(path: &str, value: Value) -> Vec<(String, String)> {
        optimistic_projection(&path.parse().unwrap(), &value)
    }

    #[test]
    fn numeric_payloads_within_tolerance_are_skipped() {
        let recorder = Arc::new(Recorder::default());
        let publisher = StatePublisher::new(recorder.clone());

        assert!(publisher.publish_if_changed("S1/temperature", "22.0"));
        assert!(!publisher.publish_if_changed("S1/temperature", "22.1"));
        assert!(publisher.publish_if_changed("S1/temperature", "22.3"));
        assert!(publisher.publish_if_changed("S1/mode", "cool"));
        assert!(!publisher.publish_if_changed("S1/mode", "cool"));

        assert_eq!(recorder.0.lock().unwrap().len(), 3);
    }

    #[test]
    fn forced_publish_updates_the_cache() {
        let recorder = Arc::new(Recorder::default());
        let publisher = StatePublisher::new(recorder.clone());

        publisher.publish_forced("S1/awaymode", "ON");
        assert!(!publisher.publish_if_changed("S1/awaymode", "ON"));
        assert!(publisher.publish_if_changed("S1/awaymode", "OFF"));
    }

    #[test]
    fn projects_known_paths() {
        assert_eq!(
            projection("UserAirconSettings.AwayMode", json!(true)),
            vec![("awaymode".to_owned(), "ON".to_owned())]
        );
        assert_eq!(
            projection("UserAirconSettings.Mode", json!("FAN")),
            vec![("mode".to_owned(), "fan_only".to_owned())]
        );
        assert_eq!(
            projection("UserAirconSettings.FanMode", json!("MED+CONT")),
            vec![
                ("constantfanmode".to_owned(), "ON".to_owned()),
                ("fanmode".to_owned(), "medium".to_owned()),
            ]
        );
        assert_eq!(
            projection("RemoteZoneInfo[1].TemperatureSetpoint_Heat_oC", json!(19)),
            vec![("zone2/settemperature/low".to_owned(), "19.0".to_owned())]
        );
        assert_eq!(
            projection("UserAirconSettings.EnabledZones[0]", json!(false)),
            vec![("zone1".to_owned(), "OFF".to_owned())]
        );
        assert!(projection("UserAirconSettings.isOn", json!(true)).is_empty());
        assert!(projection("Something.Else", json!(1)).is_empty());
    }

    #[test]
    fn midpoint_rounds_to_half_degrees() {
        assert!((midpoint_setpoint(20.0, 24.0) - 22.0).abs() < f64::EPSILON);
        assert!((midpoint_setpoint(20.0, 23.0) - 21.5).abs() < f64::EPSILON);
        assert!((midpoint_setpoint(20.0, 23.4) - 21.5).abs() < f64::EPSILON);
    }

    #[test]
    fn unit_state_is_gated_on_first_read() {
        let recorder = Arc::new(Recorder::default());
        let publisher = StatePublisher::new(recorder.clone());
        let mut unit = DeviceUnit::new("S1", "Home");

        assert_eq!(publisher.publish_unit(&unit), 0);

        unit.state.last_updated = Some(Utc::now());
        unit.state.power = true;
        unit.state.mode = "COOL".into();
        unit.state.cool_setpoint = 23.0;
        assert!(publisher.publish_unit(&unit) > 0);

        let published = recorder.0.lock().unwrap();
        assert!(published.contains(&("S1/mode".to_owned(), "cool".to_owned())));
        assert!(published.contains(&("S1/settemperature".to_owned(), "23.0".to_owned())));
        drop(published);

        // Nothing changed, nothing goes out.
        assert_eq!(publisher.publish_unit(&unit), 0);
    }
}
