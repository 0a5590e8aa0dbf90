// ── Unit domain model ──
//
// Normalized view of each managed unit. Values arrive as wire field paths
// from status documents or the event feed and are applied through
// `DeviceUnit::apply`.

pub mod modes;
pub mod unit;

// ── Re-exports ──────────────────────────────────────────────────────

pub use modes::{ClimateMode, FanMode, FanSpeed, SetpointKind};
pub use unit::{DeviceUnit, Sensor, UnitState, Zone, MAX_ZONES};
