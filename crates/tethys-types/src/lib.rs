//! `tethys-types` – shared data model for the Tethys vehicle stack.
//!
//! Every other crate in the workspace speaks in these types: the 6-DOF
//! [`MotionDemand`], the per-tick [`SensorReading`], the [`TelemetryReport`]
//! published for dashboards, the bus [`Event`] wrapper and the workspace-wide
//! [`TethysError`] taxonomy.
//!
//! # Modules
//!
//! - [`calibration`] – [`Calibration`][calibration::Calibration]: the
//!   immutable vehicle calibration loaded at startup and validated before any
//!   thread starts.
//! - [`command`] – [`PwmCommand`][command::PwmCommand]: the fixed-shape
//!   `t1..t8` command-channel message and its defensive JSON decoder.

pub mod calibration;
pub mod command;

pub use calibration::{
    AxisCalibration, Calibration, EnvironmentCalibration, Geometry, KalmanCalibration, Mount,
    PidTable, PwmCalibration, ThrusterCalibration, TimingCalibration,
};
pub use command::PwmCommand;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Number of thrusters on the vehicle (4 lateral + 4 vertical).
pub const THRUSTER_COUNT: usize = 8;

/// Number of thrusters in each allocation group.
pub const GROUP_SIZE: usize = 4;

/// ESC neutral pulse width in microseconds (no thrust).
pub const NEUTRAL_PWM: i32 = 1500;

/// Normalized per-thruster forces in `[-1, 1]`, indexed `t1..t8`.
pub type ThrusterForces = [f32; THRUSTER_COUNT];

/// Per-thruster pulse widths in microseconds, indexed `t1..t8`.
pub type PulseWidths = [i32; THRUSTER_COUNT];

/// The axes that can be closed around a sensor with a PID controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Depth,
    Roll,
    Pitch,
    Yaw,
}

impl Axis {
    pub const ALL: [Axis; 4] = [Axis::Depth, Axis::Roll, Axis::Pitch, Axis::Yaw];
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Axis::Depth => write!(f, "depth"),
            Axis::Roll => write!(f, "roll"),
            Axis::Pitch => write!(f, "pitch"),
            Axis::Yaw => write!(f, "yaw"),
        }
    }
}

/// The two independently allocated thruster groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThrusterGroup {
    /// Horizontal thrusters: surge, sway and yaw.
    Lateral,
    /// Vertical thrusters: roll, pitch and heave.
    Vertical,
}

impl std::fmt::Display for ThrusterGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThrusterGroup::Lateral => write!(f, "lateral"),
            ThrusterGroup::Vertical => write!(f, "vertical"),
        }
    }
}

/// A 6-DOF motion demand.
///
/// Operator input arrives normalized to `[-1, 1]` per axis; after scaling by
/// the vehicle's physical maxima the same struct carries force (thruster
/// units) and torque (mm · thruster units) for the allocator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionDemand {
    pub surge: f32,
    pub sway: f32,
    pub heave: f32,
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

impl MotionDemand {
    /// Return a copy with every component clamped to `[-1, 1]`.
    ///
    /// Non-finite components are replaced by `0.0`.
    pub fn clamped(&self) -> Self {
        let c = |v: f32| if v.is_finite() { v.clamp(-1.0, 1.0) } else { 0.0 };
        Self {
            surge: c(self.surge),
            sway: c(self.sway),
            heave: c(self.heave),
            roll: c(self.roll),
            pitch: c(self.pitch),
            yaw: c(self.yaw),
        }
    }

    /// Read the operator component driving a PID axis.
    ///
    /// Depth is driven by the heave stick.
    pub fn axis(&self, axis: Axis) -> f32 {
        match axis {
            Axis::Depth => self.heave,
            Axis::Roll => self.roll,
            Axis::Pitch => self.pitch,
            Axis::Yaw => self.yaw,
        }
    }

    /// Overwrite the component driving a PID axis.
    pub fn set_axis(&mut self, axis: Axis, value: f32) {
        match axis {
            Axis::Depth => self.heave = value,
            Axis::Roll => self.roll = value,
            Axis::Pitch => self.pitch = value,
            Axis::Yaw => self.yaw = value,
        }
    }
}

/// Raw sensor values handed over by the sensor collaborators once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Absolute pressure in millibar.
    pub pressure_mbar: f32,
    /// Water (or enclosure) temperature in °C.
    pub temperature_c: f32,
    pub roll_deg: f32,
    pub pitch_deg: f32,
    pub yaw_deg: f32,
}

impl SensorReading {
    /// `true` when every field is a finite number.
    pub fn is_finite(&self) -> bool {
        [
            self.pressure_mbar,
            self.temperature_c,
            self.roll_deg,
            self.pitch_deg,
            self.yaw_deg,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

/// State of the actuator safety layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorMode {
    /// Commands are fresh; PWM ramps toward the commanded targets.
    Active,
    /// The command link went silent; every thruster is pinned to neutral.
    #[default]
    NeutralHold,
}

/// Setpoint and measurement of one closed-loop axis for a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisTelemetry {
    pub axis: Axis,
    pub setpoint: f32,
    pub measurement: f32,
    pub output: f32,
}

/// Per-tick telemetry snapshot for dashboards and ground stations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReport {
    pub forces: ThrusterForces,
    pub target_pwm: PulseWidths,
    pub current_pwm: PulseWidths,
    pub pressure_mbar: f32,
    pub temperature_c: f32,
    /// Kalman-filtered depth in metres.
    pub depth_m: f32,
    pub axes: Vec<AxisTelemetry>,
    pub mode: ActuatorMode,
}

/// Unified event wrapper for the telemetry/alert bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "tethys-runtime::control"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Stamp `payload` with a fresh id and the current wall-clock time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Telemetry(TelemetryReport),
    /// The watchdog expired and forced Neutral-Hold.
    LinkLost { silent_ms: u64 },
    /// A valid command arrived after a link loss.
    LinkRestored,
    /// A control tick was skipped because sensor input was unusable.
    SensorFault { reason: String },
    /// A thruster group has fewer than three working thrusters.
    AllocationDegraded { group: ThrusterGroup, working: usize },
}

/// Workspace-wide error type.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TethysError {
    #[error("Sensor Fault: {0}")]
    SensorFault(String),

    #[error("Link Loss: no valid command for {silent_ms} ms")]
    LinkLoss { silent_ms: u64 },

    #[error("Degraded Allocation: {group} group has {working} working thrusters")]
    AllocationDegenerate { group: ThrusterGroup, working: usize },

    #[error("Configuration Error: {0}")]
    Configuration(String),

    #[error("Invalid Timestep: dt = {0} s (must be finite and > 0)")]
    InvalidTimestep(f32),

    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("Channel Error: {0}")]
    Channel(String),
}

impl TethysError {
    /// The `SystemAlerts` payload for a fault the vehicle recovers from on
    /// its own.  Startup and programming errors have none.
    pub fn to_alert(&self) -> Option<EventPayload> {
        match self {
            TethysError::SensorFault(reason) => Some(EventPayload::SensorFault {
                reason: reason.clone(),
            }),
            TethysError::LinkLoss { silent_ms } => Some(EventPayload::LinkLost {
                silent_ms: *silent_ms,
            }),
            TethysError::AllocationDegenerate { group, working } => {
                Some(EventPayload::AllocationDegraded {
                    group: *group,
                    working: *working,
                })
            }
            TethysError::Configuration(_)
            | TethysError::InvalidTimestep(_)
            | TethysError::HardwareFault { .. }
            | TethysError::Channel(_) => None,
        }
    }
}

/// Reject non-positive or non-finite timesteps.
pub fn check_dt(dt: f32) -> Result<(), TethysError> {
    if dt.is_finite() && dt > 0.0 {
        Ok(())
    } else {
        Err(TethysError::InvalidTimestep(dt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamped_limits_and_scrubs_non_finite() {
        let d = MotionDemand {
            surge: 3.0,
            sway: -2.0,
            heave: f32::NAN,
            roll: 0.25,
            pitch: f32::INFINITY,
            yaw: -0.5,
        }
        .clamped();
        assert_eq!(d.surge, 1.0);
        assert_eq!(d.sway, -1.0);
        assert_eq!(d.heave, 0.0);
        assert_eq!(d.roll, 0.25);
        assert_eq!(d.pitch, 0.0);
        assert_eq!(d.yaw, -0.5);
    }

    #[test]
    fn depth_axis_reads_heave() {
        let mut d = MotionDemand { heave: 0.4, ..Default::default() };
        assert_eq!(d.axis(Axis::Depth), 0.4);
        d.set_axis(Axis::Depth, -0.1);
        assert_eq!(d.heave, -0.1);
        d.set_axis(Axis::Yaw, 0.7);
        assert_eq!(d.axis(Axis::Yaw), 0.7);
    }

    #[test]
    fn sensor_reading_finiteness() {
        let mut r = SensorReading {
            pressure_mbar: 1013.25,
            temperature_c: 20.0,
            roll_deg: 0.0,
            pitch_deg: 0.0,
            yaw_deg: 0.0,
        };
        assert!(r.is_finite());
        r.yaw_deg = f32::NAN;
        assert!(!r.is_finite());
    }

    #[test]
    fn check_dt_rejects_zero_negative_and_nan() {
        assert!(check_dt(0.033).is_ok());
        assert_eq!(check_dt(0.0), Err(TethysError::InvalidTimestep(0.0)));
        assert!(check_dt(-1.0).is_err());
        assert!(check_dt(f32::NAN).is_err());
    }

    #[test]
    fn recoverable_faults_map_to_alerts() {
        assert!(matches!(
            TethysError::LinkLoss { silent_ms: 1200 }.to_alert(),
            Some(EventPayload::LinkLost { silent_ms: 1200 })
        ));
        assert!(matches!(
            TethysError::AllocationDegenerate {
                group: ThrusterGroup::Vertical,
                working: 2
            }
            .to_alert(),
            Some(EventPayload::AllocationDegraded {
                group: ThrusterGroup::Vertical,
                working: 2
            })
        ));
        match TethysError::SensorFault("stale".into()).to_alert() {
            Some(EventPayload::SensorFault { reason }) => assert_eq!(reason, "stale"),
            other => panic!("unexpected alert {other:?}"),
        }
        assert!(TethysError::Configuration("bad".into()).to_alert().is_none());
        assert!(TethysError::InvalidTimestep(0.0).to_alert().is_none());
    }

    #[test]
    fn event_roundtrip() {
        let event = Event::new("tethys-kernel::safety", EventPayload::LinkLost { silent_ms: 1200 });
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        assert!(matches!(back.payload, EventPayload::LinkLost { silent_ms: 1200 }));
    }

    #[test]
    fn error_display() {
        let err = TethysError::AllocationDegenerate {
            group: ThrusterGroup::Vertical,
            working: 2,
        };
        assert!(err.to_string().contains("vertical"));
        assert!(TethysError::LinkLoss { silent_ms: 1500 }.to_string().contains("1500"));
    }
}
