//! [`SharedState`] – the hand-off point between the vehicle loops and their
//! collaborators.
//!
//! | Field | Writer | Readers |
//! |---|---|---|
//! | operator demand | input collaborator | control loop |
//! | sensor snapshot | sensor collaborator | control loop |
//! | telemetry | control loop | dashboards, CLI |
//! | actuator mode | actuator loop | control loop (telemetry) |
//! | running | supervisor / signal handler | every loop |
//!
//! Snapshots are last-write-wins: a reader always sees the most recent
//! completed write and nothing queues.  [`parking_lot::RwLock`] is used for
//! the multi-field values because its write path is never starved by
//! readers.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Instant;

use parking_lot::RwLock;

use tethys_types::{ActuatorMode, MotionDemand, SensorReading, TelemetryReport};

/// A sensor reading plus the instant it was handed over.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSnapshot {
    pub reading: SensorReading,
    pub received_at: Instant,
}

#[derive(Debug)]
pub struct SharedState {
    demand: RwLock<MotionDemand>,
    sensors: RwLock<Option<SensorSnapshot>>,
    telemetry: RwLock<Option<TelemetryReport>>,
    mode: AtomicU8,
    running: AtomicBool,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            demand: RwLock::new(MotionDemand::default()),
            sensors: RwLock::new(None),
            telemetry: RwLock::new(None),
            mode: AtomicU8::new(encode_mode(ActuatorMode::NeutralHold)),
            running: AtomicBool::new(true),
        }
    }

    /// Store the operator's latest stick input.  Components are clamped to
    /// `[-1, 1]` on the way in.
    pub fn set_demand(&self, demand: MotionDemand) {
        *self.demand.write() = demand.clamped();
    }

    pub fn demand(&self) -> MotionDemand {
        *self.demand.read()
    }

    pub fn publish_sensors(&self, reading: SensorReading) {
        self.publish_sensors_at(reading, Instant::now());
    }

    pub fn publish_sensors_at(&self, reading: SensorReading, received_at: Instant) {
        *self.sensors.write() = Some(SensorSnapshot {
            reading,
            received_at,
        });
    }

    pub fn sensors(&self) -> Option<SensorSnapshot> {
        *self.sensors.read()
    }

    pub fn set_telemetry(&self, report: TelemetryReport) {
        *self.telemetry.write() = Some(report);
    }

    pub fn telemetry(&self) -> Option<TelemetryReport> {
        self.telemetry.read().clone()
    }

    pub fn set_mode(&self, mode: ActuatorMode) {
        self.mode.store(encode_mode(mode), Ordering::Release);
    }

    pub fn mode(&self) -> ActuatorMode {
        match self.mode.load(Ordering::Acquire) {
            1 => ActuatorMode::Active,
            _ => ActuatorMode::NeutralHold,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask every loop to finish its current period, write neutral and exit.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

fn encode_mode(mode: ActuatorMode) -> u8 {
    match mode {
        ActuatorMode::NeutralHold => 0,
        ActuatorMode::Active => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demand_is_clamped_on_write() {
        let s = SharedState::new();
        s.set_demand(MotionDemand {
            surge: 4.0,
            yaw: -0.3,
            ..Default::default()
        });
        let d = s.demand();
        assert_eq!(d.surge, 1.0);
        assert_eq!(d.yaw, -0.3);
    }

    #[test]
    fn last_sensor_write_wins() {
        let s = SharedState::new();
        assert!(s.sensors().is_none());
        let mut r = SensorReading {
            pressure_mbar: 1013.25,
            temperature_c: 12.0,
            roll_deg: 0.0,
            pitch_deg: 0.0,
            yaw_deg: 0.0,
        };
        s.publish_sensors(r);
        r.pressure_mbar = 1200.0;
        s.publish_sensors(r);
        assert_eq!(s.sensors().map(|snap| snap.reading.pressure_mbar), Some(1200.0));
    }

    #[test]
    fn mode_and_running_flags() {
        let s = SharedState::new();
        assert_eq!(s.mode(), ActuatorMode::NeutralHold);
        s.set_mode(ActuatorMode::Active);
        assert_eq!(s.mode(), ActuatorMode::Active);
        assert!(s.is_running());
        s.stop();
        assert!(!s.is_running());
    }
}
