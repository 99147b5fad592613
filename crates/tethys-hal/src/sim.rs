//! In-process vehicle simulation for CI and bench runs without hardware.
//!
//! [`SimThruster`] is a stub ESC channel that records every pulse width
//! behind a shared [`SimMonitor`], so a test can keep observing it after the
//! driver has been moved into the actuator thread.  [`SimPlant`] is a
//! first-order rigid-body model that turns the eight *current* pulse widths
//! back into a wrench, integrates depth and attitude, and reports a
//! [`SensorReading`] as the pressure sensor and IMU would.
//!
//! # Example
//!
//! ```rust
//! use tethys_hal::sim::{SimPlant, SimThruster};
//! use tethys_hal::thruster::Thruster;
//! use tethys_types::Calibration;
//!
//! let (mut t1, monitor) = SimThruster::new("t1");
//! t1.set_pulse_width(1620).unwrap();
//! assert_eq!(monitor.pulse_width(), 1620);
//!
//! let mut plant = SimPlant::from_calibration(&Calibration::default()).unwrap();
//! plant.step(&[1500; 8], 0.1);
//! assert!((plant.depth() - 0.0).abs() < 1e-6);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};

use tethys_types::{
    Calibration, EnvironmentCalibration, NEUTRAL_PWM, PulseWidths, SensorReading, TethysError,
    THRUSTER_COUNT,
};

use crate::allocator::{AxisMaxima, ThrusterLayout};
use crate::pid::wrap_angle;
use crate::pwm::PwmMapper;
use crate::thruster::Thruster;

// ────────────────────────────────────────────────────────────────────────────
// Stub thruster
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct MonitorState {
    us: AtomicI32,
    writes: AtomicU64,
    failing: AtomicBool,
}

/// Shared view onto a [`SimThruster`].
#[derive(Debug, Clone)]
pub struct SimMonitor(Arc<MonitorState>);

impl SimMonitor {
    /// Last pulse width successfully written.
    pub fn pulse_width(&self) -> i32 {
        self.0.us.load(Ordering::SeqCst)
    }

    /// Number of successful writes.
    pub fn writes(&self) -> u64 {
        self.0.writes.load(Ordering::SeqCst)
    }

    /// Make subsequent writes fail with a hardware fault.
    pub fn set_failing(&self, failing: bool) {
        self.0.failing.store(failing, Ordering::SeqCst);
    }
}

/// A simulated ESC channel.  Starts at neutral.
pub struct SimThruster {
    id: String,
    state: Arc<MonitorState>,
}

impl SimThruster {
    /// Create a boxed simulated thruster and its monitor.
    pub fn new(id: impl Into<String>) -> (Box<Self>, SimMonitor) {
        let state = Arc::new(MonitorState {
            us: AtomicI32::new(NEUTRAL_PWM),
            writes: AtomicU64::new(0),
            failing: AtomicBool::new(false),
        });
        let monitor = SimMonitor(Arc::clone(&state));
        (Box::new(Self { id: id.into(), state }), monitor)
    }

    /// Eight simulated thrusters `t1..t8` plus their monitors.
    pub fn bank() -> (Vec<Box<dyn Thruster>>, Vec<SimMonitor>) {
        (1..=THRUSTER_COUNT)
            .map(|n| {
                let (t, p) = SimThruster::new(format!("t{n}"));
                (t as Box<dyn Thruster>, p)
            })
            .unzip()
    }
}

impl Thruster for SimThruster {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_pulse_width(&mut self, us: i32) -> Result<(), TethysError> {
        if self.state.failing.load(Ordering::SeqCst) {
            return Err(TethysError::HardwareFault {
                component: self.id.clone(),
                details: "simulated write failure".to_string(),
            });
        }
        self.state.us.store(us, Ordering::SeqCst);
        self.state.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pulse_width(&self) -> i32 {
        self.state.us.load(Ordering::SeqCst)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Plant model
// ────────────────────────────────────────────────────────────────────────────

/// Full-authority rates of the simulated hull.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlantRates {
    /// Vertical speed at full heave authority, m/s.
    pub heave_speed: f32,
    /// Angular rate at full roll/pitch/yaw authority, rad/s.
    pub turn_rate: f32,
    /// Constant upward drift from positive buoyancy, m/s.
    pub buoyancy: f32,
}

impl Default for PlantRates {
    fn default() -> Self {
        Self {
            heave_speed: 0.4,
            turn_rate: 1.0,
            buoyancy: 0.0,
        }
    }
}

/// First-order vehicle model driven by the thrusters' current pulse widths.
///
/// Depth is positive down; a positive heave wrench raises the vehicle.  A
/// positive roll, pitch or yaw wrench increases the matching angle.
#[derive(Debug, Clone)]
pub struct SimPlant {
    layout: ThrusterLayout,
    mapper: PwmMapper,
    maxima: AxisMaxima,
    env: EnvironmentCalibration,
    rates: PlantRates,
    depth_m: f32,
    attitude: [f32; 3],
    temperature_c: f32,
}

impl SimPlant {
    /// # Errors
    ///
    /// Returns [`TethysError::Configuration`] for an unusable thruster table.
    pub fn from_calibration(cal: &Calibration) -> Result<Self, TethysError> {
        let layout = ThrusterLayout::from_calibration(cal)?;
        let maxima = layout.axis_maxima();
        Ok(Self {
            layout,
            mapper: PwmMapper::from_calibration(cal),
            maxima,
            env: cal.environment.clone(),
            rates: PlantRates::default(),
            depth_m: 0.0,
            attitude: [0.0; 3],
            temperature_c: 15.0,
        })
    }

    pub fn with_rates(mut self, rates: PlantRates) -> Self {
        self.rates = rates;
        self
    }

    /// Start the vehicle at `depth_m` with attitude in degrees.
    pub fn with_state(mut self, depth_m: f32, roll_deg: f32, pitch_deg: f32, yaw_deg: f32) -> Self {
        self.depth_m = depth_m.max(0.0);
        self.attitude = [
            roll_deg.to_radians(),
            pitch_deg.to_radians(),
            yaw_deg.to_radians(),
        ];
        self
    }

    pub fn depth(&self) -> f32 {
        self.depth_m
    }

    /// Roll, pitch, yaw in degrees.
    pub fn attitude_deg(&self) -> [f32; 3] {
        self.attitude.map(f32::to_degrees)
    }

    /// Normalized force a thruster is producing at pulse width `us`.
    pub fn force_from_pulse(&self, index: usize, us: i32) -> f32 {
        let us = if self.mapper.is_inverted(index) {
            self.mapper.invert(us)
        } else {
            us
        };
        let neutral = self.mapper.neutral();
        let (rev, fwd) = self.mapper.full_scale();
        let f = if us > neutral {
            (us - neutral) as f32 / (fwd - neutral).max(1) as f32
        } else {
            (us - neutral) as f32 / (neutral - rev).max(1) as f32
        };
        f.clamp(-1.0, 1.0)
    }

    /// Advance the model by `dt` seconds under the given pulse widths.
    pub fn step(&mut self, pulses: &PulseWidths, dt: f32) {
        if !(dt.is_finite() && dt > 0.0) {
            return;
        }
        let mut forces = [0.0; THRUSTER_COUNT];
        for (i, f) in forces.iter_mut().enumerate() {
            *f = self.force_from_pulse(i, pulses[i]);
        }
        let w = self.layout.wrench(&forces);
        let m = &self.maxima;
        let r = &self.rates;

        let climb = r.heave_speed * w.heave / m.heave_force + r.buoyancy;
        self.depth_m = (self.depth_m - climb * dt).max(0.0);

        self.attitude[0] += r.turn_rate * w.roll / m.roll_torque * dt;
        self.attitude[1] += r.turn_rate * w.pitch / m.pitch_torque * dt;
        self.attitude[2] += r.turn_rate * w.yaw / m.yaw_torque * dt;
        for a in &mut self.attitude {
            *a = wrap_angle(*a);
        }
    }

    /// What the pressure sensor and IMU would report right now.
    pub fn reading(&self) -> SensorReading {
        let [roll, pitch, yaw] = self.attitude_deg();
        SensorReading {
            pressure_mbar: self.env.surface_pressure_mbar
                + self.depth_m * self.env.water_density * self.env.gravity / 100.0,
            temperature_c: self.temperature_c,
            roll_deg: roll,
            pitch_deg: pitch,
            yaw_deg: yaw,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn plant() -> SimPlant {
        SimPlant::from_calibration(&Calibration::default()).unwrap()
    }

    #[test]
    fn sim_thruster_records_through_monitor() {
        let (mut t, monitor) = SimThruster::new("t4");
        assert_eq!(t.id(), "t4");
        assert_eq!(monitor.pulse_width(), NEUTRAL_PWM);
        t.set_pulse_width(1450).unwrap();
        assert_eq!(monitor.pulse_width(), 1450);
        assert_eq!(t.pulse_width(), 1450);
        assert_eq!(monitor.writes(), 1);
    }

    #[test]
    fn failing_thruster_keeps_last_value() {
        let (mut t, monitor) = SimThruster::new("t2");
        t.set_pulse_width(1550).unwrap();
        monitor.set_failing(true);
        assert!(matches!(
            t.set_pulse_width(1600),
            Err(TethysError::HardwareFault { .. })
        ));
        assert_eq!(monitor.pulse_width(), 1550);
        monitor.set_failing(false);
        t.set_pulse_width(1600).unwrap();
        assert_eq!(monitor.writes(), 2);
    }

    #[test]
    fn bank_has_eight_named_channels() {
        let (bank, monitors) = SimThruster::bank();
        assert_eq!(bank.len(), THRUSTER_COUNT);
        assert_eq!(monitors.len(), THRUSTER_COUNT);
        assert_eq!(bank[7].id(), "t8");
    }

    #[test]
    fn neutral_pulses_hold_still() {
        let mut p = plant().with_state(2.0, 5.0, -3.0, 90.0);
        for _ in 0..100 {
            p.step(&[NEUTRAL_PWM; THRUSTER_COUNT], 0.05);
        }
        assert_relative_eq!(p.depth(), 2.0, epsilon = 1e-5);
        let [roll, pitch, yaw] = p.attitude_deg();
        assert_relative_eq!(roll, 5.0, epsilon = 1e-3);
        assert_relative_eq!(pitch, -3.0, epsilon = 1e-3);
        assert_relative_eq!(yaw, 90.0, epsilon = 1e-3);
    }

    #[test]
    fn upward_vertical_thrust_reduces_depth() {
        let mut p = plant().with_state(3.0, 0.0, 0.0, 0.0);
        let up = 1700;
        let pulses = [1500, 1500, 1500, 1500, up, up, up, up];
        p.step(&pulses, 1.0);
        assert!(p.depth() < 3.0);
        // Pure heave leaves attitude alone.
        assert!(p.attitude_deg().iter().all(|a| a.abs() < 1e-3));
    }

    #[test]
    fn depth_never_goes_negative() {
        let mut p = plant().with_rates(PlantRates {
            buoyancy: 1.0,
            ..Default::default()
        });
        p.step(&[NEUTRAL_PWM; THRUSTER_COUNT], 10.0);
        assert_eq!(p.depth(), 0.0);
    }

    #[test]
    fn reading_reports_hydrostatic_pressure() {
        let p = plant().with_state(1.0, 0.0, 0.0, 0.0);
        let r = p.reading();
        // 1 m of sea water ≈ 100.55 mbar.
        assert_relative_eq!(r.pressure_mbar, 1013.25 + 100.5525, epsilon = 1e-2);
        assert!(r.is_finite());
    }

    #[test]
    fn force_from_pulse_inverts_mapping_endpoints() {
        let mut cal = Calibration::default();
        cal.thrusters[5].inverted = true;
        let p = SimPlant::from_calibration(&cal).unwrap();
        let mapper = PwmMapper::from_calibration(&cal);
        let (rev, fwd) = mapper.full_scale();
        assert_relative_eq!(p.force_from_pulse(0, fwd), 1.0);
        assert_relative_eq!(p.force_from_pulse(0, rev), -1.0);
        assert_eq!(p.force_from_pulse(0, NEUTRAL_PWM), 0.0);
        // An inverted channel reads its mirrored pulse as forward thrust.
        assert!(p.force_from_pulse(5, mapper.invert(fwd)) > 0.99);
    }

    #[test]
    fn yaw_wraps() {
        let mut p = plant().with_state(0.0, 0.0, 0.0, 179.0);
        let (_, fwd) = PwmMapper::default().full_scale();
        let rev = PwmMapper::default().invert(fwd);
        // Yaw-row signs for slots FL, FR, RL, RR are −, +, +, −.
        let pulses = [rev, fwd, fwd, rev, 1500, 1500, 1500, 1500];
        p.step(&pulses, 0.1);
        let yaw = p.attitude_deg()[2];
        assert!(yaw < -170.0, "yaw {yaw}");
    }
}
