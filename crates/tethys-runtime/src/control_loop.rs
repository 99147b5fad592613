//! [`ControlLoop`] – one tick of sensor-to-PWM orchestration.
//!
//! Each call to [`ControlLoop::tick`]:
//!
//! 1. validates the sensor snapshot and converts pressure to raw depth,
//! 2. feeds raw depth through the [`DepthEstimator`],
//! 3. takes the operator's normalized demand,
//! 4. for every PID-enabled axis, integrates the stick into a moving
//!    setpoint and replaces the stick value with the PID output,
//! 5. scales the demand by the vehicle's physical axis maxima (surge and sway
//!    jointly, so a diagonal stick cannot exceed the true axial maximum),
//! 6. allocates thruster forces, and
//! 7. maps them to pulse widths.
//!
//! A fault in steps 1–2 returns an error before any controller state
//! changes; the caller skips the tick and the previous PWM targets stay in
//! force.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use tethys_hal::{AxisMaxima, PidController, PwmMapper, ThrustAllocator, ThrusterLayout};
use tethys_hal::pid::wrap_angle;
use tethys_perception::{DepthEstimator, pressure_to_depth};
use tethys_types::{
    Axis, AxisTelemetry, Calibration, EnvironmentCalibration, MotionDemand, PulseWidths,
    TethysError, ThrusterForces, ThrusterGroup, check_dt,
};

use crate::shared::SensorSnapshot;

// ────────────────────────────────────────────────────────────────────────────
// Per-axis closed loop
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct AxisLoop {
    axis: Axis,
    enabled: bool,
    is_angle: bool,
    max_rate: f32,
    pid: PidController,
    setpoint: Option<f32>,
}

impl AxisLoop {
    /// Advance the setpoint by the operator's rate input and run the PID.
    ///
    /// The setpoint latches onto the first measurement so the vehicle holds
    /// whatever depth and attitude it had when the loop started.  Depth grows
    /// downward while the heave stick points up, so the depth rate is negated.
    fn step(&mut self, stick: f32, measurement: f32, dt: f32) -> Result<AxisTelemetry, TethysError> {
        let rate = if self.axis == Axis::Depth { -stick } else { stick };
        let mut setpoint = self.setpoint.unwrap_or(measurement) + rate * self.max_rate * dt;
        if self.is_angle {
            setpoint = wrap_angle(setpoint);
        } else if self.axis == Axis::Depth {
            setpoint = setpoint.max(0.0);
        }
        let output = self.pid.compute(measurement, setpoint, dt)?;
        self.setpoint = Some(setpoint);
        Ok(AxisTelemetry {
            axis: self.axis,
            setpoint,
            measurement,
            output,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tick I/O
// ────────────────────────────────────────────────────────────────────────────

/// Everything one tick produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutput {
    /// The physically scaled demand handed to the allocator.
    pub demand: MotionDemand,
    pub forces: ThrusterForces,
    pub pwm: PulseWidths,
    pub raw_depth_m: f32,
    pub depth_m: f32,
    pub axes: Vec<AxisTelemetry>,
}

/// Scale a normalized demand by the physical axis maxima.
///
/// Surge and sway share one axial budget: `θ = atan2(|sway|, |surge|)`,
/// surge is scaled by `cos θ` and sway by `sin θ`.
pub fn scale_demand(d: &MotionDemand, m: &AxisMaxima) -> MotionDemand {
    let theta = d.sway.abs().atan2(d.surge.abs());
    MotionDemand {
        surge: d.surge * m.axial_force * theta.cos(),
        sway: d.sway * m.axial_force * theta.sin(),
        heave: d.heave * m.heave_force,
        roll: d.roll * m.roll_torque,
        pitch: d.pitch * m.pitch_torque,
        yaw: d.yaw * m.yaw_torque,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ControlLoop
// ────────────────────────────────────────────────────────────────────────────

pub struct ControlLoop {
    allocator: ThrustAllocator,
    mapper: PwmMapper,
    maxima: AxisMaxima,
    estimator: DepthEstimator,
    env: EnvironmentCalibration,
    axes: Vec<AxisLoop>,
    sensor_timeout: Duration,
}

impl ControlLoop {
    /// # Errors
    ///
    /// Returns [`TethysError::Configuration`] if the thruster table cannot
    /// be turned into an allocator.
    pub fn from_calibration(cal: &Calibration) -> Result<Self, TethysError> {
        let layout = ThrusterLayout::from_calibration(cal)?;
        let maxima = layout.axis_maxima();
        let allocator = ThrustAllocator::new(layout, cal.force_limit)?;
        let axes = Axis::ALL
            .iter()
            .map(|&axis| {
                let a = cal.pid.get(axis);
                AxisLoop {
                    axis,
                    enabled: a.enabled,
                    is_angle: a.is_angle,
                    max_rate: a.max_rate,
                    pid: PidController::from_calibration(a),
                    setpoint: None,
                }
            })
            .collect();
        Ok(Self {
            allocator,
            mapper: PwmMapper::from_calibration(cal),
            maxima,
            estimator: DepthEstimator::new(&cal.kalman, 0.0),
            env: cal.environment.clone(),
            axes,
            sensor_timeout: Duration::from_millis(cal.timing.sensor_timeout_ms),
        })
    }

    pub fn axis_maxima(&self) -> AxisMaxima {
        self.maxima
    }

    pub fn allocator(&self) -> &ThrustAllocator {
        &self.allocator
    }

    /// Mark a thruster (0-based) as working or failed at runtime.
    ///
    /// Returns the groups that are now below full allocation rank.
    pub fn set_thruster_working(
        &mut self,
        index: usize,
        working: bool,
    ) -> Result<Vec<(ThrusterGroup, usize)>, TethysError> {
        self.allocator.set_working(index, working)?;
        Ok(self.allocator.degraded_groups())
    }

    /// Enable or disable closed-loop control on one axis.  Re-enabling
    /// starts from a fresh setpoint and a reset controller.
    pub fn set_axis_enabled(&mut self, axis: Axis, enabled: bool) {
        if let Some(a) = self.axes.iter_mut().find(|a| a.axis == axis) {
            if enabled && !a.enabled {
                a.pid.reset();
                a.setpoint = None;
            }
            a.enabled = enabled;
            debug!(%axis, enabled, "axis control toggled");
        }
    }

    /// Current setpoint of a closed-loop axis, if it has one yet.
    pub fn setpoint(&self, axis: Axis) -> Option<f32> {
        self.axes.iter().find(|a| a.axis == axis).and_then(|a| a.setpoint)
    }

    /// Run one tick.
    ///
    /// # Errors
    ///
    /// - [`TethysError::InvalidTimestep`] for a non-positive or non-finite `dt`.
    /// - [`TethysError::SensorFault`] when the snapshot is missing, older
    ///   than the sensor timeout, or contains non-finite values.
    ///
    /// No controller or filter state changes when an error is returned.
    pub fn tick(
        &mut self,
        operator: &MotionDemand,
        sensors: Option<&SensorSnapshot>,
        now: Instant,
        dt: f32,
    ) -> Result<TickOutput, TethysError> {
        check_dt(dt)?;
        let snap = sensors.ok_or_else(|| TethysError::SensorFault("no sensor reading yet".into()))?;
        let age = now.saturating_duration_since(snap.received_at);
        if age > self.sensor_timeout {
            return Err(TethysError::SensorFault(format!(
                "sensor reading is {} ms old",
                age.as_millis()
            )));
        }
        let reading = snap.reading;
        if !reading.is_finite() {
            return Err(TethysError::SensorFault("non-finite sensor value".into()));
        }

        let raw_depth_m = pressure_to_depth(reading.pressure_mbar, &self.env);
        let depth_m = self.estimator.update(raw_depth_m, dt)?;

        let mut demand = operator.clamped();
        let mut axes = Vec::new();
        for a in self.axes.iter_mut().filter(|a| a.enabled) {
            let measurement = match a.axis {
                Axis::Depth => depth_m,
                Axis::Roll => reading.roll_deg.to_radians(),
                Axis::Pitch => reading.pitch_deg.to_radians(),
                Axis::Yaw => reading.yaw_deg.to_radians(),
            };
            let t = a.step(demand.axis(a.axis), measurement, dt)?;
            let value = if a.axis == Axis::Depth { -t.output } else { t.output };
            demand.set_axis(a.axis, value);
            axes.push(t);
        }

        let scaled = scale_demand(&demand, &self.maxima);
        let forces = self.allocator.allocate(&scaled);
        if forces.iter().any(|f| !f.is_finite()) {
            warn!(?forces, "allocator produced non-finite forces, tick skipped");
            return Err(TethysError::HardwareFault {
                component: "allocator".into(),
                details: "non-finite force".into(),
            });
        }
        let pwm = self.mapper.map_all(&forces);

        Ok(TickOutput {
            demand: scaled,
            forces,
            pwm,
            raw_depth_m,
            depth_m,
            axes,
        })
    }
}
