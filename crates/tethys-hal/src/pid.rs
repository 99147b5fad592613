//! PID (Proportional–Integral–Derivative) controller for one vehicle axis.
//!
//! The controller is hardware-agnostic: the caller supplies measurement,
//! set-point and elapsed time, and receives a clamped output in the
//! normalized demand range.  Angular axes wrap their error into `(-π, π]` so
//! that a heading of 179° and a target of −179° are 2° apart, not 358°.
//!
//! # Example
//!
//! ```rust
//! use tethys_hal::pid::PidController;
//!
//! let mut pid = PidController::new(1.0, 0.1, 0.05);
//! pid.set_output_limits(-1.0, 1.0);
//!
//! let output = pid.compute(0.0, 0.5, 0.033).unwrap(); // measurement, setpoint, dt
//! assert!(output > 0.0);
//! assert!(pid.compute(0.0, 0.5, 0.0).is_err());
//! ```

use std::f32::consts::{PI, TAU};

use tethys_types::{AxisCalibration, TethysError, check_dt};

/// Wrap an angle in radians into `(-π, π]`.
pub fn wrap_angle(angle: f32) -> f32 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI { wrapped + TAU } else { wrapped }
}

/// A tunable PID controller for closed-loop feedback control.
///
/// The integral accumulator is clamped to half the output range so a long
/// saturation cannot wind it up past what the actuators can deliver.
#[derive(Debug, Clone)]
pub struct PidController {
    kp: f32,
    ki: f32,
    kd: f32,
    is_angle: bool,
    integral: f32,
    prev_error: Option<f32>,
    output_min: f32,
    output_max: f32,
}

impl PidController {
    /// Create a new controller with the given gains and a `[-1, 1]` output.
    pub fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self {
            kp,
            ki,
            kd,
            is_angle: false,
            integral: 0.0,
            prev_error: None,
            output_min: -1.0,
            output_max: 1.0,
        }
    }

    /// Build a controller from one row of the calibration PID table.
    pub fn from_calibration(cal: &AxisCalibration) -> Self {
        let mut pid = Self::new(cal.kp, cal.ki, cal.kd);
        pid.set_output_limits(cal.limit_min, cal.limit_max);
        pid.set_angular(cal.is_angle);
        pid
    }

    /// Update the proportional, integral, and derivative gains.
    pub fn set_gains(&mut self, kp: f32, ki: f32, kd: f32) {
        self.kp = kp;
        self.ki = ki;
        self.kd = kd;
    }

    /// Clamp the controller output to `[min, max]`.
    pub fn set_output_limits(&mut self, min: f32, max: f32) {
        self.output_min = min;
        self.output_max = max;
    }

    /// Treat set-point and measurement as angles in radians.
    pub fn set_angular(&mut self, is_angle: bool) {
        self.is_angle = is_angle;
    }

    pub fn integral(&self) -> f32 {
        self.integral
    }

    /// Compute the next controller output.
    ///
    /// - `measurement` – current measured value.
    /// - `setpoint` – desired value of the process variable.
    /// - `dt` – elapsed time since the last call, in seconds.
    ///
    /// The first call after construction or [`reset`](Self::reset) has no
    /// derivative term.
    ///
    /// # Errors
    ///
    /// Returns [`TethysError::InvalidTimestep`] if `dt` is not finite and
    /// positive; internal state is left untouched.
    pub fn compute(&mut self, measurement: f32, setpoint: f32, dt: f32) -> Result<f32, TethysError> {
        check_dt(dt)?;

        let mut error = setpoint - measurement;
        if self.is_angle {
            error = wrap_angle(error);
        }

        let p = self.kp * error;

        let i_limit = 0.5 * self.output_max.abs();
        self.integral = (self.integral + error * dt).clamp(-i_limit, i_limit);
        let i = self.ki * self.integral;

        let d = match self.prev_error {
            Some(prev) => self.kd * (error - prev) / dt,
            None => 0.0,
        };
        self.prev_error = Some(error);

        Ok((p + i + d).clamp(self.output_min, self.output_max))
    }

    /// Reset internal state (integral accumulator and derivative memory).
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn proportional_only_drives_toward_set_point() {
        let mut pid = PidController::new(2.0, 0.0, 0.0);
        pid.set_output_limits(-100.0, 100.0);

        // error = 10.0 - 0.0 = 10.0 → output = 2.0 * 10.0 = 20.0
        let output = pid.compute(0.0, 10.0, 0.1).unwrap();
        assert_relative_eq!(output, 20.0, epsilon = 1e-4);
    }

    #[test]
    fn measurement_above_set_point_drives_negative() {
        let mut pid = PidController::new(1.0, 0.0, 0.0);
        // measurement 1.0, set-point 0.2 → error = -0.8
        assert_relative_eq!(pid.compute(1.0, 0.2, 0.1).unwrap(), -0.8, epsilon = 1e-6);
    }

    #[test]
    fn output_is_zero_at_set_point() {
        let mut pid = PidController::new(1.0, 0.5, 0.2);
        for _ in 0..5 {
            let output = pid.compute(5.0, 5.0, 0.1).unwrap();
            assert!(output.abs() < 1e-6);
        }
    }

    #[test]
    fn output_clamped_to_limits() {
        let mut pid = PidController::new(100.0, 0.0, 0.0);
        pid.set_output_limits(-0.8, 0.6);
        assert_eq!(pid.compute(0.0, 1.0, 0.01).unwrap(), 0.6);
        assert_eq!(pid.compute(0.0, -1.0, 0.01).unwrap(), -0.8);
    }

    #[test]
    fn integral_is_clamped_to_half_the_output_limit() {
        let mut pid = PidController::new(0.0, 1.0, 0.0);
        for _ in 0..1000 {
            pid.compute(0.0, 10.0, 0.1).unwrap();
            assert!(pid.integral().abs() <= 0.5 + 1e-6);
        }
        assert_relative_eq!(pid.integral(), 0.5);
        for _ in 0..1000 {
            pid.compute(0.0, -10.0, 0.1).unwrap();
        }
        assert_relative_eq!(pid.integral(), -0.5);
    }

    #[test]
    fn integral_accumulates_over_time() {
        let mut pid = PidController::new(0.0, 1.0, 0.0);
        pid.compute(1.0, 1.2, 0.5).unwrap(); // integral = 0.1
        let out = pid.compute(1.0, 1.2, 0.5).unwrap(); // integral = 0.2
        assert_relative_eq!(out, 0.2, epsilon = 1e-5);
    }

    #[test]
    fn first_call_has_no_derivative_kick() {
        let mut pid = PidController::new(0.0, 0.0, 1.0);
        assert_eq!(pid.compute(0.0, 1.0, 0.01).unwrap(), 0.0);
        // error drops 1.0 → 0.5 over 0.5 s: d = 1.0 * (-0.5) / 0.5 = -1.0
        let out = pid.compute(0.5, 1.0, 0.5).unwrap();
        assert_relative_eq!(out, -1.0, epsilon = 1e-5);
    }

    #[test]
    fn angular_error_takes_the_short_way_round() {
        let mut pid = PidController::new(1.0, 0.0, 0.0);
        pid.set_angular(true);
        pid.set_output_limits(-10.0, 10.0);
        let target = 179f32.to_radians();
        let heading = (-179f32).to_radians();
        let out = pid.compute(heading, target, 0.1).unwrap();
        assert_relative_eq!(out, -2f32.to_radians(), epsilon = 1e-4);
    }

    #[test]
    fn wrap_angle_range() {
        assert_relative_eq!(wrap_angle(3.0 * PI), PI, epsilon = 1e-5);
        assert_relative_eq!(wrap_angle(-PI), PI, epsilon = 1e-5);
        assert_relative_eq!(wrap_angle(0.25), 0.25);
        assert_relative_eq!(wrap_angle(-0.25 - TAU), -0.25, epsilon = 1e-5);
        for k in -20..=20 {
            let w = wrap_angle(k as f32 * 0.7);
            assert!(w > -PI && w <= PI + 1e-6, "{k}: {w}");
        }
    }

    #[test]
    fn reset_clears_state() {
        let mut pid = PidController::new(1.0, 1.0, 1.0);
        pid.compute(0.0, 5.0, 0.1).unwrap();
        pid.reset();

        let out_after_reset = pid.compute(0.0, 0.4, 0.1).unwrap();
        let mut fresh = PidController::new(1.0, 1.0, 1.0);
        let out_fresh = fresh.compute(0.0, 0.4, 0.1).unwrap();
        assert!((out_after_reset - out_fresh).abs() < 1e-6);
    }

    #[test]
    fn invalid_dt_is_rejected_without_side_effects() {
        let mut pid = PidController::new(1.0, 1.0, 1.0);
        assert_eq!(pid.compute(0.0, 0.3, 0.0), Err(TethysError::InvalidTimestep(0.0)));
        assert!(pid.compute(0.0, 0.3, -0.1).is_err());
        assert!(pid.compute(0.0, 0.3, f32::NAN).is_err());
        assert_eq!(pid.integral(), 0.0);

        let mut fresh = PidController::new(1.0, 1.0, 1.0);
        assert_eq!(
            pid.compute(0.0, 0.3, 0.1).unwrap(),
            fresh.compute(0.0, 0.3, 0.1).unwrap()
        );
    }

    #[test]
    fn from_calibration_applies_limits_and_wrapping() {
        let cal = AxisCalibration {
            enabled: true,
            kp: 10.0,
            ki: 0.0,
            kd: 0.0,
            limit_min: -0.3,
            limit_max: 0.3,
            is_angle: true,
            max_rate: 1.0,
        };
        let mut pid = PidController::from_calibration(&cal);
        assert_eq!(pid.compute(0.0, 1.0, 0.1).unwrap(), 0.3);
        // 2π apart wraps to zero error.
        assert!(pid.compute(0.0, TAU, 0.1).unwrap().abs() < 1e-4);
    }
}
