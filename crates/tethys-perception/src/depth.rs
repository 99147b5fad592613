//! Depth estimation from the pressure sensor.
//!
//! [`pressure_to_depth`] converts absolute pressure to metres of water;
//! [`DepthEstimator`] smooths that raw depth with a two-state Kalman filter.
//!
//! The filter tracks `x = [depth, velocity]` under a constant-velocity model:
//!
//! ```text
//! F = | 1  dt |      H = | 1  0 |
//!     | 0   1 |
//! ```
//!
//! Only depth is measured; the velocity state exists so the estimate keeps
//! moving sensibly between sparse or noisy samples.  It is never exposed.
//!
//! # Example
//!
//! ```rust
//! use tethys_perception::depth::DepthEstimator;
//!
//! let mut kf = DepthEstimator::default();
//! let mut depth = 0.0;
//! for _ in 0..200 {
//!     depth = kf.update(2.0, 1.0 / 30.0).unwrap();
//! }
//! assert!((depth - 2.0).abs() < 0.05);
//! ```

use nalgebra::{Matrix1x2, Matrix2, Matrix2x1, Vector2};
use tracing::debug;

use tethys_types::{EnvironmentCalibration, KalmanCalibration, TethysError, check_dt};

/// Depth in metres below the surface for an absolute pressure in mbar.
///
/// Readings above surface pressure clamp to zero.
pub fn pressure_to_depth(pressure_mbar: f32, env: &EnvironmentCalibration) -> f32 {
    let pascals = (pressure_mbar - env.surface_pressure_mbar) * 100.0;
    (pascals / (env.water_density * env.gravity)).max(0.0)
}

/// Kalman filter over `[depth, velocity]`.
#[derive(Debug, Clone)]
pub struct DepthEstimator {
    x: Vector2<f32>,
    p: Matrix2<f32>,
    q: Matrix2<f32>,
    r: f32,
    f: Matrix2<f32>,
    h: Matrix1x2<f32>,
}

impl Default for DepthEstimator {
    fn default() -> Self {
        Self::new(&KalmanCalibration::default(), 0.0)
    }
}

impl DepthEstimator {
    /// Create a filter starting at `initial_depth` with zero velocity and
    /// unit covariance.
    pub fn new(noise: &KalmanCalibration, initial_depth: f32) -> Self {
        Self {
            x: Vector2::new(initial_depth, 0.0),
            p: Matrix2::identity(),
            q: Matrix2::new(
                noise.process_noise_depth,
                0.0,
                0.0,
                noise.process_noise_velocity,
            ),
            r: noise.measurement_noise,
            f: Matrix2::identity(),
            h: Matrix1x2::new(1.0, 0.0),
        }
    }

    /// Current filtered depth without feeding a new sample.
    pub fn depth(&self) -> f32 {
        self.x[0]
    }

    /// Trace of the state covariance; shrinks as the filter gains confidence.
    pub fn uncertainty(&self) -> f32 {
        self.p.trace()
    }

    /// Predict forward by `dt` seconds, correct with `measured_depth` and
    /// return the filtered depth.
    ///
    /// # Errors
    ///
    /// Returns [`TethysError::InvalidTimestep`] for a non-positive or
    /// non-finite `dt`, and [`TethysError::SensorFault`] for a non-finite
    /// measurement.  The filter state is untouched in both cases.
    pub fn update(&mut self, measured_depth: f32, dt: f32) -> Result<f32, TethysError> {
        if let Err(e) = check_dt(dt) {
            debug!(dt, "depth update rejected: bad timestep");
            return Err(e);
        }
        if !measured_depth.is_finite() {
            debug!(sample = measured_depth, "depth update rejected: non-finite sample");
            return Err(TethysError::SensorFault(format!(
                "non-finite depth sample {measured_depth}"
            )));
        }

        // Predict.
        self.f[(0, 1)] = dt;
        self.x = self.f * self.x;
        self.p = self.f * self.p * self.f.transpose() + self.q;

        // Correct.
        let y = measured_depth - (self.h * self.x)[0];
        let s = (self.h * self.p * self.h.transpose())[0] + self.r;
        let k: Matrix2x1<f32> = self.p * self.h.transpose() / s;
        self.x += k * y;
        self.p = (Matrix2::identity() - k * self.h) * self.p;

        Ok(self.x[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const DT: f32 = 1.0 / 30.0;

    #[test]
    fn surface_pressure_is_zero_depth() {
        let env = EnvironmentCalibration::default();
        assert_eq!(pressure_to_depth(env.surface_pressure_mbar, &env), 0.0);
        // Above-surface readings (weather, sensor offset) clamp.
        assert_eq!(pressure_to_depth(1000.0, &env), 0.0);
    }

    #[test]
    fn ten_metres_of_sea_water() {
        let env = EnvironmentCalibration::default();
        let p = env.surface_pressure_mbar + 10.0 * env.water_density * env.gravity / 100.0;
        assert_relative_eq!(pressure_to_depth(p, &env), 10.0, epsilon = 1e-3);
    }

    #[test]
    fn converges_to_constant_measurement() {
        let mut kf = DepthEstimator::default();
        let mut last = kf.depth();
        for _ in 0..300 {
            last = kf.update(3.0, DT).unwrap();
            // The velocity state allows a few mm of overshoot, never more.
            assert!(last <= 3.01, "estimate overshot: {last}");
        }
        assert_relative_eq!(last, 3.0, epsilon = 1e-3);
    }

    #[test]
    fn error_envelope_shrinks_every_second() {
        let mut kf = DepthEstimator::default();
        let mut envelope = f32::INFINITY;
        for _ in 0..10 {
            let mut worst: f32 = 0.0;
            for _ in 0..30 {
                worst = worst.max((kf.update(3.0, DT).unwrap() - 3.0).abs());
            }
            assert!(worst <= envelope + 1e-4, "{worst} > {envelope}");
            envelope = worst;
        }
    }

    #[test]
    fn first_sample_is_mostly_trusted() {
        // Unit prior covariance against R = 0.01 puts the gain near 1.
        let mut kf = DepthEstimator::default();
        let d = kf.update(1.0, DT).unwrap();
        assert!(d > 0.95 && d < 1.0, "{d}");
    }

    #[test]
    fn uncertainty_shrinks_with_samples() {
        let mut kf = DepthEstimator::default();
        let before = kf.uncertainty();
        for _ in 0..20 {
            kf.update(0.5, DT).unwrap();
        }
        assert!(kf.uncertainty() < before);
    }

    #[test]
    fn smooths_noisy_samples() {
        let mut kf = DepthEstimator::new(&KalmanCalibration::default(), 2.0);
        for _ in 0..100 {
            kf.update(2.0, DT).unwrap();
        }
        // Alternating ±0.1 m noise around 2 m.
        let mut worst: f32 = 0.0;
        for k in 0..100 {
            let noise = if k % 2 == 0 { 0.1 } else { -0.1 };
            let d = kf.update(2.0 + noise, DT).unwrap();
            worst = worst.max((d - 2.0).abs());
        }
        assert!(worst < 0.1, "filtered error {worst} not below raw noise");
    }

    #[test]
    fn tracks_a_steady_descent() {
        let mut kf = DepthEstimator::default();
        let mut truth = 0.0;
        let mut est = 0.0;
        for _ in 0..300 {
            truth += 0.3 * DT;
            est = kf.update(truth, DT).unwrap();
        }
        assert_relative_eq!(est, truth, epsilon = 0.05);
    }

    #[test]
    fn invalid_inputs_leave_state_untouched() {
        let mut kf = DepthEstimator::default();
        kf.update(1.0, DT).unwrap();
        let depth = kf.depth();
        let cov = kf.uncertainty();
        assert_eq!(kf.update(5.0, 0.0), Err(TethysError::InvalidTimestep(0.0)));
        assert!(kf.update(5.0, -DT).is_err());
        assert!(matches!(kf.update(f32::NAN, DT), Err(TethysError::SensorFault(_))));
        assert_eq!(kf.depth(), depth);
        assert_eq!(kf.uncertainty(), cov);
    }
}
