//! Normalized force → ESC pulse width.
//!
//! Each direction of the thruster has its own empirically fitted cubic
//! `pwm = a·x³ + b·x² + c·x + d`, where `x` is the requested thrust in the
//! ESC's physical units (`force × max_thrust`).  Forces inside the
//! [`DEADBAND`] map straight to neutral so the motor never twitches around
//! zero.

use tethys_types::{Calibration, NEUTRAL_PWM, PulseWidths, THRUSTER_COUNT, ThrusterForces};

/// Forces with magnitude below this are treated as zero.
pub const DEADBAND: f32 = 0.01;

/// Cubic ESC response `a·x³ + b·x² + c·x + d`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cubic {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
}

impl Cubic {
    pub fn from_coefficients([a, b, c, d]: [f32; 4]) -> Self {
        Self { a, b, c, d }
    }

    /// Evaluate with Horner's rule.
    pub fn eval(&self, x: f32) -> f32 {
        ((self.a * x + self.b) * x + self.c) * x + self.d
    }
}

/// Maps normalized forces to integer microsecond pulse widths.
#[derive(Debug, Clone, PartialEq)]
pub struct PwmMapper {
    forward: Cubic,
    reverse: Cubic,
    max_thrust: f32,
    neutral: i32,
    inverted: [bool; THRUSTER_COUNT],
}

impl Default for PwmMapper {
    fn default() -> Self {
        Self::from_calibration(&Calibration::default())
    }
}

impl PwmMapper {
    pub fn from_calibration(cal: &Calibration) -> Self {
        let mut inverted = [false; THRUSTER_COUNT];
        for (slot, t) in inverted.iter_mut().zip(cal.thrusters.iter()) {
            *slot = t.inverted;
        }
        Self {
            forward: Cubic::from_coefficients(cal.pwm.forward),
            reverse: Cubic::from_coefficients(cal.pwm.reverse),
            max_thrust: cal.pwm.max_thrust,
            neutral: cal.pwm.neutral,
            inverted,
        }
    }

    pub fn neutral(&self) -> i32 {
        self.neutral
    }

    pub fn is_inverted(&self, index: usize) -> bool {
        self.inverted.get(index).copied().unwrap_or(false)
    }

    /// Pulse widths at full reverse and full forward force.
    pub fn full_scale(&self) -> (i32, i32) {
        (self.map(-1.0), self.map(1.0))
    }

    /// Pulse width for one normalized force.
    ///
    /// The force is clamped to `[-1, 1]`; a non-finite force maps to neutral.
    pub fn map(&self, force: f32) -> i32 {
        if !force.is_finite() || force.abs() < DEADBAND {
            return self.neutral;
        }
        let x = force.clamp(-1.0, 1.0) * self.max_thrust;
        let curve = if x > 0.0 { &self.forward } else { &self.reverse };
        curve.eval(x).round() as i32
    }

    /// Mirror a pulse width around neutral (for swapped motor leads).
    pub fn invert(&self, pwm: i32) -> i32 {
        2 * self.neutral - pwm
    }

    /// Map all eight forces, applying per-thruster inversion.
    pub fn map_all(&self, forces: &ThrusterForces) -> PulseWidths {
        let mut out = [self.neutral; THRUSTER_COUNT];
        for (i, (slot, f)) in out.iter_mut().zip(forces.iter()).enumerate() {
            let pwm = self.map(*f);
            *slot = if self.inverted[i] { self.invert(pwm) } else { pwm };
        }
        out
    }
}

/// A full set of neutral pulse widths.
pub fn neutral_pulses() -> PulseWidths {
    [NEUTRAL_PWM; THRUSTER_COUNT]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadband_maps_to_neutral() {
        let m = PwmMapper::default();
        assert_eq!(m.map(0.0), 1500);
        assert_eq!(m.map(0.009), 1500);
        assert_eq!(m.map(-0.009), 1500);
        assert_eq!(m.map(f32::NAN), 1500);
    }

    #[test]
    fn full_scale_endpoints() {
        let m = PwmMapper::default();
        let fwd = m.map(1.0);
        let rev = m.map(-1.0);
        assert!((1755..=1765).contains(&fwd), "forward {fwd}");
        assert!((1195..=1205).contains(&rev), "reverse {rev}");
        // Out-of-range forces saturate at the endpoints.
        assert_eq!(m.map(3.0), fwd);
        assert_eq!(m.map(-3.0), rev);
    }

    #[test]
    fn just_outside_deadband_leaves_neutral() {
        let m = PwmMapper::default();
        assert!(m.map(0.02) > 1500);
        assert!(m.map(-0.02) < 1500);
    }

    #[test]
    fn mapping_is_monotonic_on_each_side() {
        let m = PwmMapper::default();
        let mut prev = m.map(DEADBAND);
        for k in 2..=100 {
            let pwm = m.map(k as f32 / 100.0);
            assert!(pwm >= prev, "forward not monotonic at {k}");
            prev = pwm;
        }
        let mut prev = m.map(-DEADBAND);
        for k in 2..=100 {
            let pwm = m.map(-(k as f32) / 100.0);
            assert!(pwm <= prev, "reverse not monotonic at {k}");
            prev = pwm;
        }
    }

    #[test]
    fn inversion_mirrors_around_neutral() {
        let m = PwmMapper::default();
        assert_eq!(m.invert(1600), 1400);
        assert_eq!(m.invert(1500), 1500);
        assert_eq!(m.invert(m.invert(1733)), 1733);
    }

    #[test]
    fn map_all_applies_inverted_flag() {
        let mut cal = Calibration::default();
        cal.thrusters[2].inverted = true;
        let m = PwmMapper::from_calibration(&cal);
        let pwm = m.map_all(&[0.5, 0.0, 0.5, 0.0, -0.5, 0.0, 0.0, 0.0]);
        assert_eq!(pwm[0], m.map(0.5));
        assert_eq!(pwm[2], m.invert(m.map(0.5)));
        assert_eq!(pwm[1], 1500);
        assert!(pwm[4] < 1500);
        assert_eq!(neutral_pulses(), [1500; THRUSTER_COUNT]);
    }
}
