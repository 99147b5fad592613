//! Vehicle calibration – geometry, thruster table, ESC response, timing,
//! filter noise and the per-axis PID table.
//!
//! Every field carries a serde default reproducing the reference vehicle, so
//! a partial TOML file only needs the values that differ.  Call
//! [`Calibration::validate`] once at startup; nothing downstream re-checks
//! these invariants at runtime.

use serde::{Deserialize, Serialize};

use crate::{Axis, GROUP_SIZE, THRUSTER_COUNT, TethysError};

/// Whether a thruster pushes in the horizontal plane or vertically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mount {
    Lateral,
    Vertical,
}

/// One row of the thruster table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrusterCalibration {
    pub mount: Mount,
    /// Thrust direction measured from the vehicle's +x (starboard) axis, in
    /// degrees.  Ignored for vertical thrusters.
    #[serde(default)]
    pub angle_deg: f32,
    /// Mount position `[x, y]` in mm from the centroid (+y forward).  When
    /// absent the thruster sits on the hull corner matching its slot within
    /// its group: front-left, front-right, rear-left, rear-right.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_mm: Option<[f32; 2]>,
    #[serde(default = "default_true")]
    pub working: bool,
    /// Mirror the PWM around neutral (swapped motor leads).
    #[serde(default)]
    pub inverted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(default = "default_width")]
    pub width_mm: f32,
    #[serde(default = "default_length")]
    pub length_mm: f32,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            width_mm: default_width(),
            length_mm: default_length(),
        }
    }
}

/// ESC response: cubic `a·x³ + b·x² + c·x + d` in thrust units, one set per
/// direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PwmCalibration {
    #[serde(default = "default_neutral")]
    pub neutral: i32,
    #[serde(default = "default_min_pwm")]
    pub min: i32,
    #[serde(default = "default_max_pwm")]
    pub max: i32,
    /// Thrust of a single thruster at full normalized force.
    #[serde(default = "default_max_thrust")]
    pub max_thrust: f32,
    /// `[a, b, c, d]` for positive thrust.
    #[serde(default = "default_forward")]
    pub forward: [f32; 4],
    /// `[a, b, c, d]` for negative thrust.
    #[serde(default = "default_reverse")]
    pub reverse: [f32; 4],
}

impl Default for PwmCalibration {
    fn default() -> Self {
        Self {
            neutral: default_neutral(),
            min: default_min_pwm(),
            max: default_max_pwm(),
            max_thrust: default_max_thrust(),
            forward: default_forward(),
            reverse: default_reverse(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingCalibration {
    #[serde(default = "default_control_hz")]
    pub control_hz: f32,
    #[serde(default = "default_actuator_hz")]
    pub actuator_hz: f32,
    /// Largest PWM change per actuator period, in µs.
    #[serde(default = "default_ramp_step")]
    pub ramp_step: i32,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Sensor readings older than this are treated as a sensor fault.
    #[serde(default = "default_sensor_timeout_ms")]
    pub sensor_timeout_ms: u64,
}

impl Default for TimingCalibration {
    fn default() -> Self {
        Self {
            control_hz: default_control_hz(),
            actuator_hz: default_actuator_hz(),
            ramp_step: default_ramp_step(),
            command_timeout_ms: default_command_timeout_ms(),
            sensor_timeout_ms: default_sensor_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KalmanCalibration {
    #[serde(default = "default_q_depth")]
    pub process_noise_depth: f32,
    #[serde(default = "default_q_velocity")]
    pub process_noise_velocity: f32,
    #[serde(default = "default_r")]
    pub measurement_noise: f32,
}

impl Default for KalmanCalibration {
    fn default() -> Self {
        Self {
            process_noise_depth: default_q_depth(),
            process_noise_velocity: default_q_velocity(),
            measurement_noise: default_r(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentCalibration {
    #[serde(default = "default_surface_pressure")]
    pub surface_pressure_mbar: f32,
    /// kg/m³
    #[serde(default = "default_water_density")]
    pub water_density: f32,
    #[serde(default = "default_gravity")]
    pub gravity: f32,
}

impl Default for EnvironmentCalibration {
    fn default() -> Self {
        Self {
            surface_pressure_mbar: default_surface_pressure(),
            water_density: default_water_density(),
            gravity: default_gravity(),
        }
    }
}

/// PID settings for one axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisCalibration {
    #[serde(default)]
    pub enabled: bool,
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    #[serde(default = "default_limit_min")]
    pub limit_min: f32,
    #[serde(default = "default_limit_max")]
    pub limit_max: f32,
    #[serde(default)]
    pub is_angle: bool,
    /// Setpoint change per second at full stick (m/s or rad/s).
    pub max_rate: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidTable {
    #[serde(default = "default_depth_pid")]
    pub depth: AxisCalibration,
    #[serde(default = "default_roll_pid")]
    pub roll: AxisCalibration,
    #[serde(default = "default_pitch_pid")]
    pub pitch: AxisCalibration,
    #[serde(default = "default_yaw_pid")]
    pub yaw: AxisCalibration,
}

impl PidTable {
    pub fn get(&self, axis: Axis) -> &AxisCalibration {
        match axis {
            Axis::Depth => &self.depth,
            Axis::Roll => &self.roll,
            Axis::Pitch => &self.pitch,
            Axis::Yaw => &self.yaw,
        }
    }

    pub fn get_mut(&mut self, axis: Axis) -> &mut AxisCalibration {
        match axis {
            Axis::Depth => &mut self.depth,
            Axis::Roll => &mut self.roll,
            Axis::Pitch => &mut self.pitch,
            Axis::Yaw => &mut self.yaw,
        }
    }
}

impl Default for PidTable {
    fn default() -> Self {
        Self {
            depth: default_depth_pid(),
            roll: default_roll_pid(),
            pitch: default_pitch_pid(),
            yaw: default_yaw_pid(),
        }
    }
}

/// Complete vehicle calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    #[serde(default)]
    pub geometry: Geometry,
    /// Exactly eight rows: `t1..t8`.
    #[serde(default = "default_thrusters")]
    pub thrusters: Vec<ThrusterCalibration>,
    /// Per-thruster normalized force limit used by group saturation.
    #[serde(default = "default_force_limit")]
    pub force_limit: f32,
    #[serde(default)]
    pub pwm: PwmCalibration,
    #[serde(default)]
    pub timing: TimingCalibration,
    #[serde(default)]
    pub kalman: KalmanCalibration,
    #[serde(default)]
    pub environment: EnvironmentCalibration,
    #[serde(default)]
    pub pid: PidTable,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            geometry: Geometry::default(),
            thrusters: default_thrusters(),
            force_limit: default_force_limit(),
            pwm: PwmCalibration::default(),
            timing: TimingCalibration::default(),
            kalman: KalmanCalibration::default(),
            environment: EnvironmentCalibration::default(),
            pid: PidTable::default(),
        }
    }
}

impl Calibration {
    /// Mount position of thruster `index` in mm, resolving corner defaults.
    pub fn position_of(&self, index: usize) -> [f32; 2] {
        let Some(t) = self.thrusters.get(index) else {
            return [0.0, 0.0];
        };
        if let Some(p) = t.position_mm {
            return p;
        }
        let slot = self.thrusters[..index]
            .iter()
            .filter(|o| o.mount == t.mount)
            .count();
        let hw = self.geometry.width_mm / 2.0;
        let hl = self.geometry.length_mm / 2.0;
        match slot % GROUP_SIZE {
            0 => [-hw, hl],
            1 => [hw, hl],
            2 => [-hw, -hl],
            _ => [hw, -hl],
        }
    }

    /// Check every structural and numeric invariant.
    ///
    /// # Errors
    ///
    /// Returns [`TethysError::Configuration`] describing the first violation.
    pub fn validate(&self) -> Result<(), TethysError> {
        let bad = |msg: String| Err(TethysError::Configuration(msg));

        if self.thrusters.len() != THRUSTER_COUNT {
            return bad(format!(
                "expected {THRUSTER_COUNT} thrusters, found {}",
                self.thrusters.len()
            ));
        }
        for mount in [Mount::Lateral, Mount::Vertical] {
            let n = self.thrusters.iter().filter(|t| t.mount == mount).count();
            if n != GROUP_SIZE {
                return bad(format!("expected {GROUP_SIZE} {mount:?} thrusters, found {n}"));
            }
        }
        for (i, t) in self.thrusters.iter().enumerate() {
            let pos_ok = t.position_mm.is_none_or(|p| p.iter().all(|v| v.is_finite()));
            if !t.angle_deg.is_finite() || !pos_ok {
                return bad(format!("thruster t{} has a non-finite angle or position", i + 1));
            }
        }

        let g = &self.geometry;
        if !(g.width_mm.is_finite() && g.width_mm > 0.0 && g.length_mm.is_finite() && g.length_mm > 0.0) {
            return bad("vehicle width and length must be positive".to_string());
        }
        if !(self.force_limit.is_finite() && self.force_limit > 0.0) {
            return bad(format!("force_limit must be positive, got {}", self.force_limit));
        }

        let p = &self.pwm;
        if p.min >= p.max {
            return bad(format!("pwm.min ({}) must be below pwm.max ({})", p.min, p.max));
        }
        if p.neutral < p.min || p.neutral > p.max {
            return bad(format!("pwm.neutral ({}) outside [{}, {}]", p.neutral, p.min, p.max));
        }
        if !(p.max_thrust.is_finite() && p.max_thrust > 0.0) {
            return bad("pwm.max_thrust must be positive".to_string());
        }
        if !p.forward.iter().chain(p.reverse.iter()).all(|c| c.is_finite()) {
            return bad("pwm coefficients must be finite".to_string());
        }

        let t = &self.timing;
        if !(t.control_hz.is_finite() && t.control_hz > 0.0 && t.actuator_hz.is_finite() && t.actuator_hz > 0.0) {
            return bad("timing rates must be positive".to_string());
        }
        if t.actuator_hz < t.control_hz {
            return bad(format!(
                "actuator_hz ({}) must be >= control_hz ({})",
                t.actuator_hz, t.control_hz
            ));
        }
        if t.ramp_step <= 0 {
            return bad(format!("ramp_step must be positive, got {}", t.ramp_step));
        }
        if t.command_timeout_ms == 0 || t.sensor_timeout_ms == 0 {
            return bad("timeouts must be non-zero".to_string());
        }

        let k = &self.kalman;
        if ![k.process_noise_depth, k.process_noise_velocity, k.measurement_noise]
            .iter()
            .all(|v| v.is_finite() && *v >= 0.0)
            || k.measurement_noise == 0.0
        {
            return bad("kalman noises must be non-negative and measurement noise non-zero".to_string());
        }

        let e = &self.environment;
        if !(e.water_density > 0.0 && e.gravity > 0.0 && e.surface_pressure_mbar.is_finite()) {
            return bad("environment constants must be positive".to_string());
        }

        for axis in Axis::ALL {
            let a = self.pid.get(axis);
            let nums = [a.kp, a.ki, a.kd, a.limit_min, a.limit_max, a.max_rate];
            if !nums.iter().all(|v| v.is_finite()) {
                return bad(format!("pid.{axis} contains a non-finite value"));
            }
            if a.limit_min > a.limit_max {
                return bad(format!(
                    "pid.{axis}.limit_min ({}) exceeds limit_max ({})",
                    a.limit_min, a.limit_max
                ));
            }
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Defaults (reference vehicle)
// ────────────────────────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}
fn default_width() -> f32 {
    262.629
}
fn default_length() -> f32 {
    195.311
}
fn default_force_limit() -> f32 {
    1.0
}
fn default_neutral() -> i32 {
    1500
}
fn default_min_pwm() -> i32 {
    1100
}
fn default_max_pwm() -> i32 {
    1900
}
fn default_max_thrust() -> f32 {
    2.35
}
fn default_forward() -> [f32; 4] {
    [2.227_165, -22.413_582, 135.447_75, 1535.902_9]
}
fn default_reverse() -> [f32; 4] {
    [4.585_853, 35.216_606, 169.735_1, 1464.337_1]
}
fn default_control_hz() -> f32 {
    30.0
}
fn default_actuator_hz() -> f32 {
    30.0
}
fn default_ramp_step() -> i32 {
    10
}
fn default_command_timeout_ms() -> u64 {
    1000
}
fn default_sensor_timeout_ms() -> u64 {
    500
}
fn default_q_depth() -> f32 {
    1e-4
}
fn default_q_velocity() -> f32 {
    1e-3
}
fn default_r() -> f32 {
    0.01
}
fn default_surface_pressure() -> f32 {
    1013.25
}
fn default_water_density() -> f32 {
    1025.0
}
fn default_gravity() -> f32 {
    9.81
}
fn default_limit_min() -> f32 {
    -1.0
}
fn default_limit_max() -> f32 {
    1.0
}

fn default_depth_pid() -> AxisCalibration {
    AxisCalibration {
        enabled: true,
        kp: 2.0,
        ki: 0.1,
        kd: 0.5,
        limit_min: -1.0,
        limit_max: 1.0,
        is_angle: false,
        max_rate: 0.5,
    }
}
fn default_roll_pid() -> AxisCalibration {
    AxisCalibration {
        enabled: true,
        kp: 1.5,
        ki: 0.05,
        kd: 0.2,
        limit_min: -1.0,
        limit_max: 1.0,
        is_angle: true,
        max_rate: 1.0,
    }
}
fn default_pitch_pid() -> AxisCalibration {
    AxisCalibration {
        enabled: true,
        ..default_roll_pid()
    }
}
fn default_yaw_pid() -> AxisCalibration {
    AxisCalibration {
        enabled: false,
        kp: 1.0,
        ki: 0.02,
        kd: 0.1,
        limit_min: -1.0,
        limit_max: 1.0,
        is_angle: true,
        max_rate: 1.0,
    }
}

fn default_thrusters() -> Vec<ThrusterCalibration> {
    let lateral = |angle_deg: f32| ThrusterCalibration {
        mount: Mount::Lateral,
        angle_deg,
        position_mm: None,
        working: true,
        inverted: false,
    };
    let vertical = || ThrusterCalibration {
        mount: Mount::Vertical,
        angle_deg: 0.0,
        position_mm: None,
        working: true,
        inverted: false,
    };
    vec![
        lateral(45.0),
        lateral(135.0),
        lateral(-45.0),
        lateral(-135.0),
        vertical(),
        vertical(),
        vertical(),
        vertical(),
    ]
}
