//! Thrust allocation – 6-DOF demand → eight normalized thruster forces.
//!
//! The vehicle carries two independent thruster groups and the allocator
//! solves each as its own 3-DOF problem:
//!
//! | Group | Demand rows | Column for thruster at `(x, y)`, angle `θ` |
//! |---|---|---|
//! | lateral  | surge, sway, yaw   | `[sin θ, cos θ, x·sin θ − y·cos θ]` |
//! | vertical | roll, pitch, heave | `[−x, −y, 1]` |
//!
//! Angles are measured from +x (starboard) and +y points forward.  Forces are
//! obtained from the Moore–Penrose pseudo-inverse, `t = pinv(B) · v`, which is
//! the minimum-norm solution for a full-rank group and the least-squares fit
//! when the demand is infeasible.  Columns of failed thrusters are zeroed
//! before the pseudo-inverse is taken.
//!
//! After solving, a group whose largest force exceeds the per-thruster limit
//! is scaled down as a whole, which keeps the commanded direction instead of
//! clipping components independently.  The two groups saturate separately so
//! a heave demand never steals yaw authority.
//!
//! # Example
//!
//! ```rust
//! use tethys_hal::allocator::{ThrustAllocator, ThrusterLayout};
//! use tethys_types::{Calibration, MotionDemand};
//!
//! let layout = ThrusterLayout::from_calibration(&Calibration::default()).unwrap();
//! let allocator = ThrustAllocator::new(layout, 1.0).unwrap();
//!
//! let forces = allocator.allocate(&MotionDemand { surge: 2.0, ..Default::default() });
//! assert!(forces[..4].iter().all(|f| (f.abs() - 0.7071).abs() < 1e-3));
//! assert!(forces[4..].iter().all(|f| *f == 0.0));
//! ```

use nalgebra::{Matrix3x4, Matrix4x3, Vector3, Vector4};
use tracing::{debug, warn};

use tethys_types::{
    Calibration, GROUP_SIZE, MotionDemand, Mount, THRUSTER_COUNT, TethysError, ThrusterForces,
    ThrusterGroup,
};

/// Singular values below this are treated as zero by the pseudo-inverse.
const PINV_EPS: f32 = 1e-6;

/// Minimum working thrusters per group for full allocation rank.
pub const MIN_WORKING_PER_GROUP: usize = 3;

// ────────────────────────────────────────────────────────────────────────────
// Layout
// ────────────────────────────────────────────────────────────────────────────

/// Physical maximum of each demand axis at full stick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisMaxima {
    /// Net surge (or sway) force with every lateral thruster at full force.
    pub axial_force: f32,
    pub yaw_torque: f32,
    pub heave_force: f32,
    pub roll_torque: f32,
    pub pitch_torque: f32,
}

/// Fixed thruster geometry plus the mutable working mask.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrusterLayout {
    positions: [[f32; 2]; THRUSTER_COUNT],
    angles_rad: [f32; THRUSTER_COUNT],
    working: [bool; THRUSTER_COUNT],
    lateral: [usize; GROUP_SIZE],
    vertical: [usize; GROUP_SIZE],
}

impl ThrusterLayout {
    /// Build the layout from a calibration thruster table.
    ///
    /// # Errors
    ///
    /// Returns [`TethysError::Configuration`] if the table does not hold
    /// exactly four lateral and four vertical thrusters.
    pub fn from_calibration(cal: &Calibration) -> Result<Self, TethysError> {
        if cal.thrusters.len() != THRUSTER_COUNT {
            return Err(TethysError::Configuration(format!(
                "thruster table has {} rows, expected {THRUSTER_COUNT}",
                cal.thrusters.len()
            )));
        }

        let mut positions = [[0.0; 2]; THRUSTER_COUNT];
        let mut angles_rad = [0.0; THRUSTER_COUNT];
        let mut working = [true; THRUSTER_COUNT];
        let mut lateral = Vec::with_capacity(GROUP_SIZE);
        let mut vertical = Vec::with_capacity(GROUP_SIZE);

        for (i, t) in cal.thrusters.iter().enumerate() {
            positions[i] = cal.position_of(i);
            angles_rad[i] = t.angle_deg.to_radians();
            working[i] = t.working;
            match t.mount {
                Mount::Lateral => lateral.push(i),
                Mount::Vertical => vertical.push(i),
            }
        }

        let group = |v: Vec<usize>, name: &str| -> Result<[usize; GROUP_SIZE], TethysError> {
            let n = v.len();
            v.try_into().map_err(|_| {
                TethysError::Configuration(format!(
                    "{name} group has {n} thrusters, expected {GROUP_SIZE}"
                ))
            })
        };

        Ok(Self {
            positions,
            angles_rad,
            working,
            lateral: group(lateral, "lateral")?,
            vertical: group(vertical, "vertical")?,
        })
    }

    /// Thruster indices (0-based) belonging to `group`, in column order.
    pub fn indices(&self, group: ThrusterGroup) -> [usize; GROUP_SIZE] {
        match group {
            ThrusterGroup::Lateral => self.lateral,
            ThrusterGroup::Vertical => self.vertical,
        }
    }

    pub fn is_working(&self, index: usize) -> bool {
        self.working.get(index).copied().unwrap_or(false)
    }

    pub fn working_count(&self, group: ThrusterGroup) -> usize {
        self.indices(group).iter().filter(|&&i| self.working[i]).count()
    }

    /// Allocation matrix `B` for `group`.  When `masked`, columns of failed
    /// thrusters are zero.
    pub fn allocation_matrix(&self, group: ThrusterGroup, masked: bool) -> Matrix3x4<f32> {
        let mut b = Matrix3x4::zeros();
        for (col, &i) in self.indices(group).iter().enumerate() {
            if masked && !self.working[i] {
                continue;
            }
            let [x, y] = self.positions[i];
            let column = match group {
                ThrusterGroup::Lateral => {
                    let (s, c) = self.angles_rad[i].sin_cos();
                    Vector3::new(s, c, x * s - y * c)
                }
                ThrusterGroup::Vertical => Vector3::new(-x, -y, 1.0),
            };
            b.set_column(col, &column);
        }
        b
    }

    /// Net wrench produced by `forces` on the working thrusters.
    ///
    /// This is the forward map `B · t`; a feasible demand survives an
    /// allocate/wrench round trip unchanged.
    pub fn wrench(&self, forces: &ThrusterForces) -> MotionDemand {
        let gather = |group| {
            let idx = self.indices(group);
            self.allocation_matrix(group, true)
                * Vector4::new(forces[idx[0]], forces[idx[1]], forces[idx[2]], forces[idx[3]])
        };
        let lat = gather(ThrusterGroup::Lateral);
        let ver = gather(ThrusterGroup::Vertical);
        MotionDemand {
            surge: lat[0],
            sway: lat[1],
            yaw: lat[2],
            roll: ver[0],
            pitch: ver[1],
            heave: ver[2],
        }
    }

    /// Physical axis maxima of the nominal (fully working) vehicle: each is
    /// the sum of absolute entries of its allocation-matrix row.
    pub fn axis_maxima(&self) -> AxisMaxima {
        let row_sum = |b: &Matrix3x4<f32>, r: usize| b.row(r).iter().map(|v| v.abs()).sum::<f32>();
        let lat = self.allocation_matrix(ThrusterGroup::Lateral, false);
        let ver = self.allocation_matrix(ThrusterGroup::Vertical, false);
        AxisMaxima {
            axial_force: row_sum(&lat, 0),
            yaw_torque: row_sum(&lat, 2),
            roll_torque: row_sum(&ver, 0),
            pitch_torque: row_sum(&ver, 1),
            heave_force: row_sum(&ver, 2),
        }
    }

    fn set_working(&mut self, index: usize, working: bool) {
        self.working[index] = working;
    }

    fn group_of(&self, index: usize) -> ThrusterGroup {
        if self.lateral.contains(&index) {
            ThrusterGroup::Lateral
        } else {
            ThrusterGroup::Vertical
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Allocator
// ────────────────────────────────────────────────────────────────────────────

/// Pseudo-inverse thrust allocator with per-group saturation.
#[derive(Debug, Clone)]
pub struct ThrustAllocator {
    layout: ThrusterLayout,
    force_limit: f32,
    lateral_pinv: Matrix4x3<f32>,
    vertical_pinv: Matrix4x3<f32>,
}

impl ThrustAllocator {
    /// Create an allocator for `layout`, saturating each group at
    /// `force_limit`.
    ///
    /// # Errors
    ///
    /// Returns [`TethysError::Configuration`] if `force_limit` is not positive.
    pub fn new(layout: ThrusterLayout, force_limit: f32) -> Result<Self, TethysError> {
        if !(force_limit.is_finite() && force_limit > 0.0) {
            return Err(TethysError::Configuration(format!(
                "force limit must be positive, got {force_limit}"
            )));
        }
        let lateral_pinv = solve(&layout, ThrusterGroup::Lateral)?;
        let vertical_pinv = solve(&layout, ThrusterGroup::Vertical)?;
        Ok(Self {
            layout,
            force_limit,
            lateral_pinv,
            vertical_pinv,
        })
    }

    pub fn layout(&self) -> &ThrusterLayout {
        &self.layout
    }

    /// Map a physically scaled demand to per-thruster forces in
    /// `[-force_limit, force_limit]`.
    pub fn allocate(&self, demand: &MotionDemand) -> ThrusterForces {
        let mut forces = [0.0; THRUSTER_COUNT];

        let lat = self.saturate(self.lateral_pinv * Vector3::new(demand.surge, demand.sway, demand.yaw));
        let ver = self.saturate(self.vertical_pinv * Vector3::new(demand.roll, demand.pitch, demand.heave));

        for (group, t) in [(ThrusterGroup::Lateral, lat), (ThrusterGroup::Vertical, ver)] {
            for (col, &i) in self.layout.indices(group).iter().enumerate() {
                // Exact zero for failed thrusters; SVD round-off can leave ~1e-9.
                forces[i] = if self.layout.working[i] { t[col] } else { 0.0 };
            }
        }
        forces
    }

    /// Mark thruster `index` (0-based) as working or failed and rebuild the
    /// affected group's pseudo-inverse.
    ///
    /// # Errors
    ///
    /// Returns [`TethysError::Configuration`] for an out-of-range index.
    pub fn set_working(&mut self, index: usize, working: bool) -> Result<(), TethysError> {
        if index >= THRUSTER_COUNT {
            return Err(TethysError::Configuration(format!(
                "thruster index {index} out of range"
            )));
        }
        if self.layout.is_working(index) == working {
            return Ok(());
        }
        self.layout.set_working(index, working);
        let group = self.layout.group_of(index);
        let pinv = solve(&self.layout, group)?;
        match group {
            ThrusterGroup::Lateral => self.lateral_pinv = pinv,
            ThrusterGroup::Vertical => self.vertical_pinv = pinv,
        }
        debug!(thruster = index + 1, working, %group, "thruster mask changed");
        Ok(())
    }

    /// Groups that have lost full allocation rank, with their working count.
    pub fn degraded_groups(&self) -> Vec<(ThrusterGroup, usize)> {
        [ThrusterGroup::Lateral, ThrusterGroup::Vertical]
            .into_iter()
            .map(|g| (g, self.layout.working_count(g)))
            .filter(|&(_, n)| n < MIN_WORKING_PER_GROUP)
            .collect()
    }

    fn saturate(&self, mut t: Vector4<f32>) -> Vector4<f32> {
        let max_abs = t.amax();
        if max_abs > self.force_limit {
            t *= self.force_limit / max_abs;
        }
        t
    }
}

fn solve(layout: &ThrusterLayout, group: ThrusterGroup) -> Result<Matrix4x3<f32>, TethysError> {
    let working = layout.working_count(group);
    if working < MIN_WORKING_PER_GROUP {
        warn!(%group, working, "degraded allocation: yaw/roll cancellation no longer guaranteed");
    }
    layout
        .allocation_matrix(group, true)
        .pseudo_inverse(PINV_EPS)
        .map_err(|e| TethysError::Configuration(format!("{group} pseudo-inverse failed: {e}")))
}
