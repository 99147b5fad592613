//! Simulated sensor collaborator.
//!
//! Closes the loop for headless runs: every period it reads the pulse widths
//! actually reaching the [`SimThruster`][tethys_hal::SimThruster] bank,
//! advances a [`SimPlant`] and hands the resulting pressure and attitude to
//! [`SharedState`] exactly as a real pressure-sensor/IMU poller would.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::debug;

use tethys_hal::{SimPlant, SimMonitor};
use tethys_types::{NEUTRAL_PWM, PulseWidths, TethysError, THRUSTER_COUNT};

use crate::shared::SharedState;
use crate::supervisor::sleep_until;

/// Spawn the simulated sensor thread.  It exits when `shared` stops running.
///
/// # Errors
///
/// Returns [`TethysError::HardwareFault`] if the thread cannot be spawned.
pub fn spawn_sim_sensors(
    mut plant: SimPlant,
    monitors: Vec<SimMonitor>,
    shared: Arc<SharedState>,
    period: Duration,
) -> Result<JoinHandle<()>, TethysError> {
    thread::Builder::new()
        .name("tethys-sim-sensors".into())
        .spawn(move || {
            let mut last = Instant::now();
            let mut next = last;
            while shared.is_running() {
                let now = Instant::now();
                let dt = now.duration_since(last).as_secs_f32();
                last = now;

                let pulses = read_pulses(&monitors);
                plant.step(&pulses, dt);
                shared.publish_sensors_at(plant.reading(), now);

                next += period;
                sleep_until(&mut next);
            }
            debug!(depth_m = plant.depth(), "sim sensors stopped");
        })
        .map_err(|e| TethysError::HardwareFault {
            component: "sim-sensors".into(),
            details: e.to_string(),
        })
}

fn read_pulses(monitors: &[SimMonitor]) -> PulseWidths {
    let mut pulses = [NEUTRAL_PWM; THRUSTER_COUNT];
    for (slot, p) in pulses.iter_mut().zip(monitors) {
        *slot = p.pulse_width();
    }
    pulses
}
