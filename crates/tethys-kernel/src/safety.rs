//! Actuator safety layer – the only code that writes to the thrusters.
//!
//! Two pieces share one [`PwmState`] and one [`CommandWatchdog`]:
//!
//! - [`CommandSink`] is the command path.  Every valid command (from the
//!   control loop or a network collaborator) updates the targets it names and
//!   heartbeats the watchdog.
//! - [`ActuatorGuard`] owns the thruster drivers and runs one
//!   [`step`](ActuatorGuard::step) per actuator sub-period.
//!
//! ```text
//!                 valid command
//!   NeutralHold ─────────────────▶ Active
//!        ▲                           │
//!        └─── silent > timeout ──────┘
//! ```
//!
//! In `Active` each thruster's live pulse width moves toward its target by at
//! most `ramp_step` µs per step and is clamped to the ESC range.  On expiry
//! every target *and* current is set to neutral in the same step; a dead link
//! must not leave thrust committed while a ramp winds down.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use tethys_types::{
    ActuatorMode, Calibration, PulseWidths, PwmCommand, THRUSTER_COUNT, TethysError,
};
use tethys_hal::Thruster;

use crate::pwm_state::PwmState;
use crate::watchdog::{CommandWatchdog, LinkHealth};

// ────────────────────────────────────────────────────────────────────────────
// Limits
// ────────────────────────────────────────────────────────────────────────────

/// ESC range and ramp rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwmLimits {
    pub neutral: i32,
    pub min: i32,
    pub max: i32,
    pub ramp_step: i32,
}

impl PwmLimits {
    pub fn from_calibration(cal: &Calibration) -> Self {
        Self {
            neutral: cal.pwm.neutral,
            min: cal.pwm.min,
            max: cal.pwm.max,
            ramp_step: cal.timing.ramp_step,
        }
    }

    pub fn clamp(&self, us: i32) -> i32 {
        us.clamp(self.min, self.max)
    }
}

/// Move `current` one ramp step toward `target`.
pub fn ramp_toward(current: i32, target: i32, step: i32) -> i32 {
    current + (target - current).clamp(-step, step)
}

// ────────────────────────────────────────────────────────────────────────────
// Command path
// ────────────────────────────────────────────────────────────────────────────

/// Cloneable handle for submitting PWM commands.
#[derive(Debug, Clone)]
pub struct CommandSink {
    state: Arc<PwmState>,
    watchdog: Arc<CommandWatchdog>,
    limits: PwmLimits,
}

impl CommandSink {
    pub fn new(state: Arc<PwmState>, watchdog: Arc<CommandWatchdog>, limits: PwmLimits) -> Self {
        Self {
            state,
            watchdog,
            limits,
        }
    }

    /// Apply a decoded command: named targets are clamped to the ESC range
    /// and stored, absent ones keep their previous value.  Always counts as
    /// a valid command for the watchdog.
    pub fn apply(&self, cmd: &PwmCommand) {
        let _commands = self.state.lock_commands();
        for (i, us) in cmd.as_array().into_iter().enumerate() {
            if let Some(us) = us {
                self.state.set_target(i, self.limits.clamp(us));
            }
        }
        self.watchdog.heartbeat();
    }

    /// Target neutral on every thruster.
    pub fn apply_neutral(&self) {
        self.apply(&PwmCommand::from_pulses([self.limits.neutral; THRUSTER_COUNT]));
    }

    /// Decode and apply a raw command-channel payload.
    ///
    /// # Errors
    ///
    /// Returns [`TethysError::Channel`] if the payload is not a JSON object.
    /// A rejected payload does not reset the watchdog.
    pub fn apply_json(&self, raw: &str) -> Result<(), TethysError> {
        let cmd = PwmCommand::from_json(raw)?;
        self.apply(&cmd);
        Ok(())
    }

    pub fn state(&self) -> &Arc<PwmState> {
        &self.state
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Actuator guard
// ────────────────────────────────────────────────────────────────────────────

/// Mode change observed during a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeTransition {
    LinkLost { silent: Duration },
    LinkRestored,
}

/// Result of one actuator sub-period.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub mode: ActuatorMode,
    pub transition: Option<ModeTransition>,
    pub current: PulseWidths,
}

/// Ramping and watchdog enforcement over the thruster bank.
pub struct ActuatorGuard {
    thrusters: Vec<Box<dyn Thruster>>,
    state: Arc<PwmState>,
    watchdog: Arc<CommandWatchdog>,
    limits: PwmLimits,
    mode: ActuatorMode,
    faulted: [bool; THRUSTER_COUNT],
}

impl ActuatorGuard {
    /// Take ownership of the thrusters and force every one to neutral before
    /// returning.
    ///
    /// # Errors
    ///
    /// Returns [`TethysError::Configuration`] unless exactly eight drivers
    /// are supplied.
    pub fn new(
        thrusters: Vec<Box<dyn Thruster>>,
        state: Arc<PwmState>,
        watchdog: Arc<CommandWatchdog>,
        limits: PwmLimits,
    ) -> Result<Self, TethysError> {
        if thrusters.len() != THRUSTER_COUNT {
            return Err(TethysError::Configuration(format!(
                "actuator guard needs {THRUSTER_COUNT} thrusters, got {}",
                thrusters.len()
            )));
        }
        let mut guard = Self {
            thrusters,
            state,
            watchdog,
            limits,
            mode: ActuatorMode::NeutralHold,
            faulted: [false; THRUSTER_COUNT],
        };
        guard.force_neutral();
        info!(neutral = limits.neutral, "thrusters armed at neutral");
        Ok(guard)
    }

    /// A [`CommandSink`] feeding this guard.
    pub fn command_sink(&self) -> CommandSink {
        CommandSink::new(Arc::clone(&self.state), Arc::clone(&self.watchdog), self.limits)
    }

    pub fn mode(&self) -> ActuatorMode {
        self.mode
    }

    pub fn state(&self) -> &Arc<PwmState> {
        &self.state
    }

    pub fn step(&mut self) -> StepReport {
        self.step_at(Instant::now())
    }

    /// Run one sub-period as seen at `now`.
    pub fn step_at(&mut self, now: Instant) -> StepReport {
        let health = match self.watchdog.check_at(now) {
            LinkHealth::Fresh => LinkHealth::Fresh,
            LinkHealth::Expired { .. } => {
                // Re-check under the command lock: a command stored after the
                // first check must survive this step.
                let state = Arc::clone(&self.state);
                let _commands = state.lock_commands();
                let health = self.watchdog.check_at(now);
                if !health.is_fresh() {
                    self.force_neutral();
                }
                health
            }
        };
        let transition = match health {
            LinkHealth::Expired { silent } => {
                if self.mode == ActuatorMode::Active {
                    self.mode = ActuatorMode::NeutralHold;
                    warn!(
                        silent_ms = silent.as_millis() as u64,
                        "command link lost, forcing neutral"
                    );
                    Some(ModeTransition::LinkLost { silent })
                } else {
                    None
                }
            }
            LinkHealth::Fresh => {
                let restored = self.mode == ActuatorMode::NeutralHold;
                if restored {
                    self.mode = ActuatorMode::Active;
                    info!("command link restored");
                }
                self.ramp();
                restored.then_some(ModeTransition::LinkRestored)
            }
        };
        StepReport {
            mode: self.mode,
            transition,
            current: self.state.currents(),
        }
    }

    /// Final neutral write on shutdown.
    pub fn park(&mut self) {
        self.force_neutral();
        self.mode = ActuatorMode::NeutralHold;
        info!("thrusters parked at neutral");
    }

    fn ramp(&mut self) {
        let l = self.limits;
        for i in 0..THRUSTER_COUNT {
            let target = l.clamp(self.state.target(i));
            let next = l.clamp(ramp_toward(self.state.current(i), target, l.ramp_step));
            self.state.set_current(i, next);
            self.write(i, next);
        }
    }

    fn force_neutral(&mut self) {
        self.state.force_all(self.limits.neutral);
        for i in 0..THRUSTER_COUNT {
            self.write(i, self.limits.neutral);
        }
    }

    fn write(&mut self, index: usize, us: i32) {
        match self.thrusters[index].set_pulse_width(us) {
            Ok(()) => {
                if std::mem::take(&mut self.faulted[index]) {
                    info!(thruster = self.thrusters[index].id(), "thruster write recovered");
                }
            }
            Err(e) => {
                if !self.faulted[index] {
                    warn!(thruster = self.thrusters[index].id(), error = %e, "thruster write failed");
                } else {
                    debug!(thruster = self.thrusters[index].id(), "thruster write still failing");
                }
                self.faulted[index] = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tethys_hal::sim::{SimMonitor, SimThruster};

    const TIMEOUT: Duration = Duration::from_millis(1000);

    fn limits() -> PwmLimits {
        PwmLimits::from_calibration(&Calibration::default())
    }

    fn guard_with(limits: PwmLimits) -> (ActuatorGuard, CommandSink, Vec<SimMonitor>) {
        let (bank, monitors) = SimThruster::bank();
        let state = Arc::new(PwmState::new(limits.neutral));
        let wd = Arc::new(CommandWatchdog::new(TIMEOUT));
        let guard = ActuatorGuard::new(bank, state, wd, limits).unwrap();
        let sink = guard.command_sink();
        (guard, sink, monitors)
    }

    fn guard() -> (ActuatorGuard, CommandSink, Vec<SimMonitor>) {
        guard_with(limits())
    }

    #[test]
    fn construction_writes_neutral_everywhere() {
        let (guard, _, monitors) = guard();
        assert_eq!(guard.mode(), ActuatorMode::NeutralHold);
        for p in &monitors {
            assert_eq!(p.pulse_width(), 1500);
            assert_eq!(p.writes(), 1);
        }
    }

    #[test]
    fn rejects_wrong_bank_size() {
        let (mut bank, _) = SimThruster::bank();
        bank.pop();
        let state = Arc::new(PwmState::new(1500));
        let wd = Arc::new(CommandWatchdog::new(TIMEOUT));
        assert!(ActuatorGuard::new(bank, state, wd, limits()).is_err());
    }

    #[test]
    fn no_command_means_neutral_hold() {
        let (mut guard, sink, monitors) = guard();
        sink.state().set_target(0, 1800);
        let report = guard.step();
        assert_eq!(report.mode, ActuatorMode::NeutralHold);
        assert_eq!(report.transition, None);
        assert_eq!(monitors[0].pulse_width(), 1500);
        assert_eq!(sink.state().target(0), 1500);
    }

    #[test]
    fn ramp_never_exceeds_step_and_arrives_on_time() {
        let (mut guard, sink, monitors) = guard();
        let mut cmd = PwmCommand::default();
        cmd.set(0, 1637);
        cmd.set(5, 1403);
        sink.apply(&cmd);

        let t0 = Instant::now();
        let first = guard.step_at(t0);
        assert_eq!(first.transition, Some(ModeTransition::LinkRestored));

        // ceil(137 / 10) = 14 steps for t1, ceil(97 / 10) = 10 for t6.
        let mut prev = first.current;
        let mut steps = 1;
        while prev[0] != 1637 {
            let r = guard.step_at(t0);
            for i in 0..THRUSTER_COUNT {
                assert!((r.current[i] - prev[i]).abs() <= 10);
            }
            prev = r.current;
            steps += 1;
            if steps == 10 {
                assert_eq!(prev[5], 1403);
            }
        }
        assert_eq!(steps, 14);
        assert_eq!(monitors[0].pulse_width(), 1637);
        assert_eq!(monitors[5].pulse_width(), 1403);
    }

    #[test]
    fn targets_are_clamped_to_esc_range() {
        let (mut guard, sink, monitors) = guard_with(PwmLimits {
            ramp_step: 1000,
            ..limits()
        });
        sink.apply_json(r#"{"t2": 2400, "t3": 600}"#).unwrap();
        assert_eq!(sink.state().target(1), 1900);
        guard.step();
        assert_eq!(monitors[1].pulse_width(), 1900);
        assert_eq!(monitors[2].pulse_width(), 1100);
    }

    #[test]
    fn partial_command_keeps_other_targets() {
        let (_, sink, _) = guard();
        sink.apply_json(r#"{"t1": 1600, "t2": 1400}"#).unwrap();
        sink.apply_json(r#"{"t2": 1450, "bogus": 7}"#).unwrap();
        assert_eq!(sink.state().target(0), 1600);
        assert_eq!(sink.state().target(1), 1450);
    }

    #[test]
    fn malformed_payload_does_not_feed_watchdog() {
        let (mut guard, sink, _) = guard();
        assert!(sink.apply_json("[1600]").is_err());
        assert_eq!(guard.step().mode, ActuatorMode::NeutralHold);
        // An empty object is still a valid command.
        sink.apply_json("{}").unwrap();
        assert_eq!(guard.step().mode, ActuatorMode::Active);
    }

    #[test]
    fn watchdog_expiry_forces_exact_neutral_in_one_step() {
        let (mut guard, sink, monitors) = guard_with(PwmLimits {
            ramp_step: 1000,
            ..limits()
        });
        sink.apply(&PwmCommand::from_pulses([1800, 1200, 1750, 1250, 1900, 1100, 1600, 1400]));
        let t0 = Instant::now();
        guard.step_at(t0);
        assert_eq!(monitors[0].pulse_width(), 1800);

        let report = guard.step_at(t0 + TIMEOUT + Duration::from_millis(50));
        assert_eq!(report.mode, ActuatorMode::NeutralHold);
        assert!(matches!(report.transition, Some(ModeTransition::LinkLost { .. })));
        assert_eq!(report.current, [1500; THRUSTER_COUNT]);
        assert_eq!(sink.state().targets(), [1500; THRUSTER_COUNT]);
        for p in &monitors {
            assert_eq!(p.pulse_width(), 1500);
        }

        // Staying silent reports no further transition.
        let again = guard.step_at(t0 + 2 * TIMEOUT);
        assert_eq!(again.transition, None);
    }

    #[test]
    fn next_valid_command_restores_active_without_debounce() {
        let (mut guard, sink, _) = guard();
        sink.apply(&PwmCommand::default());
        let t0 = Instant::now();
        guard.step_at(t0);
        guard.step_at(t0 + 2 * TIMEOUT);
        assert_eq!(guard.mode(), ActuatorMode::NeutralHold);

        let mut cmd = PwmCommand::default();
        cmd.set(7, 1520);
        sink.apply(&cmd);
        let report = guard.step();
        assert_eq!(report.transition, Some(ModeTransition::LinkRestored));
        assert_eq!(report.current[7], 1510);
    }

    #[test]
    fn write_failure_does_not_stop_other_thrusters() {
        let (mut guard, sink, monitors) = guard();
        monitors[2].set_failing(true);
        sink.apply(&PwmCommand::from_pulses([1520; THRUSTER_COUNT]));
        guard.step();
        assert_eq!(monitors[2].pulse_width(), 1500);
        assert_eq!(monitors[3].pulse_width(), 1510);
        monitors[2].set_failing(false);
        guard.step();
        assert_eq!(monitors[2].pulse_width(), 1520);
    }

    #[test]
    fn apply_neutral_resets_every_target() {
        let (_, sink, _) = guard();
        sink.apply(&PwmCommand::from_pulses([1650; THRUSTER_COUNT]));
        sink.apply_neutral();
        assert_eq!(sink.state().targets(), [1500; THRUSTER_COUNT]);
    }

    #[test]
    fn command_racing_expiry_is_never_lost() {
        for _ in 0..200 {
            let (mut guard, sink, _) = guard_with(PwmLimits {
                ramp_step: 1000,
                ..limits()
            });
            let mut cmd = PwmCommand::default();
            cmd.set(0, 1650);
            let sender = {
                let sink = sink.clone();
                std::thread::spawn(move || sink.apply(&cmd))
            };
            while !sender.is_finished() {
                guard.step();
            }
            sender.join().unwrap();

            let report = guard.step();
            assert_eq!(report.mode, ActuatorMode::Active);
            assert_eq!(sink.state().target(0), 1650);
            assert_eq!(report.current[0], 1650);
        }
    }

    #[test]
    fn park_writes_neutral() {
        let (mut guard, sink, monitors) = guard();
        sink.apply(&PwmCommand::from_pulses([1700; THRUSTER_COUNT]));
        guard.step();
        guard.park();
        assert_eq!(guard.mode(), ActuatorMode::NeutralHold);
        assert!(monitors.iter().all(|p| p.pulse_width() == 1500));
    }

    #[test]
    fn ramp_toward_is_symmetric() {
        assert_eq!(ramp_toward(1500, 1600, 15), 1515);
        assert_eq!(ramp_toward(1500, 1400, 15), 1485);
        assert_eq!(ramp_toward(1595, 1600, 15), 1600);
        assert_eq!(ramp_toward(1600, 1600, 15), 1600);
    }
}
