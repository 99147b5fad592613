//! [`PwmState`] – commanded and live pulse widths shared between threads.
//!
//! `target` has one writer (the command path) and one reader (the actuator
//! loop).  `current` has one writer (the actuator loop) and any number of
//! read-only consumers such as telemetry.  Each entry is an independent
//! atomic, so reads never block.
//!
//! The command lock only orders a command write against the safety layer's
//! expiry neutralisation; see [`ActuatorGuard`](crate::ActuatorGuard).

use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::{Mutex, MutexGuard};

use tethys_types::{PulseWidths, THRUSTER_COUNT};

#[derive(Debug)]
pub struct PwmState {
    target: [AtomicI32; THRUSTER_COUNT],
    current: [AtomicI32; THRUSTER_COUNT],
    commands: Mutex<()>,
}

impl PwmState {
    /// Every thruster targeted at and sitting on `neutral`.
    pub fn new(neutral: i32) -> Self {
        Self {
            target: std::array::from_fn(|_| AtomicI32::new(neutral)),
            current: std::array::from_fn(|_| AtomicI32::new(neutral)),
            commands: Mutex::new(()),
        }
    }

    pub fn target(&self, index: usize) -> i32 {
        self.target[index].load(Ordering::Acquire)
    }

    pub fn set_target(&self, index: usize, us: i32) {
        self.target[index].store(us, Ordering::Release);
    }

    pub fn targets(&self) -> PulseWidths {
        std::array::from_fn(|i| self.target(i))
    }

    pub fn current(&self, index: usize) -> i32 {
        self.current[index].load(Ordering::Acquire)
    }

    pub(crate) fn set_current(&self, index: usize, us: i32) {
        self.current[index].store(us, Ordering::Release);
    }

    pub fn currents(&self) -> PulseWidths {
        std::array::from_fn(|i| self.current(i))
    }

    /// Held while a command is stored and the watchdog fed, and while an
    /// expired link is neutralised.
    pub(crate) fn lock_commands(&self) -> MutexGuard<'_, ()> {
        self.commands.lock()
    }

    /// Pin both target and current of every thruster to `neutral`.
    pub(crate) fn force_all(&self, neutral: i32) {
        for i in 0..THRUSTER_COUNT {
            self.set_target(i, neutral);
            self.set_current(i, neutral);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_neutral() {
        let s = PwmState::new(1500);
        assert_eq!(s.targets(), [1500; THRUSTER_COUNT]);
        assert_eq!(s.currents(), [1500; THRUSTER_COUNT]);
    }

    #[test]
    fn target_and_current_are_independent() {
        let s = PwmState::new(1500);
        s.set_target(3, 1700);
        assert_eq!(s.target(3), 1700);
        assert_eq!(s.current(3), 1500);
        s.set_current(3, 1510);
        s.force_all(1500);
        assert_eq!(s.target(3), 1500);
        assert_eq!(s.current(3), 1500);
    }
}
