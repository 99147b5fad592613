//! `Thruster` trait for ESC-driven thrusters.
//!
//! The actuator safety layer owns one boxed driver per channel and is the
//! only code that calls [`Thruster::set_pulse_width`].  Drivers can be a
//! PCA9685 channel, a serial ESC bridge or the in-process
//! [`SimThruster`][crate::sim::SimThruster]; nothing above this trait cares.

use tethys_types::TethysError;

/// One ESC output channel.
pub trait Thruster: Send {
    /// Stable identifier for this channel, e.g. `"t3"`.
    fn id(&self) -> &str;

    /// Write a pulse width in microseconds to the ESC.
    ///
    /// # Errors
    ///
    /// Returns [`TethysError::HardwareFault`] if the write did not reach the
    /// hardware.  The caller keeps running; the next period retries.
    fn set_pulse_width(&mut self, us: i32) -> Result<(), TethysError>;

    /// Most recently written pulse width.
    fn pulse_width(&self) -> i32;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal in-process thruster used only for tests.
    struct MockThruster {
        id: String,
        us: i32,
    }

    impl Thruster for MockThruster {
        fn id(&self) -> &str {
            &self.id
        }

        fn set_pulse_width(&mut self, us: i32) -> Result<(), TethysError> {
            if !(500..=2500).contains(&us) {
                return Err(TethysError::HardwareFault {
                    component: self.id.clone(),
                    details: format!("{us} µs outside servo range"),
                });
            }
            self.us = us;
            Ok(())
        }

        fn pulse_width(&self) -> i32 {
            self.us
        }
    }

    #[test]
    fn mock_thruster_set_and_get_pulse_width() {
        let mut t: Box<dyn Thruster> = Box::new(MockThruster {
            id: "t1".to_string(),
            us: 1500,
        });
        assert_eq!(t.id(), "t1");
        t.set_pulse_width(1620).unwrap();
        assert_eq!(t.pulse_width(), 1620);
        assert!(t.set_pulse_width(3000).is_err());
        assert_eq!(t.pulse_width(), 1620);
    }
}
