//! `tethys-kernel` – Actuator safety
//!
//! The safety-critical path of Tethys.  It does not plan motion; it decides
//! what the thrusters are actually allowed to do right now.
//!
//! # Modules
//!
//! - [`pwm_state`] – [`PwmState`][pwm_state::PwmState]: lock-free target and
//!   live pulse widths with single-writer discipline per field.
//! - [`watchdog`] – [`CommandWatchdog`][watchdog::CommandWatchdog]: a single
//!   atomic last-command timestamp checked against the command timeout.
//! - [`safety`] – [`ActuatorGuard`][safety::ActuatorGuard] and
//!   [`CommandSink`][safety::CommandSink]: the Active / Neutral-Hold state
//!   machine that ramps live PWM toward its targets and cuts every thruster
//!   to neutral the moment the command link goes silent.

pub mod pwm_state;
pub mod safety;
pub mod watchdog;

pub use pwm_state::PwmState;
pub use safety::{ActuatorGuard, CommandSink, ModeTransition, PwmLimits, StepReport};
pub use watchdog::{CommandWatchdog, LinkHealth};
