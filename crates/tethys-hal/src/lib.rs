//! `tethys-hal` – Thruster math and hardware abstraction
//!
//! Everything between a 6-DOF motion demand and an ESC pulse width.
//!
//! # Modules
//!
//! - [`allocator`] – [`ThrustAllocator`][allocator::ThrustAllocator]:
//!   pseudo-inverse allocation of surge/sway/yaw onto the lateral group and
//!   roll/pitch/heave onto the vertical group, with working-thruster masking
//!   and per-group saturation.
//! - [`pwm`] – [`PwmMapper`][pwm::PwmMapper]: the per-direction cubic ESC
//!   response that turns normalized force into microseconds.
//! - [`pid`] – [`PidController`][pid::PidController]: clamped PID with
//!   angle wrapping for the closed-loop axes.
//! - [`thruster`] – [`Thruster`][thruster::Thruster]: the driver trait the
//!   actuator safety layer writes through.
//! - [`sim`] – [`SimThruster`][sim::SimThruster] and
//!   [`SimPlant`][sim::SimPlant]: headless stand-ins for the ESC bank and the
//!   vehicle itself.

pub mod allocator;
pub mod pid;
pub mod pwm;
pub mod sim;
pub mod thruster;

pub use allocator::{AxisMaxima, ThrustAllocator, ThrusterLayout};
pub use pid::PidController;
pub use pwm::PwmMapper;
pub use sim::{SimPlant, SimMonitor, SimThruster};
pub use thruster::Thruster;
