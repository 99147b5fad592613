//! `tethys-runtime` – vehicle loops and process plumbing.
//!
//! # Modules
//!
//! - [`control_loop`] – [`ControlLoop`]: one sensor-to-PWM tick.  Depth
//!   filtering, per-axis PID hold, scaling of the operator demand to physical
//!   units, thrust allocation and PWM mapping.
//! - [`shared`] – [`SharedState`]: last-write-wins snapshots exchanged with
//!   the input, sensor and telemetry collaborators.
//! - [`supervisor`] – [`spawn`]: arms the thrusters and starts the actuator
//!   and control threads; [`VehicleHandle`] stops them.
//! - [`sim_sensors`] – a simulated pressure sensor and IMU driven by the
//!   simulated thruster bank.
//! - [`telemetry`] – [`init_tracing`]: console or JSON logs with optional
//!   OTLP span export.

pub mod control_loop;
pub mod shared;
pub mod sim_sensors;
pub mod supervisor;
pub mod telemetry;

pub use control_loop::{ControlLoop, TickOutput, scale_demand};
pub use shared::{SensorSnapshot, SharedState};
pub use sim_sensors::spawn_sim_sensors;
pub use supervisor::{ControlRequest, SupervisorOptions, VehicleHandle, spawn};
pub use telemetry::{LogFormat, TelemetryConfig, TracerProviderGuard, init_tracing};
