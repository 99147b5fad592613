//! `tethys-perception` – State estimation.
//!
//! Turns raw sensor values into the quantities the control loop closes
//! around.
//!
//! # Modules
//!
//! - [`depth`] – [`DepthEstimator`][depth::DepthEstimator]: two-state Kalman
//!   filter that smooths pressure-derived depth, plus
//!   [`pressure_to_depth`][depth::pressure_to_depth] for the hydrostatic
//!   conversion.

pub mod depth;

pub use depth::{DepthEstimator, pressure_to_depth};
