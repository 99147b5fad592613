//! `tethys-middleware` – The Telemetry Bus
//!
//! Routes telemetry and alerts from the vehicle loops to any number of
//! observers (dashboards, loggers, ground-station uplinks) without the loops
//! ever waiting on a slow consumer.
//!
//! # Modules
//!
//! - [`bus`] – Topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.

pub mod bus;

pub use bus::{EventBus, Topic, TopicReceiver};
