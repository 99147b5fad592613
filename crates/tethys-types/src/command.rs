//! Command-channel message: thruster key (`"t1"`..`"t8"`) → pulse width.
//!
//! The network collaborator hands over whatever JSON object arrived on the
//! wire.  [`PwmCommand::from_json`] keeps every key it recognises, drops
//! unknown keys and values that are not integers, and only fails when the
//! payload is not a JSON object at all.  A successfully decoded message, even
//! an empty one, counts as a valid command for the watchdog.

use serde::{Deserialize, Serialize};

use crate::{PulseWidths, THRUSTER_COUNT, TethysError};

const KEYS: [&str; THRUSTER_COUNT] = ["t1", "t2", "t3", "t4", "t5", "t6", "t7", "t8"];

/// Sparse per-thruster PWM command.  Absent entries leave the previous target
/// unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PwmCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t1: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t2: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t3: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t4: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t5: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t6: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t7: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t8: Option<i32>,
}

impl PwmCommand {
    /// A command that sets every thruster.
    pub fn from_pulses(pulses: PulseWidths) -> Self {
        let mut cmd = Self::default();
        for (i, us) in pulses.into_iter().enumerate() {
            cmd.set(i, us);
        }
        cmd
    }

    /// Decode a raw command-channel payload.
    ///
    /// # Errors
    ///
    /// Returns [`TethysError::Channel`] when `raw` is not a JSON object.
    pub fn from_json(raw: &str) -> Result<Self, TethysError> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| TethysError::Channel(format!("malformed command: {e}")))?;
        let map = value
            .as_object()
            .ok_or_else(|| TethysError::Channel("command is not a JSON object".to_string()))?;

        let mut cmd = Self::default();
        for (i, key) in KEYS.iter().enumerate() {
            let Some(v) = map.get(*key) else { continue };
            match v.as_i64().and_then(|n| i32::try_from(n).ok()) {
                Some(us) => cmd.set(i, us),
                None => tracing::debug!(key, value = %v, "ignoring non-integer pulse width"),
            }
        }
        Ok(cmd)
    }

    /// Pulse width for thruster `index` (0-based), if present.
    pub fn get(&self, index: usize) -> Option<i32> {
        self.as_array().get(index).copied().flatten()
    }

    /// Set the pulse width for thruster `index` (0-based).  Out-of-range
    /// indices are ignored.
    pub fn set(&mut self, index: usize, us: i32) {
        let slot = match index {
            0 => &mut self.t1,
            1 => &mut self.t2,
            2 => &mut self.t3,
            3 => &mut self.t4,
            4 => &mut self.t5,
            5 => &mut self.t6,
            6 => &mut self.t7,
            7 => &mut self.t8,
            _ => return,
        };
        *slot = Some(us);
    }

    /// All eight entries in thruster order.
    pub fn as_array(&self) -> [Option<i32>; THRUSTER_COUNT] {
        [
            self.t1, self.t2, self.t3, self.t4, self.t5, self.t6, self.t7, self.t8,
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.as_array().iter().all(Option::is_none)
    }
}
