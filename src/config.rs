//! Control-loop configuration parameters
//!
//! All tunable timing windows for the supervisory engine. Values can be
//! overridden by the integrator at construction time; the defaults are the
//! production figures.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Core timing configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ControlConfig {
    // --- Tank fault detection ---
    /// Window (ms) of frozen pressure before a soft filling fault is raised.
    pub changing_interval_ms: u32,
    /// Hard limit (ms) of frozen pressure; past it the tank is deactivated.
    pub max_time_not_filling_ms: u32,

    // --- Self-regulation ---
    /// Minimum spacing (ms) between two self-initiated filling commands on
    /// the same tank.
    pub filling_protection_ms: u32,

    // --- Fault surfacing ---
    /// Minimum spacing (ms) between two unsolicited error emissions.
    pub error_interval_ms: u32,

    // --- Serial link ---
    /// A partial frame older than this (ms) is reported as truncated.
    pub read_timeout_ms: u32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            changing_interval_ms: 5 * 60 * 1000,
            max_time_not_filling_ms: 10 * 60 * 1000,
            filling_protection_ms: 60 * 1000,
            error_interval_ms: 10 * 1000,
            read_timeout_ms: 2_500,
        }
    }
}

impl ControlConfig {
    /// Reject window combinations the state machine cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.changing_interval_ms == 0
            || self.max_time_not_filling_ms <= self.changing_interval_ms
            || self.error_interval_ms == 0
            || self.read_timeout_ms == 0
        {
            return Err(Error::InvalidTankParameters);
        }
        Ok(())
    }
}
