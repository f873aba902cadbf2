//! Water tank: pressure-derived volume plus the filling fault state machine.
//!
//! A tank owns one analog pressure-sensor pin and optionally names the
//! source that fills it. Volume is inferred from operator-supplied linear
//! calibration. While the tank is active and its source is open, the state
//! machine watches the pressure trend:
//!
//! ```text
//!              pressure moving                    pressure frozen
//!   filling ───────────────────▶ changing timer ──────────────────┐
//!      │                                                          ▼
//!      │ frozen since fill          soft window   ──▶ STOPPED_FILLING
//!      └─────────────────────▶     (5 min)
//!                                  hard window    ──▶ NOT_FILLING_TIMEOUT
//!                                  (10 min)            + deactivate
//! ```
//!
//! Independently, the self-regulator opens the source when volume drops to
//! the minimum and closes it at the maximum, throttled by a protection
//! window so narrow hysteresis cannot thrash the valve.

use log::{error, info, warn};

use crate::clock::Timer;
use crate::config::ControlConfig;
use crate::{Error, Fault, Name, Result};

// ---------------------------------------------------------------------------
// Source control port
// ---------------------------------------------------------------------------

/// The tank's view of its source during one loop tick or fill command.
///
/// The manager assembles an implementor per call, resolving the name link
/// and pre-computing the supply-tank guard, so the tank never touches the
/// sibling registry directly.
pub trait SourceControl {
    fn is_on(&mut self) -> bool;
    fn turn_on(&mut self, force: bool) -> Result<()>;
    fn turn_off(&mut self);
    fn can_enable(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Calibration and thresholds
// ---------------------------------------------------------------------------

/// Operator-supplied calibration and level thresholds.
#[derive(Debug, Clone, Copy)]
pub struct TankParams {
    pub pressure_factor: f32,
    pub volume_factor: f32,
    pub zero_volume_pressure: f32,
    pub pressure_changing_value: f32,
    pub minimum_volume: f32,
    pub max_volume: f32,
}

impl TankParams {
    /// Threshold sanity only; calibration factors are stored as given.
    pub fn validate(&self) -> Result<()> {
        if self.minimum_volume > self.max_volume || self.pressure_changing_value < 0.0 {
            return Err(Error::InvalidTankParameters);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// WaterTank
// ---------------------------------------------------------------------------

pub struct WaterTank {
    sensor_pin: u16,
    params: TankParams,
    active: bool,
    source: Option<Name>,

    filling_timer: Timer,
    pressure_changing_timer: Timer,
    protection_timer: Timer,
    last_loop_pressure: f32,
    fault: Option<Fault>,

    config: ControlConfig,
}

impl WaterTank {
    pub fn new(sensor_pin: u16, params: TankParams, source: Option<Name>, config: ControlConfig) -> Self {
        Self {
            sensor_pin,
            params,
            active: true,
            source,
            filling_timer: Timer::new(),
            pressure_changing_timer: Timer::new(),
            protection_timer: Timer::new(),
            last_loop_pressure: 0.0,
            fault: None,
            config,
        }
    }

    // ── Accessors ─────────────────────────────────────────────

    pub const fn sensor_pin(&self) -> u16 {
        self.sensor_pin
    }

    pub const fn is_active(&self) -> bool {
        self.active
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub const fn params(&self) -> &TankParams {
        &self.params
    }

    pub const fn fault(&self) -> Option<Fault> {
        self.fault
    }

    // ── Calibration updates (validated at the command edge) ───

    pub fn set_minimum_volume(&mut self, value: f32) -> Result<()> {
        self.update_params(|p| p.minimum_volume = value)
    }

    pub fn set_max_volume(&mut self, value: f32) -> Result<()> {
        self.update_params(|p| p.max_volume = value)
    }

    pub fn set_zero_volume_pressure(&mut self, value: f32) -> Result<()> {
        self.update_params(|p| p.zero_volume_pressure = value)
    }

    pub fn set_volume_factor(&mut self, value: f32) -> Result<()> {
        self.update_params(|p| p.volume_factor = value)
    }

    pub fn set_pressure_factor(&mut self, value: f32) -> Result<()> {
        self.update_params(|p| p.pressure_factor = value)
    }

    pub fn set_pressure_changing_value(&mut self, value: f32) -> Result<()> {
        self.update_params(|p| p.pressure_changing_value = value)
    }

    fn update_params(&mut self, mutate: impl FnOnce(&mut TankParams)) -> Result<()> {
        let mut updated = self.params;
        mutate(&mut updated);
        updated.validate()?;
        self.params = updated;
        Ok(())
    }

    // ── Derived quantities ────────────────────────────────────

    /// Pressure from a raw sensor sample.
    pub fn pressure(&self, raw: u32) -> f32 {
        raw as f32 * self.params.pressure_factor
    }

    /// Volume from a pressure value, clamped at zero.
    pub fn volume(&self, pressure: f32) -> f32 {
        (pressure * self.params.volume_factor - self.params.zero_volume_pressure).max(0.0)
    }

    /// Whether the self-regulator may order a fill right now.
    pub fn can_fill(&self, volume: f32, source_can_enable: bool) -> bool {
        source_can_enable && self.active && volume < self.params.max_volume
    }

    // ── Commands ──────────────────────────────────────────────

    /// Order the tank to fill.
    ///
    /// The caller resolves the source link; a tank without one must be
    /// rejected with [`Error::CannotFillWaterTankWithoutWaterSource`] before
    /// this is reached. Timer effects are applied before the source command,
    /// so a refused open still marks the fill attempt.
    pub fn fill(
        &mut self,
        now: u32,
        pressure: f32,
        volume: f32,
        source: &mut impl SourceControl,
        force: bool,
    ) -> Result<()> {
        if !force {
            if !self.active {
                return Err(Error::CannotFillDeactivatedWaterTank);
            }
            if volume >= self.params.max_volume {
                return Err(Error::CannotFillWaterTankMaxVolume);
            }
        }
        self.active = true;
        self.filling_timer.start(now);
        self.protection_timer.start(now);
        self.pressure_changing_timer.stop();
        self.last_loop_pressure = pressure;
        source.turn_on(force)
    }

    pub fn stop_filling(&mut self, source: &mut impl SourceControl) {
        source.turn_off();
    }

    /// Deactivating a tank also stops any fill in progress.
    pub fn set_active(&mut self, active: bool, source: Option<&mut dyn SourceControl>) {
        if !active {
            if let Some(source) = source {
                source.turn_off();
            }
        }
        self.active = active;
    }

    // ── Control loop ──────────────────────────────────────────

    /// One scheduler tick: fault detection, then self-regulation.
    ///
    /// Returns the tank's current fault slot so the manager can record and
    /// rotate it. The slot is cleared only while actively filling; a
    /// terminal fault therefore keeps surfacing until the operator
    /// intervenes.
    pub fn tick(
        &mut self,
        now: u32,
        pressure: f32,
        volume: f32,
        source: &mut impl SourceControl,
    ) -> Option<Fault> {
        let previous = self.fault;
        if self.active && source.is_on() {
            self.watch_pressure_trend(now, pressure, source);
        }
        self.regulate(now, pressure, volume, source);
        if self.fault != previous {
            match self.fault {
                Some(fault) => error!("tank: {fault}"),
                None => info!("tank: fault cleared"),
            }
        }
        self.fault
    }

    /// Fault detection while a fill is in progress.
    fn watch_pressure_trend(&mut self, now: u32, pressure: f32, source: &mut impl SourceControl) {
        self.fault = None;

        if (pressure - self.last_loop_pressure).abs() >= self.params.pressure_changing_value {
            // Pressure is moving.
            self.pressure_changing_timer.start(now);
        } else if self.pressure_changing_timer.is_running() {
            // Pressure was moving, then froze.
            let frozen_for = self.pressure_changing_timer.elapsed(now);
            if frozen_for >= self.config.max_time_not_filling_ms {
                self.fault = Some(Fault::NotFillingTimeout);
                self.set_active(false, Some(source));
            } else if frozen_for >= self.config.changing_interval_ms {
                self.fault = Some(Fault::StoppedFilling);
            }
        } else {
            // Pressure never started moving since the fill was ordered.
            let since_fill = self.filling_timer.elapsed(now);
            if since_fill >= self.config.max_time_not_filling_ms {
                self.fault = Some(Fault::NotFillingTimeout);
                self.set_active(false, Some(source));
            } else if since_fill >= self.config.changing_interval_ms {
                self.fault = Some(Fault::NotFilling);
            }
        }

        self.last_loop_pressure = pressure;
    }

    /// Level-driven valve management, throttled by the protection window.
    fn regulate(&mut self, now: u32, pressure: f32, volume: f32, source: &mut impl SourceControl) {
        let window_open = !self.protection_timer.is_running()
            || self.protection_timer.elapsed(now) > self.config.filling_protection_ms;
        if !window_open {
            return;
        }

        let can_fill = self.can_fill(volume, source.can_enable());
        if (!can_fill || volume >= self.params.max_volume) && source.is_on() {
            source.turn_off();
            self.protection_timer.start(now);
        } else if can_fill && volume <= self.params.minimum_volume && !source.is_on() {
            // Preflight failures (e.g. an empty supply) are swallowed here;
            // re-raising them every tick would drown the fault rotator.
            if let Err(err) = self.fill(now, pressure, volume, source, false) {
                warn!("tank: self-regulated fill refused: {err}");
            }
            self.protection_timer.start(now);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
