//! Registry and control hub for named tanks and sources.
//!
//! The manager owns both entity registries, the pin registry, the operating
//! mode, and the per-tank fault slots. Inter-entity links are stored by name
//! and resolved here on every use, so the registries never hold references
//! into each other. In AUTO mode [`Manager::tick`] drives every tank's state
//! machine once per iteration and rotates at most one slotted fault onto the
//! caller per error interval, round-robin across tanks.

use heapless::Vec;
use log::{info, warn};

use crate::clock::Timer;
use crate::config::ControlConfig;
use crate::io::{PinBackend, PinKind, PinMode, PinRegistry};
use crate::source::WaterSource;
use crate::tank::{SourceControl, TankParams, WaterTank};
use crate::{Error, Fault, MAX_WATER_SOURCES, MAX_WATER_TANKS, Name, Result};

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

/// MANUAL: the dispatcher commands sources/tanks directly and the control
/// loop is inert. AUTO: the loop regulates and direct commands are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Manual,
    Auto,
}

impl Mode {
    pub fn from_wire(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Self::Manual),
            1 => Ok(Self::Auto),
            _ => Err(Error::InvalidOperationMode),
        }
    }

    pub const fn wire(self) -> u8 {
        match self {
            Self::Manual => 0,
            Self::Auto => 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Rotated fault alert
// ---------------------------------------------------------------------------

/// A background fault surfaced by the rotation policy, tagged with the
/// offending tank's name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub fault: Fault,
    pub tank: Name,
}

/// Instantaneous tank readback for command responses.
#[derive(Debug, Clone, Copy)]
pub struct TankReading {
    pub pressure: f32,
    pub volume: f32,
    pub filling: bool,
}

// ---------------------------------------------------------------------------
// Registry slots
// ---------------------------------------------------------------------------

struct SourceSlot {
    name: Name,
    source: WaterSource,
}

struct TankSlot {
    name: Name,
    tank: WaterTank,
}

// ---------------------------------------------------------------------------
// Source drive: the tank's SourceControl port, assembled per call
// ---------------------------------------------------------------------------

struct SourceDrive<'a, B: PinBackend> {
    io: &'a mut PinRegistry<B>,
    source: &'a WaterSource,
    supply_above_minimum: bool,
}

impl<B: PinBackend> SourceControl for SourceDrive<'_, B> {
    fn is_on(&mut self) -> bool {
        self.source.is_turned_on(self.io).unwrap_or(false)
    }

    fn turn_on(&mut self, force: bool) -> Result<()> {
        self.source.turn_on(self.io, self.supply_above_minimum, force)
    }

    fn turn_off(&mut self) {
        if self.source.turn_off(self.io).is_err() {
            warn!("manager: source pin {} vanished", self.source.pin());
        }
    }

    fn can_enable(&self) -> bool {
        self.source.can_enable(self.supply_above_minimum)
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct Manager<B: PinBackend> {
    io: PinRegistry<B>,
    sources: Vec<SourceSlot, MAX_WATER_SOURCES>,
    tanks: Vec<TankSlot, MAX_WATER_TANKS>,
    /// One fault slot per tank, parallel to `tanks`.
    loop_faults: Vec<Option<Fault>, MAX_WATER_TANKS>,
    mode: Mode,
    fault_cursor: usize,
    errors_timer: Timer,
    config: ControlConfig,
}

impl<B: PinBackend> Manager<B> {
    pub fn new(backend: B, config: ControlConfig, now: u32) -> Self {
        let mut errors_timer = Timer::new();
        errors_timer.start(now);
        Self {
            io: PinRegistry::new(backend),
            sources: Vec::new(),
            tanks: Vec::new(),
            loop_faults: Vec::new(),
            mode: Mode::default(),
            fault_cursor: 0,
            errors_timer,
            config,
        }
    }

    // ── Mode ──────────────────────────────────────────────────

    pub const fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        if self.mode != mode {
            info!("manager: mode -> {mode:?}");
        }
        self.mode = mode;
    }

    // ── Registration ──────────────────────────────────────────

    pub fn create_water_source(
        &mut self,
        name: &str,
        pin: u16,
        supply_tank: Option<&str>,
    ) -> Result<()> {
        let name = checked_name(name)?;
        if self.source_index(&name).is_some() {
            return Err(Error::WaterSourceAlreadyRegistered);
        }
        if self.sources.len() == MAX_WATER_SOURCES {
            return Err(Error::MaxWaterSources);
        }
        let supply = match supply_tank {
            Some(tank_name) => {
                let index = self.tank_index(tank_name).ok_or(Error::WaterTankNotFound)?;
                Some(self.tanks[index].name.clone())
            }
            None => None,
        };
        self.io.get_or_create(pin, PinKind::Digital, PinMode::ReadWrite)?;
        let source = WaterSource::new(pin, supply);
        if self.sources.push(SourceSlot { name: name.clone(), source }).is_err() {
            return Err(Error::MaxWaterSources);
        }
        info!("manager: water source '{name}' registered on pin {pin}");
        Ok(())
    }

    pub fn create_water_tank(
        &mut self,
        name: &str,
        sensor_pin: u16,
        params: TankParams,
        source: Option<&str>,
    ) -> Result<()> {
        let name = checked_name(name)?;
        if self.tank_index(&name).is_some() {
            return Err(Error::WaterTankAlreadyRegistered);
        }
        if self.tanks.len() == MAX_WATER_TANKS {
            return Err(Error::MaxWaterTanks);
        }
        params.validate()?;
        let source = match source {
            Some(source_name) => {
                let index = self
                    .source_index(source_name)
                    .ok_or(Error::WaterSourceNotFound)?;
                Some(self.sources[index].name.clone())
            }
            None => None,
        };
        self.io
            .get_or_create(sensor_pin, PinKind::Analog, PinMode::ReadOnly)?;
        let tank = WaterTank::new(sensor_pin, params, source, self.config);
        if self.tanks.push(TankSlot { name: name.clone(), tank }).is_err() {
            return Err(Error::MaxWaterTanks);
        }
        let _ = self.loop_faults.push(None);
        info!("manager: water tank '{name}' registered on pin {sensor_pin}");
        Ok(())
    }

    // ── Removal ───────────────────────────────────────────────

    pub fn remove_water_source(&mut self, name: &str) -> Result<()> {
        let index = self.source_index(name).ok_or(Error::WaterSourceNotFound)?;
        let depended_on = self
            .tanks
            .iter()
            .any(|slot| slot.tank.source() == Some(name));
        if depended_on {
            return Err(Error::CannotRemoveWaterSourceDependency);
        }
        let pin = self.sources[index].source.pin();
        self.sources.remove(index);
        self.release_pin_if_orphaned(pin);
        info!("manager: water source '{name}' removed");
        Ok(())
    }

    pub fn remove_water_tank(&mut self, name: &str) -> Result<()> {
        let index = self.tank_index(name).ok_or(Error::WaterTankNotFound)?;
        let depended_on = self
            .sources
            .iter()
            .any(|slot| slot.source.supply_tank() == Some(name));
        if depended_on {
            return Err(Error::CannotRemoveWaterTankDependency);
        }
        let pin = self.tanks[index].tank.sensor_pin();
        self.tanks.remove(index);
        self.loop_faults.remove(index);
        if self.fault_cursor > index {
            self.fault_cursor -= 1;
        }
        if self.fault_cursor >= self.tanks.len() {
            self.fault_cursor = 0;
        }
        self.release_pin_if_orphaned(pin);
        info!("manager: water tank '{name}' removed");
        Ok(())
    }

    // ── Lookup ────────────────────────────────────────────────

    pub fn water_source(&self, name: &str) -> Result<&WaterSource> {
        let index = self.source_index(name).ok_or(Error::WaterSourceNotFound)?;
        Ok(&self.sources[index].source)
    }

    pub fn water_tank(&self, name: &str) -> Result<&WaterTank> {
        let index = self.tank_index(name).ok_or(Error::WaterTankNotFound)?;
        Ok(&self.tanks[index].tank)
    }

    pub fn total_water_sources(&self) -> usize {
        self.sources.len()
    }

    pub fn total_water_tanks(&self) -> usize {
        self.tanks.len()
    }

    /// Registered source names, insertion order.
    pub fn water_source_list(&self) -> Vec<Name, MAX_WATER_SOURCES> {
        self.sources.iter().map(|slot| slot.name.clone()).collect()
    }

    /// Registered tank names, insertion order.
    pub fn water_tank_list(&self) -> Vec<Name, MAX_WATER_TANKS> {
        self.tanks.iter().map(|slot| slot.name.clone()).collect()
    }

    /// Insertion-ordered view used by the persister.
    pub fn sources(&self) -> impl Iterator<Item = (&str, &WaterSource)> {
        self.sources
            .iter()
            .map(|slot| (slot.name.as_str(), &slot.source))
    }

    /// Insertion-ordered view used by the persister.
    pub fn tanks(&self) -> impl Iterator<Item = (&str, &WaterTank)> {
        self.tanks.iter().map(|slot| (slot.name.as_str(), &slot.tank))
    }

    pub fn pin_registry(&self) -> &PinRegistry<B> {
        &self.io
    }

    // ── Source commands ───────────────────────────────────────

    pub fn set_water_source_state(&mut self, name: &str, enabled: bool, force: bool) -> Result<()> {
        let index = self.source_index(name).ok_or(Error::WaterSourceNotFound)?;
        if self.mode == Mode::Auto {
            return Err(Error::CannotHandleWaterSourceInAuto);
        }
        if enabled {
            let supply_ok = self.supply_above_minimum(index)?;
            self.sources[index]
                .source
                .turn_on(&mut self.io, supply_ok, force)
        } else {
            self.sources[index].source.turn_off(&mut self.io)
        }
    }

    pub fn set_water_source_active(&mut self, name: &str, active: bool) -> Result<()> {
        let index = self.source_index(name).ok_or(Error::WaterSourceNotFound)?;
        self.sources[index].source.set_active(&mut self.io, active)
    }

    pub fn source_is_on(&mut self, name: &str) -> Result<bool> {
        let index = self.source_index(name).ok_or(Error::WaterSourceNotFound)?;
        self.sources[index].source.is_turned_on(&mut self.io)
    }

    // ── Tank commands ─────────────────────────────────────────

    pub fn fill_water_tank(&mut self, name: &str, force: bool, now: u32) -> Result<()> {
        if self.mode == Mode::Auto {
            return Err(Error::CannotHandleWaterTankInAuto);
        }
        let tank_index = self.tank_index(name).ok_or(Error::WaterTankNotFound)?;
        let source_index = self.linked_source_index(tank_index)?;
        let supply_ok = self.supply_above_minimum(source_index)?;
        let (pressure, volume) = self.read_level(tank_index)?;
        let mut drive = SourceDrive {
            io: &mut self.io,
            source: &self.sources[source_index].source,
            supply_above_minimum: supply_ok,
        };
        self.tanks[tank_index]
            .tank
            .fill(now, pressure, volume, &mut drive, force)
    }

    pub fn stop_filling_water_tank(&mut self, name: &str) -> Result<()> {
        if self.mode == Mode::Auto {
            return Err(Error::CannotHandleWaterTankInAuto);
        }
        let tank_index = self.tank_index(name).ok_or(Error::WaterTankNotFound)?;
        let source_index = self.linked_source_index(tank_index)?;
        let mut drive = SourceDrive {
            io: &mut self.io,
            source: &self.sources[source_index].source,
            supply_above_minimum: true,
        };
        self.tanks[tank_index].tank.stop_filling(&mut drive);
        Ok(())
    }

    pub fn set_water_tank_active(&mut self, name: &str, active: bool) -> Result<()> {
        let tank_index = self.tank_index(name).ok_or(Error::WaterTankNotFound)?;
        match self.linked_source_index(tank_index) {
            Ok(source_index) => {
                let mut drive = SourceDrive {
                    io: &mut self.io,
                    source: &self.sources[source_index].source,
                    supply_above_minimum: true,
                };
                self.tanks[tank_index]
                    .tank
                    .set_active(active, Some(&mut drive));
            }
            Err(_) => self.tanks[tank_index].tank.set_active(active, None),
        }
        Ok(())
    }

    pub fn set_water_tank_minimum_volume(&mut self, name: &str, value: f32) -> Result<()> {
        self.with_tank(name, |tank| tank.set_minimum_volume(value))
    }

    pub fn set_water_tank_max_volume(&mut self, name: &str, value: f32) -> Result<()> {
        self.with_tank(name, |tank| tank.set_max_volume(value))
    }

    pub fn set_water_tank_zero_volume(&mut self, name: &str, value: f32) -> Result<()> {
        self.with_tank(name, |tank| tank.set_zero_volume_pressure(value))
    }

    pub fn set_water_tank_volume_factor(&mut self, name: &str, value: f32) -> Result<()> {
        self.with_tank(name, |tank| tank.set_volume_factor(value))
    }

    pub fn set_water_tank_pressure_factor(&mut self, name: &str, value: f32) -> Result<()> {
        self.with_tank(name, |tank| tank.set_pressure_factor(value))
    }

    pub fn set_water_tank_pressure_changing_value(&mut self, name: &str, value: f32) -> Result<()> {
        self.with_tank(name, |tank| tank.set_pressure_changing_value(value))
    }

    /// Live pressure/volume/filling readback for responses.
    pub fn tank_reading(&mut self, name: &str) -> Result<TankReading> {
        let tank_index = self.tank_index(name).ok_or(Error::WaterTankNotFound)?;
        let (pressure, volume) = self.read_level(tank_index)?;
        let filling = match self.tanks[tank_index].tank.source() {
            Some(source_name) => match self.source_index(source_name) {
                Some(source_index) => self.sources[source_index]
                    .source
                    .is_turned_on(&mut self.io)?,
                None => false,
            },
            None => false,
        };
        Ok(TankReading {
            pressure,
            volume,
            filling,
        })
    }

    // ── Control loop ──────────────────────────────────────────

    /// One supervisory iteration. In MANUAL mode this is a no-op. In AUTO
    /// mode every tank is visited once in insertion order and its fault slot
    /// refreshed; at most one slotted fault is returned per error interval.
    pub fn tick(&mut self, now: u32) -> Option<Alert> {
        if self.mode == Mode::Manual {
            return None;
        }

        for index in 0..self.tanks.len() {
            self.loop_faults[index] = self.tick_tank(index, now);
        }

        if !self.tanks.is_empty() && self.errors_timer.elapsed(now) >= self.config.error_interval_ms
        {
            self.errors_timer.start(now);
            let total = self.tanks.len();
            for step in 0..total {
                let index = (self.fault_cursor + step) % total;
                if let Some(fault) = self.loop_faults[index] {
                    self.fault_cursor = (index + 1) % total;
                    return Some(Alert {
                        fault,
                        tank: self.tanks[index].name.clone(),
                    });
                }
            }
        }
        None
    }

    fn tick_tank(&mut self, tank_index: usize, now: u32) -> Option<Fault> {
        let source_index = match self.tanks[tank_index].tank.source() {
            Some(source_name) => self.source_index(source_name)?,
            None => return None,
        };
        let supply_ok = self.supply_above_minimum(source_index).ok()?;
        let (pressure, volume) = match self.read_level(tank_index) {
            Ok(level) => level,
            Err(err) => {
                warn!("manager: tank sensor read failed: {err}");
                return None;
            }
        };
        let mut drive = SourceDrive {
            io: &mut self.io,
            source: &self.sources[source_index].source,
            supply_above_minimum: supply_ok,
        };
        self.tanks[tank_index]
            .tank
            .tick(now, pressure, volume, &mut drive)
    }

    // ── Reset ─────────────────────────────────────────────────

    /// Return to MANUAL, close and drop every source, drop every tank, and
    /// release their pins. Dependency checks are skipped: the whole topology
    /// is being torn down, so removal order cannot matter.
    pub fn reset(&mut self) {
        self.set_mode(Mode::Manual);
        while !self.sources.is_empty() {
            let pin = self.sources[0].source.pin();
            if self.sources[0].source.turn_off(&mut self.io).is_err() {
                warn!("manager: reset could not close pin {pin}");
            }
            self.sources.remove(0);
            self.release_pin_if_orphaned(pin);
        }
        while !self.tanks.is_empty() {
            let pin = self.tanks[0].tank.sensor_pin();
            self.tanks.remove(0);
            self.release_pin_if_orphaned(pin);
        }
        self.loop_faults.clear();
        self.fault_cursor = 0;
        info!("manager: reset complete");
    }

    // ── Internal ──────────────────────────────────────────────

    fn source_index(&self, name: &str) -> Option<usize> {
        self.sources.iter().position(|slot| slot.name.as_str() == name)
    }

    fn tank_index(&self, name: &str) -> Option<usize> {
        self.tanks.iter().position(|slot| slot.name.as_str() == name)
    }

    fn with_tank(&mut self, name: &str, apply: impl FnOnce(&mut WaterTank) -> Result<()>) -> Result<()> {
        let index = self.tank_index(name).ok_or(Error::WaterTankNotFound)?;
        apply(&mut self.tanks[index].tank)
    }

    /// Index of the source linked to a tank, or the fill-without-source error.
    fn linked_source_index(&self, tank_index: usize) -> Result<usize> {
        let source_name = self.tanks[tank_index]
            .tank
            .source()
            .ok_or(Error::CannotFillWaterTankWithoutWaterSource)?;
        self.source_index(source_name)
            .ok_or(Error::CannotFillWaterTankWithoutWaterSource)
    }

    /// Supply guard for a source: true when it has no supply tank or the
    /// supply sits above its minimum volume.
    fn supply_above_minimum(&mut self, source_index: usize) -> Result<bool> {
        let supply_name = match self.sources[source_index].source.supply_tank() {
            Some(name) => name,
            None => return Ok(true),
        };
        let tank_index = self.tank_index(supply_name).ok_or(Error::WaterTankNotFound)?;
        let (_, volume) = self.read_level(tank_index)?;
        Ok(volume > self.tanks[tank_index].tank.params().minimum_volume)
    }

    fn read_level(&mut self, tank_index: usize) -> Result<(f32, f32)> {
        let pin = self.tanks[tank_index].tank.sensor_pin();
        let raw = self.io.read(pin)?;
        let tank = &self.tanks[tank_index].tank;
        let pressure = tank.pressure(raw);
        Ok((pressure, tank.volume(pressure)))
    }

    fn release_pin_if_orphaned(&mut self, pin: u16) {
        let referenced = self.sources.iter().any(|slot| slot.source.pin() == pin)
            || self.tanks.iter().any(|slot| slot.tank.sensor_pin() == pin);
        if !referenced && self.io.remove(pin).is_err() {
            warn!("manager: pin {pin} was already released");
        }
    }
}

fn checked_name(name: &str) -> Result<Name> {
    if name.is_empty() {
        return Err(Error::ResourceNameEmpty);
    }
    Name::try_from(name).map_err(|_| Error::ResourceNameTooLong)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
