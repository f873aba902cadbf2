//! Water source: a controllable valve or pump feeding zero or more tanks.
//!
//! A source owns exactly one actuator pin and optionally names the *supply*
//! tank it draws from. The supply link is the dry-run guard: a source will
//! not open while its supply tank sits at or below that tank's minimum
//! volume, unless the command is forced.

use crate::io::{HIGH, LOW, PinBackend, PinRegistry};
use crate::{Error, Name, Result};

pub struct WaterSource {
    pin: u16,
    active: bool,
    supply_tank: Option<Name>,
}

impl WaterSource {
    pub fn new(pin: u16, supply_tank: Option<Name>) -> Self {
        Self {
            pin,
            active: true,
            supply_tank,
        }
    }

    pub const fn pin(&self) -> u16 {
        self.pin
    }

    pub const fn is_active(&self) -> bool {
        self.active
    }

    pub fn supply_tank(&self) -> Option<&str> {
        self.supply_tank.as_deref()
    }

    /// Whether the source may open on its own: operator-enabled and, when a
    /// supply tank is linked, that tank above its minimum volume.
    pub const fn can_enable(&self, supply_above_minimum: bool) -> bool {
        self.active && supply_above_minimum
    }

    /// Drive the actuator high.
    ///
    /// Without `force` the source refuses while deactivated, then while the
    /// supply guard holds. `force` bypasses both — the manager uses it to
    /// bootstrap the filling of the supply tank itself.
    pub fn turn_on<B: PinBackend>(
        &self,
        io: &mut PinRegistry<B>,
        supply_above_minimum: bool,
        force: bool,
    ) -> Result<()> {
        if !force {
            if !self.active {
                return Err(Error::CannotTurnOnDeactivatedWaterSource);
            }
            if !supply_above_minimum {
                return Err(Error::CannotEnableWaterSourceDueMinimumVolume);
            }
        }
        io.write(self.pin, HIGH)
    }

    /// Drive the actuator low, unconditionally.
    pub fn turn_off<B: PinBackend>(&self, io: &mut PinRegistry<B>) -> Result<()> {
        io.write(self.pin, LOW)
    }

    /// The actuator state as read back from the pin.
    pub fn is_turned_on<B: PinBackend>(&self, io: &mut PinRegistry<B>) -> Result<bool> {
        Ok(io.read(self.pin)? == HIGH)
    }

    /// Deactivating a source also closes it.
    pub fn set_active<B: PinBackend>(
        &mut self,
        io: &mut PinRegistry<B>,
        active: bool,
    ) -> Result<()> {
        self.active = active;
        if !active {
            self.turn_off(io)?;
        }
        Ok(())
    }
}
