//! Pin IO registry.
//!
//! Maps pin number → a registered handle (digital/analog, read-only or
//! read-write) and routes reads/writes to a [`PinBackend`]. Exactly one
//! handle exists per pin; entities share a handle when they reference the
//! same pin number, and the manager releases a handle only when no
//! registered entity still points at it.
//!
//! The backend is injected once at startup: [`memory::MemoryBackend`] for
//! host tests and the simulator, [`hal::HalBackend`] for real hardware.

pub mod hal;
pub mod memory;

pub use memory::MemoryBackend;

use heapless::Vec;
use log::debug;

use crate::{Error, MAX_WATER_SOURCES, MAX_WATER_TANKS, Result};

/// One registry entry per entity-referenced pin; sized for the worst case of
/// every registered entity using a distinct pin.
pub const PIN_CAPACITY: usize = MAX_WATER_SOURCES + MAX_WATER_TANKS;

/// Logical level written to actuator pins.
pub const HIGH: u32 = 1;
pub const LOW: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinKind {
    Digital,
    Analog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    ReadOnly,
    ReadWrite,
}

/// Raw pin driver. `read` of a digital pin may return any non-zero value for
/// a high line; the registry normalises to 0/1.
pub trait PinBackend {
    fn read(&mut self, pin: u16, kind: PinKind) -> u32;
    fn write(&mut self, pin: u16, kind: PinKind, value: u32);
}

#[derive(Debug, Clone, Copy)]
struct PinEntry {
    pin: u16,
    kind: PinKind,
    mode: PinMode,
}

/// Registry of pin handles in front of a single backend.
pub struct PinRegistry<B: PinBackend> {
    backend: B,
    entries: Vec<PinEntry, PIN_CAPACITY>,
}

impl<B: PinBackend> PinRegistry<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            entries: Vec::new(),
        }
    }

    pub fn contains(&self, pin: u16) -> bool {
        self.index_of(pin).is_some()
    }

    pub fn kind_of(&self, pin: u16) -> Option<PinKind> {
        self.index_of(pin).map(|i| self.entries[i].kind)
    }

    /// Register a handle for `pin`. An existing handle at the same pin is
    /// replaced, releasing the old one.
    pub fn create(&mut self, pin: u16, kind: PinKind, mode: PinMode) -> Result<()> {
        if let Some(index) = self.index_of(pin) {
            self.entries[index] = PinEntry { pin, kind, mode };
            return Ok(());
        }
        self.entries
            .push(PinEntry { pin, kind, mode })
            .map_err(|_| Error::PinTableFull)?;
        debug!("io: pin {pin} registered ({kind:?}, {mode:?})");
        Ok(())
    }

    /// Register `pin` unless a handle already exists there.
    pub fn get_or_create(&mut self, pin: u16, kind: PinKind, mode: PinMode) -> Result<()> {
        if self.contains(pin) {
            return Ok(());
        }
        self.create(pin, kind, mode)
    }

    pub fn remove(&mut self, pin: u16) -> Result<()> {
        let index = self.index_of(pin).ok_or(Error::PinNotFound)?;
        self.entries.remove(index);
        debug!("io: pin {pin} released");
        Ok(())
    }

    pub fn remove_all(&mut self) {
        self.entries.clear();
    }

    /// Current sample. Digital handles report 0 or 1; analog handles report
    /// the unscaled integer sample.
    pub fn read(&mut self, pin: u16) -> Result<u32> {
        let index = self.index_of(pin).ok_or(Error::PinNotFound)?;
        let entry = self.entries[index];
        let raw = self.backend.read(entry.pin, entry.kind);
        Ok(match entry.kind {
            PinKind::Digital => u32::from(raw != 0),
            PinKind::Analog => raw,
        })
    }

    /// Drive the pin. Writes to read-only handles are no-ops.
    pub fn write(&mut self, pin: u16, value: u32) -> Result<()> {
        let index = self.index_of(pin).ok_or(Error::PinNotFound)?;
        let entry = self.entries[index];
        if entry.mode == PinMode::ReadOnly {
            return Ok(());
        }
        self.backend.write(entry.pin, entry.kind, value);
        Ok(())
    }

    fn index_of(&self, pin: u16) -> Option<usize> {
        self.entries.iter().position(|entry| entry.pin == pin)
    }
}
