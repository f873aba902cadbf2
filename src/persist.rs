//! Persisted configuration: a CRC-protected record log in non-volatile
//! memory, replayed on boot to rebuild the topology and activation state.
//!
//! Layout (little-endian, byte-addressed):
//! ```text
//! offset 0                 : u8   totalRequests
//! offset 1                 : u32  crc32
//! offset 5                 : u8[MAX_REQUESTS]  length table
//! offset 5 + MAX_REQUESTS  : concatenated encoded requests
//! ```
//!
//! Records are encoded request bodies restricted to the create/set-active
//! variants, emitted in dependency order so every entity referenced by
//! another is created before its referrer. The CRC-32 covers
//! `[0, recordStreamEnd)` with the four CRC bytes read as zero, which makes
//! back-to-back saves byte-identical and save→verify self-consistent.

use log::{info, warn};

use crate::io::PinBackend;
use crate::manager::Manager;
use crate::rpc::messages::RequestBody;
use crate::source::WaterSource;
use crate::tank::WaterTank;
use crate::{Error, MAX_WATER_SOURCES, MAX_WATER_TANKS, Name, Result};

/// Two records per entity: its create request plus, when deactivated, a
/// set-active request.
pub const MAX_REQUESTS: usize = 2 * (MAX_WATER_TANKS + MAX_WATER_SOURCES);

const TOTAL_REQUESTS_OFFSET: usize = 0;
const CRC_OFFSET: usize = 1;
const LENGTH_TABLE_OFFSET: usize = CRC_OFFSET + 4;
const REQUESTS_START_OFFSET: usize = LENGTH_TABLE_OFFSET + MAX_REQUESTS;

/// Largest encoded record the log accepts (length-table entries are u8).
const MAX_RECORD_LENGTH: usize = 255;

// ---------------------------------------------------------------------------
// Storage trait + in-memory implementation
// ---------------------------------------------------------------------------

/// Byte-addressable non-volatile storage. Out-of-range accesses are the
/// persister's bug, not the storage's; implementations may clamp.
pub trait NvStorage {
    fn capacity(&self) -> usize;
    fn read(&self, offset: usize, buf: &mut [u8]);
    fn write(&mut self, offset: usize, data: &[u8]);
}

/// RAM-backed storage for tests and the simulator. Clones share the bytes,
/// so "rebooting" against the same store is just constructing a second
/// persister over a clone.
#[derive(Clone)]
pub struct MemoryStorage {
    bytes: std::rc::Rc<std::cell::RefCell<Box<[u8]>>>,
}

impl MemoryStorage {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: std::rc::Rc::new(std::cell::RefCell::new(
                vec![0u8; capacity].into_boxed_slice(),
            )),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl NvStorage for MemoryStorage {
    fn capacity(&self) -> usize {
        self.bytes.borrow().len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) {
        let bytes = self.bytes.borrow();
        for (index, slot) in buf.iter_mut().enumerate() {
            *slot = bytes.get(offset + index).copied().unwrap_or(0);
        }
    }

    fn write(&mut self, offset: usize, data: &[u8]) {
        let mut bytes = self.bytes.borrow_mut();
        for (index, &value) in data.iter().enumerate() {
            if let Some(slot) = bytes.get_mut(offset + index) {
                *slot = value;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Persister
// ---------------------------------------------------------------------------

pub struct Persister<S: NvStorage> {
    store: S,
}

impl<S: NvStorage> Persister<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // ── Log header ────────────────────────────────────────────

    pub fn total_requests(&self) -> u8 {
        let mut byte = [0u8; 1];
        self.store.read(TOTAL_REQUESTS_OFFSET, &mut byte);
        byte[0]
    }

    /// Invalidate the log. A zero record count never replays and never
    /// verifies as corrupt.
    pub fn clear(&mut self) {
        self.store.write(TOTAL_REQUESTS_OFFSET, &[0]);
    }

    /// Stored CRC mismatch or an impossible record count.
    pub fn is_corrupted(&self) -> bool {
        let total = self.total_requests();
        if total == 0 {
            return false;
        }
        if total as usize > MAX_REQUESTS {
            return true;
        }
        self.stored_crc() != self.compute_crc()
    }

    // ── Records ───────────────────────────────────────────────

    pub fn read_request(&self, index: u8) -> Result<RequestBody> {
        let length = self.request_length(index);
        let mut buf = [0u8; MAX_RECORD_LENGTH];
        self.store.read(self.request_offset(index), &mut buf[..length]);
        postcard::from_bytes(&buf[..length]).map_err(|_| Error::SaveCorrupted)
    }

    /// Serialise the manager's topology and activation state.
    ///
    /// Entities are emitted in ascending dependency weight (the length of
    /// the transitive chain of creation prerequisites), so replaying the
    /// records in stored order always resolves every name link. A record
    /// that fails to encode or overflows the store zeroes the record count
    /// before the error propagates — a partial log must never verify.
    pub fn save<B: PinBackend>(&mut self, manager: &Manager<B>) -> Result<()> {
        match self.write_records(manager) {
            Ok(total) => {
                self.store.write(TOTAL_REQUESTS_OFFSET, &[total]);
                let crc = self.compute_crc();
                self.store.write(CRC_OFFSET, &crc.to_le_bytes());
                info!("persist: saved {total} requests");
                Ok(())
            }
            Err(err) => {
                self.clear();
                warn!("persist: save aborted: {err}");
                Err(err)
            }
        }
    }

    // ── Internal ──────────────────────────────────────────────

    fn write_records<B: PinBackend>(&mut self, manager: &Manager<B>) -> Result<u8> {
        let mut sources: heapless::Vec<(Name, u8), MAX_WATER_SOURCES> = manager
            .sources()
            .map(|(name, source)| (clone_name(name), source_weight(manager, source)))
            .collect();
        let mut tanks: heapless::Vec<(Name, u8), MAX_WATER_TANKS> = manager
            .tanks()
            .map(|(name, tank)| (clone_name(name), tank_weight(manager, tank)))
            .collect();
        sources.sort_unstable_by_key(|(_, weight)| *weight);
        tanks.sort_unstable_by_key(|(_, weight)| *weight);

        let mut total: u8 = 0;
        let mut offset = REQUESTS_START_OFFSET;
        let (mut i, mut j) = (0, 0);
        while i < sources.len() || j < tanks.len() {
            let source_first = match (sources.get(i), tanks.get(j)) {
                (Some((_, sw)), Some((_, tw))) => sw < tw,
                (Some(_), None) => true,
                _ => false,
            };
            if source_first {
                let name = &sources[i].0;
                let source = manager.water_source(name)?;
                self.write_record(&mut total, &mut offset, &create_source_record(name, source))?;
                if !source.is_active() {
                    let record = RequestBody::SetWaterSourceActive {
                        water_source_name: name.clone(),
                        active: false,
                    };
                    self.write_record(&mut total, &mut offset, &record)?;
                }
                i += 1;
            } else {
                let name = &tanks[j].0;
                let tank = manager.water_tank(name)?;
                self.write_record(&mut total, &mut offset, &create_tank_record(name, tank))?;
                if !tank.is_active() {
                    let record = RequestBody::SetWaterTankActive {
                        water_tank_name: name.clone(),
                        active: false,
                    };
                    self.write_record(&mut total, &mut offset, &record)?;
                }
                j += 1;
            }
        }
        Ok(total)
    }

    fn write_record(&mut self, total: &mut u8, offset: &mut usize, record: &RequestBody) -> Result<()> {
        let mut buf = [0u8; MAX_RECORD_LENGTH];
        let encoded = postcard::to_slice(record, &mut buf).map_err(|_| Error::FailedToSave)?;
        if *offset + encoded.len() > self.store.capacity() || *total as usize >= MAX_REQUESTS {
            return Err(Error::FailedToSave);
        }
        self.store
            .write(LENGTH_TABLE_OFFSET + *total as usize, &[encoded.len() as u8]);
        self.store.write(*offset, encoded);
        *offset += encoded.len();
        *total += 1;
        Ok(())
    }

    fn request_length(&self, index: u8) -> usize {
        let mut byte = [0u8; 1];
        self.store.read(LENGTH_TABLE_OFFSET + index as usize, &mut byte);
        byte[0] as usize
    }

    fn request_offset(&self, index: u8) -> usize {
        let mut offset = REQUESTS_START_OFFSET;
        for previous in 0..index {
            offset += self.request_length(previous);
        }
        offset
    }

    fn stream_end(&self) -> usize {
        let total = self.total_requests();
        if total == 0 {
            return REQUESTS_START_OFFSET;
        }
        let last = total - 1;
        self.request_offset(last) + self.request_length(last)
    }

    fn stored_crc(&self) -> u32 {
        let mut bytes = [0u8; 4];
        self.store.read(CRC_OFFSET, &mut bytes);
        u32::from_le_bytes(bytes)
    }

    /// CRC-32 over `[0, recordStreamEnd)`, with the stored CRC field itself
    /// treated as zero.
    fn compute_crc(&self) -> u32 {
        if self.total_requests() == 0 {
            return 0;
        }
        let mut hasher = crc32fast::Hasher::new();
        let mut byte = [0u8; 1];
        self.store.read(TOTAL_REQUESTS_OFFSET, &mut byte);
        hasher.update(&byte);
        hasher.update(&[0u8; 4]);

        let end = self.stream_end();
        let mut offset = LENGTH_TABLE_OFFSET;
        let mut chunk = [0u8; 64];
        while offset < end {
            let span = (end - offset).min(chunk.len());
            self.store.read(offset, &mut chunk[..span]);
            hasher.update(&chunk[..span]);
            offset += span;
        }
        hasher.finalize()
    }
}

// ---------------------------------------------------------------------------
// Record assembly
// ---------------------------------------------------------------------------

fn clone_name(name: &str) -> Name {
    Name::try_from(name).unwrap_or_default()
}

fn create_source_record(name: &Name, source: &WaterSource) -> RequestBody {
    RequestBody::CreateWaterSource {
        name: name.clone(),
        pin: source.pin(),
        water_tank_name: source.supply_tank().map(clone_name),
    }
}

fn create_tank_record(name: &Name, tank: &WaterTank) -> RequestBody {
    let params = tank.params();
    RequestBody::CreateWaterTank {
        name: name.clone(),
        pressure_sensor_pin: tank.sensor_pin(),
        volume_factor: params.volume_factor,
        pressure_factor: params.pressure_factor,
        pressure_changing_value: params.pressure_changing_value,
        minimum_volume: params.minimum_volume,
        max_volume: params.max_volume,
        zero_volume_pressure: params.zero_volume_pressure,
        water_source_name: tank.source().map(clone_name),
    }
}

/// Length of the transitive chain of entities this source's creation
/// record requires to pre-exist. Acyclic by construction: links are fixed
/// at creation time, so a chain can only point at older entities.
fn source_weight<B: PinBackend>(manager: &Manager<B>, source: &WaterSource) -> u8 {
    match source.supply_tank().and_then(|name| manager.water_tank(name).ok()) {
        Some(tank) => 1 + tank_weight(manager, tank),
        None => 0,
    }
}

fn tank_weight<B: PinBackend>(manager: &Manager<B>, tank: &WaterTank) -> u8 {
    match tank.source().and_then(|name| manager.water_source(name).ok()) {
        Some(source) => 1 + source_weight(manager, source),
        None => 0,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
