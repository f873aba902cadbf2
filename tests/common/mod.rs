//! Shared fixtures for integration tests.
//!
//! Mirrors the embedded wiring with host doubles: a shared-cell pin backend
//! standing in for the GPIO/ADC drivers and a loopback serial port that
//! records every emitted frame.

#![allow(dead_code)]

use std::collections::VecDeque;

use cistern::Name;
use cistern::config::ControlConfig;
use cistern::io::MemoryBackend;
use cistern::manager::Manager;
use cistern::rpc::codec::{API_MESSAGE, FrameDecoder, MAX_FRAME_SIZE, encode_frame};
use cistern::rpc::dispatcher::SerialTransport;
use cistern::rpc::messages::{Request, RequestBody, Response};
use cistern::tank::TankParams;

pub const SENSOR_PIN: u16 = 14;
pub const VALVE_PIN: u16 = 7;

pub const SECOND: u32 = 1_000;
pub const MINUTE: u32 = 60 * SECOND;

pub fn tank_params() -> TankParams {
    TankParams {
        pressure_factor: 0.01,
        volume_factor: 1.0,
        zero_volume_pressure: 0.0,
        pressure_changing_value: 0.2,
        minimum_volume: 10.0,
        max_volume: 100.0,
    }
}

pub fn name(value: &str) -> Name {
    Name::try_from(value).unwrap()
}

/// Manager over a shared memory backend, plus the backend handle for
/// driving sensor values and inspecting actuator pins.
pub fn manager_at(now: u32) -> (Manager<MemoryBackend>, MemoryBackend) {
    let backend = MemoryBackend::new();
    (
        Manager::new(backend.clone(), ControlConfig::default(), now),
        backend,
    )
}

/// One tank `T` filled by one source `S`, as in the boundary scenarios.
pub fn single_tank_setup(now: u32) -> (Manager<MemoryBackend>, MemoryBackend) {
    let (mut manager, backend) = manager_at(now);
    manager.create_water_source("S", VALVE_PIN, None).unwrap();
    manager
        .create_water_tank("T", SENSOR_PIN, tank_params(), Some("S"))
        .unwrap();
    (manager, backend)
}

// ── Loopback serial port ──────────────────────────────────────

pub struct MockPort {
    pub rx: VecDeque<u8>,
    pub tx: Vec<u8>,
    pub writable: bool,
}

impl MockPort {
    pub fn new() -> Self {
        Self {
            rx: VecDeque::new(),
            tx: Vec::new(),
            writable: true,
        }
    }

    pub fn push_request(&mut self, id: u32, body: RequestBody) {
        let request = Request { id, body };
        let mut payload = [0u8; MAX_FRAME_SIZE];
        let encoded = postcard::to_slice(&request, &mut payload).unwrap();
        self.push_frame(API_MESSAGE, encoded);
    }

    pub fn push_frame(&mut self, message_type: u8, payload: &[u8]) {
        let mut frame = [0u8; MAX_FRAME_SIZE + 3];
        let wire_len = encode_frame(message_type, payload, &mut frame).unwrap();
        self.rx.extend(&frame[..wire_len]);
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
    }

    /// Decode and drain every response frame written so far.
    pub fn responses(&mut self) -> Vec<Response> {
        let mut decoder = FrameDecoder::new();
        let mut responses = Vec::new();
        for &byte in &self.tx {
            if decoder.feed(byte) {
                responses.push(postcard::from_bytes(decoder.payload()).unwrap());
                decoder.reset();
            }
        }
        self.tx.clear();
        responses
    }
}

impl Default for MockPort {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialTransport for MockPort {
    fn read_byte(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }

    fn write(&mut self, bytes: &[u8]) {
        self.tx.extend_from_slice(bytes);
    }

    fn can_write(&self) -> bool {
        self.writable
    }
}
