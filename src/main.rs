//! Cistern simulator — host entry point.
//!
//! Wires the supervisory core to an in-memory pin backend, a RAM-backed
//! configuration log, and an in-process loopback transport, then scripts a
//! small two-tank topology and lets the AUTO loop regulate it. The hydraulic
//! model is crude (open valve ⇒ pressure ramps) but exercises the same
//! read/process/write cycle the embedded build runs against a real UART.

use std::collections::VecDeque;

use anyhow::Result;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

use cistern::Name;
use cistern::clock::MonotonicClock;
use cistern::config::ControlConfig;
use cistern::io::MemoryBackend;
use cistern::manager::Manager;
use cistern::persist::{MemoryStorage, Persister};
use cistern::rpc::codec::{API_MESSAGE, FrameDecoder, MAX_FRAME_SIZE, encode_frame};
use cistern::rpc::dispatcher::{Dispatcher, SerialTransport};
use cistern::rpc::messages::{Request, RequestBody, Response};

const SENSOR_PIN: u16 = 14;
const VALVE_PIN: u16 = 7;
const TICK_MS: u32 = 250;

// ── Simulated clock ───────────────────────────────────────────

/// Monotonic milliseconds decoupled from wall time, so a whole hour of
/// regulation replays in a fraction of a second.
struct SimClock {
    now: std::cell::Cell<u32>,
}

impl SimClock {
    fn new() -> Self {
        Self {
            now: std::cell::Cell::new(0),
        }
    }

    fn advance(&self, delta: u32) {
        self.now.set(self.now.get().wrapping_add(delta));
    }
}

impl MonotonicClock for SimClock {
    fn now_ms(&self) -> u32 {
        self.now.get()
    }
}

// ── Loopback transport ────────────────────────────────────────

struct LoopbackPort {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
}

impl LoopbackPort {
    fn new() -> Self {
        Self {
            rx: VecDeque::new(),
            tx: Vec::new(),
        }
    }

    fn push_request(&mut self, id: u32, body: RequestBody) {
        let request = Request { id, body };
        let mut payload = [0u8; MAX_FRAME_SIZE];
        let encoded = postcard::to_slice(&request, &mut payload).expect("request fits a frame");
        let mut frame = [0u8; MAX_FRAME_SIZE + 3];
        let wire_len = encode_frame(API_MESSAGE, encoded, &mut frame).expect("frame fits");
        self.rx.extend(&frame[..wire_len]);
    }

    fn drain_responses(&mut self) -> Vec<Response> {
        let mut decoder = FrameDecoder::new();
        let mut responses = Vec::new();
        for &byte in &self.tx {
            if decoder.feed(byte) {
                if let Ok(response) = postcard::from_bytes(decoder.payload()) {
                    responses.push(response);
                }
                decoder.reset();
            }
        }
        self.tx.clear();
        responses
    }
}

impl SerialTransport for LoopbackPort {
    fn read_byte(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }

    fn write(&mut self, bytes: &[u8]) {
        self.tx.extend_from_slice(bytes);
    }
}

// ── Entry point ───────────────────────────────────────────────

fn main() -> Result<()> {
    TermLogger::init(
        LevelFilter::Info,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )?;

    let backend = MemoryBackend::new();
    backend.set(SENSOR_PIN, 500); // volume 5.0 — below the minimum

    let config = ControlConfig::default();
    let manager = Manager::new(backend.clone(), config, 0);
    let persister = Persister::new(MemoryStorage::default());
    let mut dispatcher = Dispatcher::new(manager, persister, &config);
    let mut port = LoopbackPort::new();

    port.push_request(
        1,
        RequestBody::CreateWaterSource {
            name: Name::try_from("street").unwrap(),
            pin: VALVE_PIN,
            water_tank_name: None,
        },
    );
    port.push_request(
        2,
        RequestBody::CreateWaterTank {
            name: Name::try_from("cistern").unwrap(),
            pressure_sensor_pin: SENSOR_PIN,
            volume_factor: 1.0,
            pressure_factor: 0.01,
            pressure_changing_value: 0.2,
            minimum_volume: 10.0,
            max_volume: 100.0,
            zero_volume_pressure: 0.0,
            water_source_name: Some(Name::try_from("street").unwrap()),
        },
    );
    port.push_request(3, RequestBody::SetMode { mode: 1 });

    let clock = SimClock::new();
    for step in 0..1_200u32 {
        dispatcher.poll(&mut port, clock.now_ms());

        for response in port.drain_responses() {
            log::info!("sim: response {response:?}");
        }

        // Crude hydraulics: an open valve raises the sensor reading.
        if backend.get(VALVE_PIN) == 1 {
            backend.set(SENSOR_PIN, backend.get(SENSOR_PIN) + 40);
        }
        if step % 40 == 0 {
            log::info!(
                "sim: t={}s sensor={}",
                clock.now_ms() / 1000,
                backend.get(SENSOR_PIN)
            );
        }
        clock.advance(TICK_MS);
    }

    port.push_request(4, RequestBody::Save);
    port.push_request(5, RequestBody::GetWaterTank {
        name: Name::try_from("cistern").unwrap(),
    });
    dispatcher.poll(&mut port, clock.now_ms());
    for response in port.drain_responses() {
        log::info!("sim: response {response:?}");
    }

    Ok(())
}
