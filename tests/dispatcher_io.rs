//! Wire-level dispatcher behaviour: framing, correlation ids, mode gating,
//! truncation, and unsolicited fault emission.

mod common;

use cistern::config::ControlConfig;
use cistern::io::MemoryBackend;
use cistern::manager::Manager;
use cistern::persist::{MemoryStorage, Persister};
use cistern::rpc::codec::API_MESSAGE;
use cistern::rpc::dispatcher::Dispatcher;
use cistern::rpc::messages::{ErrorClass, RequestBody, ResponseBody};

use common::{MINUTE, SECOND, SENSOR_PIN, VALVE_PIN, MockPort, name, tank_params};

fn dispatcher_over(
    backend: &MemoryBackend,
) -> Dispatcher<MemoryBackend, MemoryStorage> {
    let config = ControlConfig::default();
    let manager = Manager::new(backend.clone(), config, 0);
    Dispatcher::new(manager, Persister::new(MemoryStorage::default()), &config)
}

fn create_topology(port: &mut MockPort) {
    port.push_request(
        1,
        RequestBody::CreateWaterSource {
            name: name("S"),
            pin: VALVE_PIN,
            water_tank_name: None,
        },
    );
    let params = tank_params();
    port.push_request(
        2,
        RequestBody::CreateWaterTank {
            name: name("T"),
            pressure_sensor_pin: SENSOR_PIN,
            volume_factor: params.volume_factor,
            pressure_factor: params.pressure_factor,
            pressure_changing_value: params.pressure_changing_value,
            minimum_volume: params.minimum_volume,
            max_volume: params.max_volume,
            zero_volume_pressure: params.zero_volume_pressure,
            water_source_name: Some(name("S")),
        },
    );
}

#[test]
fn commands_answer_with_their_correlation_id() {
    let backend = MemoryBackend::new();
    let mut dispatcher = dispatcher_over(&backend);
    let mut port = MockPort::new();

    create_topology(&mut port);
    port.push_request(3, RequestBody::GetMode);
    dispatcher.poll(&mut port, 0);

    let responses = port.responses();
    assert_eq!(responses.len(), 3);
    assert_eq!(responses[0].id, 1);
    assert_eq!(responses[0].body, ResponseBody::Ok);
    assert_eq!(responses[1].id, 2);
    assert_eq!(responses[2].id, 3);
    assert_eq!(responses[2].body, ResponseBody::Mode(0));
}

#[test]
fn rejected_commands_mirror_the_id_with_an_error() {
    let backend = MemoryBackend::new();
    let mut dispatcher = dispatcher_over(&backend);
    let mut port = MockPort::new();

    port.push_request(9, RequestBody::SetMode { mode: 7 });
    dispatcher.poll(&mut port, 0);

    let responses = port.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].id, 9);
    match &responses[0].body {
        ResponseBody::Error(error) => {
            assert_eq!(error.class, ErrorClass::InvalidRequest);
            assert_eq!(error.message.as_str(), "Invalid operation mode");
        }
        other => panic!("expected error response, got {other:?}"),
    }
}

#[test]
fn auto_mode_rejections_travel_the_wire() {
    let backend = MemoryBackend::new();
    let mut dispatcher = dispatcher_over(&backend);
    let mut port = MockPort::new();

    create_topology(&mut port);
    port.push_request(3, RequestBody::SetMode { mode: 1 });
    port.push_request(
        4,
        RequestBody::SetWaterSourceState {
            water_source_name: name("S"),
            state: true,
            force: false,
        },
    );
    backend.set(SENSOR_PIN, 50_000); // keep the regulator quiet (mid-band)
    dispatcher.poll(&mut port, 0);

    let responses = port.responses();
    let rejection = &responses[3];
    assert_eq!(rejection.id, 4);
    match &rejection.body {
        ResponseBody::Error(error) => {
            assert_eq!(error.class, ErrorClass::InvalidRequest);
            assert_eq!(error.message.as_str(), "Cannot handle a water source in auto mode");
        }
        other => panic!("expected error response, got {other:?}"),
    }
}

#[test]
fn tank_state_reads_back_over_the_wire() {
    let backend = MemoryBackend::new();
    backend.set(SENSOR_PIN, 1_500);
    let mut dispatcher = dispatcher_over(&backend);
    let mut port = MockPort::new();

    create_topology(&mut port);
    port.push_request(3, RequestBody::GetWaterTank { name: name("T") });
    port.push_request(4, RequestBody::GetWaterSourceList);
    dispatcher.poll(&mut port, 0);

    let responses = port.responses();
    match &responses[2].body {
        ResponseBody::WaterTank(state) => {
            assert_eq!(state.pressure_sensor_pin, SENSOR_PIN);
            assert_eq!(state.pressure, 15.0);
            assert_eq!(state.volume, 15.0);
            assert!(state.active);
            assert!(!state.filling);
            assert_eq!(state.water_source_name.as_deref(), Some("S"));
        }
        other => panic!("expected tank state, got {other:?}"),
    }
    match &responses[3].body {
        ResponseBody::WaterSourceList(list) => {
            assert_eq!(list.len(), 1);
            assert_eq!(list[0].as_str(), "S");
        }
        other => panic!("expected source list, got {other:?}"),
    }
}

#[test]
fn malformed_payloads_get_an_id_zero_error() {
    let backend = MemoryBackend::new();
    let mut dispatcher = dispatcher_over(&backend);
    let mut port = MockPort::new();

    port.push_frame(API_MESSAGE, &[0xFF; 24]);
    dispatcher.poll(&mut port, 0);

    let responses = port.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].id, 0);
    match &responses[0].body {
        ResponseBody::Error(error) => {
            assert_eq!(error.message.as_str(), "Failed to decode the request");
        }
        other => panic!("expected error response, got {other:?}"),
    }
}

#[test]
fn stalled_partial_frames_report_truncation() {
    let backend = MemoryBackend::new();
    let mut dispatcher = dispatcher_over(&backend);
    let mut port = MockPort::new();

    // A frame header promising ten bytes that never arrive.
    port.push_bytes(&[API_MESSAGE, 10, 0, 1, 2, 3]);
    dispatcher.poll(&mut port, 0);
    assert!(port.responses().is_empty());

    // Not yet: one tick before the timeout.
    dispatcher.poll(&mut port, 2_499);
    assert!(port.responses().is_empty());

    dispatcher.poll(&mut port, 2_500);
    let responses = port.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].id, 0);
    match &responses[0].body {
        ResponseBody::Error(error) => {
            assert_eq!(error.message.as_str(), "Truncated message received");
        }
        other => panic!("expected error response, got {other:?}"),
    }

    // The decoder recovered: a whole frame parses afterwards.
    port.push_request(5, RequestBody::GetMode);
    dispatcher.poll(&mut port, 3_000);
    let responses = port.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].id, 5);
}

#[test]
fn background_faults_emit_unsolicited_runtime_errors() {
    let backend = MemoryBackend::new();
    backend.set(SENSOR_PIN, 500);
    let mut dispatcher = dispatcher_over(&backend);
    let mut port = MockPort::new();

    create_topology(&mut port);
    port.push_request(3, RequestBody::SetMode { mode: 1 });
    dispatcher.poll(&mut port, 0);
    port.responses();

    // Sensor frozen past the soft window: the rotator surfaces the fault.
    dispatcher.poll(&mut port, 5 * MINUTE + SECOND);
    let responses = port.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].id, 0);
    match &responses[0].body {
        ResponseBody::Error(error) => {
            assert_eq!(error.class, ErrorClass::RuntimeError);
            assert_eq!(error.message.as_str(), "The water tank is not filling");
            assert_eq!(error.arg.as_str(), "T");
        }
        other => panic!("expected error response, got {other:?}"),
    }
}

#[test]
fn congested_output_drops_the_unsolicited_emission() {
    let backend = MemoryBackend::new();
    backend.set(SENSOR_PIN, 500);
    let mut dispatcher = dispatcher_over(&backend);
    let mut port = MockPort::new();

    create_topology(&mut port);
    port.push_request(3, RequestBody::SetMode { mode: 1 });
    dispatcher.poll(&mut port, 0);
    port.responses();

    port.writable = false;
    dispatcher.poll(&mut port, 5 * MINUTE + SECOND);
    assert!(port.responses().is_empty());

    // The slot persists, so the next interval delivers it.
    port.writable = true;
    dispatcher.poll(&mut port, 5 * MINUTE + 11 * SECOND);
    let responses = port.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].id, 0);
}

#[test]
fn non_api_frames_are_ignored() {
    let backend = MemoryBackend::new();
    let mut dispatcher = dispatcher_over(&backend);
    let mut port = MockPort::new();

    port.push_frame(0x7F, b"not for us");
    port.push_request(1, RequestBody::GetMode);
    dispatcher.poll(&mut port, 0);

    let responses = port.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].id, 1);
}
