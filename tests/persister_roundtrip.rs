//! Save → cold boot → replay round trips, and corruption handling.

mod common;

use cistern::config::ControlConfig;
use cistern::io::MemoryBackend;
use cistern::manager::Manager;
use cistern::persist::{MAX_REQUESTS, MemoryStorage, NvStorage, Persister};
use cistern::rpc::dispatcher::Dispatcher;
use cistern::rpc::messages::{ErrorClass, ResponseBody};

use common::{MockPort, tank_params};

/// Header layout: count byte, CRC word, then the length table.
const RECORD_STREAM_OFFSET: usize = 1 + 4 + MAX_REQUESTS;

fn populated_manager(backend: &MemoryBackend) -> Manager<MemoryBackend> {
    let mut manager = Manager::new(backend.clone(), ControlConfig::default(), 0);
    let mut t2_params = tank_params();
    t2_params.minimum_volume = 25.0;
    t2_params.max_volume = 250.0;
    t2_params.pressure_factor = 0.02;

    manager.create_water_tank("T1", 20, tank_params(), None).unwrap();
    manager.create_water_tank("T2", 21, t2_params, None).unwrap();
    manager.create_water_source("S1", 7, Some("T1")).unwrap();
    manager.create_water_source("S2", 8, Some("T2")).unwrap();
    manager.set_water_source_active("S2", false).unwrap();
    manager
}

#[test]
fn cold_boot_rebuilds_the_exact_topology() {
    let backend = MemoryBackend::new();
    let storage = MemoryStorage::default();

    let manager = populated_manager(&backend);
    let mut persister = Persister::new(storage.clone());
    persister.save(&manager).unwrap();
    assert!(!persister.is_corrupted());

    // Cold boot: fresh manager over the same non-volatile store.
    let config = ControlConfig::default();
    let fresh = Manager::new(backend.clone(), config, 0);
    let mut dispatcher = Dispatcher::new(fresh, Persister::new(storage), &config);
    let mut port = MockPort::new();
    dispatcher.boot(&mut port, 0);
    assert!(port.responses().is_empty(), "replay must be silent on success");

    let manager = dispatcher.manager();
    let mut tanks: Vec<_> = manager.water_tank_list().iter().map(|n| n.to_string()).collect();
    let mut sources: Vec<_> = manager.water_source_list().iter().map(|n| n.to_string()).collect();
    tanks.sort();
    sources.sort();
    assert_eq!(tanks, ["T1", "T2"]);
    assert_eq!(sources, ["S1", "S2"]);

    assert!(!manager.water_source("S2").unwrap().is_active());
    assert!(manager.water_source("S1").unwrap().is_active());
    assert_eq!(manager.water_source("S1").unwrap().supply_tank(), Some("T1"));
    assert_eq!(manager.water_source("S2").unwrap().supply_tank(), Some("T2"));

    let t2 = manager.water_tank("T2").unwrap();
    assert_eq!(t2.params().minimum_volume, 25.0);
    assert_eq!(t2.params().max_volume, 250.0);
    assert_eq!(t2.params().pressure_factor, 0.02);
    assert_eq!(t2.sensor_pin(), 21);
}

#[test]
fn linked_entities_replay_after_their_dependencies() {
    let backend = MemoryBackend::new();
    let storage = MemoryStorage::default();

    // cistern depends on pump which depends on street: creation order on
    // replay must resolve every link regardless of registration order.
    let mut manager = Manager::new(backend.clone(), ControlConfig::default(), 0);
    manager.create_water_tank("street", 20, tank_params(), None).unwrap();
    manager.create_water_source("pump", 7, Some("street")).unwrap();
    manager
        .create_water_tank("cistern", 21, tank_params(), Some("pump"))
        .unwrap();
    Persister::new(storage.clone()).save(&manager).unwrap();

    let config = ControlConfig::default();
    let fresh = Manager::new(backend, config, 0);
    let mut dispatcher = Dispatcher::new(fresh, Persister::new(storage), &config);
    let mut port = MockPort::new();
    dispatcher.boot(&mut port, 0);

    assert!(port.responses().is_empty());
    assert_eq!(
        dispatcher.manager().water_tank("cistern").unwrap().source(),
        Some("pump")
    );
}

#[test]
fn corrupted_log_reports_and_clears_without_mutation() {
    let backend = MemoryBackend::new();
    let mut storage = MemoryStorage::default();

    let manager = populated_manager(&backend);
    Persister::new(storage.clone()).save(&manager).unwrap();

    // Flip one byte inside the record stream.
    let mut byte = [0u8; 1];
    storage.read(RECORD_STREAM_OFFSET, &mut byte);
    storage.write(RECORD_STREAM_OFFSET, &[byte[0] ^ 0x5A]);

    let config = ControlConfig::default();
    let fresh = Manager::new(MemoryBackend::new(), config, 0);
    let mut dispatcher = Dispatcher::new(fresh, Persister::new(storage), &config);
    let mut port = MockPort::new();
    dispatcher.boot(&mut port, 0);

    let responses = port.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].id, 0);
    match &responses[0].body {
        ResponseBody::Error(error) => {
            assert_eq!(error.class, ErrorClass::Exception);
            assert_eq!(
                error.message.as_str(),
                "The persisted configuration is corrupted"
            );
        }
        other => panic!("expected an error response, got {other:?}"),
    }

    // The manager stays empty and the log is invalidated for the next boot.
    assert_eq!(dispatcher.manager().total_water_tanks(), 0);
    assert_eq!(dispatcher.manager().total_water_sources(), 0);
    assert_eq!(dispatcher.persister().total_requests(), 0);
}

#[test]
fn empty_log_boots_silently() {
    let config = ControlConfig::default();
    let manager = Manager::new(MemoryBackend::new(), config, 0);
    let mut dispatcher = Dispatcher::new(manager, Persister::new(MemoryStorage::default()), &config);
    let mut port = MockPort::new();
    dispatcher.boot(&mut port, 0);
    assert!(port.responses().is_empty());
}
