//! AUTO-mode self-regulation against the boundary scenarios: open below
//! minimum, close at maximum, and the thrash-protection window.

mod common;

use cistern::manager::Mode;

use common::{MINUTE, SECOND, SENSOR_PIN, VALVE_PIN, single_tank_setup};

#[test]
fn auto_opens_the_source_below_minimum() {
    let (mut manager, backend) = single_tank_setup(0);
    backend.set(SENSOR_PIN, 500); // pressure 5.0, volume 5.0 < min 10
    manager.set_mode(Mode::Auto);

    assert_eq!(manager.tick(0), None);
    assert_eq!(backend.get(VALVE_PIN), 1);
}

#[test]
fn auto_closes_the_source_at_max_volume() {
    let (mut manager, backend) = single_tank_setup(0);
    backend.set(SENSOR_PIN, 500);
    manager.set_mode(Mode::Auto);
    manager.tick(0);
    assert_eq!(backend.get(VALVE_PIN), 1);

    // The tank filled past the maximum while the protection window ran out.
    backend.set(SENSOR_PIN, 11_000); // volume 110 > max 100
    manager.tick(MINUTE + SECOND);
    assert_eq!(backend.get(VALVE_PIN), 0);
}

#[test]
fn protection_window_spaces_self_initiated_commands() {
    let (mut manager, backend) = single_tank_setup(0);
    backend.set(SENSOR_PIN, 500);
    manager.set_mode(Mode::Auto);
    manager.tick(0);
    backend.set(SENSOR_PIN, 11_000);
    let closed_at = MINUTE + SECOND;
    manager.tick(closed_at);
    assert_eq!(backend.get(VALVE_PIN), 0);

    // Drained again right away, but the regulator just closed the valve:
    // two ticks inside the window must not reopen it.
    backend.set(SENSOR_PIN, 500);
    manager.tick(closed_at + SECOND);
    assert_eq!(backend.get(VALVE_PIN), 0);
    manager.tick(closed_at + 10 * SECOND);
    assert_eq!(backend.get(VALVE_PIN), 0);

    // Once the window has been exceeded the regulator may act again.
    manager.tick(closed_at + MINUTE + SECOND);
    assert_eq!(backend.get(VALVE_PIN), 1);
}

#[test]
fn manual_mode_never_touches_the_pins() {
    let (mut manager, backend) = single_tank_setup(0);
    backend.set(SENSOR_PIN, 500);

    for step in 0..10u32 {
        assert_eq!(manager.tick(step * MINUTE), None);
    }
    assert_eq!(backend.get(VALVE_PIN), 0);
    assert!(manager.water_tank("T").unwrap().fault().is_none());
}

#[test]
fn regulator_respects_an_empty_supply_tank() {
    let (mut manager, backend) = single_tank_setup(0);
    // A second tank fed by a source drawing from T, which is empty.
    backend.set(SENSOR_PIN, 500); // T volume 5.0 ≤ its minimum
    backend.set(15, 500); // downstream tank below minimum too
    manager
        .create_water_source("well", 8, Some("T"))
        .unwrap();
    manager
        .create_water_tank("trough", 15, common::tank_params(), Some("well"))
        .unwrap();
    manager.set_mode(Mode::Auto);

    manager.tick(0);
    // T's own source opens; the well must stay shut while T is empty.
    assert_eq!(backend.get(VALVE_PIN), 1);
    assert_eq!(backend.get(8), 0);

    // Once T rises above its minimum the well may open.
    backend.set(SENSOR_PIN, 5_000);
    manager.tick(2 * MINUTE);
    assert_eq!(backend.get(8), 1);
}

#[test]
fn deactivating_a_tank_stops_its_fill() {
    let (mut manager, backend) = single_tank_setup(0);
    backend.set(SENSOR_PIN, 500);
    manager.fill_water_tank("T", false, 0).unwrap();
    assert_eq!(backend.get(VALVE_PIN), 1);

    manager.set_water_tank_active("T", false).unwrap();
    assert_eq!(backend.get(VALVE_PIN), 0);
    assert!(!manager.water_tank("T").unwrap().is_active());
}

#[test]
fn forced_fill_bootstraps_an_empty_supply_chain() {
    let (mut manager, backend) = single_tank_setup(0);
    backend.set(SENSOR_PIN, 11_000); // already above max
    assert!(manager.fill_water_tank("T", false, 0).is_err());
    manager.fill_water_tank("T", true, 0).unwrap();
    assert_eq!(backend.get(VALVE_PIN), 1);
}
