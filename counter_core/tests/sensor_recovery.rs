//! Sensor read failures, re-initialisation and init retries.

use std::sync::Arc;
use std::time::Duration;

use counter_core::config::SensorCfg;
use counter_core::sensor::{PollOutcome, SensorMonitor};
use counter_hardware::SimulatedIo;
use counter_traits::Level;
use counter_traits::clock::test_clock::TestClock;

const PIN: u8 = 22;

fn monitor() -> (SimulatedIo, TestClock, SensorMonitor<SimulatedIo>) {
    let sim = SimulatedIo::new();
    let clock = TestClock::new();
    let cfg = SensorCfg {
        pin: PIN,
        ..SensorCfg::default()
    };
    let m = SensorMonitor::new(sim.clone(), cfg, Arc::new(clock.clone()));
    (sim, clock, m)
}

#[test]
fn tenth_consecutive_error_reinitialises_and_disarms() {
    let (sim, _clock, mut m) = monitor();
    m.init().unwrap();
    sim.push_levels(PIN, [Level::High]);
    assert_eq!(m.poll(true), PollOutcome::Idle);
    assert!(m.is_armed());

    let configures = sim.configure_count(PIN);
    sim.fail_next_reads(PIN, 10);
    for n in 1..=9 {
        assert_eq!(m.poll(true), PollOutcome::ReadError, "error {n}");
        assert_eq!(m.diagnostics().consecutive_errors, n);
    }
    // the 10th failure triggers the reinit, whose baseline read succeeds
    assert_eq!(m.poll(true), PollOutcome::Reinitialized);
    assert_eq!(sim.configure_count(PIN), configures + 1);
    assert!(!m.is_armed());
    assert!(m.is_initialised());
    assert_eq!(m.diagnostics().consecutive_errors, 0);
    assert!(!m.hardware_fault());
}

#[test]
fn a_good_read_clears_the_error_streak() {
    let (sim, _clock, mut m) = monitor();
    m.init().unwrap();
    sim.fail_next_reads(PIN, 9);
    for _ in 0..9 {
        m.poll(true);
    }
    assert_eq!(m.poll(true), PollOutcome::Idle);
    assert_eq!(m.diagnostics().consecutive_errors, 0);
}

fn error_burst(sim: &SimulatedIo, m: &mut SensorMonitor<SimulatedIo>) -> PollOutcome {
    sim.fail_next_reads(PIN, 10);
    let mut last = PollOutcome::Idle;
    for _ in 0..10 {
        last = m.poll(true);
    }
    last
}

#[test]
fn repeated_reinits_within_cooldown_latch_a_fault() {
    let (sim, clock, mut m) = monitor();
    m.init().unwrap();
    // first request starts the window, five more are allowed inside it
    for round in 0..6 {
        assert_eq!(error_burst(&sim, &mut m), PollOutcome::Reinitialized, "round {round}");
    }
    assert!(!m.hardware_fault());
    assert_eq!(error_burst(&sim, &mut m), PollOutcome::ReadError);
    assert!(m.hardware_fault());
    // the pin itself still works; polling carries on
    assert!(m.is_initialised());
    assert_eq!(m.poll(true), PollOutcome::Idle);

    clock.advance(Duration::from_secs(61));
    assert_eq!(error_burst(&sim, &mut m), PollOutcome::Reinitialized);
    assert!(!m.hardware_fault());
    assert_eq!(m.diagnostics().reinit_attempts, 0);
}

#[test]
fn failed_reinit_falls_back_to_init_retry() {
    let (sim, clock, mut m) = monitor();
    m.init().unwrap();
    sim.set_read_failing(PIN, true);
    let mut last = PollOutcome::Idle;
    for _ in 0..10 {
        last = m.poll(true);
    }
    assert_eq!(last, PollOutcome::ReadError);
    assert!(!m.is_initialised());
    assert_eq!(m.poll(true), PollOutcome::NotReady);

    sim.set_read_failing(PIN, false);
    clock.advance(Duration::from_secs(5));
    m.poll(true);
    assert!(m.is_initialised());
}

#[test]
fn never_initialised_sensor_is_not_read() {
    let (sim, clock, mut m) = monitor();
    sim.fail_next_configures(PIN, 2);
    assert_eq!(m.poll(true), PollOutcome::NotReady);
    clock.advance(Duration::from_secs(5));
    assert_eq!(m.poll(true), PollOutcome::NotReady);
    assert!(!m.is_initialised());
    clock.advance(Duration::from_secs(5));
    m.poll(true);
    assert!(m.is_initialised());
    assert_eq!(m.diagnostics().level, Some(1));
}
