//! Replies returned to the request layer.

mod common;

use std::sync::Arc;

use common::{DOOR, Rig, SENSOR, rig};
use counter_core::ControlApi;
use counter_core::config::SensorCfg;
use counter_core::io::SharedIo;
use counter_core::sensor::SensorMonitor;
use counter_core::state::Phase;
use counter_traits::{Level, Pull};
use parking_lot::Mutex;

fn api(r: &Rig) -> ControlApi {
    let cfg = SensorCfg {
        pin: SENSOR,
        ..SensorCfg::default()
    };
    let sensor = SensorMonitor::new(SharedIo::new(r.sim.clone()), cfg, Arc::new(r.clock.clone()));
    ControlApi::new(r.machine.clone(), Arc::new(Mutex::new(sensor)))
}

#[test]
fn lifecycle_replies() {
    let r = rig();
    let api = api(&r);
    let c = api.configure("ORD-API", 20);
    assert!(c.success, "{}", c.message);
    assert_eq!(c.data.unwrap().order, "ORD-API");

    let s = api.start();
    assert!(s.success);
    assert_eq!(s.data.unwrap().to, Phase::Counting);

    let again = api.start();
    assert!(!again.success);
    assert!(again.data.is_none());
    assert!(again.message.contains("start"), "{}", again.message);

    assert!(api.pause().success);
    assert!(api.resume().success);
    assert_eq!(api.adjust_breakage(3).data, Some(3));
    assert!(api.stop().success);
    assert!(api.reset().data.unwrap().sink_deactivated);
    assert_eq!(api.get_status().data.unwrap().order, "NA");
}

#[test]
fn manual_increment_reports_before_and_after() {
    let r = rig();
    let api = api(&r);
    assert!(!api.manual_increment().success);

    api.configure("ORD-INC", 20);
    api.start();
    let first = api.manual_increment().data.unwrap();
    assert_eq!((first.before, first.after), (0, 1));

    // same instant: inside the minimum interval
    let too_soon = api.manual_increment();
    assert!(!too_soon.success);
    assert!(too_soon.message.contains("minimum interval"));

    r.clock.advance(std::time::Duration::from_millis(60));
    assert_eq!(api.manual_increment().data.unwrap().after, 2);
}

#[test]
fn door_commands_report_position() {
    let r = rig();
    let api = api(&r);
    assert_eq!(api.open_door().data.unwrap().door_open, true);
    assert_eq!(r.sim.output_level(DOOR), Some(Level::High));
    assert_eq!(api.close_door().data.unwrap().door_open, false);
    assert_eq!(r.sim.output_level(DOOR), Some(Level::Low));

    r.sim.fail_next_writes(DOOR, 2);
    let failed = api.open_door();
    assert!(!failed.success);
    assert!(api.get_status().data.unwrap().last_door_fault.is_some());
}

#[test]
fn sensor_reconfigure_and_diagnostics() {
    let r = rig();
    let api = api(&r);
    let d = api.configure_sensor(Some(true), None).data.unwrap();
    assert!(d.invert);
    assert!(d.pullup);
    assert!(!d.armed);

    let d = api.configure_sensor(None, Some(false)).data.unwrap();
    assert!(!d.pullup);
    assert!(d.initialised);
    assert_eq!(r.sim.pull(SENSOR), Some(Pull::Down));
    // pulled down reads low, inverted reports high
    assert_eq!(d.level, Some(1));

    let diag = api.get_sensor_diagnostics().data.unwrap();
    assert_eq!(diag.phase, Phase::Stopped);
    assert_eq!(diag.current_count, 0);
    assert_eq!(diag.sensor.pin, SENSOR);
}

#[test]
fn replies_serialize_for_the_wire() {
    let r = rig();
    let api = api(&r);
    let ok = serde_json::to_value(api.get_status()).unwrap();
    assert_eq!(ok["success"], true);
    assert_eq!(ok["data"]["phase"], "stopped");

    let rejected = serde_json::to_value(api.stop()).unwrap();
    assert_eq!(rejected["success"], false);
    assert!(rejected.get("data").is_none());

    let diag = serde_json::to_value(api.get_sensor_diagnostics()).unwrap();
    assert_eq!(diag["data"]["pin"], SENSOR);
}

#[test]
fn history_defaults_point_count() {
    let r = rig();
    let api = api(&r);
    assert!(!api.history(None, None).success);
    api.configure("ORD-HIST", 10);
    let h = api.history(None, Some(0));
    assert!(h.success, "{}", h.message);
    assert!(h.data.unwrap().throughput.is_empty());
}
