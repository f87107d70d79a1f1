#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use counter_core::config::{MachineCfg, RetryCfg, StatsCfg};
use counter_core::door::DoorActuator;
use counter_core::io::SharedIo;
use counter_core::machine::{CounterMachine, ItemOutcome};
use counter_core::mocks::MemorySink;
use counter_core::persistence::PersistenceGateway;
use counter_hardware::SimulatedIo;
use counter_traits::clock::test_clock::TestClock;

pub const DOOR: u8 = 23;
pub const SENSOR: u8 = 22;

pub struct Rig {
    pub sim: SimulatedIo,
    pub sink: MemorySink,
    pub clock: TestClock,
    pub machine: Arc<CounterMachine>,
    pub dir: tempfile::TempDir,
}

impl Rig {
    pub fn state_path(&self) -> std::path::PathBuf {
        self.dir.path().join("state.backup")
    }

    /// Space items past the minimum interval, then count one.
    pub fn item(&self) -> ItemOutcome {
        self.clock.advance(Duration::from_millis(60));
        self.machine
            .register_item()
            .unwrap_or_else(|e| panic!("register_item failed: {e}"))
    }

    pub fn items(&self, n: u64) {
        for _ in 0..n {
            assert!(matches!(self.item(), ItemOutcome::Counted(_)));
        }
    }
}

pub fn rig_with(cfg: MachineCfg, sink: MemorySink, dir: tempfile::TempDir) -> Rig {
    let sim = SimulatedIo::new();
    let clock = TestClock::new();
    let door = DoorActuator::new(SharedIo::new(sim.clone()), cfg.door_pin);
    let machine = Arc::new(CounterMachine::new(
        door,
        Arc::new(sink.clone()),
        PersistenceGateway::new(dir.path().join("state.backup")),
        Arc::new(clock.clone()),
        cfg,
        &StatsCfg::default(),
        RetryCfg {
            max_attempts: 2,
            delay: Duration::ZERO,
        },
    ));
    machine.init_door().expect("door init");
    Rig {
        sim,
        sink,
        clock,
        machine,
        dir,
    }
}

pub fn rig() -> Rig {
    rig_with(
        MachineCfg::default(),
        MemorySink::new(),
        tempfile::tempdir().expect("tempdir"),
    )
}
