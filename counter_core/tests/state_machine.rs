//! Counter state machine transitions, guards and auto-stop.

mod common;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use common::{DOOR, rig, rig_with};
use counter_core::config::{MachineCfg, RetryCfg};
use counter_core::error::CounterError;
use counter_core::machine::ItemOutcome;
use counter_core::mocks::MemorySink;
use counter_core::state::{Article, Phase};
use counter_core::stats::{StatsAggregator, StatsTick};
use counter_traits::Level;
use rstest::rstest;

fn aggregator(r: &common::Rig) -> StatsAggregator {
    StatsAggregator::new(
        r.machine.clone(),
        Arc::new(r.clock.clone()),
        RetryCfg {
            max_attempts: 2,
            delay: Duration::ZERO,
        },
    )
}

#[test]
fn full_order_auto_stops_and_finalizes_once() {
    let r = rig();
    r.machine.configure("ORD-1", 100).unwrap();
    let tr = r.machine.start().unwrap();
    assert_eq!((tr.from, tr.to), (Phase::Stopped, Phase::Counting));
    assert_eq!(r.sim.output_level(DOOR), Some(Level::High));

    r.items(100);
    // auto-stop runs off the item path
    assert_eq!(r.machine.phase(), Phase::Counting);
    r.machine.drain_jobs();
    assert_eq!(r.machine.phase(), Phase::Stopped);
    assert_eq!(r.machine.current_count(), 100);
    assert!(!r.machine.is_configured());
    assert!(!r.machine.is_door_open());
    assert!(r.machine.finalize_pending());

    let agg = aggregator(&r);
    let stop = AtomicBool::new(false);
    assert_eq!(agg.tick(&stop).unwrap(), StatsTick::Finalized);
    assert_eq!(agg.tick(&stop).unwrap(), StatsTick::Idle);
    let finals = r.sink.finals();
    assert_eq!(finals.len(), 1);
    assert_eq!(finals[0].current_count, 100);
    assert_eq!(finals[0].order, "ORD-1");
    assert!(finals[0].ended_at.is_some());
}

#[test]
fn pause_while_stopped_is_rejected_without_change() {
    let r = rig();
    let before = r.machine.snapshot();
    let err = r.machine.pause().expect_err("pause from Stopped");
    assert_eq!(
        err,
        CounterError::InvalidTransition {
            op: "pause",
            phase: Phase::Stopped
        }
    );
    let after = r.machine.snapshot();
    assert_eq!(before.phase, after.phase);
    assert_eq!(before.order, after.order);
    assert_eq!(before.door_open, after.door_open);
}

#[test]
fn breakage_extends_the_threshold() {
    let r = rig();
    r.machine.configure("ORD-E", 100).unwrap();
    r.machine.start().unwrap();
    r.items(100);
    assert_eq!(r.machine.adjust_breakage(5).unwrap(), 5);
    r.machine.drain_jobs();
    assert_eq!(r.machine.phase(), Phase::Counting);

    r.items(4);
    r.machine.drain_jobs();
    assert_eq!(r.machine.phase(), Phase::Counting);
    r.items(1);
    r.machine.drain_jobs();
    assert_eq!(r.machine.phase(), Phase::Stopped);
    assert_eq!(r.machine.current_count(), 105);
}

#[test]
fn count_is_frozen_outside_counting() {
    let r = rig();
    r.machine.configure("ORD-2", 50).unwrap();
    assert!(r.machine.register_item().is_err());
    r.machine.start().unwrap();
    r.items(3);
    r.machine.pause().unwrap();
    r.clock.advance(Duration::from_secs(1));
    assert!(matches!(
        r.machine.register_item(),
        Err(CounterError::InvalidTransition { phase: Phase::Paused, .. })
    ));
    assert_eq!(r.machine.current_count(), 3);
    r.machine.resume().unwrap();
    r.items(1);
    assert_eq!(r.machine.current_count(), 4);
    r.machine.stop().unwrap();
    assert!(r.machine.register_item().is_err());
    assert_eq!(r.machine.current_count(), 4);
}

#[test]
fn minimum_interval_rejects_bounce() {
    let r = rig();
    r.machine.configure("ORD-3", 10).unwrap();
    r.machine.start().unwrap();
    assert_eq!(r.item(), ItemOutcome::Counted(1));
    r.clock.advance(Duration::from_millis(20));
    assert_eq!(r.machine.register_item().unwrap(), ItemOutcome::TooSoon);
    assert_eq!(r.item(), ItemOutcome::Counted(2));
}

#[test]
fn items_past_threshold_wait_for_auto_stop() {
    let r = rig();
    r.machine.configure("ORD-4", 2).unwrap();
    r.machine.start().unwrap();
    r.items(2);
    assert_eq!(r.item(), ItemOutcome::AtThreshold);
    assert_eq!(r.machine.current_count(), 2);
}

#[test]
fn concurrent_increments_stop_exactly_once() {
    let cfg = MachineCfg {
        min_item_interval: Duration::ZERO,
        ..MachineCfg::default()
    };
    let r = rig_with(cfg, MemorySink::new(), tempfile::tempdir().unwrap());
    r.machine.configure("ORD-RACE", 1000).unwrap();
    r.machine.start().unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let m = r.machine.clone();
            std::thread::spawn(move || {
                (0..200)
                    .filter(|_| matches!(m.register_item(), Ok(ItemOutcome::Counted(_))))
                    .count()
            })
        })
        .collect();
    let counted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(counted, 1000);
    assert_eq!(r.machine.current_count(), 1000);

    r.machine.drain_jobs();
    assert_eq!(r.machine.phase(), Phase::Stopped);
    // a second trigger finds nothing to do
    assert_eq!(r.machine.auto_stop().unwrap(), None);
    let agg = aggregator(&r);
    let stop = AtomicBool::new(false);
    for _ in 0..3 {
        agg.tick(&stop).unwrap();
    }
    assert_eq!(r.sink.finals().len(), 1);
}

#[rstest]
#[case("", 10)]
#[case("NA", 10)]
#[case("ORD", 0)]
#[case("ORD-1\nphase=counting\ncurrent_count=999", 10)]
#[case("ORD\r2", 10)]
#[case("ORD\t3", 10)]
fn configure_rejects_bad_arguments(#[case] order: &str, #[case] target: u64) {
    let r = rig();
    let err = r.machine.configure(order, target).expect_err("bad args");
    assert!(matches!(err, CounterError::InvalidArgument(_)));
    assert!(r.sink.orders().is_empty());
}

#[test]
fn configure_guards() {
    let r = rig();
    assert_eq!(r.machine.start().unwrap_err(), CounterError::OrderNotConfigured);
    r.machine.configure("ORD-5", 10).unwrap();
    // the order just opened is active in the sink
    assert_eq!(
        r.machine.configure("ORD-6", 10).unwrap_err(),
        CounterError::AlreadyConfigured
    );
    r.machine.start().unwrap();
    assert!(matches!(
        r.machine.configure("ORD-6", 10).unwrap_err(),
        CounterError::InvalidTransition { op: "configure", .. }
    ));
}

#[test]
fn duplicate_active_order_is_rejected() {
    let sink = MemorySink::new();
    sink.insert_active_order("OTHER");
    let r = rig_with(MachineCfg::default(), sink, tempfile::tempdir().unwrap());
    assert_eq!(
        r.machine.configure("ORD-7", 10).unwrap_err(),
        CounterError::DuplicateOrder
    );
    assert!(!r.machine.is_configured());
}

#[test]
fn article_lookup_falls_back() {
    let sink = MemorySink::new().with_article(
        "ORD-K",
        Article {
            id: "A-1".into(),
            description: "green 75cl".into(),
            cadence: 4800,
        },
    );
    let r = rig_with(MachineCfg::default(), sink.clone(), tempfile::tempdir().unwrap());
    let out = r.machine.configure("ORD-K", 10).unwrap();
    assert_eq!(out.article.cadence, 4800);
    r.machine.start().unwrap();
    r.machine.stop().unwrap();
    r.machine.reset().unwrap();

    let out = r.machine.configure("ORD-U", 10).unwrap();
    assert_eq!(out.article.id, "UNKNOWN");
    assert_eq!(out.article.cadence, 6000);
    r.machine.start().unwrap();
    r.machine.stop().unwrap();
    r.machine.reset().unwrap();

    // both attempts fail
    sink.fail_next("lookup_article", 2);
    let out = r.machine.configure("ORD-X", 10).unwrap();
    assert_eq!(out.article.id, "ERROR");
}

#[test]
fn sink_failure_on_active_check_is_a_sink_fault() {
    let r = rig();
    r.sink.fail_next("has_active_order", 2);
    assert!(matches!(
        r.machine.configure("ORD-8", 10),
        Err(CounterError::SinkFault(_))
    ));
    assert!(r.sink.orders().is_empty());
    // nothing was claimed; a later call works
    r.machine.configure("ORD-8", 10).unwrap();
}

#[test]
fn transient_sink_failures_during_configure_are_retried() {
    let sink = MemorySink::new().with_article(
        "ORD-T",
        Article {
            id: "A-9".into(),
            description: "amber 33cl".into(),
            cadence: 9000,
        },
    );
    let r = rig_with(MachineCfg::default(), sink, tempfile::tempdir().unwrap());
    r.sink.fail_next("has_active_order", 1);
    r.sink.fail_next("lookup_article", 1);
    let out = r.machine.configure("ORD-T", 10).unwrap();
    assert_eq!(out.article.id, "A-9");
    assert_eq!(out.article.cadence, 9000);
    assert_eq!(r.sink.orders().len(), 1);
}

#[test]
fn door_fault_does_not_block_transition() {
    let r = rig();
    r.machine.configure("ORD-9", 10).unwrap();
    r.sim.fail_next_writes(DOOR, 2);
    let tr = r.machine.start().unwrap();
    assert_eq!(tr.to, Phase::Counting);
    assert!(tr.door_fault.is_some());
    assert!(!r.machine.is_door_open());
    assert!(r.machine.status().last_door_fault.is_some());
    // the next actuation corrects the door
    r.machine.open_door().unwrap();
    assert_eq!(r.sim.output_level(DOOR), Some(Level::High));
    assert!(r.machine.status().last_door_fault.is_none());
}

#[test]
fn manual_door_failure_is_reported() {
    let r = rig();
    r.sim.fail_next_writes(DOOR, 2);
    assert!(matches!(r.machine.open_door(), Err(CounterError::DoorFault(_))));
    assert!(r.machine.open_door().unwrap());
}

#[test]
fn reset_clears_everything_and_deactivates_orders() {
    let r = rig();
    r.machine.configure("ORD-R", 10).unwrap();
    r.machine.start().unwrap();
    r.items(3);
    assert!(matches!(
        r.machine.reset(),
        Err(CounterError::InvalidTransition { op: "reset", .. })
    ));
    r.machine.stop().unwrap();
    let out = r.machine.reset().unwrap();
    assert!(out.sink_deactivated);
    let st = r.machine.status();
    assert_eq!(st.order, "NA");
    assert_eq!((st.current_count, st.target_count, st.breakage_count), (0, 0, 0));
    assert!(!st.configured);
    assert!(!r.machine.finalize_pending());
    assert!(r.sink.orders().iter().all(|o| !o.active));
}

#[test]
fn every_tenth_item_persists() {
    let r = rig();
    r.machine.configure("ORD-P", 100).unwrap();
    r.machine.start().unwrap();
    r.items(10);
    r.machine.drain_jobs();
    let snap = r.machine.persistence().try_load().unwrap().unwrap();
    assert_eq!(snap.current_count, 10);
    assert_eq!(snap.phase, Phase::Counting);
    r.items(5);
    r.machine.drain_jobs();
    let snap = r.machine.persistence().try_load().unwrap().unwrap();
    assert_eq!(snap.current_count, 10);
}

#[test]
fn transitions_persist_snapshots() {
    let r = rig();
    r.machine.configure("ORD-S", 10).unwrap();
    r.machine.start().unwrap();
    r.machine.pause().unwrap();
    let snap = r.machine.persistence().try_load().unwrap().unwrap();
    assert_eq!(snap.phase, Phase::Paused);
    assert!(!snap.door_open);
    r.machine.resume().unwrap();
    r.machine.stop().unwrap();
    let snap = r.machine.persistence().try_load().unwrap().unwrap();
    assert_eq!(snap.phase, Phase::Stopped);
    assert!(snap.finalize_pending);
    assert!(snap.ended_at.is_some());
}
