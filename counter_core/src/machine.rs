//! Counter state machine: Stopped / Counting / Paused.
//!
//! Two locks guard the shared state:
//! - the reentrant state lock over [`ControlState`] (phase, order, door, timestamps)
//! - the tally lock over [`Tally`] (counts, breakage, last item time)
//!
//! Code that needs both takes the state lock first. The phase is mirrored in an
//! atomic that only changes while both locks are held, so the item path can
//! check it under the tally lock alone. Snapshots are built under the locks and
//! written after they are released.
use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use chrono::NaiveDateTime;
use counter_traits::Clock;
use parking_lot::{Mutex, ReentrantMutex};
use serde::Serialize;

use crate::api::{HistoryReport, StatusReport};
use crate::config::{MachineCfg, RetryCfg, StatsCfg};
use crate::dispatch::{Job, JobQueue};
use crate::door::DoorActuator;
use crate::error::CounterError;
use crate::hw_error::map_sink_error;
use crate::io::SharedIo;
use crate::persistence::{PersistenceGateway, RecoverySnapshot};
use crate::sink::{FinalRecord, OrderRef, OrderSink, ProgressRecord, with_retry};
use crate::state::{Article, ControlState, NO_ORDER, Phase, Tally};
use crate::stats::{StatsHistory, StatsSample};
use crate::util::{format_ts, wall_now};

/// Result of a phase change. A door fault does not undo the transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: Phase,
    pub to: Phase,
    pub door_fault: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "count")]
pub enum ItemOutcome {
    Counted(u64),
    /// Rejected by the minimum inter-item interval.
    TooSoon,
    /// Threshold already reached; waiting for auto-stop.
    AtThreshold,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigureOutcome {
    pub order: String,
    pub order_ref: OrderRef,
    pub article: Article,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResetOutcome {
    pub sink_deactivated: bool,
}

fn invalid(op: &'static str, phase: Phase) -> CounterError {
    CounterError::InvalidTransition { op, phase }
}

/// Minutes-from-now completion estimate for `remaining` items at `per_hour`.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn estimate_completion(remaining: u64, per_hour: f64) -> Option<NaiveDateTime> {
    if !(per_hour.is_finite() && per_hour > 0.0) {
        return None;
    }
    let minutes = (remaining as f64 * 60.0 / per_hour).ceil();
    if !minutes.is_finite() || minutes > 1.0e7 {
        return None;
    }
    Some(wall_now() + chrono::Duration::minutes(minutes as i64))
}

/// Releases the configure claim on every exit path.
struct Claim<'a>(&'a AtomicBool);

impl<'a> Claim<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct CounterMachine {
    state: ReentrantMutex<RefCell<ControlState>>,
    tally: Mutex<Tally>,
    stats: Mutex<StatsHistory>,
    phase: AtomicU8,
    auto_stop_armed: AtomicBool,
    configuring: AtomicBool,
    stoppage: AtomicBool,
    seq: AtomicU64,
    jobs: JobQueue,
    persistence: PersistenceGateway,
    sink: Arc<dyn OrderSink>,
    clock: Arc<dyn Clock + Send + Sync>,
    cfg: MachineCfg,
    retry: RetryCfg,
}

impl core::fmt::Debug for CounterMachine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CounterMachine")
            .field("phase", &self.phase())
            .field("current_count", &self.current_count())
            .finish_non_exhaustive()
    }
}

impl CounterMachine {
    pub fn new(
        door: DoorActuator<SharedIo>,
        sink: Arc<dyn OrderSink>,
        persistence: PersistenceGateway,
        clock: Arc<dyn Clock + Send + Sync>,
        cfg: MachineCfg,
        stats: &StatsCfg,
        retry: RetryCfg,
    ) -> Self {
        Self {
            state: ReentrantMutex::new(RefCell::new(ControlState::new(door, cfg.default_cadence))),
            tally: Mutex::new(Tally::default()),
            stats: Mutex::new(StatsHistory::new(stats)),
            phase: AtomicU8::new(Phase::Stopped.as_u8()),
            auto_stop_armed: AtomicBool::new(false),
            configuring: AtomicBool::new(false),
            stoppage: AtomicBool::new(false),
            seq: AtomicU64::new(1),
            jobs: JobQueue::default(),
            persistence,
            sink,
            clock,
            cfg,
            retry,
        }
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn current_count(&self) -> u64 {
        self.tally.lock().current
    }

    pub fn tally(&self) -> Tally {
        self.tally.lock().clone()
    }

    pub fn order(&self) -> String {
        self.state.lock().borrow().order.clone()
    }

    pub fn article(&self) -> Article {
        self.state.lock().borrow().article.clone()
    }

    pub fn is_configured(&self) -> bool {
        self.state.lock().borrow().configured
    }

    pub fn is_door_open(&self) -> bool {
        self.state.lock().borrow().door.is_open()
    }

    pub fn finalize_pending(&self) -> bool {
        self.state.lock().borrow().pending_final.is_some()
    }

    pub fn sink(&self) -> &Arc<dyn OrderSink> {
        &self.sink
    }

    pub fn jobs(&self) -> &JobQueue {
        &self.jobs
    }

    pub fn persistence(&self) -> &PersistenceGateway {
        &self.persistence
    }

    pub fn door_pin(&self) -> u8 {
        self.cfg.door_pin
    }

    // ── Internal helpers (state lock held) ──────────────────────────────────

    fn set_phase(&self, st: &mut ControlState, to: Phase) {
        let _tally = self.tally.lock();
        st.phase = to;
        self.phase.store(to.as_u8(), Ordering::Release);
    }

    fn drive_door(st: &mut ControlState, open: bool) -> Option<String> {
        match st.door.set(open) {
            Ok(_) => {
                st.last_door_fault = None;
                None
            }
            Err(e) => {
                let msg = e.to_string();
                st.last_door_fault = Some(msg.clone());
                Some(msg)
            }
        }
    }

    fn request_auto_stop(&self, count: u64) {
        if self.auto_stop_armed.swap(false, Ordering::AcqRel) {
            tracing::info!(count, "count threshold reached; auto-stop requested");
            self.jobs.request_auto_stop();
        }
    }

    fn save(&self, snap: &RecoverySnapshot) {
        self.persistence.save(snap);
    }

    /// Build a snapshot of the current state. Takes the state lock
    /// (reentrantly when the caller already holds it) and then the tally lock.
    pub fn snapshot(&self) -> RecoverySnapshot {
        let guard = self.state.lock();
        let st = guard.borrow();
        let t = self.tally.lock();
        RecoverySnapshot {
            seq: self.seq.fetch_add(1, Ordering::AcqRel),
            phase: st.phase,
            order: st.order.clone(),
            order_ref: st.order_ref,
            article: st.article.id.clone(),
            configured: st.configured,
            current_count: t.current,
            target_count: t.target,
            breakage_count: t.breakage,
            door_open: st.door.is_open(),
            started_at: st.started_at,
            ended_at: st.ended_at,
            finalize_pending: st.pending_final.is_some(),
        }
    }

    pub fn persist_now(&self) {
        let snap = self.snapshot();
        self.save(&snap);
    }

    // ── Door ────────────────────────────────────────────────────────────────

    /// Configure the door output and drive it closed.
    pub fn init_door(&self) -> Result<(), CounterError> {
        let guard = self.state.lock();
        let mut st = guard.borrow_mut();
        match st.door.init() {
            Ok(()) => Ok(()),
            Err(e) => {
                st.last_door_fault = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn manual_door(&self, open: bool) -> Result<bool, CounterError> {
        let snap = {
            let guard = self.state.lock();
            {
                let mut st = guard.borrow_mut();
                if let Err(e) = st.door.set(open) {
                    st.last_door_fault = Some(e.to_string());
                    return Err(e);
                }
                st.last_door_fault = None;
            }
            self.snapshot()
        };
        self.save(&snap);
        tracing::info!(open, "door set manually");
        Ok(open)
    }

    pub fn open_door(&self) -> Result<bool, CounterError> {
        self.manual_door(true)
    }

    pub fn close_door(&self) -> Result<bool, CounterError> {
        self.manual_door(false)
    }

    /// Drive the door closed and give its pin back. Used on shutdown.
    pub fn park_door(&self) {
        let guard = self.state.lock();
        let mut st = guard.borrow_mut();
        if let Err(e) = st.door.sync(false) {
            tracing::error!(error = %e, "could not close door on shutdown");
        }
        if let Err(e) = st.door.release() {
            tracing::warn!(error = %e, "door release failed");
        }
    }

    // ── Transitions ─────────────────────────────────────────────────────────

    /// Set up a new order. Sink calls run without any lock held; the guards
    /// are checked again before the state is written.
    pub fn configure(&self, order: &str, target: u64) -> Result<ConfigureOutcome, CounterError> {
        let order = order.trim();
        if order.is_empty() || order == NO_ORDER {
            return Err(CounterError::InvalidArgument("order id must not be empty".into()));
        }
        if order.chars().any(char::is_control) {
            return Err(CounterError::InvalidArgument(
                "order id must not contain control characters".into(),
            ));
        }
        if target == 0 {
            return Err(CounterError::InvalidArgument("target must be > 0".into()));
        }
        self.check_configurable()?;
        let _claim = Claim::acquire(&self.configuring).ok_or(CounterError::AlreadyConfigured)?;

        let clock = &*self.clock;
        match with_retry("has_active_order", self.retry, clock, || self.sink.has_active_order()) {
            Err(e) => return Err(map_sink_error(&*e)),
            Ok(true) => return Err(CounterError::DuplicateOrder),
            Ok(false) => {}
        }
        let cadence = self.cfg.default_cadence;
        let article = match with_retry("lookup_article", self.retry, clock, || {
            self.sink.lookup_article(order)
        }) {
            Ok(Some(a)) => a.single_line(),
            Ok(None) => {
                tracing::warn!(order, "article not found; using defaults");
                Article::unknown(cadence)
            }
            Err(e) => {
                tracing::warn!(order, error = %e, "article lookup failed; using defaults");
                Article::lookup_failed(cadence)
            }
        };
        let order_ref = self
            .sink
            .open_order(order, target, &article)
            .map_err(|e| map_sink_error(&*e))?;

        let snap = {
            let guard = self.state.lock();
            {
                let mut st = guard.borrow_mut();
                if st.phase != Phase::Stopped {
                    tracing::warn!(order, %order_ref, "order opened but state changed; not applied");
                    return Err(invalid("configure", st.phase));
                }
                if st.configured {
                    tracing::warn!(order, %order_ref, "order opened but already configured; not applied");
                    return Err(CounterError::AlreadyConfigured);
                }
                st.order = order.to_string();
                st.order_ref = Some(order_ref);
                st.article = article.clone();
                st.configured = true;
                st.started_at = None;
                st.ended_at = None;
                *self.tally.lock() = Tally {
                    current: 0,
                    target,
                    breakage: 0,
                    last_item_at: None,
                };
                self.stats.lock().clear();
            }
            self.snapshot()
        };
        self.save(&snap);
        tracing::info!(order, target, %order_ref, article = %article.id, "order configured");
        Ok(ConfigureOutcome {
            order: order.to_string(),
            order_ref,
            article,
        })
    }

    fn check_configurable(&self) -> Result<(), CounterError> {
        let guard = self.state.lock();
        let st = guard.borrow();
        if st.phase != Phase::Stopped {
            return Err(invalid("configure", st.phase));
        }
        if st.configured {
            return Err(CounterError::AlreadyConfigured);
        }
        Ok(())
    }

    pub fn start(&self) -> Result<Transition, CounterError> {
        let (tr, snap) = {
            let guard = self.state.lock();
            let tr = {
                let mut st = guard.borrow_mut();
                if st.phase != Phase::Stopped {
                    return Err(invalid("start", st.phase));
                }
                if !st.configured {
                    return Err(CounterError::OrderNotConfigured);
                }
                let door_fault = Self::drive_door(&mut st, true);
                st.started_at = Some(wall_now());
                st.ended_at = None;
                self.tally.lock().last_item_at = None;
                self.stats.lock().clear();
                self.stoppage.store(false, Ordering::Release);
                self.set_phase(&mut st, Phase::Counting);
                self.auto_stop_armed.store(true, Ordering::Release);
                Transition {
                    from: Phase::Stopped,
                    to: Phase::Counting,
                    door_fault,
                }
            };
            (tr, self.snapshot())
        };
        self.save(&snap);
        tracing::info!(order = %snap.order, target = snap.target_count, "counting started");
        Ok(tr)
    }

    fn stop_locked(&self, st: &mut ControlState) -> Transition {
        let from = st.phase;
        let door_fault = Self::drive_door(st, false);
        let ended = wall_now();
        st.ended_at = Some(ended);
        st.configured = false;
        self.auto_stop_armed.store(false, Ordering::Release);
        self.set_phase(st, Phase::Stopped);
        let t = self.tally.lock().clone();
        let rolling_avg = self.stats.lock().rolling_avg();
        st.pending_final = match st.order_ref {
            Some(order_ref) => Some(FinalRecord {
                order_ref,
                order: st.order.clone(),
                current_count: t.current,
                target_count: t.target,
                breakage_count: t.breakage,
                rolling_avg,
                started_at: st.started_at,
                ended_at: Some(ended),
            }),
            None => {
                tracing::warn!(order = %st.order, "no order reference; final record skipped");
                None
            }
        };
        Transition {
            from,
            to: Phase::Stopped,
            door_fault,
        }
    }

    pub fn stop(&self) -> Result<Transition, CounterError> {
        let (tr, snap) = {
            let guard = self.state.lock();
            let tr = {
                let mut st = guard.borrow_mut();
                if !matches!(st.phase, Phase::Counting | Phase::Paused) {
                    return Err(invalid("stop", st.phase));
                }
                self.stop_locked(&mut st)
            };
            (tr, self.snapshot())
        };
        self.save(&snap);
        tracing::info!(order = %snap.order, count = snap.current_count, "counting stopped");
        Ok(tr)
    }

    /// Stop because the threshold was reached. Re-checks the threshold and
    /// phase; when they no longer hold the trigger is re-armed instead.
    pub fn auto_stop(&self) -> Result<Option<Transition>, CounterError> {
        let (tr, snap) = {
            let guard = self.state.lock();
            let tr = {
                let mut st = guard.borrow_mut();
                if !matches!(st.phase, Phase::Counting | Phase::Paused) {
                    return Ok(None);
                }
                if !self.tally.lock().reached() {
                    self.auto_stop_armed.store(true, Ordering::Release);
                    tracing::debug!("auto-stop no longer applies; re-armed");
                    return Ok(None);
                }
                self.stop_locked(&mut st)
            };
            (tr, self.snapshot())
        };
        self.save(&snap);
        tracing::info!(order = %snap.order, count = snap.current_count, "target reached; counting stopped");
        Ok(Some(tr))
    }

    fn pause_with(&self, reason: &'static str) -> Result<Transition, CounterError> {
        let (tr, snap) = {
            let guard = self.state.lock();
            let tr = {
                let mut st = guard.borrow_mut();
                if st.phase != Phase::Counting {
                    return Err(invalid("pause", st.phase));
                }
                let door_fault = Self::drive_door(&mut st, false);
                self.set_phase(&mut st, Phase::Paused);
                self.stoppage.store(true, Ordering::Release);
                Transition {
                    from: Phase::Counting,
                    to: Phase::Paused,
                    door_fault,
                }
            };
            (tr, self.snapshot())
        };
        self.save(&snap);
        tracing::info!(order = %snap.order, count = snap.current_count, reason, "counting paused");
        Ok(tr)
    }

    pub fn pause(&self) -> Result<Transition, CounterError> {
        self.pause_with("operator")
    }

    pub fn pause_idle(&self) -> Result<Transition, CounterError> {
        self.pause_with("inactivity")
    }

    pub fn resume(&self) -> Result<Transition, CounterError> {
        let (tr, snap) = {
            let guard = self.state.lock();
            let tr = {
                let mut st = guard.borrow_mut();
                if st.phase != Phase::Paused {
                    return Err(invalid("resume", st.phase));
                }
                let door_fault = Self::drive_door(&mut st, true);
                self.tally.lock().last_item_at = None;
                self.set_phase(&mut st, Phase::Counting);
                self.auto_stop_armed.store(true, Ordering::Release);
                Transition {
                    from: Phase::Paused,
                    to: Phase::Counting,
                    door_fault,
                }
            };
            (tr, self.snapshot())
        };
        self.save(&snap);
        let t = self.tally();
        if t.reached() {
            self.request_auto_stop(t.current);
        }
        tracing::info!(order = %snap.order, count = snap.current_count, "counting resumed");
        Ok(tr)
    }

    /// Add `n` known-bad items to the threshold. Returns the new breakage total.
    pub fn adjust_breakage(&self, n: u64) -> Result<u64, CounterError> {
        let (total, reached, snap) = {
            let guard = self.state.lock();
            let (total, reached) = {
                let st = guard.borrow();
                if st.phase != Phase::Counting {
                    return Err(invalid("adjust_breakage", st.phase));
                }
                let mut t = self.tally.lock();
                t.breakage = t.breakage.saturating_add(n);
                (t.breakage, t.reached().then_some(t.current))
            };
            (total, reached, self.snapshot())
        };
        self.save(&snap);
        tracing::info!(added = n, breakage = total, "breakage registered");
        if let Some(count) = reached {
            self.request_auto_stop(count);
        }
        Ok(total)
    }

    /// Count one item. Callable from the sensor loop; never blocks on I/O.
    pub fn register_item(&self) -> Result<ItemOutcome, CounterError> {
        let now = self.clock.now();
        let mut t = self.tally.lock();
        let phase = self.phase();
        if phase != Phase::Counting {
            return Err(invalid("register_item", phase));
        }
        if let Some(last) = t.last_item_at
            && now.saturating_duration_since(last) < self.cfg.min_item_interval
        {
            tracing::trace!("item rejected by minimum interval");
            return Ok(ItemOutcome::TooSoon);
        }
        if t.reached() {
            return Ok(ItemOutcome::AtThreshold);
        }
        t.current += 1;
        t.last_item_at = Some(now);
        let count = t.current;
        let reached = t.reached();
        drop(t);

        tracing::trace!(count, "item counted");
        if reached {
            self.request_auto_stop(count);
        }
        if count % self.cfg.save_every == 0 {
            self.jobs.request_persist();
        }
        Ok(ItemOutcome::Counted(count))
    }

    /// Clear the order and all counters. Only while Stopped.
    pub fn reset(&self) -> Result<ResetOutcome, CounterError> {
        let phase = self.phase();
        if phase != Phase::Stopped {
            return Err(invalid("reset", phase));
        }
        let sink_deactivated = match self.sink.deactivate_all() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "could not deactivate orders in sink");
                false
            }
        };
        let snap = {
            let guard = self.state.lock();
            {
                let mut st = guard.borrow_mut();
                if st.phase != Phase::Stopped {
                    return Err(invalid("reset", st.phase));
                }
                if let Some(rec) = st.pending_final.take() {
                    tracing::warn!(order = %rec.order, "reset discards an unsent final record");
                }
                Self::drive_door(&mut st, false);
                st.order = NO_ORDER.to_string();
                st.order_ref = None;
                st.article = Article::none(self.cfg.default_cadence);
                st.configured = false;
                st.started_at = None;
                st.ended_at = None;
                *self.tally.lock() = Tally::default();
                self.stats.lock().clear();
                self.stoppage.store(false, Ordering::Release);
            }
            self.snapshot()
        };
        self.save(&snap);
        tracing::info!(sink_deactivated, "counter reset");
        Ok(ResetOutcome { sink_deactivated })
    }

    /// Apply a snapshot read at startup. Counting comes back as Paused and
    /// the door is driven to the recorded position. Returns the restored phase.
    pub fn restore(&self, snap: &RecoverySnapshot) -> Option<Phase> {
        if !snap.has_order() {
            tracing::info!("no prior order to restore");
            return None;
        }
        let phase = if snap.phase == Phase::Counting {
            Phase::Paused
        } else {
            snap.phase
        };
        let fresh = {
            let guard = self.state.lock();
            {
                let mut st = guard.borrow_mut();
                st.order = snap.order.clone();
                st.order_ref = snap.order_ref;
                st.article = Article {
                    id: snap.article.clone(),
                    description: String::new(),
                    cadence: self.cfg.default_cadence,
                };
                st.configured = snap.configured || snap.phase == Phase::Counting;
                st.started_at = snap.started_at;
                st.ended_at = snap.ended_at;
                st.pending_final = match (snap.finalize_pending, snap.order_ref) {
                    (true, Some(order_ref)) => Some(FinalRecord {
                        order_ref,
                        order: snap.order.clone(),
                        current_count: snap.current_count,
                        target_count: snap.target_count,
                        breakage_count: snap.breakage_count,
                        rolling_avg: 0.0,
                        started_at: snap.started_at,
                        ended_at: snap.ended_at,
                    }),
                    _ => None,
                };
                *self.tally.lock() = Tally {
                    current: snap.current_count,
                    target: snap.target_count,
                    breakage: snap.breakage_count,
                    last_item_at: None,
                };
                if let Err(e) = st.door.sync(snap.door_open) {
                    st.last_door_fault = Some(e.to_string());
                }
                self.set_phase(&mut st, phase);
                self.auto_stop_armed
                    .store(phase != Phase::Stopped, Ordering::Release);
                self.stoppage.store(phase == Phase::Paused, Ordering::Release);
            }
            self.seq.fetch_max(snap.seq + 1, Ordering::AcqRel);
            self.snapshot()
        };
        self.save(&fresh);
        tracing::info!(
            order = %snap.order,
            recorded = %snap.phase,
            restored = %phase,
            count = snap.current_count,
            door_open = snap.door_open,
            "state restored"
        );
        Some(phase)
    }

    /// Hand out the pending final record, at most once.
    pub fn take_finalize(&self) -> Option<FinalRecord> {
        let (rec, snap) = {
            let guard = self.state.lock();
            let rec = guard.borrow_mut().pending_final.take()?;
            (rec, self.snapshot())
        };
        self.save(&snap);
        Some(rec)
    }

    // ── Stats plumbing ──────────────────────────────────────────────────────

    pub fn take_stoppage(&self) -> bool {
        self.stoppage.swap(false, Ordering::AcqRel)
    }

    pub fn record_stats<R>(&self, f: impl FnOnce(&mut StatsHistory) -> R) -> R {
        f(&mut self.stats.lock())
    }

    pub fn rolling_avg(&self) -> f64 {
        self.stats.lock().rolling_avg()
    }

    /// Progress record for `sample`, when an order reference exists.
    pub fn progress_record(&self, sample: &StatsSample) -> Option<ProgressRecord> {
        let guard = self.state.lock();
        let st = guard.borrow();
        let order_ref = st.order_ref?;
        let t = self.tally.lock();
        Some(ProgressRecord {
            order_ref,
            order: st.order.clone(),
            article: st.article.id.clone(),
            article_description: st.article.description.clone(),
            current_count: t.current,
            target_count: t.target,
            breakage_count: t.breakage,
            throughput_per_hour: sample.throughput_per_hour,
            rolling_avg: sample.throughput_rolling_avg,
            cadence_nominal: sample.cadence_nominal,
            stoppage: sample.stoppage,
            door_open: st.door.is_open(),
            phase: st.phase,
            timestamp: sample.timestamp,
        })
    }

    // ── Job processing ──────────────────────────────────────────────────────

    fn run_flags(&self) {
        if self.jobs.take_auto_stop()
            && let Err(e) = self.auto_stop()
        {
            tracing::error!(error = %e, "auto-stop failed");
        }
        if self.jobs.take_persist() {
            self.persist_now();
        }
    }

    fn run_job(&self, job: Job) {
        match job {
            Job::Wake => {}
            Job::Progress(rec) => {
                // single attempt: progress rows are not idempotent
                if let Err(e) = self.sink.append_progress(&rec) {
                    tracing::warn!(order = %rec.order, count = rec.current_count, error = %e, "progress record dropped");
                }
            }
        }
    }

    /// Wait up to `timeout` for work, then run everything queued.
    pub fn process_jobs(&self, timeout: Duration) {
        let first = self.jobs.recv_timeout(timeout);
        self.run_flags();
        if let Some(job) = first {
            self.run_job(job);
        }
        while let Some(job) = self.jobs.try_recv() {
            self.run_job(job);
        }
        self.run_flags();
    }

    /// Run all queued side effects on the calling thread.
    pub fn drain_jobs(&self) {
        while let Some(job) = self.jobs.try_recv() {
            self.run_job(job);
        }
        self.run_flags();
    }

    // ── Reports ─────────────────────────────────────────────────────────────

    pub fn status(&self) -> StatusReport {
        let guard = self.state.lock();
        let st = guard.borrow();
        let t = self.tally.lock().clone();
        let (samples, rolling_avg) = {
            let h = self.stats.lock();
            (h.since(st.started_at), h.rolling_avg())
        };
        let estimated_completion = if st.phase == Phase::Counting {
            estimate_completion(t.target.saturating_sub(t.current), rolling_avg)
        } else {
            None
        };
        StatusReport {
            order: st.order.clone(),
            article: st.article.id.clone(),
            article_description: st.article.description.clone(),
            cadence: st.article.cadence,
            started_at: st.started_at.as_ref().map(format_ts),
            ended_at: st.ended_at.as_ref().map(format_ts),
            current_count: t.current,
            target_count: t.target,
            breakage_count: t.breakage,
            rolling_avg,
            throughput: samples.iter().map(|s| s.throughput_per_hour).collect(),
            rolling: samples.iter().map(|s| s.throughput_rolling_avg).collect(),
            times: samples.iter().map(|s| s.timestamp.format("%H:%M:%S").to_string()).collect(),
            cadences: samples.iter().map(|s| s.cadence_nominal).collect(),
            stoppages: samples.iter().map(|s| s.stoppage).collect(),
            door_open: st.door.is_open(),
            phase: st.phase,
            configured: st.configured,
            order_ref: st.order_ref,
            last_door_fault: st.last_door_fault.clone(),
            reported_at: format_ts(&wall_now()),
            estimated_completion: estimated_completion.as_ref().map(format_ts),
        }
    }

    /// Progress history for `order` (the active order when None), limited to
    /// records at or after the order's official start.
    pub fn history(&self, order: Option<&str>, max_points: usize) -> Result<HistoryReport, CounterError> {
        let (live_order, live_phase) = {
            let guard = self.state.lock();
            let st = guard.borrow();
            (st.order.clone(), st.phase)
        };
        let order = match order.map(str::trim) {
            Some(o) if !o.is_empty() => o.to_string(),
            _ => live_order.clone(),
        };
        if order == NO_ORDER {
            return Err(CounterError::InvalidArgument("no order given and none active".into()));
        }
        let sink = &self.sink;
        let clock = &*self.clock;
        let started_at = with_retry("fetch_order_start_time", self.retry, clock, || {
            sink.fetch_order_start_time(&order)
        })
        .map_err(|e| map_sink_error(&*e))?;
        let records = with_retry("fetch_history", self.retry, clock, || {
            sink.fetch_history(&order, max_points)
        })
        .map_err(|e| map_sink_error(&*e))?;
        let records: Vec<ProgressRecord> = records
            .into_iter()
            .filter(|r| started_at.is_none_or(|s| r.timestamp >= s))
            .collect();
        let latest = records.last().cloned();
        let estimated_completion = match &latest {
            Some(l) if order == live_order && live_phase == Phase::Counting => {
                estimate_completion(l.target_count.saturating_sub(l.current_count), l.rolling_avg)
            }
            _ => None,
        };
        Ok(HistoryReport {
            order,
            started_at: started_at.as_ref().map(format_ts),
            throughput: records.iter().map(|r| r.throughput_per_hour).collect(),
            rolling: records.iter().map(|r| r.rolling_avg).collect(),
            times: records.iter().map(|r| format_ts(&r.timestamp)).collect(),
            cadences: records.iter().map(|r| r.cadence_nominal).collect(),
            stoppages: records.iter().map(|r| r.stoppage).collect(),
            latest,
            estimated_completion: estimated_completion.as_ref().map(format_ts),
        })
    }
}
