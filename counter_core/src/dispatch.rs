//! Bounded side-effect queue between the hot paths and the job worker.
//!
//! Auto-stop and persist requests are flags plus a best-effort wake, so a full
//! queue can delay them by one worker timeout but never lose them.
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel as xch;

use crate::sink::ProgressRecord;

pub const QUEUE_CAPACITY: usize = 64;

#[derive(Debug)]
pub enum Job {
    Wake,
    Progress(ProgressRecord),
}

#[derive(Debug)]
pub struct JobQueue {
    tx: xch::Sender<Job>,
    rx: xch::Receiver<Job>,
    auto_stop: AtomicBool,
    persist: AtomicBool,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new(QUEUE_CAPACITY)
    }
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = xch::bounded(capacity.max(1));
        Self {
            tx,
            rx,
            auto_stop: AtomicBool::new(false),
            persist: AtomicBool::new(false),
        }
    }

    fn wake(&self) {
        // a full queue already guarantees a wake-up
        let _ = self.tx.try_send(Job::Wake);
    }

    pub fn request_auto_stop(&self) {
        self.auto_stop.store(true, Ordering::Release);
        self.wake();
    }

    pub fn request_persist(&self) {
        self.persist.store(true, Ordering::Release);
        self.wake();
    }

    pub fn take_auto_stop(&self) -> bool {
        self.auto_stop.swap(false, Ordering::AcqRel)
    }

    pub fn take_persist(&self) -> bool {
        self.persist.swap(false, Ordering::AcqRel)
    }

    pub fn push_progress(&self, rec: ProgressRecord) {
        if let Err(e) = self.tx.try_send(Job::Progress(rec)) {
            let full = e.is_full();
            if let Job::Progress(r) = e.into_inner() {
                tracing::warn!(order = %r.order, count = r.current_count, full, "progress record dropped");
            }
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<Job> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn try_recv(&self) -> Option<Job> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
