//! Real-time scheduling helpers (Linux SCHED_FIFO / mlockall).
//!
//! Applied on the main thread before the controller spawns its loops, so the
//! sensor poll thread inherits the policy.

use crate::cli::RtLock;

#[cfg(target_os = "linux")]
fn is_retryable_memlock_error(err: &std::io::Error) -> bool {
    matches!(err.raw_os_error(), Some(code) if code == libc::EPERM || code == libc::ENOMEM)
}

#[cfg(target_os = "linux")]
fn memlock_limit_hint() -> Option<String> {
    let mut rlim = std::mem::MaybeUninit::<libc::rlimit>::uninit();
    // SAFETY: getrlimit only writes into the provided struct.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, rlim.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    // SAFETY: rc == 0 means the struct was initialised.
    let cur = unsafe { rlim.assume_init() }.rlim_cur;
    if cur == libc::RLIM_INFINITY {
        Some("memlock limit: unlimited".to_string())
    } else {
        Some(format!("memlock limit: {} KiB", cur / 1024))
    }
}

#[cfg(target_os = "linux")]
fn mlockall(flags: libc::c_int) -> std::io::Result<()> {
    // SAFETY: mlockall has no memory-safety preconditions.
    let rc = unsafe { libc::mlockall(flags) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(target_os = "linux")]
fn apply_mem_lock(lock: RtLock) -> eyre::Result<()> {
    let (flags, label) = match lock {
        RtLock::None => return Ok(()),
        RtLock::Current => (libc::MCL_CURRENT, "current"),
        RtLock::All => (libc::MCL_CURRENT | libc::MCL_FUTURE, "current|future"),
    };
    let Err(err) = mlockall(flags) else {
        return Ok(());
    };
    // All may be refused where Current is still allowed
    if lock == RtLock::All && is_retryable_memlock_error(&err) && mlockall(libc::MCL_CURRENT).is_ok() {
        tracing::warn!(error = %err, "mlockall(current|future) refused; locked current pages only");
        return Ok(());
    }
    let mut msg = format!("mlockall({label}) failed: {err}");
    if is_retryable_memlock_error(&err) {
        if let Some(h) = memlock_limit_hint() {
            msg.push_str("; ");
            msg.push_str(&h);
        }
        msg.push_str("; hint: needs CAP_IPC_LOCK (or root) and sufficient 'ulimit -l'");
    }
    Err(eyre::eyre!(msg))
}

#[cfg(target_os = "linux")]
fn apply_fifo_priority(prio: Option<i32>) -> eyre::Result<i32> {
    use libc::{SCHED_FIFO, sched_get_priority_max, sched_get_priority_min, sched_param, sched_setscheduler};

    // SAFETY: plain queries without pointers.
    let (min, max) = unsafe { (sched_get_priority_min(SCHED_FIFO), sched_get_priority_max(SCHED_FIFO)) };
    let (min, max) = if min < 0 || max < 0 { (1, 99) } else { (min, max) };
    // leave headroom above the loops for kernel threads
    let wanted = prio.unwrap_or(max / 2);
    let param = sched_param {
        sched_priority: wanted.clamp(min, max),
    };
    // SAFETY: param outlives the call.
    let rc = unsafe { sched_setscheduler(0, SCHED_FIFO, &param) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        return Err(eyre::eyre!(
            "sched_setscheduler(SCHED_FIFO, {}) failed: {err}; hint: needs CAP_SYS_NICE or root",
            param.sched_priority
        ));
    }
    Ok(param.sched_priority)
}

#[cfg(target_os = "linux")]
pub fn setup_rt_once(rt: bool, prio: Option<i32>, lock: RtLock) {
    use std::sync::OnceLock;
    static RT_ONCE: OnceLock<()> = OnceLock::new();
    if !rt {
        return;
    }
    RT_ONCE.get_or_init(|| {
        match apply_mem_lock(lock) {
            Ok(()) => tracing::info!(?lock, "rt: memory lock applied"),
            Err(e) => tracing::warn!(error = %e, "rt: memory lock not applied"),
        }
        match apply_fifo_priority(prio) {
            Ok(p) => tracing::info!(priority = p, "rt: SCHED_FIFO enabled"),
            Err(e) => tracing::warn!(error = %e, "rt: running with the default scheduler"),
        }
    });
}

#[cfg(not(target_os = "linux"))]
pub fn setup_rt_once(rt: bool, _prio: Option<i32>, _lock: RtLock) {
    if rt {
        tracing::warn!("rt: real-time mode is only supported on Linux; ignoring --rt");
    }
}
