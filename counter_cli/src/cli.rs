//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

pub fn json_mode() -> bool {
    JSON_MODE.get().copied().unwrap_or(false)
}

#[derive(Parser, Debug)]
#[command(name = "counter", version, about = "Bottle line counter")]
pub struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE", default_value = "etc/counter.toml")]
    pub config: PathBuf,

    /// Log as JSON lines instead of pretty; replies and errors are JSON too
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); overrides [logging] level
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Memory locking mode for real-time operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RtLock {
    /// Do not lock memory
    None,
    /// Lock currently resident pages
    Current,
    /// Lock current and future pages
    All,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the counter service with an operator console on stdin
    Run {
        /// Do not read commands from stdin; run until SIGINT/SIGTERM
        #[arg(long, action = ArgAction::SetTrue)]
        no_console: bool,
        /// Enable real-time mode (SCHED_FIFO, mlockall)
        #[arg(
            long,
            action = ArgAction::SetTrue,
            long_help = "Enable real-time mode on Linux.\n\nAttempts SCHED_FIFO priority before the loops are spawned, so the sensor poll thread inherits it, and locks memory with mlockall. Requires CAP_SYS_NICE / CAP_IPC_LOCK (or root) and a sufficient memlock ulimit; failures are logged and the service keeps running."
        )]
        rt: bool,
        /// SCHED_FIFO priority when --rt is enabled (clamped to the system range)
        #[arg(long, value_name = "PRIO")]
        rt_prio: Option<i32>,
        /// Memory locking mode for --rt
        #[arg(long, value_enum, value_name = "MODE", default_value = "current")]
        rt_lock: RtLock,
    },
    /// Initialise the pins once, read the sensor and park the door
    SelfCheck,
    /// Print the recovery snapshot as JSON
    Snapshot,
    /// Health check for operational monitoring
    Health,
}
