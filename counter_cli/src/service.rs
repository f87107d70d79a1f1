//! Subcommand bodies: service assembly, self-check, snapshot dump and health.

use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use counter_config::{Config, SinkKind};
use counter_core::io::SharedIo;
use counter_core::mocks::MemorySink;
use counter_core::persistence::PersistenceGateway;
use counter_core::sink::OrderSink;
use counter_core::{Controller, ControllerBuilder};
use counter_traits::{DigitalIo, Level, PinDirection, Pull};
use eyre::WrapErr;

use crate::cli::RtLock;
use crate::console::{self, ConsoleCmd};
use crate::journal::JournalSink;
use crate::rt::setup_rt_once;

/// How often the main loop re-checks the shutdown flag.
const TICK: Duration = Duration::from_millis(200);

/// Open the pin backend for this build.
pub fn open_io() -> eyre::Result<SharedIo> {
    #[cfg(all(feature = "hardware", target_os = "linux"))]
    {
        let io = counter_hardware::RppalIo::new().wrap_err("open GPIO")?;
        tracing::info!("using rppal GPIO backend");
        Ok(SharedIo::new(io))
    }
    #[cfg(not(all(feature = "hardware", target_os = "linux")))]
    {
        tracing::warn!("built without hardware support; using simulated pins");
        Ok(SharedIo::new(counter_hardware::SimulatedIo::new()))
    }
}

pub fn open_sink(cfg: &Config) -> eyre::Result<Arc<dyn OrderSink>> {
    Ok(match cfg.sink.kind {
        SinkKind::Jsonl => Arc::new(
            JournalSink::open(&cfg.sink.path)
                .wrap_err_with(|| format!("opening order journal {}", cfg.sink.path.display()))?,
        ),
        SinkKind::Memory => {
            tracing::warn!("memory sink selected; orders are not kept across restarts");
            Arc::new(MemorySink::new())
        }
    })
}

pub fn build_controller(cfg: &Config, io: SharedIo, sink: Arc<dyn OrderSink>) -> eyre::Result<Controller> {
    ControllerBuilder::new()
        .with_shared_io(io)
        .with_sink(sink)
        .with_config(cfg)
        .try_build()
        .wrap_err("assembling controller")
}

/// Run the service until a signal, `quit`, or (with no console) forever.
pub fn run(cfg: &Config, json: bool, no_console: bool, rt: (bool, Option<i32>, RtLock)) -> eyre::Result<()> {
    let (rt_on, prio, lock) = rt;
    setup_rt_once(rt_on, prio, lock);

    let io = open_io()?;
    let sink = open_sink(cfg)?;
    let mut controller = build_controller(cfg, io, sink)?;
    let shutdown = controller.shutdown_flag();
    {
        let flag = shutdown.clone();
        ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
            .wrap_err("installing signal handler")?;
    }
    if let Some(phase) = controller.prepare() {
        tracing::info!(%phase, "resuming from recovery snapshot");
    }
    controller.start()?;
    let api = controller.api();

    let lines = if no_console {
        None
    } else {
        let (tx, rx) = mpsc::channel::<String>();
        std::thread::Builder::new()
            .name("counter-console".into())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })
            .wrap_err("spawning console reader")?;
        Some(rx)
    };

    // keeps serving after stdin closes; only a signal or `quit` ends the run
    let mut console_open = lines.is_some();
    while !shutdown.load(Ordering::Relaxed) {
        let Some(rx) = lines.as_ref().filter(|_| console_open) else {
            std::thread::sleep(TICK);
            continue;
        };
        match rx.recv_timeout(TICK) {
            Ok(line) => match console::parse(&line) {
                Ok(None) => {}
                Ok(Some(ConsoleCmd::Quit)) => {
                    println!("{}", console::execute(&api, &ConsoleCmd::Quit, json));
                    break;
                }
                Ok(Some(cmd)) => println!("{}", console::execute(&api, &cmd, json)),
                Err(msg) => println!("{}", console::parse_error(&msg, json)),
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                tracing::info!("console closed; running until signalled");
                console_open = false;
            }
        }
    }

    controller.shutdown();
    Ok(())
}

/// Configure both pins, read the sensor once, drive the door closed, release.
pub fn self_check(cfg: &Config, json: bool) -> eyre::Result<()> {
    let mut io = open_io()?;
    let pull = if cfg.sensor.pullup { Pull::Up } else { Pull::Down };
    let sensor = cfg.pins.sensor;
    let door = cfg.pins.door;

    let result = (|| -> eyre::Result<Level> {
        io.configure_pin(sensor, PinDirection::Input, pull)
            .map_err(|e| eyre::eyre!("configure sensor pin {sensor}: {e}"))?;
        std::thread::sleep(Duration::from_millis(cfg.sensor.settle_ms));
        let raw = io
            .read(sensor)
            .map_err(|e| eyre::eyre!("read sensor pin {sensor}: {e}"))?;
        io.configure_pin(door, PinDirection::Output, Pull::None)
            .map_err(|e| eyre::eyre!("configure door pin {door}: {e}"))?;
        io.write(door, Level::Low)
            .map_err(|e| eyre::eyre!("drive door pin {door}: {e}"))?;
        Ok(raw)
    })();
    if let Err(e) = io.release(&[sensor, door]) {
        tracing::warn!(error = %e, "pin release after self-check failed");
    }
    let raw = result?;
    let level = if cfg.sensor.invert { raw.inverted() } else { raw };
    if json {
        println!(
            "{}",
            serde_json::json!({
                "ok": true,
                "sensor_pin": sensor,
                "sensor_level": u8::from(level.is_high()),
                "door_pin": door,
            })
        );
    } else {
        println!(
            "self-check ok: sensor pin {sensor} reads {}, door pin {door} driven closed",
            u8::from(level.is_high())
        );
    }
    Ok(())
}

/// Print the recovery snapshot; a missing file is reported, not an error.
pub fn snapshot(cfg: &Config) -> eyre::Result<()> {
    let gw = PersistenceGateway::new(&cfg.persistence.path);
    match gw.try_load()? {
        Some(snap) => println!("{}", serde_json::to_string_pretty(&snap)?),
        None => println!(
            "{}",
            serde_json::json!({ "snapshot": null, "path": gw.path().display().to_string() })
        ),
    }
    Ok(())
}

/// Report config, snapshot and sink readiness without touching the pins.
pub fn health(cfg: &Config, json: bool) -> eyre::Result<()> {
    let snapshot = match PersistenceGateway::new(&cfg.persistence.path).try_load() {
        Ok(Some(s)) => format!("present ({}, count {})", s.phase, s.current_count),
        Ok(None) => "absent".to_string(),
        Err(e) => format!("unreadable: {e}"),
    };
    let sink = match cfg.sink.kind {
        SinkKind::Jsonl => match JournalSink::open(&cfg.sink.path) {
            Ok(j) => format!("jsonl {} ok", j.path().display()),
            Err(e) => format!("jsonl error: {e:#}"),
        },
        SinkKind::Memory => "memory".to_string(),
    };
    let ok = !snapshot.starts_with("unreadable") && !sink.contains("error");
    if json {
        println!(
            "{}",
            serde_json::json!({ "ok": ok, "snapshot": snapshot, "sink": sink })
        );
    } else {
        println!("health: {}", if ok { "ok" } else { "degraded" });
        println!("snapshot: {snapshot}");
        println!("sink: {sink}");
    }
    if ok { Ok(()) } else { eyre::bail!("health check degraded") }
}
