//! Human-readable error descriptions and structured JSON error formatting.

use counter_core::error::{BuildError, CounterError};
use counter_hardware::HwError;

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingIo => {
                "What happened: No pin backend was provided to the controller.\nLikely causes: GPIO failed to open before the controller was assembled.\nHow to fix: Check the GPIO permissions and that the binary was built with the right features.".to_string()
            }
            BuildError::MissingSink => {
                "What happened: No order sink was provided to the controller.\nLikely causes: The order journal could not be opened.\nHow to fix: Check [sink] in the config and that its path is writable.".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range or conflicting values in the TOML.\nHow to fix: Edit the config file, then rerun. See etc/counter.toml for a sample."
            ),
        };
    }

    if let Some(ce) = err.downcast_ref::<CounterError>() {
        return match ce {
            CounterError::HardwareFault(msg) => format!(
                "What happened: Hardware fault ({msg}).\nLikely causes: Sensor unplugged, wrong pin number, or missing GPIO permissions.\nHow to fix: Check [pins] and the wiring; run `counter self-check`."
            ),
            CounterError::DoorFault(msg) => format!(
                "What happened: The door output could not be driven ({msg}).\nLikely causes: Wrong door pin or a relay/driver fault.\nHow to fix: Check pins.door and the driver wiring."
            ),
            CounterError::PersistenceFault(msg) => format!(
                "What happened: The recovery snapshot could not be used ({msg}).\nLikely causes: The file was edited by hand or the disk is failing.\nHow to fix: Inspect or remove the file named by persistence.path; the counter starts Stopped without it."
            ),
            CounterError::SinkFault(msg) => format!(
                "What happened: The order store failed ({msg}).\nLikely causes: Journal path not writable or disk full.\nHow to fix: Check [sink] path and free space."
            ),
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    if let Some(he) = err.downcast_ref::<HwError>() {
        return format!(
            "What happened: GPIO error ({he}).\nLikely causes: Not running on a Raspberry Pi, or no access to /dev/gpiomem.\nHow to fix: Add the user to the gpio group or run with the needed privileges."
        );
    }

    // String-based heuristics for errors coming from config loading
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("reading config") {
        return format!(
            "What happened: Could not read the config file.\nLikely causes: Wrong --config path or missing permissions.\nHow to fix: Pass --config <FILE> pointing at a readable TOML file. Original: {msg}"
        );
    }

    if lower.contains("parsing config") || lower.contains("missing field") {
        return format!(
            "What happened: Configuration is invalid or incomplete.\nLikely causes: A TOML syntax error, an unknown value, or a missing [pins] section.\nHow to fix: Edit the TOML config and try again. Original: {msg}"
        );
    }

    if lower.contains(" must ") {
        return format!(
            "What happened: Configuration value out of range ({msg}).\nLikely causes: A zero period or a duplicated pin.\nHow to fix: Edit the TOML config and try again."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes per error family; anything unclassified returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if err.downcast_ref::<BuildError>().is_some() {
        return 3;
    }
    if let Some(ce) = err.downcast_ref::<CounterError>() {
        return match ce {
            CounterError::HardwareFault(_) | CounterError::DoorFault(_) => 4,
            CounterError::PersistenceFault(_) => 5,
            CounterError::SinkFault(_) => 6,
            _ => 1,
        };
    }
    if err.downcast_ref::<HwError>().is_some() {
        return 4;
    }
    let lower = err.to_string().to_ascii_lowercase();
    if lower.contains("config") || lower.contains(" must ") {
        return 3;
    }
    1
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if err.downcast_ref::<BuildError>().is_some() {
        return "Build";
    }
    match err.downcast_ref::<CounterError>() {
        Some(CounterError::HardwareFault(_)) => "HardwareFault",
        Some(CounterError::DoorFault(_)) => "DoorFault",
        Some(CounterError::PersistenceFault(_)) => "PersistenceFault",
        Some(CounterError::SinkFault(_)) => "SinkFault",
        Some(_) => "Rejected",
        None if err.downcast_ref::<HwError>().is_some() => "Gpio",
        None => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(eyre::Report::new(CounterError::HardwareFault("pin 22".into())), 4, "HardwareFault")]
    #[case(eyre::Report::new(CounterError::PersistenceFault("line 3".into())), 5, "PersistenceFault")]
    #[case(eyre::Report::new(CounterError::SinkFault("disk full".into())), 6, "SinkFault")]
    #[case(eyre::Report::new(BuildError::MissingSink), 3, "Build")]
    #[case(eyre::eyre!("parsing config etc/x.toml: missing field `pins`"), 3, "Error")]
    #[case(eyre::eyre!("boom"), 1, "Error")]
    fn codes_and_reasons(#[case] err: eyre::Report, #[case] code: i32, #[case] reason: &str) {
        assert_eq!(exit_code_for_error(&err), code);
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], reason);
        assert_eq!(v["exit_code"], code);
    }

    #[test]
    fn config_errors_get_a_hint() {
        let err = eyre::eyre!("pins.sensor and pins.door must differ");
        assert!(humanize(&err).contains("out of range"));
    }
}
