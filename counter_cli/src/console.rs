//! Line-oriented operator console over the control API.
//!
//! One command per line; each reply is printed as a single JSON document.

use counter_core::ControlApi;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCmd {
    Configure { order: String, target: u64 },
    Start,
    Stop,
    Pause,
    Resume,
    Breakage(u64),
    Status,
    History { order: Option<String>, points: Option<usize> },
    Sensor { invert: Option<bool>, pullup: Option<bool> },
    Increment,
    Diagnostics,
    Door(bool),
    Reset,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  configure <order> <target>   set up a new order
  start | stop | pause | resume
  breakage <n>                 add n broken items to the threshold
  status
  history [order] [points]
  sensor [invert=on|off] [pullup=on|off]
  increment                    count one item by hand
  diag                         sensor diagnostics
  door open|close
  reset                        clear the stopped order
  help | quit";

fn parse_switch(v: &str) -> Result<bool, String> {
    match v {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        other => Err(format!("expected on/off, got '{other}'")),
    }
}

fn parse_num<T: std::str::FromStr>(what: &str, v: &str) -> Result<T, String> {
    v.parse().map_err(|_| format!("{what} must be a non-negative integer, got '{v}'"))
}

/// Parse one console line. Blank lines and `#` comments yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<ConsoleCmd>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();
    let cmd = match (head.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("configure", [order, target]) => ConsoleCmd::Configure {
            order: (*order).to_string(),
            target: parse_num("target", target)?,
        },
        ("configure", _) => return Err("usage: configure <order> <target>".into()),
        ("start", []) => ConsoleCmd::Start,
        ("stop", []) => ConsoleCmd::Stop,
        ("pause", []) => ConsoleCmd::Pause,
        ("resume", []) => ConsoleCmd::Resume,
        ("breakage", [n]) => ConsoleCmd::Breakage(parse_num("breakage count", n)?),
        ("status", []) => ConsoleCmd::Status,
        ("history", rest) => {
            let (order, points) = match rest {
                [] => (None, None),
                [one] => match one.parse::<usize>() {
                    Ok(n) => (None, Some(n)),
                    Err(_) => (Some((*one).to_string()), None),
                },
                [order, points] => (
                    Some((*order).to_string()),
                    Some(parse_num("points", points)?),
                ),
                _ => return Err("usage: history [order] [points]".into()),
            };
            ConsoleCmd::History { order, points }
        }
        ("sensor", rest) => {
            let mut invert = None;
            let mut pullup = None;
            for kv in rest {
                match kv.split_once('=') {
                    Some(("invert", v)) => invert = Some(parse_switch(v)?),
                    Some(("pullup", v)) => pullup = Some(parse_switch(v)?),
                    _ => return Err(format!("unknown sensor option '{kv}'")),
                }
            }
            ConsoleCmd::Sensor { invert, pullup }
        }
        ("increment", []) => ConsoleCmd::Increment,
        ("diag", []) => ConsoleCmd::Diagnostics,
        ("door", ["open"]) => ConsoleCmd::Door(true),
        ("door", ["close"]) => ConsoleCmd::Door(false),
        ("reset", []) => ConsoleCmd::Reset,
        ("help", _) => ConsoleCmd::Help,
        ("quit" | "exit", []) => ConsoleCmd::Quit,
        (other, _) => return Err(format!("unknown or malformed command '{other}'; try 'help'")),
    };
    Ok(Some(cmd))
}

fn render<T: Serialize>(reply: &T, json: bool) -> String {
    let out = if json {
        serde_json::to_string(reply)
    } else {
        serde_json::to_string_pretty(reply)
    };
    out.unwrap_or_else(|e| format!("{{\"success\":false,\"message\":\"unserialisable reply: {e}\"}}"))
}

/// Run `cmd` and render the reply.
pub fn execute(api: &ControlApi, cmd: &ConsoleCmd, json: bool) -> String {
    match cmd {
        ConsoleCmd::Configure { order, target } => render(&api.configure(order, *target), json),
        ConsoleCmd::Start => render(&api.start(), json),
        ConsoleCmd::Stop => render(&api.stop(), json),
        ConsoleCmd::Pause => render(&api.pause(), json),
        ConsoleCmd::Resume => render(&api.resume(), json),
        ConsoleCmd::Breakage(n) => render(&api.adjust_breakage(*n), json),
        ConsoleCmd::Status => render(&api.get_status(), json),
        ConsoleCmd::History { order, points } => render(&api.history(order.as_deref(), *points), json),
        ConsoleCmd::Sensor { invert, pullup } => render(&api.configure_sensor(*invert, *pullup), json),
        ConsoleCmd::Increment => render(&api.manual_increment(), json),
        ConsoleCmd::Diagnostics => render(&api.get_sensor_diagnostics(), json),
        ConsoleCmd::Door(true) => render(&api.open_door(), json),
        ConsoleCmd::Door(false) => render(&api.close_door(), json),
        ConsoleCmd::Reset => render(&api.reset(), json),
        ConsoleCmd::Help => HELP.to_string(),
        ConsoleCmd::Quit => render(&serde_json::json!({ "success": true, "message": "bye" }), json),
    }
}

/// Reply for a line that did not parse.
pub fn parse_error(msg: &str, json: bool) -> String {
    render(&serde_json::json!({ "success": false, "message": msg }), json)
}
