use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::door::DoorActuator;
use crate::io::SharedIo;
use crate::sink::{FinalRecord, OrderRef};

/// Sentinel order id meaning "no order".
pub const NO_ORDER: &str = "NA";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Stopped,
    Counting,
    Paused,
}

impl Phase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Counting => "counting",
            Self::Paused => "paused",
        }
    }

    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Counting => 1,
            Self::Paused => 2,
        }
    }

    pub const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Counting,
            2 => Self::Paused,
            _ => Self::Stopped,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "stopped" => Some(Self::Stopped),
            "counting" => Some(Self::Counting),
            "paused" => Some(Self::Paused),
            _ => None,
        }
    }
}

impl core::fmt::Display for Phase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Product being counted, as reported by the order sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub description: String,
    /// Nominal bottles per hour.
    pub cadence: u32,
}

impl Article {
    pub fn unknown(cadence: u32) -> Self {
        Self {
            id: "UNKNOWN".into(),
            description: "article not found".into(),
            cadence,
        }
    }

    pub fn lookup_failed(cadence: u32) -> Self {
        Self {
            id: "ERROR".into(),
            description: "article lookup failed".into(),
            cadence,
        }
    }

    /// Control characters in sink-provided text become spaces so the id
    /// stays one `key=value` line in the recovery snapshot.
    pub fn single_line(mut self) -> Self {
        self.id = one_line(&self.id);
        self.description = one_line(&self.description);
        self
    }

    pub fn none(cadence: u32) -> Self {
        Self {
            id: String::new(),
            description: String::new(),
            cadence,
        }
    }
}

pub(crate) fn one_line(s: &str) -> String {
    s.chars().map(|c| if c.is_control() { ' ' } else { c }).collect()
}

/// Running tally; guarded by the tally lock only.
#[derive(Debug, Clone, Default)]
pub struct Tally {
    pub current: u64,
    pub target: u64,
    pub breakage: u64,
    pub last_item_at: Option<std::time::Instant>,
}

impl Tally {
    pub fn threshold(&self) -> u64 {
        self.target.saturating_add(self.breakage)
    }

    pub fn reached(&self) -> bool {
        self.target > 0 && self.current >= self.threshold()
    }
}

/// Phase, order and door fields; guarded by the state lock only.
#[derive(Debug)]
pub struct ControlState {
    pub phase: Phase,
    pub order: String,
    pub order_ref: Option<OrderRef>,
    pub article: Article,
    pub configured: bool,
    pub door: DoorActuator<SharedIo>,
    pub started_at: Option<NaiveDateTime>,
    pub ended_at: Option<NaiveDateTime>,
    /// Final record captured at stop, waiting to be pushed to the sink.
    pub pending_final: Option<FinalRecord>,
    pub last_door_fault: Option<String>,
}

impl ControlState {
    pub fn new(door: DoorActuator<SharedIo>, default_cadence: u32) -> Self {
        Self {
            phase: Phase::Stopped,
            order: NO_ORDER.to_string(),
            order_ref: None,
            article: Article::none(default_cadence),
            configured: false,
            door,
            started_at: None,
            ended_at: None,
            pending_final: None,
            last_door_fault: None,
        }
    }
}
