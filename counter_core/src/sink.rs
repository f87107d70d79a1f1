//! Order sink: the external store of orders, progress and final records.
use chrono::NaiveDateTime;
use counter_traits::Clock;
use serde::{Deserialize, Serialize};

use crate::config::RetryCfg;
use crate::state::{Article, Phase};

pub type SinkError = Box<dyn std::error::Error + Send + Sync>;
pub type SinkResult<T> = Result<T, SinkError>;

/// Identifier the sink assigned to an opened order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderRef(pub u64);

impl core::fmt::Display for OrderRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One throughput window pushed while counting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub order_ref: OrderRef,
    pub order: String,
    pub article: String,
    pub article_description: String,
    pub current_count: u64,
    pub target_count: u64,
    pub breakage_count: u64,
    pub throughput_per_hour: f64,
    pub rolling_avg: f64,
    pub cadence_nominal: u32,
    pub stoppage: bool,
    pub door_open: bool,
    pub phase: Phase,
    #[serde(with = "ts_format")]
    pub timestamp: NaiveDateTime,
}

/// Terminal record written exactly once per completed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalRecord {
    pub order_ref: OrderRef,
    pub order: String,
    pub current_count: u64,
    pub target_count: u64,
    pub breakage_count: u64,
    pub rolling_avg: f64,
    #[serde(default, with = "ts_format::option")]
    pub started_at: Option<NaiveDateTime>,
    #[serde(default, with = "ts_format::option")]
    pub ended_at: Option<NaiveDateTime>,
}

/// Serde helpers for the `%Y-%m-%d %H:%M:%S` wall-clock format.
pub mod ts_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::util::{TS_FORMAT, format_ts};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_ts(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let s = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&s, TS_FORMAT).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::*;

        #[allow(clippy::ref_option)]
        pub fn serialize<S: Serializer>(
            ts: &Option<NaiveDateTime>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match ts {
                Some(t) => s.serialize_some(&format_ts(t)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<NaiveDateTime>, D::Error> {
            let s: Option<String> = Option::deserialize(d)?;
            match s.as_deref() {
                None | Some("") => Ok(None),
                Some(v) => NaiveDateTime::parse_from_str(v, TS_FORMAT)
                    .map(Some)
                    .map_err(serde::de::Error::custom),
            }
        }
    }
}

/// External order store. Implementations must be callable from any thread.
pub trait OrderSink: Send + Sync {
    fn has_active_order(&self) -> SinkResult<bool>;
    /// `Ok(None)` when the order has no article on file.
    fn lookup_article(&self, order: &str) -> SinkResult<Option<Article>>;
    fn open_order(&self, order: &str, target: u64, article: &Article) -> SinkResult<OrderRef>;
    fn append_progress(&self, record: &ProgressRecord) -> SinkResult<()>;
    fn finalize_order(&self, record: &FinalRecord) -> SinkResult<()>;
    fn fetch_order_start_time(&self, order: &str) -> SinkResult<Option<NaiveDateTime>>;
    /// Latest `max_points` progress records for `order`, oldest first.
    fn fetch_history(&self, order: &str, max_points: usize) -> SinkResult<Vec<ProgressRecord>>;
    /// Mark every open order inactive.
    fn deactivate_all(&self) -> SinkResult<()>;
}

/// Run an idempotent sink call up to `retry.max_attempts` times.
pub fn with_retry<T>(
    what: &str,
    retry: RetryCfg,
    clock: &dyn Clock,
    mut op: impl FnMut() -> SinkResult<T>,
) -> SinkResult<T> {
    let attempts = retry.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if attempt < attempts => {
                tracing::warn!(op = what, attempt, error = %e, "sink call failed, retrying");
                clock.sleep(retry.delay);
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(op = what, attempts, error = %e, "sink call failed, giving up");
                return Err(e);
            }
        }
    }
}
