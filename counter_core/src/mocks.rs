//! Test and helper mocks for counter_core

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use parking_lot::Mutex;

use crate::sink::{FinalRecord, OrderRef, OrderSink, ProgressRecord, SinkResult};
use crate::state::Article;
use crate::util::wall_now;

#[derive(Debug, Clone)]
pub struct OrderRow {
    pub order_ref: OrderRef,
    pub order: String,
    pub target: u64,
    pub article: Article,
    pub active: bool,
    pub opened_at: NaiveDateTime,
}

#[derive(Debug, Default)]
struct MemoryInner {
    next_ref: u64,
    orders: Vec<OrderRow>,
    progress: Vec<ProgressRecord>,
    finals: Vec<FinalRecord>,
    articles: HashMap<String, Article>,
    failures: HashMap<&'static str, u32>,
}

impl MemoryInner {
    fn take_failure(&mut self, op: &'static str) -> SinkResult<()> {
        match self.failures.get_mut(op) {
            Some(n) if *n > 0 => {
                *n -= 1;
                Err(format!("memory sink: injected {op} failure").into())
            }
            _ => Ok(()),
        }
    }
}

/// In-process order sink. Clones share storage.
///
/// Used by tests and by the `memory` sink kind for bench runs without a database.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_article(self, order: &str, article: Article) -> Self {
        self.inner.lock().articles.insert(order.to_string(), article);
        self
    }

    /// Make the next `n` calls of `op` (a trait method name) fail.
    pub fn fail_next(&self, op: &'static str, n: u32) {
        *self.inner.lock().failures.entry(op).or_insert(0) += n;
    }

    /// Simulate an order opened by another station.
    pub fn insert_active_order(&self, order: &str) -> OrderRef {
        let mut g = self.inner.lock();
        g.next_ref += 1;
        let order_ref = OrderRef(g.next_ref);
        g.orders.push(OrderRow {
            order_ref,
            order: order.to_string(),
            target: 0,
            article: Article::unknown(0),
            active: true,
            opened_at: wall_now(),
        });
        order_ref
    }

    pub fn set_opened_at(&self, order: &str, at: NaiveDateTime) {
        for row in self.inner.lock().orders.iter_mut().filter(|r| r.order == order) {
            row.opened_at = at;
        }
    }

    pub fn orders(&self) -> Vec<OrderRow> {
        self.inner.lock().orders.clone()
    }

    pub fn progress(&self) -> Vec<ProgressRecord> {
        self.inner.lock().progress.clone()
    }

    pub fn finals(&self) -> Vec<FinalRecord> {
        self.inner.lock().finals.clone()
    }
}

impl OrderSink for MemorySink {
    fn has_active_order(&self) -> SinkResult<bool> {
        let mut g = self.inner.lock();
        g.take_failure("has_active_order")?;
        Ok(g.orders.iter().any(|r| r.active))
    }

    fn lookup_article(&self, order: &str) -> SinkResult<Option<Article>> {
        let mut g = self.inner.lock();
        g.take_failure("lookup_article")?;
        Ok(g.articles.get(order).cloned())
    }

    fn open_order(&self, order: &str, target: u64, article: &Article) -> SinkResult<OrderRef> {
        let mut g = self.inner.lock();
        g.take_failure("open_order")?;
        g.next_ref += 1;
        let order_ref = OrderRef(g.next_ref);
        g.orders.push(OrderRow {
            order_ref,
            order: order.to_string(),
            target,
            article: article.clone(),
            active: true,
            opened_at: wall_now(),
        });
        Ok(order_ref)
    }

    fn append_progress(&self, record: &ProgressRecord) -> SinkResult<()> {
        let mut g = self.inner.lock();
        g.take_failure("append_progress")?;
        g.progress.push(record.clone());
        Ok(())
    }

    fn finalize_order(&self, record: &FinalRecord) -> SinkResult<()> {
        let mut g = self.inner.lock();
        g.take_failure("finalize_order")?;
        for row in g.orders.iter_mut().filter(|r| r.order_ref == record.order_ref) {
            row.active = false;
        }
        g.finals.push(record.clone());
        Ok(())
    }

    fn fetch_order_start_time(&self, order: &str) -> SinkResult<Option<NaiveDateTime>> {
        let mut g = self.inner.lock();
        g.take_failure("fetch_order_start_time")?;
        Ok(g
            .orders
            .iter()
            .rev()
            .find(|r| r.order == order)
            .map(|r| r.opened_at))
    }

    fn fetch_history(&self, order: &str, max_points: usize) -> SinkResult<Vec<ProgressRecord>> {
        let mut g = self.inner.lock();
        g.take_failure("fetch_history")?;
        let all: Vec<_> = g.progress.iter().filter(|p| p.order == order).cloned().collect();
        let skip = all.len().saturating_sub(max_points);
        Ok(all.into_iter().skip(skip).collect())
    }

    fn deactivate_all(&self) -> SinkResult<()> {
        let mut g = self.inner.lock();
        g.take_failure("deactivate_all")?;
        for row in &mut g.orders {
            row.active = false;
        }
        Ok(())
    }
}
