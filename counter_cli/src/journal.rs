//! JSON-lines order journal: an append-only [`OrderSink`] backed by a file.
//!
//! Every sink call appends one event line. On open the file is replayed to
//! rebuild the active orders, the next order reference and the article table.
//! Article lines are written by whoever plans the orders; the counter only
//! reads them.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use counter_core::sink::{FinalRecord, OrderRef, OrderSink, ProgressRecord, SinkResult, ts_format};
use counter_core::state::Article;
use counter_core::util::wall_now;
use eyre::WrapErr;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Article {
        order: String,
        id: String,
        description: String,
        cadence: u32,
    },
    OrderOpened {
        order_ref: OrderRef,
        order: String,
        target: u64,
        article: Article,
        #[serde(with = "ts_format")]
        opened_at: NaiveDateTime,
    },
    Progress(ProgressRecord),
    Finalized(FinalRecord),
    DeactivatedAll {
        #[serde(with = "ts_format")]
        at: NaiveDateTime,
    },
}

#[derive(Debug, Default)]
struct Index {
    next_ref: u64,
    active: HashSet<OrderRef>,
    /// Latest opening time per order id.
    opened: HashMap<String, NaiveDateTime>,
    articles: HashMap<String, Article>,
}

impl Index {
    fn apply(&mut self, ev: &Event) {
        match ev {
            Event::Article {
                order,
                id,
                description,
                cadence,
            } => {
                self.articles.insert(
                    order.clone(),
                    Article {
                        id: id.clone(),
                        description: description.clone(),
                        cadence: *cadence,
                    },
                );
            }
            Event::OrderOpened {
                order_ref,
                order,
                opened_at,
                ..
            } => {
                self.next_ref = self.next_ref.max(order_ref.0);
                self.active.insert(*order_ref);
                self.opened.insert(order.clone(), *opened_at);
            }
            Event::Progress(_) => {}
            Event::Finalized(rec) => {
                self.active.remove(&rec.order_ref);
            }
            Event::DeactivatedAll { .. } => self.active.clear(),
        }
    }
}

#[derive(Debug)]
pub struct JournalSink {
    path: PathBuf,
    file: Mutex<File>,
    index: Mutex<Index>,
}

impl JournalSink {
    /// Open (creating if needed) and replay the journal. Unparseable lines
    /// are skipped with a warning.
    pub fn open(path: impl Into<PathBuf>) -> eyre::Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .wrap_err_with(|| format!("creating journal directory {}", dir.display()))?;
        }
        let mut index = Index::default();
        let mut replayed = 0usize;
        for (lineno, ev) in read_events(&path)? {
            match ev {
                Ok(ev) => {
                    index.apply(&ev);
                    replayed += 1;
                }
                Err(e) => tracing::warn!(path = %path.display(), line = lineno, error = %e, "skipping journal line"),
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .wrap_err_with(|| format!("opening journal {}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            events = replayed,
            active = index.active.len(),
            "order journal opened"
        );
        Ok(Self {
            path,
            file: Mutex::new(file),
            index: Mutex::new(index),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, ev: &Event) -> SinkResult<()> {
        let mut line = serde_json::to_string(ev)?;
        line.push('\n');
        let mut f = self.file.lock();
        f.write_all(line.as_bytes())?;
        f.flush()?;
        Ok(())
    }

    fn events(&self) -> SinkResult<Vec<Event>> {
        Ok(read_events(&self.path)?
            .into_iter()
            .filter_map(|(_, ev)| ev.ok())
            .collect())
    }
}

type Lines = Vec<(usize, Result<Event, serde_json::Error>)>;

fn read_events(path: &Path) -> std::io::Result<Lines> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut out = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        out.push((i + 1, serde_json::from_str(&line)));
    }
    Ok(out)
}

impl OrderSink for JournalSink {
    fn has_active_order(&self) -> SinkResult<bool> {
        Ok(!self.index.lock().active.is_empty())
    }

    fn lookup_article(&self, order: &str) -> SinkResult<Option<Article>> {
        Ok(self.index.lock().articles.get(order).cloned())
    }

    fn open_order(&self, order: &str, target: u64, article: &Article) -> SinkResult<OrderRef> {
        let mut idx = self.index.lock();
        let ev = Event::OrderOpened {
            order_ref: OrderRef(idx.next_ref + 1),
            order: order.to_string(),
            target,
            article: article.clone(),
            opened_at: wall_now(),
        };
        // index only after the line is on disk
        self.append(&ev)?;
        idx.apply(&ev);
        Ok(OrderRef(idx.next_ref))
    }

    fn append_progress(&self, record: &ProgressRecord) -> SinkResult<()> {
        self.append(&Event::Progress(record.clone()))
    }

    fn finalize_order(&self, record: &FinalRecord) -> SinkResult<()> {
        let ev = Event::Finalized(record.clone());
        self.append(&ev)?;
        self.index.lock().apply(&ev);
        Ok(())
    }

    fn fetch_order_start_time(&self, order: &str) -> SinkResult<Option<NaiveDateTime>> {
        Ok(self.index.lock().opened.get(order).copied())
    }

    fn fetch_history(&self, order: &str, max_points: usize) -> SinkResult<Vec<ProgressRecord>> {
        let all: Vec<ProgressRecord> = self
            .events()?
            .into_iter()
            .filter_map(|ev| match ev {
                Event::Progress(p) if p.order == order => Some(p),
                _ => None,
            })
            .collect();
        let skip = all.len().saturating_sub(max_points);
        Ok(all.into_iter().skip(skip).collect())
    }

    fn deactivate_all(&self) -> SinkResult<()> {
        let ev = Event::DeactivatedAll { at: wall_now() };
        self.append(&ev)?;
        self.index.lock().apply(&ev);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use counter_core::state::Phase;

    fn progress(order_ref: OrderRef, order: &str, count: u64) -> ProgressRecord {
        ProgressRecord {
            order_ref,
            order: order.into(),
            article: "A".into(),
            article_description: String::new(),
            current_count: count,
            target_count: 100,
            breakage_count: 0,
            throughput_per_hour: 720.0,
            rolling_avg: 720.0,
            cadence_nominal: 6000,
            stoppage: false,
            door_open: true,
            phase: Phase::Counting,
            timestamp: wall_now(),
        }
    }

    #[test]
    fn replay_restores_active_orders_and_refs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.jsonl");
        {
            let j = JournalSink::open(&path).unwrap();
            assert!(!j.has_active_order().unwrap());
            let r = j.open_order("ORD-1", 10, &Article::unknown(6000)).unwrap();
            assert_eq!(r, OrderRef(1));
            j.append_progress(&progress(r, "ORD-1", 3)).unwrap();
        }
        let j = JournalSink::open(&path).unwrap();
        assert!(j.has_active_order().unwrap());
        assert!(j.fetch_order_start_time("ORD-1").unwrap().is_some());
        j.deactivate_all().unwrap();
        assert!(!j.has_active_order().unwrap());
        let r2 = j.open_order("ORD-2", 5, &Article::unknown(6000)).unwrap();
        assert_eq!(r2, OrderRef(2));
        assert_eq!(j.fetch_history("ORD-1", 10).unwrap().len(), 1);
    }

    #[test]
    fn article_lines_feed_lookup_and_bad_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.jsonl");
        std::fs::write(
            &path,
            concat!(
                r#"{"event":"article","order":"ORD-9","id":"BTL-75","description":"75cl green","cadence":4800}"#,
                "\n",
                "not json\n",
            ),
        )
        .unwrap();
        let j = JournalSink::open(&path).unwrap();
        let a = j.lookup_article("ORD-9").unwrap().unwrap();
        assert_eq!(a.id, "BTL-75");
        assert_eq!(a.cadence, 4800);
        assert!(j.lookup_article("ORD-0").unwrap().is_none());
    }

    #[test]
    fn finalize_closes_only_that_order() {
        let dir = tempfile::tempdir().unwrap();
        let j = JournalSink::open(dir.path().join("o.jsonl")).unwrap();
        let r = j.open_order("ORD-F", 2, &Article::unknown(6000)).unwrap();
        j.finalize_order(&FinalRecord {
            order_ref: r,
            order: "ORD-F".into(),
            current_count: 2,
            target_count: 2,
            breakage_count: 0,
            rolling_avg: 0.0,
            started_at: None,
            ended_at: Some(wall_now()),
        })
        .unwrap();
        assert!(!j.has_active_order().unwrap());
    }

    #[test]
    fn history_keeps_the_newest_points() {
        let dir = tempfile::tempdir().unwrap();
        let j = JournalSink::open(dir.path().join("o.jsonl")).unwrap();
        let r = j.open_order("ORD-H", 50, &Article::unknown(6000)).unwrap();
        for n in 1..=5 {
            j.append_progress(&progress(r, "ORD-H", n)).unwrap();
        }
        let h = j.fetch_history("ORD-H", 2).unwrap();
        assert_eq!(h.iter().map(|p| p.current_count).collect::<Vec<_>>(), vec![4, 5]);
    }
}
