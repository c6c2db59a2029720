//! kestrel-observe: vendor-neutral observability ABI.
//!
//! Core crates depend only on these traits and event types. Backends live elsewhere.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub trait Counter: Send + Sync {
    fn inc(&self, v: u64);
}
pub trait Gauge: Send + Sync {
    fn set(&self, v: i64);
}

pub trait Meter: Send + Sync + 'static {
    fn counter(
        &self,
        name: &'static str,
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Counter>;
    fn gauge(
        &self,
        name: &'static str,
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Gauge>;
    fn emit(&self, evt: VizEvent);
}

/// A do-nothing meter for tests and users who don't care about telemetry.
#[derive(Clone, Default)]
pub struct NoopMeter;
struct NoopC;
impl Counter for NoopC {
    fn inc(&self, _v: u64) {}
}
struct NoopG;
impl Gauge for NoopG {
    fn set(&self, _v: i64) {}
}
impl Meter for NoopMeter {
    fn counter(
        &self,
        _n: &'static str,
        _l: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Counter> {
        Box::new(NoopC)
    }
    fn gauge(
        &self,
        _n: &'static str,
        _l: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Gauge> {
        Box::new(NoopG)
    }
    fn emit(&self, _e: VizEvent) {}
}

/// Meter that keeps every event and metric value in memory.
///
/// Intended for tests that assert on protocol behavior (e.g. "one leader per term")
/// without scraping log output.
#[derive(Clone, Default)]
pub struct RecordingMeter {
    inner: Arc<Recorded>,
}

#[derive(Default)]
struct Recorded {
    events: Mutex<Vec<VizEvent>>,
    counters: Mutex<HashMap<&'static str, u64>>,
    gauges: Mutex<HashMap<&'static str, i64>>,
}

impl RecordingMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every event emitted so far, in emission order.
    pub fn events(&self) -> Vec<VizEvent> {
        self.inner.events.lock().clone()
    }

    /// Current value of a counter (0 if never incremented).
    pub fn counter_value(&self, name: &str) -> u64 {
        self.inner.counters.lock().get(name).copied().unwrap_or(0)
    }

    /// Last value written to a gauge.
    pub fn gauge_value(&self, name: &str) -> Option<i64> {
        self.inner.gauges.lock().get(name).copied()
    }

    pub fn clear(&self) {
        self.inner.events.lock().clear();
    }
}

struct RecordingC {
    name: &'static str,
    inner: Arc<Recorded>,
}
impl Counter for RecordingC {
    fn inc(&self, v: u64) {
        *self.inner.counters.lock().entry(self.name).or_insert(0) += v;
    }
}
struct RecordingG {
    name: &'static str,
    inner: Arc<Recorded>,
}
impl Gauge for RecordingG {
    fn set(&self, v: i64) {
        self.inner.gauges.lock().insert(self.name, v);
    }
}

impl Meter for RecordingMeter {
    fn counter(
        &self,
        name: &'static str,
        _l: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Counter> {
        Box::new(RecordingC {
            name,
            inner: self.inner.clone(),
        })
    }
    fn gauge(
        &self,
        name: &'static str,
        _l: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Gauge> {
        Box::new(RecordingG {
            name,
            inner: self.inner.clone(),
        })
    }
    fn emit(&self, evt: VizEvent) {
        self.inner.events.lock().push(evt);
    }
}

/// Typed events for live visualization (keys/values never included).
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VizEvent {
    Raft(RaftEvt),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RaftEvt {
    /// Replica that emitted the event.
    pub node: String,
    pub term: u64,
    pub kind: RaftKind,
}
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RaftKind {
    /// Campaign started; vote requests broadcast.
    VoteReq,
    /// This replica granted its vote to `to`.
    VoteGranted { to: String },
    LeaderElected,
    StepDown,
    /// Commit index advanced to `index`.
    Committed { index: u64 },
}

/// Macros (simple versions). Can be feature-gated if desired.
#[macro_export]
macro_rules! obs_count {
    ($m:expr, $name:expr, $labels:expr, $v:expr) => {{
        $m.counter($name, $labels).inc($v as u64);
    }};
}
#[macro_export]
macro_rules! obs_gauge {
    ($m:expr, $name:expr, $labels:expr, $v:expr) => {{
        $m.gauge($name, $labels).set($v as i64);
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_meter_collects_events_and_counters() {
        let meter = RecordingMeter::new();
        meter.emit(VizEvent::Raft(RaftEvt {
            node: "0001".to_string(),
            term: 3,
            kind: RaftKind::LeaderElected,
        }));
        obs_count!(meter, "raft_entries_applied", &[], 2);
        obs_count!(meter, "raft_entries_applied", &[], 1);
        obs_gauge!(meter, "raft_commit_index", &[], 7);

        assert_eq!(meter.events().len(), 1);
        assert_eq!(meter.counter_value("raft_entries_applied"), 3);
        assert_eq!(meter.counter_value("never_touched"), 0);
        assert_eq!(meter.gauge_value("raft_commit_index"), Some(7));

        let clone = meter.clone();
        clone.clear();
        assert!(meter.events().is_empty());
    }

    #[test]
    fn test_noop_meter_discards() {
        let meter = NoopMeter;
        obs_count!(meter, "anything", &[], 1);
        meter.emit(VizEvent::Raft(RaftEvt {
            node: "0002".to_string(),
            term: 1,
            kind: RaftKind::StepDown,
        }));
    }
}
