//! Report cache with a soft time-based reuse policy.
//!
//! One entry per channel, replaced as a whole value; entries only disappear
//! through explicit invalidation or process restart. The clock is injected so
//! freshness tests never sleep.

use super::report::AnalysisReport;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Time source. Production uses [`SystemClock`]; tests drive [`ManualClock`].
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock for tests and simulations.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// In-memory channel-id keyed report store.
pub struct ReportCache {
    entries: Mutex<HashMap<String, AnalysisReport>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ReportCache {
    pub fn new(ttl_minutes: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: Duration::minutes(ttl_minutes),
            clock,
        }
    }

    /// A cached report younger than the TTL, or `None`. Stale entries are left
    /// in place; they are only replaced once a fresh run succeeds.
    pub fn fresh(&self, channel_id: &str) -> Option<AnalysisReport> {
        let entries = self.entries.lock();
        let report = entries.get(channel_id)?;
        let age = self.clock.now() - report.analyzed_at;
        if age < self.ttl {
            Some(report.clone())
        } else {
            None
        }
    }

    /// Replace the channel's entry with a freshly-built report.
    pub fn store(&self, report: AnalysisReport) {
        self.entries
            .lock()
            .insert(report.channel_id.clone(), report);
    }

    /// Drop a channel's entry unconditionally, forcing the next analysis to
    /// recompute.
    pub fn invalidate(&self, channel_id: &str) {
        self.entries.lock().remove(channel_id);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
