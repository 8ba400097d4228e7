//! Presentation-layer state for interactive report messages.
//!
//! Every analysis result message gets a [`ViewState`]: the report it renders,
//! the current event page, and an issuance time. Controls stop responding a
//! fixed interval after issuance; expiry is checked lazily against the
//! injected clock, nothing runs in the background. The controls themselves
//! only ever call back into resolve / analyze / invalidate.

use crate::analyzer::{AnalysisReport, Clock};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Events shown per "more events" page.
pub const EVENTS_PER_PAGE: usize = 5;

/// Component custom ids.
pub const THREAD_SELECT: &str = "thread_select";
pub const MORE_EVENTS: &str = "more_events";
pub const REFRESH: &str = "refresh";

#[derive(Debug, Clone)]
pub struct ViewState {
    pub guild_id: String,
    pub report: AnalysisReport,
    pub event_page: usize,
    pub issued_at: DateTime<Utc>,
}

/// Result of looking up the view behind an activated component.
#[derive(Debug, Clone)]
pub enum ViewLookup {
    Active(ViewState),
    Expired,
    /// Message predates this process or was never ours.
    Unknown,
}

pub struct ViewRegistry {
    views: Mutex<HashMap<String, ViewState>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ViewRegistry {
    pub fn new(ttl_secs: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            views: Mutex::new(HashMap::new()),
            ttl: Duration::seconds(ttl_secs),
            clock,
        }
    }

    /// Attach (or replace) the view behind a result message. Replacing resets
    /// the page counter and restarts the expiry window.
    pub fn register(&self, message_id: &str, guild_id: &str, report: AnalysisReport) {
        self.views.lock().insert(
            message_id.to_string(),
            ViewState {
                guild_id: guild_id.to_string(),
                report,
                event_page: 0,
                issued_at: self.clock.now(),
            },
        );
    }

    pub fn lookup(&self, message_id: &str) -> ViewLookup {
        let views = self.views.lock();
        match views.get(message_id) {
            None => ViewLookup::Unknown,
            Some(state) => {
                if self.clock.now() - state.issued_at >= self.ttl {
                    ViewLookup::Expired
                } else {
                    ViewLookup::Active(state.clone())
                }
            }
        }
    }

    /// Advance the event page of an active view; returns the new page number.
    pub fn advance_page(&self, message_id: &str) -> Option<usize> {
        let mut views = self.views.lock();
        let state = views.get_mut(message_id)?;
        if self.clock.now() - state.issued_at >= self.ttl {
            return None;
        }
        state.event_page += 1;
        Some(state.event_page)
    }

    pub fn len(&self) -> usize {
        self.views.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.lock().is_empty()
    }
}
