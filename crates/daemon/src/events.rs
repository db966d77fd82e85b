// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded, append-only event log with subscription fan-out.
//!
//! Sequence numbers are process-local and strictly increasing; timestamps
//! are monotone non-decreasing. The store holds at most `capacity` events
//! and drops oldest first. A dropped event of severity ≥ warning is replaced
//! by an `event_dropped` alarm naming the lost sequence number, so data loss
//! is always detectable in the alarm stream. Fan-out uses a broadcast ring:
//! slow subscribers skip oldest pending events and receive one synthetic
//! `subscription_lagging` notice per gap.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::metrics::Metrics;
use crate::redact::Redactor;

/// Category of the synthetic alarm appended when a warning+ event is dropped.
pub const CATEGORY_EVENT_DROPPED: &str = "event_dropped";
/// Category of the synthetic notice delivered to a lagging subscription.
pub const CATEGORY_SUBSCRIPTION_LAGGING: &str = "subscription_lagging";
/// Category of the truncation notice fanned out (not retained) on overflow.
pub const CATEGORY_STORE_TRUNCATED: &str = "event_store_truncated";

// -- Event model ---------------------------------------------------------------

/// Event severity, ordered info < warning < alarm.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Alarm,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Alarm => "alarm",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable record in the store. Never mutated after append except for the
/// acknowledgement flag.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Strictly increasing, process-local. 0 only on synthetic
    /// `subscription_lagging` notices, which are never stored.
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub severity: Severity,
    pub category: String,
    /// Device identifier or `system`.
    pub source: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
    pub acknowledged: bool,
}

/// A draft event handed to `append`. The store assigns seq and timestamp
/// and scrubs the detail map.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub severity: Severity,
    pub category: String,
    pub source: String,
    pub message: String,
    pub detail: Option<serde_json::Value>,
}

impl NewEvent {
    pub fn new(
        severity: Severity,
        category: impl Into<String>,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category: category.into(),
            source: source.into(),
            message: message.into(),
            detail: None,
        }
    }

    pub fn info(
        category: impl Into<String>,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(Severity::Info, category, source, message)
    }

    pub fn warning(
        category: impl Into<String>,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(Severity::Warning, category, source, message)
    }

    pub fn alarm(
        category: impl Into<String>,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(Severity::Alarm, category, source, message)
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

// -- Filters -------------------------------------------------------------------

/// Subscription and query filter.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilter {
    #[serde(default)]
    pub severity_floor: Option<Severity>,
    /// None means all categories.
    #[serde(default)]
    pub categories: Option<Vec<String>>,
}

impl EventFilter {
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(floor) = self.severity_floor {
            if event.severity < floor {
                return false;
            }
        }
        if let Some(ref categories) = self.categories {
            if !categories.iter().any(|c| c == &event.category) {
                return false;
            }
        }
        true
    }
}

// -- Errors --------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AckError {
    #[error("event not found")]
    NotFound,
    #[error("event already acknowledged")]
    AlreadyAcknowledged,
}

// -- Store ---------------------------------------------------------------------

struct Inner {
    buf: VecDeque<Event>,
    next_seq: u64,
    last_ts: DateTime<Utc>,
    /// Unacknowledged warning/alarm counts, indexed by severity.
    unacked_warning: u64,
    unacked_alarm: u64,
}

impl Inner {
    /// Assign seq + monotone timestamp and push to the tail.
    fn push(&mut self, draft: NewEvent) -> Event {
        let seq = self.next_seq;
        self.next_seq += 1;
        let now = Utc::now();
        let at = if now < self.last_ts { self.last_ts } else { now };
        self.last_ts = at;

        let event = Event {
            seq,
            at,
            severity: draft.severity,
            category: draft.category,
            source: draft.source,
            message: draft.message,
            detail: draft.detail,
            acknowledged: false,
        };
        match event.severity {
            Severity::Warning => self.unacked_warning += 1,
            Severity::Alarm => self.unacked_alarm += 1,
            Severity::Info => {}
        }
        self.buf.push_back(event.clone());
        event
    }

    fn forget_unacked(&mut self, event: &Event) {
        if event.acknowledged {
            return;
        }
        match event.severity {
            Severity::Warning => self.unacked_warning = self.unacked_warning.saturating_sub(1),
            Severity::Alarm => self.unacked_alarm = self.unacked_alarm.saturating_sub(1),
            Severity::Info => {}
        }
    }
}

/// The bounded event log. One per process; owns all subscriptions.
pub struct EventStore {
    inner: Mutex<Inner>,
    capacity: usize,
    tx: broadcast::Sender<Event>,
    redactor: Redactor,
    metrics: Option<Arc<Metrics>>,
}

impl EventStore {
    /// `capacity` must be ≥ 1 (validated by the config loader).
    /// `subscription_buffer` bounds each subscriber's pending window.
    pub fn new(
        capacity: usize,
        subscription_buffer: usize,
        redactor: Redactor,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let (tx, _) = broadcast::channel(subscription_buffer.max(1));
        Self {
            inner: Mutex::new(Inner {
                buf: VecDeque::with_capacity(capacity.min(4096)),
                next_seq: 1,
                last_ts: Utc::now(),
                unacked_warning: 0,
                unacked_alarm: 0,
            }),
            capacity,
            tx,
            redactor,
            metrics,
        }
    }

    /// Append one event. Thread-safe and ordered; returns its sequence
    /// number. Never blocks on I/O: fan-out is a ring write, logging happens
    /// after the lock is released.
    pub fn append(&self, mut draft: NewEvent) -> u64 {
        if let Some(ref mut detail) = draft.detail {
            self.redactor.scrub(detail);
        }

        let mut emitted: Vec<Event> = Vec::with_capacity(1);
        let mut dropped_infos = 0u64;
        let store_size;

        let seq = {
            let mut inner = self.inner.lock();
            let mut pending: VecDeque<NewEvent> = VecDeque::with_capacity(1);
            pending.push_back(draft);
            let mut first_seq = 0;

            while let Some(next) = pending.pop_front() {
                let event = inner.push(next);
                if first_seq == 0 {
                    first_seq = event.seq;
                }
                // Fan out inside the lock so subscribers observe seq order.
                let _ = self.tx.send(event.clone());
                emitted.push(event);

                while inner.buf.len() > self.capacity {
                    let Some(old) = inner.buf.pop_front() else {
                        break;
                    };
                    inner.forget_unacked(&old);
                    // Replacement alarms themselves drop silently, otherwise
                    // a store full of alarms would truncate forever.
                    if old.severity >= Severity::Warning
                        && old.category != CATEGORY_EVENT_DROPPED
                    {
                        pending.push_back(
                            NewEvent::alarm(
                                CATEGORY_EVENT_DROPPED,
                                "system",
                                format!(
                                    "event {} ({}) dropped by store truncation",
                                    old.seq, old.category
                                ),
                            )
                            .with_detail(serde_json::json!({
                                "lost_seq": old.seq,
                                "lost_severity": old.severity,
                                "lost_category": old.category,
                            })),
                        );
                    } else {
                        dropped_infos += 1;
                    }
                }
            }
            store_size = inner.buf.len();
            first_seq
        };

        // Truncation notice: fanned out and logged, never retained, so the
        // retained window stays exactly the newest `capacity` real events.
        if dropped_infos > 0 {
            crate::logging::log_event(&Event {
                seq: 0,
                at: Utc::now(),
                severity: Severity::Info,
                category: CATEGORY_STORE_TRUNCATED.to_owned(),
                source: "system".to_owned(),
                message: format!("store truncated {dropped_infos} oldest events"),
                detail: Some(serde_json::json!({"dropped": dropped_infos})),
                acknowledged: false,
            });
        }

        if let Some(ref metrics) = self.metrics {
            for event in &emitted {
                metrics.record_event(event.severity, &event.category);
            }
            let (warning, alarm) = self.unacked_counts();
            metrics.set_unacknowledged(warning, alarm);
            metrics.set_store_size(store_size);
        }
        for event in &emitted {
            crate::logging::log_event(event);
        }

        seq
    }

    /// Events matching the filters, newest first, up to `limit`.
    pub fn query(
        &self,
        since_seq: Option<u64>,
        severity_floor: Option<Severity>,
        category: Option<&str>,
        limit: usize,
    ) -> Vec<Event> {
        let inner = self.inner.lock();
        inner
            .buf
            .iter()
            .rev()
            .filter(|e| since_seq.is_none_or(|s| e.seq > s))
            .filter(|e| severity_floor.is_none_or(|floor| e.severity >= floor))
            .filter(|e| category.is_none_or(|c| e.category == c))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Mark one event as seen by an operator. Does not clear the condition.
    pub fn acknowledge(&self, seq: u64) -> Result<(), AckError> {
        let result = {
            let mut inner = self.inner.lock();
            match inner.buf.iter_mut().find(|e| e.seq == seq) {
                None => Err(AckError::NotFound),
                Some(event) if event.acknowledged => Err(AckError::AlreadyAcknowledged),
                Some(event) => {
                    event.acknowledged = true;
                    let severity = event.severity;
                    match severity {
                        Severity::Warning => {
                            inner.unacked_warning = inner.unacked_warning.saturating_sub(1);
                        }
                        Severity::Alarm => {
                            inner.unacked_alarm = inner.unacked_alarm.saturating_sub(1);
                        }
                        Severity::Info => {}
                    }
                    Ok(())
                }
            }
        };
        if result.is_ok() {
            if let Some(ref metrics) = self.metrics {
                let (warning, alarm) = self.unacked_counts();
                metrics.set_unacknowledged(warning, alarm);
            }
        }
        result
    }

    /// Open a live subscription. Dropping the handle unsubscribes.
    pub fn subscribe(&self, filter: EventFilter) -> EventSubscription {
        EventSubscription { rx: self.tx.subscribe(), filter }
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.inner.lock().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().buf.is_empty()
    }

    /// Highest assigned sequence number, 0 if nothing appended yet.
    pub fn last_seq(&self) -> u64 {
        self.inner.lock().next_seq - 1
    }

    /// (unacked warnings, unacked alarms) among retained events.
    pub fn unacked_counts(&self) -> (u64, u64) {
        let inner = self.inner.lock();
        (inner.unacked_warning, inner.unacked_alarm)
    }
}

// -- Subscriptions -------------------------------------------------------------

/// A live consumer of the event stream. Filtering happens at delivery;
/// a lag in the broadcast ring surfaces as one synthetic
/// `subscription_lagging` event referencing the gap size.
pub struct EventSubscription {
    rx: broadcast::Receiver<Event>,
    filter: EventFilter,
}

impl EventSubscription {
    /// Next matching event, or `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    return Some(Event {
                        seq: 0,
                        at: Utc::now(),
                        severity: Severity::Warning,
                        category: CATEGORY_SUBSCRIPTION_LAGGING.to_owned(),
                        source: "system".to_owned(),
                        message: format!("subscription lagged; {missed} events skipped"),
                        detail: Some(serde_json::json!({"missed": missed})),
                        acknowledged: false,
                    });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking drain used during shutdown's final flush.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Some(event);
                    }
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
