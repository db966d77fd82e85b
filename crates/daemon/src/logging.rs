// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Structured log emission: every event also becomes exactly one JSON line
//! on stdout, via the tracing subscriber installed in `main`.
//!
//! The log sink is the only stdout writer in the process. The `LOG_LEVEL`
//! filter floors what is emitted; events below the floor are still stored.
//! Details reaching this module are already credential-scrubbed by the
//! event store.

use crate::events::{Event, Severity};

/// Target used for all event log lines, so operators can filter them.
pub const EVENT_TARGET: &str = "hearth::event";

/// Emit one JSON log line for an event.
pub fn log_event(event: &Event) {
    let detail = event
        .detail
        .as_ref()
        .map(|d| d.to_string())
        .unwrap_or_default();
    match event.severity {
        Severity::Info => tracing::info!(
            target: "hearth::event",
            seq = event.seq,
            category = %event.category,
            source = %event.source,
            detail = %detail,
            "{}",
            event.message
        ),
        Severity::Warning => tracing::warn!(
            target: "hearth::event",
            seq = event.seq,
            category = %event.category,
            source = %event.source,
            detail = %detail,
            "{}",
            event.message
        ),
        Severity::Alarm => tracing::error!(
            target: "hearth::event",
            seq = event.seq,
            category = %event.category,
            source = %event.source,
            detail = %detail,
            "{}",
            event.message
        ),
    }
}
