// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared daemon state handed to transport handlers, the tool dispatcher,
//! and scheduler tasks. The composition root in `lib.rs` is the only place
//! that constructs one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{DaemonConfig, FileConfig};
use crate::events::EventStore;
use crate::metrics::Metrics;
use crate::registry::Registry;

pub struct AppState {
    pub daemon: DaemonConfig,
    pub file: FileConfig,
    pub registry: Registry,
    pub events: EventStore,
    pub metrics: Arc<Metrics>,
    pub shutdown: CancellationToken,
    pub started_at: Instant,
    /// Cleared first during shutdown: new tool calls are refused.
    accepting_tools: AtomicBool,
    /// Set on internal invariant violation; maps to exit code 3.
    fatal: AtomicBool,
    /// Live scheduler task handles, joined during shutdown.
    pub scheduler_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AppState {
    pub fn new(
        daemon: DaemonConfig,
        file: FileConfig,
        registry: Registry,
        events: EventStore,
        metrics: Arc<Metrics>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            daemon,
            file,
            registry,
            events,
            metrics,
            shutdown,
            started_at: Instant::now(),
            accepting_tools: AtomicBool::new(true),
            fatal: AtomicBool::new(false),
            scheduler_tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn accepting_tools(&self) -> bool {
        self.accepting_tools.load(Ordering::Relaxed)
    }

    pub fn stop_accepting_tools(&self) {
        self.accepting_tools.store(false, Ordering::Relaxed);
    }

    pub fn fatal(&self) -> bool {
        self.fatal.load(Ordering::Relaxed)
    }

    /// Record an internal invariant violation: alarm, then shut down with
    /// exit code 3.
    pub fn raise_fatal(&self, message: &str) {
        self.fatal.store(true, Ordering::Relaxed);
        self.events.append(crate::events::NewEvent::alarm(
            "internal_error",
            "system",
            message.to_owned(),
        ));
        self.shutdown.cancel();
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
