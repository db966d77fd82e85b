// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deterministic synthesis for mock-mode drivers.
//!
//! Mock readings are a pure function of (device id, probe tick), so demo
//! fleets and tests get plausible, repeatable telemetry with no RNG state.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-driver probe counter for mock synthesis.
#[derive(Debug, Default)]
pub struct MockTicker {
    tick: AtomicU64,
}

impl MockTicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance and return the tick for this probe.
    pub fn next(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed)
    }
}

/// Records the actions a mock-mode driver would have performed.
#[derive(Debug, Default)]
pub struct MockRecorder {
    actions: parking_lot::Mutex<Vec<(String, serde_json::Value)>>,
}

impl MockRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, action: &str, params: &serde_json::Value) {
        self.actions.lock().push((action.to_owned(), params.clone()));
    }

    /// Snapshot of recorded (action, params) pairs, oldest first.
    pub fn recorded(&self) -> Vec<(String, serde_json::Value)> {
        self.actions.lock().clone()
    }
}

/// FNV-1a over the device id mixed with the tick.
pub fn mix(id: &str, tick: u64) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in id.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x1000_0000_01b3);
    }
    hash ^= tick;
    hash.wrapping_mul(0x1000_0000_01b3)
}

/// A value in [lo, hi] that drifts smoothly with the tick.
pub fn wave(id: &str, tick: u64, lo: f64, hi: f64) -> f64 {
    let phase = (mix(id, 0) % 64) as f64;
    let t = (tick as f64 + phase) / 10.0;
    let unit = (t.sin() + 1.0) / 2.0;
    lo + unit * (hi - lo)
}

/// A stable boolean that flips rarely (roughly every 32 ticks).
pub fn slow_toggle(id: &str, tick: u64) -> bool {
    mix(id, tick / 32) % 2 == 0
}

/// A stable percentage that drains slowly from 100 toward 20.
pub fn draining_percent(id: &str, tick: u64) -> u8 {
    let drained = (tick / 4) % 80;
    let jitter = mix(id, tick) % 3;
    (100 - drained - jitter).clamp(20, 100) as u8
}

#[cfg(test)]
#[path = "mock_tests.rs"]
mod tests;
