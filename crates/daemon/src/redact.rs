// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential scrubbing for everything that leaves the process: log lines,
//! event details, tool-call echoes, and config dumps.

use serde_json::Value;

/// Literal written in place of any redacted value.
pub const REDACTED: &str = "<redacted>";

/// Default substrings matched (case-insensitively) against field names.
pub const DEFAULT_TERMS: &[&str] = &["password", "token", "secret", "key", "credential"];

/// Scrubs JSON values by field name against a configurable term list.
#[derive(Debug, Clone)]
pub struct Redactor {
    terms: Vec<String>,
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl Redactor {
    /// Build a redactor from extra config terms on top of the defaults.
    pub fn new(extra_terms: &[String]) -> Self {
        let mut terms: Vec<String> =
            DEFAULT_TERMS.iter().map(|t| (*t).to_owned()).collect();
        for term in extra_terms {
            let term = term.to_lowercase();
            if !term.is_empty() && !terms.contains(&term) {
                terms.push(term);
            }
        }
        Self { terms }
    }

    /// Whether a field name matches the redaction list.
    pub fn matches(&self, field: &str) -> bool {
        let field = field.to_lowercase();
        self.terms.iter().any(|t| field.contains(t.as_str()))
    }

    /// Replace the values of matching fields in-place, recursively.
    pub fn scrub(&self, value: &mut Value) {
        match value {
            Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    if self.matches(key) {
                        *val = Value::String(REDACTED.to_owned());
                    } else {
                        self.scrub(val);
                    }
                }
            }
            Value::Array(items) => {
                for item in items.iter_mut() {
                    self.scrub(item);
                }
            }
            _ => {}
        }
    }

    /// Scrub a clone of the value, leaving the original untouched.
    pub fn scrubbed(&self, value: &Value) -> Value {
        let mut out = value.clone();
        self.scrub(&mut out);
        out
    }
}

#[cfg(test)]
#[path = "redact_tests.rs"]
mod tests;
