//! Immutable counter snapshots and the snapshot diff engine.
//!
//! A snapshot is a point-in-time capture of a `CounterSource`. Diffing two
//! snapshots finds counters whose value changed between them, optionally
//! filtered by a full-match name pattern and an explicit ignore set. The
//! diff is directional (self → other): counters that only exist in the
//! later snapshot are not reported.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;

use regex::Regex;
use serde::Serialize;

use crate::error::MetricsError;
use crate::metrics::CounterSource;

/// A counter whose value differs between two snapshots.
///
/// `after == None` means the name is absent from the later snapshot; it is
/// rendered as `absent` in reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangedCounter {
    pub name: String,
    pub before: u64,
    pub after: Option<u64>,
}

impl ChangedCounter {
    /// Render the after-value, with `absent` as the missing-name sentinel.
    pub fn after_label(&self) -> String {
        match self.after {
            Some(value) => value.to_string(),
            None => "absent".to_string(),
        }
    }
}

/// Immutable point-in-time capture of a counter source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    counters: BTreeMap<String, u64>,
}

impl MetricsSnapshot {
    /// Snapshot the global counter registry.
    pub fn capture() -> Self {
        Self::from_source(crate::metrics::registry())
    }

    /// Snapshot an arbitrary counter source.
    pub fn from_source(source: &dyn CounterSource) -> Self {
        Self {
            counters: source.counter_entries(),
        }
    }

    /// Value of a single counter at capture time.
    pub fn get(&self, name: &str) -> Option<u64> {
        self.counters.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Counters matching `pattern` whose value differs in `other`.
    ///
    /// `pattern` must match the whole counter name: `requests` selects
    /// exactly the counter `requests`, `.*` selects everything. Names in
    /// the ignore set are skipped even when matched and changed. The result
    /// is in this snapshot's name order, so repeated calls over the same
    /// snapshots produce the same sequence.
    pub fn counter_changed(
        &self,
        pattern: &str,
        other: &MetricsSnapshot,
        ignore: Option<&HashSet<String>>,
    ) -> Result<Vec<ChangedCounter>, MetricsError> {
        let regex = compile_full_match(pattern)?;
        Ok(self.changed_counters(Some(&regex), other, ignore))
    }

    /// Multi-line report of every changed counter, unfiltered by name.
    ///
    /// One `Counter 'name' changed: before -> after` line per change;
    /// empty when nothing changed.
    pub fn dump_differences(
        &self,
        other: &MetricsSnapshot,
        ignore: Option<&HashSet<String>>,
    ) -> String {
        let mut report = String::new();
        for change in self.changed_counters(None, other, ignore) {
            let _ = writeln!(
                report,
                "Counter '{}' changed: {} -> {}",
                change.name,
                change.before,
                change.after_label()
            );
        }
        report
    }

    fn changed_counters(
        &self,
        filter: Option<&Regex>,
        other: &MetricsSnapshot,
        ignore: Option<&HashSet<String>>,
    ) -> Vec<ChangedCounter> {
        let mut changed = Vec::new();
        for (name, &before) in &self.counters {
            if let Some(regex) = filter {
                if !regex.is_match(name) {
                    continue;
                }
            }
            if ignore.is_some_and(|set| set.contains(name)) {
                continue;
            }

            let after = other.counters.get(name).copied();
            if after != Some(before) {
                changed.push(ChangedCounter {
                    name: name.clone(),
                    before,
                    after,
                });
            }
        }
        changed
    }
}

// Anchors the pattern so matching covers the whole counter name.
fn compile_full_match(pattern: &str) -> Result<Regex, MetricsError> {
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|err| MetricsError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: err.to_string(),
    })
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
