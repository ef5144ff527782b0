//! Change detection and delta compaction.
//!
//! During a slider drag the parameter set may be written dozens of times per
//! second. [`ChangeTracker`] turns that stream into a few [`FilterDelta`]
//! records worth persisting or syncing:
//!
//! - **Threshold**: changes no larger than `change_threshold` are ignored.
//! - **Debounce**: [`detect_changes`](ChangeTracker::detect_changes) accepts at
//!   most one delta per `debounce` window. The other entry points describe
//!   discrete edits and bypass the window.
//! - **Baseline**: each accepted change moves the baseline for the properties
//!   it contains. Sub-threshold drift accumulates against the old baseline
//!   until it crosses the threshold.
//!
//! A returned `None` means "nothing worth recording". A returned delta always
//! holds at least one operation.
//!
//! Time comes from a [`Clock`] so debounce behaviour can be driven
//! deterministically with [`ManualClock`].

use crate::catalog::FilterProperty;
use crate::config::TrackingConfig;
use crate::operation::{FilterOperation, ValueChange, optimize};
use crate::params::FilterParameterSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock source in milliseconds since the UNIX epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// One logical, user-facing change.
///
/// Serialized as an ordered list of `{property, new_value, previous_value}`
/// triples plus a description and a timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "DeltaRecord", from = "DeltaRecord")]
pub struct FilterDelta {
    operations: Vec<FilterOperation>,
    description: String,
    timestamp_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DeltaRecord {
    changes: Vec<ValueChange>,
    description: String,
    timestamp_ms: u64,
}

impl From<FilterDelta> for DeltaRecord {
    fn from(delta: FilterDelta) -> Self {
        Self {
            changes: delta.changes(),
            description: delta.description,
            timestamp_ms: delta.timestamp_ms,
        }
    }
}

impl From<DeltaRecord> for FilterDelta {
    fn from(record: DeltaRecord) -> Self {
        Self {
            operations: record
                .changes
                .into_iter()
                .map(|c| FilterOperation::SetValue {
                    property: c.property,
                    new_value: c.new_value,
                    previous_value: c.previous_value,
                })
                .collect(),
            description: record.description,
            timestamp_ms: record.timestamp_ms,
        }
    }
}

impl FilterDelta {
    pub fn operations(&self) -> &[FilterOperation] {
        &self.operations
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn changes(&self) -> Vec<ValueChange> {
        self.operations
            .iter()
            .flat_map(FilterOperation::value_changes)
            .collect()
    }

    pub fn affected_properties(&self) -> BTreeSet<FilterProperty> {
        self.operations
            .iter()
            .flat_map(FilterOperation::affected_properties)
            .collect()
    }

    /// Replay onto a remote copy of the parameter set.
    pub fn apply(&self, params: &mut FilterParameterSet) {
        for op in &self.operations {
            op.apply(params);
        }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Diagnostic counters. No correctness obligation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackerStats {
    /// Calls into the tracker.
    pub observations: u64,
    /// Property changes that made it into a delta.
    pub changes_detected: u64,
    /// Observations or property changes dropped by threshold or debounce.
    pub changes_ignored: u64,
    pub deltas_generated: u64,
}

impl TrackerStats {
    /// Fraction of observations that did not turn into a delta.
    pub fn efficiency_ratio(&self) -> f64 {
        if self.observations == 0 {
            return 0.0;
        }
        1.0 - self.deltas_generated as f64 / self.observations as f64
    }
}

pub struct ChangeTracker {
    change_threshold: f32,
    debounce: Duration,
    clock: Arc<dyn Clock>,
    baseline: FilterParameterSet,
    last_accepted_ms: Option<u64>,
    stats: TrackerStats,
}

impl std::fmt::Debug for ChangeTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeTracker")
            .field("change_threshold", &self.change_threshold)
            .field("debounce", &self.debounce)
            .field("last_accepted_ms", &self.last_accepted_ms)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl ChangeTracker {
    pub fn new(config: &TrackingConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            change_threshold: config.change_threshold,
            debounce: Duration::from_millis(config.debounce_ms),
            clock,
            baseline: FilterParameterSet::new(),
            last_accepted_ms: None,
            stats: TrackerStats::default(),
        }
    }

    pub fn with_system_clock(config: &TrackingConfig) -> Self {
        Self::new(config, Arc::new(SystemClock))
    }

    pub fn baseline(&self) -> &FilterParameterSet {
        &self.baseline
    }

    pub fn stats(&self) -> TrackerStats {
        self.stats
    }

    /// Start tracking from `params`, e.g. after loading a new image.
    pub fn reset_baseline(&mut self, params: &FilterParameterSet) {
        self.baseline = *params;
        self.last_accepted_ms = None;
    }

    /// Compare a full snapshot against the baseline, subject to debounce.
    pub fn detect_changes(&mut self, new_state: &FilterParameterSet) -> Option<FilterDelta> {
        self.stats.observations += 1;
        let now = self.clock.now_ms();
        if let Some(last) = self.last_accepted_ms
            && now.saturating_sub(last) < self.debounce.as_millis() as u64
        {
            self.stats.changes_ignored += 1;
            tracing::trace!(since_last_ms = now.saturating_sub(last), "change debounced");
            return None;
        }

        let changes = self.baseline.diff(new_state, self.change_threshold);
        if changes.is_empty() {
            self.stats.changes_ignored += 1;
            return None;
        }

        let operations: Vec<FilterOperation> = changes
            .iter()
            .map(|c| FilterOperation::SetValue {
                property: c.property,
                new_value: c.new_value,
                previous_value: c.old_value,
            })
            .collect();
        for c in &changes {
            self.baseline.set(c.property, c.new_value);
        }
        self.last_accepted_ms = Some(now);

        let description = match operations.as_slice() {
            [single] => single.description(),
            many => format!("Changed {} adjustments", many.len()),
        };
        Some(self.emit(operations, description, now))
    }

    /// Record one discrete edit. Does not touch the debounce window.
    pub fn track_single_change(
        &mut self,
        property: FilterProperty,
        new_value: f32,
    ) -> Option<FilterDelta> {
        self.stats.observations += 1;
        let new_value = property.info().clamp(new_value);
        let previous_value = self.baseline.get(property);
        if !self.exceeds_threshold(previous_value, new_value) {
            self.stats.changes_ignored += 1;
            return None;
        }
        let op = FilterOperation::SetValue {
            property,
            new_value,
            previous_value,
        };
        self.baseline.set(property, new_value);
        let description = op.description();
        let now = self.clock.now_ms();
        Some(self.emit(vec![op], description, now))
    }

    /// Record a whole drag gesture as one change from `start_value` to
    /// `end_value`, however many frames it spanned.
    pub fn track_continuous_change(
        &mut self,
        property: FilterProperty,
        start_value: f32,
        end_value: f32,
    ) -> Option<FilterDelta> {
        self.stats.observations += 1;
        let info = property.info();
        let (start_value, end_value) = (info.clamp(start_value), info.clamp(end_value));
        if !self.exceeds_threshold(start_value, end_value) {
            self.stats.changes_ignored += 1;
            return None;
        }
        let op = FilterOperation::SetValue {
            property,
            new_value: end_value,
            previous_value: start_value,
        };
        self.baseline.set(property, end_value);
        let description = op.description();
        let now = self.clock.now_ms();
        Some(self.emit(vec![op], description, now))
    }

    /// Record simultaneous changes (preset application, reset, undo) as a
    /// single delta.
    pub fn track_batch_changes(
        &mut self,
        changes: &BTreeMap<FilterProperty, f32>,
        description: impl Into<String>,
    ) -> Option<FilterDelta> {
        self.stats.observations += 1;
        let mut operations = Vec::new();
        for (&property, &value) in changes {
            let new_value = property.info().clamp(value);
            let previous_value = self.baseline.get(property);
            if self.exceeds_threshold(previous_value, new_value) {
                operations.push(FilterOperation::SetValue {
                    property,
                    new_value,
                    previous_value,
                });
            } else {
                self.stats.changes_ignored += 1;
            }
        }
        if operations.is_empty() {
            return None;
        }
        for op in &operations {
            op.apply(&mut self.baseline);
        }
        let now = self.clock.now_ms();
        Some(self.emit(operations, description.into(), now))
    }

    fn exceeds_threshold(&self, from: f32, to: f32) -> bool {
        (to - from).abs() > self.change_threshold
    }

    fn emit(
        &mut self,
        operations: Vec<FilterOperation>,
        description: String,
        timestamp_ms: u64,
    ) -> FilterDelta {
        let operations = optimize(&operations);
        self.stats.changes_detected += operations.len() as u64;
        self.stats.deltas_generated += 1;
        tracing::debug!(
            changes = operations.len(),
            %description,
            "filter delta generated"
        );
        FilterDelta {
            operations,
            description,
            timestamp_ms,
        }
    }
}
