//! Lock-free engine counters
//!
//! Shared by `Arc` across the per-entity workers. Every update is a single
//! relaxed atomic add; `report()` takes a snapshot and `reset()` swaps the
//! counters back to zero between batches.
//!
//! NOTE: All atomics use Relaxed ordering intentionally, these are statistical
//! counters only. Do NOT use them for coordination.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Counters for one engine instance
#[derive(Debug, Default)]
pub struct Metrics {
    inference_runs: AtomicU64,
    entities_segmented: AtomicU64,
    samples_assigned: AtomicU64,
    samples_unassigned: AtomicU64,
    drift_runs_merged: AtomicU64,
    short_runs_discarded: AtomicU64,
    visits_emitted: AtomicU64,
    empty_sequences: AtomicU64,
    refit_failures: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSummary {
    pub inference_runs: u64,
    pub entities_segmented: u64,
    pub samples_assigned: u64,
    pub samples_unassigned: u64,
    pub drift_runs_merged: u64,
    pub short_runs_discarded: u64,
    pub visits_emitted: u64,
    pub empty_sequences: u64,
    pub refit_failures: u64,
}

/// Per-entity segmentation tallies, recorded in one call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentStats {
    pub samples_assigned: u64,
    pub samples_unassigned: u64,
    pub drift_runs_merged: u64,
    pub short_runs_discarded: u64,
    pub visits_emitted: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_inference(&self) {
        self.inference_runs.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_refit_failure(&self) {
        self.refit_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one entity's segmentation outcome
    pub fn record_segmentation(&self, stats: &SegmentStats) {
        self.entities_segmented.fetch_add(1, Ordering::Relaxed);
        self.samples_assigned.fetch_add(stats.samples_assigned, Ordering::Relaxed);
        self.samples_unassigned.fetch_add(stats.samples_unassigned, Ordering::Relaxed);
        self.drift_runs_merged.fetch_add(stats.drift_runs_merged, Ordering::Relaxed);
        self.short_runs_discarded.fetch_add(stats.short_runs_discarded, Ordering::Relaxed);
        self.visits_emitted.fetch_add(stats.visits_emitted, Ordering::Relaxed);
        if stats.visits_emitted == 0 {
            self.empty_sequences.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn report(&self) -> MetricsSummary {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSummary {
            inference_runs: load(&self.inference_runs),
            entities_segmented: load(&self.entities_segmented),
            samples_assigned: load(&self.samples_assigned),
            samples_unassigned: load(&self.samples_unassigned),
            drift_runs_merged: load(&self.drift_runs_merged),
            short_runs_discarded: load(&self.short_runs_discarded),
            visits_emitted: load(&self.visits_emitted),
            empty_sequences: load(&self.empty_sequences),
            refit_failures: load(&self.refit_failures),
        }
    }

    /// Snapshot and zero every counter
    pub fn reset(&self) -> MetricsSummary {
        let swap = |c: &AtomicU64| c.swap(0, Ordering::Relaxed);
        MetricsSummary {
            inference_runs: swap(&self.inference_runs),
            entities_segmented: swap(&self.entities_segmented),
            samples_assigned: swap(&self.samples_assigned),
            samples_unassigned: swap(&self.samples_unassigned),
            drift_runs_merged: swap(&self.drift_runs_merged),
            short_runs_discarded: swap(&self.short_runs_discarded),
            visits_emitted: swap(&self.visits_emitted),
            empty_sequences: swap(&self.empty_sequences),
            refit_failures: swap(&self.refit_failures),
        }
    }
}

impl MetricsSummary {
    /// Share of samples that fell inside a station
    pub fn assigned_ratio(&self) -> f64 {
        let total = self.samples_assigned + self.samples_unassigned;
        if total == 0 {
            0.0
        } else {
            self.samples_assigned as f64 / total as f64
        }
    }

    pub fn log(&self) {
        info!(
            inference_runs = self.inference_runs,
            entities = self.entities_segmented,
            samples_assigned = self.samples_assigned,
            samples_unassigned = self.samples_unassigned,
            assigned_pct = %format!("{:.1}", self.assigned_ratio() * 100.0),
            drift_merged = self.drift_runs_merged,
            short_discarded = self.short_runs_discarded,
            visits = self.visits_emitted,
            empty_sequences = self.empty_sequences,
            refit_failures = self.refit_failures,
            "engine_metrics"
        );
    }
}
