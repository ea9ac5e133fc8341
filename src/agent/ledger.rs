//! Append-only cost ledger.
//!
//! The router records one [`CostRecord`] per successful provider call.
//! The ledger is shared by reference between the router and any number
//! of readers.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use serde::Serialize;

/// One successful provider call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostRecord {
    /// Provider that answered.
    pub provider: String,
    /// Model it used.
    pub model: String,
    /// Approximate prompt tokens.
    pub input_tokens: usize,
    /// Approximate completion tokens.
    pub output_tokens: usize,
    /// Estimated cost in US dollars.
    pub cost: f64,
    /// Call latency.
    #[serde(serialize_with = "serialize_millis")]
    pub latency: Duration,
    /// When the call completed.
    pub timestamp: SystemTime,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn serialize_millis<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
}

/// Aggregated spend.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CostSummary {
    /// Total spend in US dollars.
    pub total: f64,
    /// Spend per provider name.
    pub by_provider: BTreeMap<String, f64>,
    /// Number of recorded calls.
    pub calls: usize,
}

/// Thread-safe, append-only list of [`CostRecord`]s.
#[derive(Debug, Default)]
pub struct CostLedger {
    records: Mutex<Vec<CostRecord>>,
}

impl CostLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record.
    pub fn record(&self, record: CostRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    /// Snapshot of all records in insertion order.
    #[must_use]
    pub fn records(&self) -> Vec<CostRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of all recorded costs.
    #[must_use]
    pub fn total_cost(&self) -> f64 {
        self.summary().total
    }

    /// Spend grouped by provider name.
    #[must_use]
    pub fn cost_by_provider(&self) -> BTreeMap<String, f64> {
        self.summary().by_provider
    }

    /// Total and per-provider spend in one pass.
    #[must_use]
    pub fn summary(&self) -> CostSummary {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let mut summary = CostSummary {
            calls: records.len(),
            ..CostSummary::default()
        };
        for record in records.iter() {
            summary.total += record.cost;
            *summary
                .by_provider
                .entry(record.provider.clone())
                .or_insert(0.0) += record.cost;
        }
        summary
    }
}
