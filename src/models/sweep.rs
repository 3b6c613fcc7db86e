//! Outcome of one maintenance sweep.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Serialize, Clone, Debug, Default)]
pub struct SweepReport {
    pub timestamp: Option<DateTime<Utc>>,
    pub deleted_count: usize,

    /// Namespace names removed during this pass.
    pub deleted: Vec<String>,

    /// Per-item failures. A failure never aborts the sweep.
    pub errors: Vec<String>,

    /// Rate-limit ledger rows purged during this pass.
    pub rate_limit_cleaned: u64,
}

impl SweepReport {
    pub fn started_at(now: DateTime<Utc>) -> Self {
        Self {
            timestamp: Some(now),
            ..Self::default()
        }
    }

    pub fn record_deleted(&mut self, name: String) {
        self.deleted.push(name);
        self.deleted_count = self.deleted.len();
    }
}

/// Plain-text report printed by `--sweep`.
impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.timestamp {
            Some(ts) => writeln!(f, "Cleanup completed at {}", ts.format("%Y-%m-%d %H:%M:%S"))?,
            None => writeln!(f, "Cleanup completed")?,
        }
        writeln!(f, "Deleted: {} directories", self.deleted_count)?;
        writeln!(f, "Rate limit entries cleaned: {}", self.rate_limit_cleaned)?;
        for name in &self.deleted {
            writeln!(f, "  - {}", name)?;
        }
        if !self.errors.is_empty() {
            writeln!(f, "Errors:")?;
            for error in &self.errors {
                writeln!(f, "  - {}", error)?;
            }
        }
        Ok(())
    }
}
