use crate::constants;
use crate::discovery::WorkItem;
use crate::error::DispatchError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

/// Outcome of converting a single work item
#[derive(Debug)]
pub struct ItemOutcome {
    pub item: WorkItem,
    pub result: std::result::Result<(), DispatchError>,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemFailure {
    pub input_path: PathBuf,
    pub category: String,
    pub kind: String,
    pub error: String,
}

/// Summary of one dispatch run
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Set when abort-on-error stopped the walk before it was exhausted
    pub halted: bool,
    pub failures: Vec<ItemFailure>,
}

impl DispatchReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            completed_at: None,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            halted: false,
            failures: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: &ItemOutcome) {
        self.attempted += 1;
        match &outcome.result {
            Ok(()) => self.succeeded += 1,
            Err(e) => {
                self.failed += 1;
                self.failures.push(ItemFailure {
                    input_path: outcome.item.input_path.clone(),
                    category: outcome.item.category.clone(),
                    kind: e.kind().to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|end| end - self.started_at)
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn exit_code(&self) -> u8 {
        if self.is_success() {
            constants::EXIT_OK
        } else {
            constants::EXIT_ITEM_FAILURES
        }
    }
}

impl Default for DispatchReport {
    fn default() -> Self {
        Self::new()
    }
}
