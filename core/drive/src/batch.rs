//! Batch upload results.

use photodrive_common::{Error, Result};

/// Name given to the item at `index` (0-based) of a batch upload.
pub fn batch_file_name(index: usize) -> String {
    format!("photo_{}.jpg", index)
}

/// Result of uploading one batch item.
#[derive(Debug)]
pub struct UploadOutcome {
    /// Position of the item in the batch.
    pub index: usize,
    /// Name the item was uploaded under.
    pub name: String,
    /// Attempts made, first try included.
    pub attempts: u32,
    /// Final result after all attempts.
    pub result: Result<()>,
}

impl UploadOutcome {
    /// Whether the item was uploaded.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-item outcomes of a batch upload, in input order.
#[derive(Debug, Default)]
pub struct BatchReport {
    outcomes: Vec<UploadOutcome>,
}

impl BatchReport {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            outcomes: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, outcome: UploadOutcome) {
        self.outcomes.push(outcome);
    }

    /// All outcomes in input order.
    pub fn outcomes(&self) -> &[UploadOutcome] {
        &self.outcomes
    }

    /// Number of items in the batch.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Whether the batch had no items.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Whether every item was uploaded.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(UploadOutcome::is_success)
    }

    /// Number of items uploaded.
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// Items that failed after exhausting their attempts.
    pub fn failures(&self) -> impl Iterator<Item = &UploadOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// Outcome of the last item, which decides the legacy overall status.
    pub fn last(&self) -> Option<&UploadOutcome> {
        self.outcomes.last()
    }

    /// Attempts made across the whole batch.
    pub fn total_attempts(&self) -> u32 {
        self.outcomes.iter().map(|o| o.attempts).sum()
    }

    /// Error of the last item, if it failed.
    pub fn last_error(&self) -> Option<&Error> {
        self.last().and_then(|o| o.result.as_ref().err())
    }
}
