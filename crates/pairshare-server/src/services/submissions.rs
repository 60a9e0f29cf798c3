use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::capture::DispatchOutcome;

/// Number of submissions whose status is remembered.
const RETAINED_SUBMISSIONS: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Saved { expense_id: String },
    Failed { error: String },
}

#[derive(Default)]
struct Entries {
    statuses: HashMap<String, SubmissionStatus>,
    order: VecDeque<String>,
}

/// Recent dispatch results, so clients can learn about backend failures
/// after their draft was already cleared.
#[derive(Clone, Default)]
pub struct SubmissionLog {
    inner: Arc<Mutex<Entries>>,
}

impl SubmissionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a submission as in flight unless its outcome already arrived.
    pub fn mark_pending(&self, submission_id: &str) {
        self.upsert(submission_id, |existing| {
            existing.unwrap_or(SubmissionStatus::Pending)
        });
    }

    pub fn record(&self, outcome: DispatchOutcome) {
        let status = match outcome.result {
            Ok(expense) => SubmissionStatus::Saved {
                expense_id: expense.id,
            },
            Err(error) => SubmissionStatus::Failed { error },
        };
        self.upsert(&outcome.submission_id, move |_| status);
    }

    pub fn status(&self, submission_id: &str) -> Option<SubmissionStatus> {
        let entries = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        entries.statuses.get(submission_id).cloned()
    }

    fn upsert(
        &self,
        submission_id: &str,
        next: impl FnOnce(Option<SubmissionStatus>) -> SubmissionStatus,
    ) {
        let mut entries = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let previous = entries.statuses.remove(submission_id);
        if previous.is_none() {
            entries.order.push_back(submission_id.to_string());
        }
        entries
            .statuses
            .insert(submission_id.to_string(), next(previous));

        while entries.order.len() > RETAINED_SUBMISSIONS {
            if let Some(oldest) = entries.order.pop_front() {
                entries.statuses.remove(&oldest);
            }
        }
    }
}

/// Background task that copies every dispatch outcome into the log.
pub async fn run_submission_recorder(
    mut outcomes: broadcast::Receiver<DispatchOutcome>,
    log: SubmissionLog,
) {
    tracing::info!("Submission recorder background task started");

    loop {
        match outcomes.recv().await {
            Ok(outcome) => {
                if let Err(error) = &outcome.result {
                    tracing::warn!(
                        "Submission {} was not saved: {error}",
                        outcome.submission_id
                    );
                }
                log.record(outcome);
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Submission recorder fell behind, {skipped} outcomes dropped");
            }
            Err(RecvError::Closed) => {
                tracing::info!("Submission recorder stopping: outcome channel closed");
                break;
            }
        }
    }
}
