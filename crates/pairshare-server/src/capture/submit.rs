use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::backend::{ExpenseBackend, NewExpense};
use super::draft::DraftCaptureState;
use crate::error::{AppError, AppResult};
use crate::models::Expense;

const OUTCOME_CHANNEL_CAPACITY: usize = 256;

/// Which amounts the coordinator accepts. Finite values are always required.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountPolicy {
    #[default]
    Any,
    NonNegative,
    Positive,
}

impl AmountPolicy {
    pub fn check(self, amount: f64) -> AppResult<()> {
        if !amount.is_finite() {
            return Err(AppError::InvalidAmount(format!("{amount} is not a number")));
        }
        match self {
            AmountPolicy::Any => Ok(()),
            AmountPolicy::NonNegative if amount < 0.0 => Err(AppError::InvalidAmount(
                "amount must not be negative".to_string(),
            )),
            AmountPolicy::Positive if amount <= 0.0 => Err(AppError::InvalidAmount(
                "amount must be greater than zero".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

impl FromStr for AmountPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "any" => Ok(AmountPolicy::Any),
            "non_negative" => Ok(AmountPolicy::NonNegative),
            "positive" => Ok(AmountPolicy::Positive),
            other => Err(format!("unknown amount policy: {other}")),
        }
    }
}

/// Handed back by `submit` to correlate the later `DispatchOutcome`.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionTicket {
    pub submission_id: String,
}

/// Result of one backend dispatch, published exactly once per submission.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub submission_id: String,
    pub result: Result<Expense, String>,
}

/// Turns a draft into an expense and hands it to the backend.
pub struct SubmissionCoordinator {
    backend: Arc<dyn ExpenseBackend>,
    policy: AmountPolicy,
    outcomes: broadcast::Sender<DispatchOutcome>,
}

impl SubmissionCoordinator {
    pub fn new(backend: Arc<dyn ExpenseBackend>, policy: AmountPolicy) -> Self {
        let (outcomes, _rx) = broadcast::channel(OUTCOME_CHANNEL_CAPACITY);
        Self {
            backend,
            policy,
            outcomes,
        }
    }

    /// Channel carrying the outcome of every dispatch made after subscribing.
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchOutcome> {
        self.outcomes.subscribe()
    }

    /// Validate the draft, dispatch it without waiting for the backend, and
    /// clear it.
    ///
    /// Validation failures leave the draft untouched. Once dispatched, the
    /// draft is cleared regardless of how the backend call ends; failures
    /// arrive on [`SubmissionCoordinator::subscribe`].
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(
        &self,
        draft: &mut DraftCaptureState,
        amount: f64,
        comment: &str,
        username: &str,
    ) -> AppResult<SubmissionTicket> {
        self.policy.check(amount)?;

        let username = username.trim();
        if username.is_empty() {
            return Err(AppError::MissingIdentity);
        }

        let moment = draft.moment().peek().ok_or(AppError::IncompleteDraft)?;

        let expense = NewExpense {
            user_name: username.to_string(),
            amount,
            comment: comment.to_string(),
            moment,
            list_id: draft.expense_list().map(str::to_string),
            images: draft.take_prepared(),
        };

        let submission_id = Uuid::new_v4().to_string();
        self.dispatch(submission_id.clone(), expense);
        draft.clear();

        Ok(SubmissionTicket { submission_id })
    }

    fn dispatch(&self, submission_id: String, expense: NewExpense) {
        let backend = Arc::clone(&self.backend);
        let outcomes = self.outcomes.clone();
        let has_image = expense.images.is_some();

        tracing::info!(
            "Dispatching submission {submission_id} for {} (amount {}, image: {has_image})",
            expense.user_name,
            expense.amount
        );

        tokio::task::spawn_blocking(move || {
            let result = match backend.add_expense(expense) {
                Ok(saved) => {
                    tracing::info!("Submission {submission_id} saved as expense {}", saved.id);
                    Ok(saved)
                }
                Err(e) => {
                    tracing::warn!("Submission {submission_id} failed: {e}");
                    Err(e.to_string())
                }
            };

            // No subscribers is fine; nobody is waiting for this one
            let _ = outcomes.send(DispatchOutcome {
                submission_id,
                result,
            });
        });
    }
}
