use chrono::NaiveDateTime;
use image::DynamicImage;

use super::imaging::PreparedImage;
use crate::error::AppResult;
use crate::models::{Expense, NewUser, User};

/// An expense assembled from a draft, on its way to the backend.
#[derive(Debug)]
pub struct NewExpense {
    pub user_name: String,
    pub amount: f64,
    pub comment: String,
    pub moment: NaiveDateTime,
    pub list_id: Option<String>,
    pub images: Option<PreparedImage>,
}

impl NewExpense {
    pub fn working_image(&self) -> Option<&DynamicImage> {
        self.images.as_ref().map(PreparedImage::working)
    }

    pub fn thumbnail(&self) -> Option<&DynamicImage> {
        self.images.as_ref().map(PreparedImage::thumbnail)
    }
}

/// Service of record for users and expenses.
///
/// Implementations assign identities and timestamps. Calls may block; the
/// submission coordinator runs `add_expense` on the blocking pool.
pub trait ExpenseBackend: Send + Sync {
    fn create_or_update_user(&self, user: NewUser) -> AppResult<User>;

    fn add_expense(&self, expense: NewExpense) -> AppResult<Expense>;
}
