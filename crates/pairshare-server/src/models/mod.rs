use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub mail: String,
    pub username: String,
    pub fcm_token: Option<String>,
    pub created: String,
    pub modified: String,
}

/// A user as submitted by a client. Carries no timestamps; the backend
/// assigns `created` and `modified`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub mail: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub fcm_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expense {
    pub id: String,
    pub list_id: Option<String>,
    pub user_name: String,
    pub amount: f64,
    pub comment: String,
    pub time_of_expense: String,
    pub image_path: Option<String>,
    pub thumbnail_path: Option<String>,
    pub created: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpenseSummary {
    pub num_expenses: i64,
    pub sum_expenses: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpenseList {
    pub id: String,
    pub name: String,
    pub sharers: Vec<String>,
    pub sharer_info: BTreeMap<String, ExpenseSummary>,
    pub created: String,
    pub modified: String,
}
