//! Capture of a single new expense: photo preparation, the draft being
//! edited, and its hand-off to the backend.

pub mod backend;
pub mod draft;
pub mod imaging;
pub mod moment;
pub mod submit;

pub use backend::{ExpenseBackend, NewExpense};
pub use draft::DraftCaptureState;
pub use submit::{AmountPolicy, DispatchOutcome, SubmissionCoordinator, SubmissionTicket};
