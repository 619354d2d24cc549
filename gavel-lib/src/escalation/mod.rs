//! Escalating penalties.
//!
//! [`EscalationSelector`] turns an offense count into a weighted-random penalty length;
//! [`EscalationBook`] keeps the per-user offense records the count is read from.

mod record;
mod selector;

pub use record::{session_key, EscalationBook, EscalationRecord};
pub use selector::EscalationSelector;
