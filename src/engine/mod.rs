//! Core engine: the balance → decide → buy/withdraw cycle.
//!
//! The scheduler walks every account once per cycle, the evaluator picks an
//! action from the balance, and the purchase or withdrawal executor carries
//! it out, updating bookkeeping and notifying the owner.

pub mod evaluator;
pub mod purchase;
pub mod withdrawal;
pub mod scheduler;
