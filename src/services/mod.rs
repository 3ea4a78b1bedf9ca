//! Business logic services.
//!
//! Services contain the transaction lifecycle, separated from HTTP handlers.
//! `TransactionOrchestrator` is the only writer of transaction state; its
//! methods are split across the modules below by lifecycle phase.

pub mod fulfillment;
pub mod orchestrator;
pub mod queue;
pub mod reconciliation;
pub mod refund;
pub mod vendors;
