//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, raw bytes for webhooks)
//! 2. Calls into the transaction orchestrator
//! 3. Returns HTTP response (JSON, status code, event stream)

/// Operator endpoints behind the admin key
pub mod admin;
pub mod health;
/// Purchase initiation
pub mod purchases;
/// Status reads and the live status stream
pub mod transactions;
/// Payment gateway callbacks
pub mod webhooks;
