//! Data models shared by the store, the services and the HTTP layer.

/// API request and response bodies
pub mod purchase;
/// Transaction aggregate, status machine and partial updates
pub mod transaction;
/// Vendor request and response types
pub mod vendor;
/// Gateway callbacks, live events and operator alerts
pub mod webhook;
