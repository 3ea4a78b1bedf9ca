//! Implementations of the ports in `crate::ports`.

/// Broadcast publisher for live status events
pub mod events;
/// In-memory store and lock
pub mod memory;
/// Operator alert channel
pub mod notifier;
/// Hosted-checkout payment gateway client
pub mod payment_gateway;
/// PostgreSQL transaction store
pub mod postgres;
/// Runtime-adjustable exchange rates
pub mod rates;
/// Redis fulfillment lock
pub mod redis_lock;
/// HMAC request and callback signatures
pub mod signing;
/// Game-currency vendor client
pub mod vendor_gateway;
