// src/connection/mod.rs
pub mod codec;
mod correlation;
mod manager;
pub mod rest;
mod subscription;

pub use correlation::{request, CorrelationId, PendingRequest};
pub use manager::{raw_socket_url, socket_url, ConnectionManager};
pub use subscription::{
    SimulatorEvent, Subscription, SubscriptionEventHandler, SubscriptionId, SubscriptionRegistry,
};
