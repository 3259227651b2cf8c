//! Gateway: WebSocket fan-out of auction price updates.
//!
//! Lifecycle:
//! 1. Validate config
//! 2. Spawn the broadcast hub (sole owner of the connection registry)
//! 3. Start the ingress source, feeding the hub without blocking
//! 4. Serve `/ws`, `/auction/{id}` and `/health`
//! 5. On shutdown, stop accepting, stop ingress, apply the hub's shutdown policy

pub mod auth;
pub mod connection;
pub mod hub;
pub mod lifecycle;
pub mod registry;
pub mod server;
pub mod ws;

#[cfg(test)]
pub(crate) mod testing;

pub use {
    auth::{MemorySessionStore, SessionAuthorizer, UpgradeGate, UserId},
    connection::{ClientSink, ConnId, Connection, DeliveryError},
    hub::{Hub, HubError, HubHandle, HubStats},
    server::{AppState, build_gateway_app, run_gateway, serve, start_gateway},
};
