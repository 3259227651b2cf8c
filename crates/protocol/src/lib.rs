//! Wire types shared by the ingress adapters and the gateway.
//!
//! An [`UpdateEvent`] is an opaque payload plus an optional routing
//! [`AuctionId`]. Viewers subscribe to a [`Topic`]; the gateway decides
//! delivery with [`UpdateEvent::reaches`].

pub mod event;
pub mod price;

pub use {
    event::{AuctionId, Topic, UpdateEvent},
    price::PriceUpdate,
};

/// Period of the synthetic price generator.
pub const GENERATOR_INTERVAL_MS: u64 = 500;

/// Bounded wait for a single upstream poll before it counts as idle.
pub const UPSTREAM_POLL_TIMEOUT_MS: u64 = 100;

/// Pause after a non-timeout upstream failure before polling again.
pub const UPSTREAM_RETRY_DELAY_MS: u64 = 250;

/// Upper bound on a single write to one viewer.
pub const WRITE_TIMEOUT_MS: u64 = 5_000;

/// Capacity of the hub's command queue.
pub const HUB_QUEUE_CAPACITY: usize = 1024;

/// Auctions whose latest price is kept for replay to new viewers.
pub const REPLAY_CACHE_SIZE: usize = 1024;

/// Default upstream topic carrying bid events.
pub const DEFAULT_UPSTREAM_TOPIC: &str = "bids";

/// Default consumer group for offset tracking.
pub const DEFAULT_CONSUMER_GROUP: &str = "auction-ws-group";

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "session";
