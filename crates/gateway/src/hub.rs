//! Broadcast hub: the single task that owns the connection registry.
//!
//! Register, unregister and broadcast requests arrive on one FIFO queue and
//! are handled one at a time, so the registry is never mutated while it is
//! being iterated and no other task ever touches it.

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use {
    bytes::Bytes,
    indexmap::IndexMap,
    serde::Serialize,
    thiserror::Error,
    tokio::{
        sync::{mpsc, oneshot},
        task::JoinHandle,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use {
    bidfeed_config::{HubConfig, ShutdownPolicy},
    bidfeed_ingress::{EventSink, ForwardError},
    bidfeed_protocol::{AuctionId, Topic, UpdateEvent},
};

use crate::{
    connection::{ConnId, Connection},
    registry::ConnectionRegistry,
};

// ── Requests ─────────────────────────────────────────────────────────────────

pub enum HubCommand {
    Register(Connection),
    Unregister(ConnId),
    Broadcast(UpdateEvent),
    Stats(oneshot::Sender<HubStats>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HubError {
    #[error("hub is not running")]
    Closed,
    #[error("hub queue is full")]
    Full,
}

/// Snapshot of the hub's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub connections: usize,
    pub events: u64,
    pub delivered: u64,
    pub dropped: u64,
    /// Connections per topic, keyed by the topic's display form.
    pub subscribers: BTreeMap<String, usize>,
}

// ── Handle ───────────────────────────────────────────────────────────────────

/// Cloneable front door to the hub task.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
    next_id: Arc<AtomicU64>,
}

impl HubHandle {
    /// Allocate an id for a connection about to be registered.
    pub fn next_conn_id(&self) -> ConnId {
        ConnId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub async fn register(&self, conn: Connection) -> Result<(), HubError> {
        self.send(HubCommand::Register(conn)).await
    }

    pub async fn unregister(&self, id: ConnId) -> Result<(), HubError> {
        self.send(HubCommand::Unregister(id)).await
    }

    /// Queue `event` for fan-out, waiting for queue space.
    pub async fn publish(&self, event: UpdateEvent) -> Result<(), HubError> {
        self.send(HubCommand::Broadcast(event)).await
    }

    /// Queue `event` for fan-out without waiting. A full queue drops it.
    pub fn broadcast(&self, event: UpdateEvent) -> Result<(), HubError> {
        self.tx
            .try_send(HubCommand::Broadcast(event))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => HubError::Full,
                mpsc::error::TrySendError::Closed(_) => HubError::Closed,
            })
    }

    /// Counters as of every request queued before this one.
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (tx, rx) = oneshot::channel();
        self.send(HubCommand::Stats(tx)).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, cmd: HubCommand) -> Result<(), HubError> {
        self.tx.send(cmd).await.map_err(|_| HubError::Closed)
    }
}

impl EventSink for HubHandle {
    fn forward(&self, event: UpdateEvent) -> Result<(), ForwardError> {
        self.broadcast(event).map_err(|e| match e {
            HubError::Full => ForwardError::Full,
            HubError::Closed => ForwardError::Closed,
        })
    }
}

// ── Replay cache ─────────────────────────────────────────────────────────────

/// Latest payload per auction, bounded to `capacity` auctions. Entries are
/// kept in update order so the stalest auction is evicted first.
struct ReplayCache {
    capacity: usize,
    entries: IndexMap<AuctionId, Bytes>,
}

impl ReplayCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: IndexMap::new(),
        }
    }

    fn put(&mut self, id: AuctionId, payload: Bytes) {
        if self.capacity == 0 {
            return;
        }
        self.entries.shift_remove(&id);
        self.entries.insert(id, payload);
        while self.entries.len() > self.capacity {
            self.entries.shift_remove_index(0);
        }
    }

    fn get(&self, id: &AuctionId) -> Option<&Bytes> {
        self.entries.get(id)
    }
}

// ── Hub task ─────────────────────────────────────────────────────────────────

pub struct Hub {
    rx: mpsc::Receiver<HubCommand>,
    registry: ConnectionRegistry,
    replay_latest: bool,
    shutdown_policy: ShutdownPolicy,
    latest_any: Option<Bytes>,
    latest_by_auction: ReplayCache,
    events: u64,
    delivered: u64,
    dropped: u64,
}

impl Hub {
    pub fn new(config: &HubConfig) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let hub = Self {
            rx,
            registry: ConnectionRegistry::new(config.write_timeout()),
            replay_latest: config.replay_latest,
            shutdown_policy: config.shutdown_policy,
            latest_any: None,
            latest_by_auction: ReplayCache::new(config.replay_cache_size),
            events: 0,
            delivered: 0,
            dropped: 0,
        };
        let handle = HubHandle {
            tx,
            next_id: Arc::new(AtomicU64::new(0)),
        };
        (hub, handle)
    }

    /// Start the hub on its own task.
    pub fn spawn(config: &HubConfig, cancel: CancellationToken) -> (HubHandle, JoinHandle<HubStats>) {
        let (hub, handle) = Self::new(config);
        (handle, tokio::spawn(hub.run(cancel)))
    }

    /// Process requests until `cancel` fires or every handle is dropped.
    ///
    /// A request already taken off the queue always completes before the
    /// cancellation is observed.
    pub async fn run(mut self, cancel: CancellationToken) -> HubStats {
        loop {
            let cmd = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => cmd,
                    None => break,
                },
            };
            self.handle(cmd).await;
        }

        self.rx.close();
        match self.shutdown_policy {
            ShutdownPolicy::Leave => {
                info!(open = self.registry.len(), "hub stopped, leaving connections to process exit");
            },
            ShutdownPolicy::CloseAll => {
                let pending = self.release_queued().await;
                let closed = self.registry.close_all().await;
                info!(closed, pending, "hub stopped, closed all connections");
            },
        }
        self.stats()
    }

    /// Release connections whose registration was still queued at shutdown.
    async fn release_queued(&mut self) -> usize {
        let mut released = 0;
        while let Ok(cmd) = self.rx.try_recv() {
            match cmd {
                HubCommand::Register(conn) => {
                    conn.release(self.registry.write_timeout()).await;
                    released += 1;
                },
                HubCommand::Stats(reply) => {
                    let _ = reply.send(self.stats());
                },
                HubCommand::Unregister(_) | HubCommand::Broadcast(_) => {},
            }
        }
        released
    }

    async fn handle(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register(conn) => self.on_register(conn).await,
            HubCommand::Unregister(id) => self.on_unregister(id).await,
            HubCommand::Broadcast(event) => self.on_broadcast(event).await,
            HubCommand::Stats(reply) => {
                let _ = reply.send(self.stats());
            },
        }
    }

    async fn on_register(&mut self, mut conn: Connection) {
        let id = conn.id();
        let topic = conn.topic();

        if self.replay_latest
            && let Some(payload) = self.latest_for(topic).cloned()
        {
            if let Err(e) = conn.write(&payload, self.registry.write_timeout()).await {
                debug!(conn_id = %id, error = %e, "replay failed, dropping connection");
                conn.release(self.registry.write_timeout()).await;
                self.dropped += 1;
                return;
            }
            self.delivered += 1;
        }

        let user_id = conn.user_id();
        if self.registry.add(conn).await {
            info!(
                conn_id = %id,
                topic = %topic,
                user_id = ?user_id,
                total = self.registry.len(),
                "client connected"
            );
        }
    }

    async fn on_unregister(&mut self, id: ConnId) {
        if self.registry.remove(id).await {
            info!(conn_id = %id, total = self.registry.len(), "client disconnected");
        } else {
            debug!(conn_id = %id, "unregister for unknown connection ignored");
        }
    }

    async fn on_broadcast(&mut self, event: UpdateEvent) {
        self.events += 1;
        if let Some(auction_id) = event.auction_id() {
            self.latest_by_auction.put(auction_id, event.payload().clone());
        }
        self.latest_any = Some(event.payload().clone());

        if self.registry.is_empty() {
            return;
        }

        let report = self.registry.deliver(&event).await;
        self.delivered += report.delivered as u64;
        self.dropped += report.dropped as u64;
        if report.dropped > 0 {
            warn!(
                dropped = report.dropped,
                total = self.registry.len(),
                "pruned connections that failed delivery"
            );
        }
    }

    fn latest_for(&self, topic: Topic) -> Option<&Bytes> {
        match topic {
            Topic::All => self.latest_any.as_ref(),
            Topic::Auction(id) => self.latest_by_auction.get(&id),
        }
    }

    fn stats(&self) -> HubStats {
        HubStats {
            connections: self.registry.len(),
            events: self.events,
            delivered: self.delivered,
            dropped: self.dropped,
            subscribers: self
                .registry
                .subscriber_counts()
                .into_iter()
                .map(|(topic, n)| (topic.to_string(), n))
                .collect(),
        }
    }
}
