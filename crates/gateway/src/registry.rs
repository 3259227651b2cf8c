use std::{collections::BTreeMap, time::Duration};

use tracing::debug;

use bidfeed_protocol::{Topic, UpdateEvent};

use crate::connection::{ConnId, Connection};

/// Outcome of delivering one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Connections whose topic matched the event.
    pub targeted: usize,
    pub delivered: usize,
    /// Connections removed because their write failed.
    pub dropped: usize,
}

/// The live set of viewer connections.
///
/// Every mutating and iterating method takes `&mut self`, so the owner (the
/// hub task) gets mutual exclusion between add/remove and fan-out for free.
pub struct ConnectionRegistry {
    /// Ordered by id, i.e. registration order.
    conns: BTreeMap<ConnId, Connection>,
    write_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            conns: BTreeMap::new(),
            write_timeout,
        }
    }

    /// Insert `conn`. Returns false (and releases the duplicate handle) if
    /// its id is already registered.
    pub async fn add(&mut self, conn: Connection) -> bool {
        if self.conns.contains_key(&conn.id()) {
            debug!(conn_id = %conn.id(), "connection already registered");
            conn.release(self.write_timeout).await;
            return false;
        }
        self.conns.insert(conn.id(), conn);
        true
    }

    /// Remove and release a connection. Removing an absent id is a no-op.
    pub async fn remove(&mut self, id: ConnId) -> bool {
        match self.conns.remove(&id) {
            Some(conn) => {
                let lived = conn.release(self.write_timeout).await;
                debug!(conn_id = %id, lived_ms = lived.as_millis() as u64, "connection released");
                true
            },
            None => false,
        }
    }

    /// Write `event` to every matching connection. Connections whose write
    /// fails are released and removed before this returns; they are not
    /// retried.
    pub async fn deliver(&mut self, event: &UpdateEvent) -> FanOut {
        let mut report = FanOut::default();
        let mut failed = Vec::new();

        for (id, conn) in self.conns.iter_mut() {
            if !event.reaches(&conn.topic()) {
                continue;
            }
            report.targeted += 1;
            match conn.write(event.payload(), self.write_timeout).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    debug!(conn_id = %id, error = %e, "delivery failed, dropping connection");
                    failed.push(*id);
                },
            }
        }

        for id in failed {
            if self.remove(id).await {
                report.dropped += 1;
            }
        }
        report
    }

    /// Release every connection. Returns how many were open.
    pub async fn close_all(&mut self) -> usize {
        let conns = std::mem::take(&mut self.conns);
        let count = conns.len();
        for (_, conn) in conns {
            conn.release(self.write_timeout).await;
        }
        count
    }

    pub fn contains(&self, id: ConnId) -> bool {
        self.conns.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Number of connections per topic.
    pub fn subscriber_counts(&self) -> BTreeMap<Topic, usize> {
        let mut counts = BTreeMap::new();
        for conn in self.conns.values() {
            *counts.entry(conn.topic()).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use bidfeed_protocol::AuctionId;

    use super::*;
    use crate::testing::FakeViewer;

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn double_removal_releases_once() {
        let mut reg = registry();
        let viewer = FakeViewer::default();
        reg.add(viewer.connection(1, Topic::All)).await;

        assert!(reg.remove(ConnId(1)).await);
        assert!(!reg.remove(ConnId(1)).await);
        assert!(reg.is_empty());
        assert_eq!(viewer.closes(), 1);
    }

    #[tokio::test]
    async fn duplicate_add_keeps_first() {
        let mut reg = registry();
        let first = FakeViewer::default();
        let second = FakeViewer::default();

        assert!(reg.add(first.connection(1, Topic::All)).await);
        assert!(!reg.add(second.connection(1, Topic::All)).await);
        assert_eq!(reg.len(), 1);
        assert_eq!(second.closes(), 1);

        reg.deliver(&UpdateEvent::new("x", None)).await;
        assert_eq!(first.received().len(), 1);
        assert!(second.received().is_empty());
    }

    #[tokio::test]
    async fn failures_are_isolated() {
        let mut reg = registry();
        let viewers: Vec<FakeViewer> = (0..5).map(|_| FakeViewer::default()).collect();
        for (i, viewer) in viewers.iter().enumerate() {
            reg.add(viewer.connection(i as u64, Topic::All)).await;
        }
        viewers[1].fail_writes();
        viewers[3].fail_writes();

        let report = reg.deliver(&UpdateEvent::new("tick", None)).await;

        assert_eq!(report, FanOut {
            targeted: 5,
            delivered: 3,
            dropped: 2,
        });
        assert_eq!(reg.len(), 3);
        assert!(!reg.contains(ConnId(1)));
        assert!(!reg.contains(ConnId(3)));
        for i in [0, 2, 4] {
            assert_eq!(viewers[i].received().len(), 1);
            assert_eq!(viewers[i].closes(), 0);
        }
        assert_eq!(viewers[1].closes(), 1);
        assert_eq!(viewers[3].closes(), 1);
    }

    #[tokio::test]
    async fn empty_registry_delivery_is_noop() {
        let mut reg = registry();
        let report = reg.deliver(&UpdateEvent::new("tick", None)).await;
        assert_eq!(report, FanOut::default());
    }

    #[tokio::test]
    async fn delivery_respects_topics() {
        let mut reg = registry();
        let all = FakeViewer::default();
        let two = FakeViewer::default();
        let three = FakeViewer::default();
        reg.add(all.connection(1, Topic::All)).await;
        reg.add(two.connection(2, Topic::Auction(AuctionId(2)))).await;
        reg.add(three.connection(3, Topic::Auction(AuctionId(3)))).await;

        let report = reg
            .deliver(&UpdateEvent::new("bid", Some(AuctionId(2))))
            .await;

        assert_eq!(report.targeted, 2);
        assert_eq!(all.received().len(), 1);
        assert_eq!(two.received().len(), 1);
        assert!(three.received().is_empty());

        let counts = reg.subscriber_counts();
        assert_eq!(counts[&Topic::All], 1);
        assert_eq!(counts[&Topic::Auction(AuctionId(3))], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_writer_is_dropped_after_timeout() {
        let mut reg = registry();
        let stalled = FakeViewer::default();
        let healthy = FakeViewer::default();
        reg.add(stalled.connection(1, Topic::All)).await;
        reg.add(healthy.connection(2, Topic::All)).await;
        stalled.stall_writes();

        let report = reg.deliver(&UpdateEvent::new("tick", None)).await;

        assert_eq!(report.dropped, 1);
        assert_eq!(healthy.received().len(), 1);
        assert!(!reg.contains(ConnId(1)));
    }

    #[tokio::test]
    async fn close_all_releases_everything() {
        let mut reg = registry();
        let viewers: Vec<FakeViewer> = (0..3).map(|_| FakeViewer::default()).collect();
        for (i, viewer) in viewers.iter().enumerate() {
            reg.add(viewer.connection(i as u64, Topic::All)).await;
        }

        assert_eq!(reg.close_all().await, 3);
        assert!(reg.is_empty());
        assert!(viewers.iter().all(|p| p.closes() == 1));
    }
}
