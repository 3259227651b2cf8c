//! In-memory viewer transport for hub and registry tests.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {async_trait::async_trait, bytes::Bytes};

use bidfeed_protocol::Topic;

use crate::connection::{ClientSink, ConnId, Connection, DeliveryError};

#[derive(Default)]
struct FakeViewerState {
    received: Mutex<Vec<Bytes>>,
    fail: AtomicBool,
    stall: AtomicBool,
    closes: AtomicUsize,
    writes_after_close: AtomicUsize,
}

/// Shared view of a fake viewer. Clones observe the same viewer.
#[derive(Clone, Default)]
pub struct FakeViewer {
    state: Arc<FakeViewerState>,
}

impl FakeViewer {
    pub fn connection(&self, id: u64, topic: Topic) -> Connection {
        Connection::new(ConnId(id), topic, self.sink())
    }

    pub fn sink(&self) -> Box<dyn ClientSink> {
        Box::new(FakeViewerSink(self.clone()))
    }

    pub fn received(&self) -> Vec<Bytes> {
        self.state.received.lock().unwrap().clone()
    }

    pub fn received_text(&self) -> Vec<String> {
        self.received()
            .iter()
            .map(|b| String::from_utf8(b.to_vec()).unwrap())
            .collect()
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn writes_after_close(&self) -> usize {
        self.state.writes_after_close.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self) {
        self.state.fail.store(true, Ordering::SeqCst);
    }

    pub fn stall_writes(&self) {
        self.state.stall.store(true, Ordering::SeqCst);
    }
}

struct FakeViewerSink(FakeViewer);

#[async_trait]
impl ClientSink for FakeViewerSink {
    async fn send(&mut self, payload: Bytes) -> Result<(), DeliveryError> {
        let state = &self.0.state;
        if state.closes.load(Ordering::SeqCst) > 0 {
            state.writes_after_close.fetch_add(1, Ordering::SeqCst);
            return Err(DeliveryError::Closed);
        }
        if state.stall.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        }
        if state.fail.load(Ordering::SeqCst) {
            return Err(DeliveryError::Io("broken pipe".into()));
        }
        state.received.lock().unwrap().push(payload);
        Ok(())
    }

    async fn close(&mut self) {
        self.0.state.closes.fetch_add(1, Ordering::SeqCst);
    }
}
