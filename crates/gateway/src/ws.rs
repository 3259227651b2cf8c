use std::net::SocketAddr;

use {
    axum::extract::ws::{Message, WebSocket},
    futures::{Stream, StreamExt},
    tracing::{debug, warn},
};

use bidfeed_protocol::Topic;

use crate::{
    auth::UserId,
    connection::{ClientSink, Connection, WsSink},
    hub::HubHandle,
    lifecycle::{Lifecycle, Phase},
};

/// Drive one upgraded viewer socket from registration to close.
pub async fn handle_connection(
    socket: WebSocket,
    hub: HubHandle,
    topic: Topic,
    user_id: Option<UserId>,
    remote: SocketAddr,
) {
    let mut lifecycle = Lifecycle::new(hub.next_conn_id());
    lifecycle.advance(Phase::Upgrading);
    let (write_half, read_half) = socket.split();
    run_viewer(
        Box::new(WsSink::new(write_half)),
        read_half,
        hub,
        lifecycle,
        topic,
        user_id,
        remote,
    )
    .await;
}

/// Register `sink` with the hub and watch `inbound` until the peer goes away
/// or the hub releases the connection, whichever is first. Writes happen only
/// on the hub task.
///
/// Returns the tracker, which is `Closed` by then.
pub(crate) async fn run_viewer<S, E>(
    sink: Box<dyn ClientSink>,
    mut inbound: S,
    hub: HubHandle,
    mut lifecycle: Lifecycle,
    topic: Topic,
    user_id: Option<UserId>,
    remote: SocketAddr,
) -> Lifecycle
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    let conn_id = lifecycle.conn_id();
    let conn = Connection::new(conn_id, topic, sink).with_user(user_id);
    let dropped = conn.dropped_signal();

    if let Err(e) = hub.register(conn).await {
        warn!(conn_id = %conn_id, remote = %remote, error = %e, "could not register viewer");
        lifecycle.advance(Phase::Closing);
        lifecycle.advance(Phase::Closed);
        return lifecycle;
    }
    lifecycle.advance(Phase::Connected);
    debug!(conn_id = %conn_id, remote = %remote, topic = %topic, "viewer attached");

    loop {
        tokio::select! {
            _ = dropped.cancelled() => {
                debug!(conn_id = %conn_id, "released by hub");
                break;
            },
            frame = inbound.next() => match frame {
                None | Some(Ok(Message::Close(_))) => {
                    debug!(conn_id = %conn_id, "peer closed");
                    break;
                },
                Some(Err(e)) => {
                    debug!(conn_id = %conn_id, error = %e, "read failed");
                    break;
                },
                // Viewers are read-only.
                Some(Ok(_)) => {},
            },
        }
    }

    lifecycle.advance(Phase::Closing);
    if hub.unregister(conn_id).await.is_err() {
        debug!(conn_id = %conn_id, "hub already stopped");
    }
    lifecycle.advance(Phase::Closed);
    lifecycle
}

#[cfg(test)]
mod tests {
    use std::{
        convert::Infallible,
        net::{IpAddr, Ipv4Addr},
        time::Duration,
    };

    use {
        bidfeed_config::HubConfig,
        bidfeed_protocol::UpdateEvent,
        futures::stream,
        tokio::time::timeout,
        tokio_util::sync::CancellationToken,
    };

    use super::*;
    use crate::{hub::Hub, testing::FakeViewer};

    const REMOTE: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 4000);

    fn upgraded(hub: &HubHandle) -> Lifecycle {
        let mut lc = Lifecycle::new(hub.next_conn_id());
        lc.advance(Phase::Upgrading);
        lc
    }

    async fn wait_for_connections(hub: &HubHandle, expected: usize) {
        timeout(Duration::from_secs(5), async {
            while hub.stats().await.unwrap().connections != expected {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn hub_release_ends_the_viewer_task() {
        let config = HubConfig {
            replay_latest: false,
            write_timeout_ms: 200,
            ..Default::default()
        };
        let (hub, _task) = Hub::spawn(&config, CancellationToken::new());
        let viewer = FakeViewer::default();

        // The peer never speaks, so only the hub can end this task.
        let silent = stream::pending::<Result<Message, Infallible>>();
        let task = tokio::spawn(run_viewer(
            viewer.sink(),
            silent,
            hub.clone(),
            upgraded(&hub),
            Topic::All,
            None,
            REMOTE,
        ));
        wait_for_connections(&hub, 1).await;

        viewer.fail_writes();
        hub.publish(UpdateEvent::new("tick", None)).await.unwrap();

        let lifecycle = timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert_eq!(lifecycle.phase(), Phase::Closed);
        assert_eq!(viewer.closes(), 1);

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.connections, 0);
        assert_eq!(stats.dropped, 1);
    }

    #[tokio::test]
    async fn peer_close_unregisters_once() {
        let (hub, _task) = Hub::spawn(&HubConfig::default(), CancellationToken::new());
        let viewer = FakeViewer::default();

        let inbound = stream::iter(vec![
            Ok::<_, Infallible>(Message::Text("hello".into())),
            Ok(Message::Close(None)),
        ]);
        let lifecycle = run_viewer(
            viewer.sink(),
            inbound,
            hub.clone(),
            upgraded(&hub),
            Topic::All,
            Some(7),
            REMOTE,
        )
        .await;

        assert_eq!(lifecycle.phase(), Phase::Closed);
        wait_for_connections(&hub, 0).await;
        assert_eq!(viewer.closes(), 1);
        assert!(viewer.received().is_empty());
    }

    #[tokio::test]
    async fn stopped_hub_closes_without_connecting() {
        let cancel = CancellationToken::new();
        let (hub, task) = Hub::spawn(&HubConfig::default(), cancel.clone());
        cancel.cancel();
        task.await.unwrap();

        let lifecycle = run_viewer(
            FakeViewer::default().sink(),
            stream::pending::<Result<Message, Infallible>>(),
            hub.clone(),
            upgraded(&hub),
            Topic::All,
            None,
            REMOTE,
        )
        .await;
        assert_eq!(lifecycle.phase(), Phase::Closed);
    }
}
