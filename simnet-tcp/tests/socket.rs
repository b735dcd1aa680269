//! Integration tests for the retransmit timer and the transfer capability
//! of connection sockets.

use std::sync::Arc;
use std::time::Duration;

use simnet_tcp::{
    ConnectionSocket, ConnectionState, Demultiplexer, DuplexLink, SimConfig, SocketError,
    Transfer,
};

const RTO: Duration = Duration::from_millis(30);
const WAIT: Duration = Duration::from_secs(5);

/// Connect client port 10 to server port 80; returns `(client_conn, worker)`.
async fn connected_pair() -> (Arc<ConnectionSocket>, Arc<ConnectionSocket>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = SimConfig {
        retransmit_timeout: RTO,
        ..SimConfig::default()
    };
    let (left, right) = DuplexLink::new(&config).unwrap().into_endpoints();
    let client = Demultiplexer::spawn(left, "client", &config).unwrap();
    let server = Demultiplexer::spawn(right, "server", &config).unwrap();

    let listener = server.listen(80).await.unwrap();
    let conn = tokio::time::timeout(WAIT, client.connect(10, 80))
        .await
        .unwrap()
        .unwrap();
    let worker = listener.accept_timeout(WAIT).await.unwrap();
    (conn, worker)
}

// ---------------------------------------------------------------------------
// Retransmit timer
// ---------------------------------------------------------------------------

/// An armed timer fires once after one RTO and runs the timeout handler,
/// which only counts the expiry.
#[tokio::test]
async fn timer_expiry_runs_timeout_handler() {
    let (conn, _worker) = connected_pair().await;
    assert_eq!(conn.retransmit_timeouts(), 0);

    conn.start_retransmit_timer().await;
    assert!(conn.retransmit_timer_armed().await);

    tokio::time::sleep(RTO * 5).await;
    assert_eq!(conn.retransmit_timeouts(), 1);
    assert!(!conn.retransmit_timer_armed().await);
    assert_eq!(conn.state().await, ConnectionState::Established);
}

/// Re-arming replaces the pending timer instead of adding a second one.
#[tokio::test]
async fn rearming_keeps_a_single_timer() {
    let (conn, _worker) = connected_pair().await;

    for _ in 0..3 {
        conn.start_retransmit_timer().await;
    }
    tokio::time::sleep(RTO * 5).await;
    assert_eq!(conn.retransmit_timeouts(), 1);
}

#[tokio::test]
async fn stop_cancels_pending_timer() {
    let (conn, _worker) = connected_pair().await;

    conn.start_retransmit_timer().await;
    assert!(conn.stop_retransmit_timer().await);
    assert!(!conn.stop_retransmit_timer().await);

    tokio::time::sleep(RTO * 5).await;
    assert_eq!(conn.retransmit_timeouts(), 0);
}

#[tokio::test]
async fn close_cancels_pending_timer() {
    let (conn, _worker) = connected_pair().await;

    conn.start_retransmit_timer().await;
    conn.close().await.unwrap();
    assert!(!conn.retransmit_timer_armed().await);

    tokio::time::sleep(RTO * 5).await;
    assert_eq!(conn.retransmit_timeouts(), 0);
}

// ---------------------------------------------------------------------------
// Transfer capability
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transfer_is_not_implemented_when_connected() {
    let (conn, worker) = connected_pair().await;

    assert_eq!(
        conn.send_data(b"hello").await,
        Err(SocketError::CapabilityNotImplemented("send_data"))
    );
    let mut buf = [0u8; 16];
    assert_eq!(
        worker.receive_data(&mut buf).await,
        Err(SocketError::CapabilityNotImplemented("receive_data"))
    );
}

/// After the peer's Teardown, sending is refused but receiving is still
/// allowed to drain.
#[tokio::test]
async fn close_wait_refuses_sends() {
    let (conn, worker) = connected_pair().await;

    conn.close().await.unwrap();
    tokio::time::timeout(WAIT, async {
        while worker.state().await != ConnectionState::CloseWait {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(
        worker.send_data(b"late").await,
        Err(SocketError::InvalidState {
            op: "send_data",
            state: ConnectionState::CloseWait,
        })
    );
    let mut buf = [0u8; 16];
    assert_eq!(
        worker.receive_data(&mut buf).await,
        Err(SocketError::CapabilityNotImplemented("receive_data"))
    );
    // FinWait may still receive as well.
    assert_eq!(
        conn.receive_data(&mut buf).await,
        Err(SocketError::CapabilityNotImplemented("receive_data"))
    );
}

#[tokio::test]
async fn transfer_before_connect_is_invalid() {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = SimConfig::default();
    let (left, _right) = DuplexLink::new(&config).unwrap().into_endpoints();
    let host = Demultiplexer::spawn(left, "client", &config).unwrap();
    let conn = host.open(10, 80).await.unwrap();

    let mut buf = [0u8; 4];
    assert!(matches!(
        conn.send_data(b"x").await,
        Err(SocketError::InvalidState {
            state: ConnectionState::Closed,
            ..
        })
    ));
    assert!(matches!(
        conn.receive_data(&mut buf).await,
        Err(SocketError::InvalidState {
            state: ConnectionState::Closed,
            ..
        })
    ));
}
