//! Fixed-count traffic drivers.
//!
//! [`run_sender`] writes `send_count` chunks of `send_size` bytes, each
//! byte carrying a wrapping counter (`0, 1, …, 255, 0, …`).
//! [`run_receiver`] reads until it has seen `send_count * send_size`
//! bytes and checks every byte against the same counter, so any loss,
//! duplication or reordering that leaks through a transfer implementation
//! shows up as [`DriverError::Corrupted`].
//!
//! Both drivers are generic over [`Transfer`] and work with any socket
//! that implements it.

use thiserror::Error;

use crate::config::SimConfig;
use crate::socket::{SocketError, Transfer};

/// Delay before the receiver's first read, giving the sender a head start.
const RECEIVER_WARMUP: std::time::Duration = std::time::Duration::from_millis(200);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    #[error(transparent)]
    Socket(#[from] SocketError),
    /// Byte `offset` of the stream did not carry the expected stamp.
    #[error("stream corrupted at byte {offset}: expected {expected}, got {found}")]
    Corrupted { offset: usize, expected: u8, found: u8 },
    /// The peer stopped delivering before the expected byte count.
    #[error("stream ended after {received} of {expected} bytes")]
    Truncated { received: usize, expected: usize },
}

/// What a driver moved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficReport {
    pub bytes: usize,
    /// `send_data` calls for the sender, non-empty reads for the receiver.
    pub chunks: usize,
}

/// Write the configured number of stamped chunks to `socket`.
pub async fn run_sender<T>(socket: &T, config: &SimConfig) -> Result<TrafficReport, DriverError>
where
    T: Transfer,
{
    let mut report = TrafficReport::default();
    let mut stamp = 0u8;
    let mut buf = vec![0u8; config.send_size];

    for _ in 0..config.send_count {
        tokio::time::sleep(config.send_interval).await;
        for byte in buf.iter_mut() {
            *byte = stamp;
            stamp = stamp.wrapping_add(1);
        }
        socket.send_data(&buf).await?;
        report.bytes += buf.len();
        report.chunks += 1;
        log::debug!("sender: chunk {} ({} bytes total)", report.chunks, report.bytes);
    }

    log::info!("sender: transmission finished, {} bytes", report.bytes);
    Ok(report)
}

/// Read and verify the stream produced by [`run_sender`] with the same
/// `config`.
pub async fn run_receiver<T>(socket: &T, config: &SimConfig) -> Result<TrafficReport, DriverError>
where
    T: Transfer,
{
    let expected_total = config.total_send_bytes();
    let mut report = TrafficReport::default();
    let mut expected = 0u8;
    let mut buf = vec![0u8; config.receive_buffer_size];

    tokio::time::sleep(RECEIVER_WARMUP).await;
    while report.bytes < expected_total {
        let n = socket.receive_data(&mut buf).await?;
        if n == 0 {
            return Err(DriverError::Truncated {
                received: report.bytes,
                expected: expected_total,
            });
        }
        for (i, &found) in buf[..n].iter().enumerate() {
            if found != expected {
                return Err(DriverError::Corrupted {
                    offset: report.bytes + i,
                    expected,
                    found,
                });
            }
            expected = expected.wrapping_add(1);
        }
        report.bytes += n;
        report.chunks += 1;
        log::debug!("receiver: received {n} bytes ({} total)", report.bytes);
        tokio::time::sleep(config.receive_interval).await;
    }

    log::info!("receiver: reception finished, {} bytes", report.bytes);
    Ok(report)
}
