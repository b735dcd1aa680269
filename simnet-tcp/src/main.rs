//! Entry point for `simnet-tcp`.
//!
//! Builds one simulated link with a **server** host on the right end and a
//! **client** host on the left end, then runs one of the demo scenarios.
//! All protocol work is delegated to library modules; `main.rs` owns only
//! process setup (logging, argument parsing) and scenario wiring.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use simnet_tcp::driver::{run_receiver, run_sender};
use simnet_tcp::{ConnectionSocket, Demultiplexer, DuplexLink, SimConfig};

const SERVER_PORT: u16 = 80;
/// Client local ports are 10, 20, 30, …
const CLIENT_PORT_STEP: u16 = 10;

/// TCP-like socket state machines over a simulated lossy link.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    link: LinkArgs,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Args)]
struct LinkArgs {
    /// Seed for the loss model.
    #[arg(long, default_value_t = 1)]
    seed: u64,
    /// Drop probability client → server.
    #[arg(long, default_value_t = 0.0)]
    loss_data: f64,
    /// Drop probability server → client.
    #[arg(long, default_value_t = 0.0)]
    loss_ack: f64,
    /// Segments buffered per link direction.
    #[arg(long, default_value_t = 100)]
    capacity: usize,
    /// Listen backlog of the server.
    #[arg(long, default_value_t = 10)]
    backlog: usize,
    /// Retransmit timeout in milliseconds.
    #[arg(long, default_value_t = 500)]
    rto_ms: u64,
    /// Give up on a handshake after this many milliseconds.
    #[arg(long, default_value_t = 3000)]
    connect_timeout_ms: u64,
}

#[derive(Subcommand)]
enum Mode {
    /// Connect several clients to one server, hold, then close both sides.
    Handshake {
        /// Number of clients (local ports 10, 20, …).
        #[arg(short, long, default_value_t = 2)]
        clients: u16,
        /// How long clients and workers keep the connection open.
        #[arg(long, default_value_t = 5000)]
        hold_ms: u64,
    },
    /// Connect one client and run the stamped-byte traffic drivers. Always
    /// ends with a not-implemented error: connection sockets have no data
    /// transfer yet.
    Transfer {
        /// Number of writes.
        #[arg(long, default_value_t = 5)]
        count: usize,
        /// Bytes per write.
        #[arg(long, default_value_t = 3000)]
        size: usize,
    },
}

impl LinkArgs {
    fn to_config(&self) -> SimConfig {
        SimConfig {
            random_seed: self.seed,
            channel_capacity: self.capacity,
            loss_rate_data: self.loss_data,
            loss_rate_ack: self.loss_ack,
            retransmit_timeout: Duration::from_millis(self.rto_ms),
            listen_backlog: self.backlog,
            ..SimConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let mut config = cli.link.to_config();
    let connect_timeout = Duration::from_millis(cli.link.connect_timeout_ms);

    match cli.mode {
        Mode::Handshake { clients, hold_ms } => {
            let hold = Duration::from_millis(hold_ms);
            run_handshake(&config, clients, hold, connect_timeout).await
        }
        Mode::Transfer { count, size } => {
            config.send_count = count;
            config.send_size = size;
            config.validate().context("invalid transfer size")?;
            run_transfer(&config, connect_timeout).await
        }
    }
}

/// Bring up both hosts on a fresh link.
fn hosts(config: &SimConfig) -> Result<(Demultiplexer, Demultiplexer)> {
    let (left, right) = DuplexLink::new(config)
        .context("invalid link configuration")?
        .into_endpoints();
    let client = Demultiplexer::spawn(left, "client", config)?;
    let server = Demultiplexer::spawn(right, "server", config)?;
    Ok((client, server))
}

async fn connect(
    client: &Demultiplexer,
    local: u16,
    timeout: Duration,
) -> Result<Arc<ConnectionSocket>> {
    let conn = client.open(local, SERVER_PORT).await?;
    conn.connect_timeout(timeout)
        .await
        .with_context(|| format!("client {local} could not connect to {SERVER_PORT}"))?;
    Ok(conn)
}

async fn run_handshake(
    config: &SimConfig,
    clients: u16,
    hold: Duration,
    connect_timeout: Duration,
) -> Result<()> {
    let (client, server) = hosts(config)?;
    let listener = server.listen(SERVER_PORT).await?;
    log::info!("server listening on {SERVER_PORT}");

    let acceptor = {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move {
            let mut workers = Vec::new();
            for _ in 0..clients {
                let conn = listener.accept_timeout(connect_timeout + hold).await?;
                log::info!("worker serving client port {}", conn.remote_port());
                workers.push(tokio::spawn(async move {
                    tokio::time::sleep(hold).await;
                    log::info!("worker closing towards client port {}", conn.remote_port());
                    conn.close().await
                }));
            }
            for worker in workers {
                worker.await??;
            }
            anyhow::Ok(())
        })
    };

    let mut sessions = Vec::new();
    for i in 1..=clients {
        let client = client.clone();
        let local = i * CLIENT_PORT_STEP;
        sessions.push(tokio::spawn(async move {
            let conn = connect(&client, local, connect_timeout).await?;
            log::info!("client connected from local port {local}");
            tokio::time::sleep(hold).await;
            log::info!("client closing from local port {local}");
            conn.close().await?;
            anyhow::Ok(conn)
        }));
    }

    let mut conns = Vec::new();
    for session in sessions {
        conns.push(session.await??);
    }
    acceptor.await??;

    // Let the last Teardowns cross the link.
    tokio::time::sleep(Duration::from_millis(200)).await;
    for conn in &conns {
        log::info!("client {} ended in {}", conn.local_port(), conn.state().await);
    }
    report(&client, &server).await;
    Ok(())
}

async fn run_transfer(config: &SimConfig, connect_timeout: Duration) -> Result<()> {
    let (client, server) = hosts(config)?;
    let listener = server.listen(SERVER_PORT).await?;

    let conn = connect(&client, CLIENT_PORT_STEP, connect_timeout).await?;
    let worker = listener.accept_timeout(connect_timeout).await?;

    let (sent, received) = tokio::join!(run_sender(&*conn, config), run_receiver(&*worker, config));
    report(&client, &server).await;

    let sent = sent.context("sender failed")?;
    let received = received.context("receiver failed")?;
    log::info!(
        "transfer complete: {} bytes in {} writes, {} bytes in {} reads",
        sent.bytes,
        sent.chunks,
        received.bytes,
        received.chunks
    );
    Ok(())
}

async fn report(client: &Demultiplexer, server: &Demultiplexer) {
    for host in [client, server] {
        let out = host.endpoint().outbound_stats();
        log::info!(
            "[{}] sent: {} queued, {} delivered, {} lost; {} connection(s) still registered",
            host.host(),
            out.enqueued,
            out.delivered,
            out.dropped,
            host.active_count().await
        );
    }
}
