use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::Engine;
use crate::handler::dispatch::Dispatcher;
use crate::io::transport::run_transport_loop;

/// Run the NDJSON transport over a TCP listener.
///
/// Binds to `addr` and serves every accepted client concurrently, each on
/// its own task with its own dispatcher and stream connection. Polling
/// sessions live in the shared engine, so they outlast any one client.
///
/// When the cancellation token fires, the accept loop stops, every client
/// task is told to finish, and all polling sessions are stopped.
pub async fn run_tcp_listener(
    addr: &str,
    engine: Arc<Engine>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", listener.local_addr()?);
    serve_listener(listener, engine, shutdown).await
}

/// Accept loop over an already bound listener.
pub async fn serve_listener(
    listener: TcpListener,
    engine: Arc<Engine>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut clients = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Shutdown signal received, stopping TCP listener");
                break;
            }

            accept_result = listener.accept() => {
                let (stream, peer) = match accept_result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Failed to accept connection: {e}");
                        continue;
                    }
                };
                info!("Client connected from {}", peer);
                clients.spawn(serve_client(stream, peer.to_string(), engine.clone(), shutdown.child_token()));
            }

            Some(_) = clients.join_next(), if !clients.is_empty() => {}
        }
    }

    while clients.join_next().await.is_some() {}

    info!("Shutting down, stopping all polling sessions");
    engine.shutdown().await;

    Ok(())
}

async fn serve_client(
    stream: TcpStream,
    peer: String,
    engine: Arc<Engine>,
    shutdown: CancellationToken,
) {
    let (reader_half, mut writer_half) = stream.into_split();
    let mut dispatcher = Dispatcher::new(engine.clone());
    let connection = engine.gateway().connect();

    let result = run_transport_loop(
        BufReader::new(reader_half),
        &mut writer_half,
        &mut dispatcher,
        connection,
        shutdown,
    )
    .await;

    match result {
        Ok(()) => info!("Client {} disconnected", peer),
        Err(e) => warn!("Client {} error: {}", peer, e),
    }
    info!("{} stream subscribers remain", engine.bus().subscriber_count());
}
