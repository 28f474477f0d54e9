use std::sync::Arc;

use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::engine::Engine;
use crate::handler::dispatch::Dispatcher;
use crate::io::transport::run_transport_loop;

/// Run the NDJSON transport over stdin/stdout.
///
/// The single stdio peer gets the same control surface and event stream as
/// a TCP client. Logs go to stderr. Closing stdin stops every polling
/// session.
pub async fn run_stdio_loop(engine: Arc<Engine>, shutdown: CancellationToken) -> anyhow::Result<()> {
    let mut dispatcher = Dispatcher::new(engine.clone());
    let reader = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();

    info!("Stdio transport loop started, waiting for input");

    let result = run_transport_loop(
        reader,
        &mut stdout,
        &mut dispatcher,
        engine.gateway().connect(),
        shutdown,
    )
    .await;

    info!("Stdio transport finished, shutting down");
    engine.shutdown().await;
    result
}
