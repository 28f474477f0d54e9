use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::gateway::StreamConnection;
use crate::handler::dispatch::Dispatcher;
use crate::protocol::errors;
use crate::protocol::messages::{JsonRpcErrorResponse, JsonRpcRequest};

/// Maximum message size: 1 MiB.
const MAX_LINE_SIZE: usize = 1_048_576;

/// Run the NDJSON transport loop for one connection.
///
/// The connection is both a control channel and a stream: requests read
/// from `reader` (one per line) are answered on `writer`, and stream frames
/// from `stream` are interleaved between responses as they arrive. The
/// `connected` frame is written first.
///
/// The loop exits when the reader reaches EOF, the cancellation token is
/// triggered, the stream was evicted for not keeping up, or an I/O error
/// occurs. The stream is closed on every exit path.
pub async fn run_transport_loop<R, W>(
    reader: R,
    writer: &mut W,
    dispatcher: &mut Dispatcher,
    mut stream: StreamConnection,
    shutdown: CancellationToken,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWriteExt + Unpin,
{
    let result = serve(reader, writer, dispatcher, &mut stream, shutdown).await;
    stream.close();
    debug!("Stream {} finished ({:?})", stream.id(), stream.state());
    result
}

async fn serve<R, W>(
    reader: R,
    writer: &mut W,
    dispatcher: &mut Dispatcher,
    stream: &mut StreamConnection,
    shutdown: CancellationToken,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWriteExt + Unpin,
{
    let connected = stream.open();
    write_json(writer, &serde_json::to_value(&connected)?).await?;

    let mut lines = reader.lines();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Shutdown signal received, exiting transport loop");
                break;
            }

            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("Reader closed (EOF), exiting transport loop");
                    break;
                };

                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                if trimmed.len() > MAX_LINE_SIZE {
                    warn!("Message exceeds 1 MiB limit ({} bytes)", trimmed.len());
                    let err = JsonRpcErrorResponse::new(
                        serde_json::Value::Null,
                        errors::PARSE_ERROR,
                        "Message exceeds 1 MiB size limit",
                    );
                    write_json(writer, &serde_json::to_value(&err)?).await?;
                    continue;
                }

                debug!("Received: {}", trimmed);

                let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("Failed to parse JSON-RPC request: {e}");
                        let err = JsonRpcErrorResponse::new(
                            serde_json::Value::Null,
                            errors::PARSE_ERROR,
                            format!("Parse error: {e}"),
                        );
                        write_json(writer, &serde_json::to_value(&err)?).await?;
                        continue;
                    }
                };

                if request.jsonrpc != "2.0" {
                    let err = JsonRpcErrorResponse::new(
                        request.id,
                        errors::INVALID_REQUEST,
                        "Invalid JSON-RPC version (must be \"2.0\")",
                    );
                    write_json(writer, &serde_json::to_value(&err)?).await?;
                    continue;
                }

                let response_json = dispatcher.dispatch(request).await.to_json()?;
                debug!("Sending: {}", response_json);
                write_json(writer, &response_json).await?;
            }

            frame = stream.next_frame() => {
                let Some(frame) = frame else {
                    warn!("Stream {} fell behind the event bus, closing connection", stream.id());
                    break;
                };
                let json = serde_json::to_value(&frame)?;
                debug!("Sending frame: {}", frame.method);
                write_json(writer, &json).await?;
            }
        }
    }

    Ok(())
}

/// Write a JSON value as an NDJSON line to the writer.
pub async fn write_json<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::testing::{test_engine, ScriptedSource};
    use serde_json::Value;
    use tokio::io::{BufReader, Lines};

    #[tokio::test]
    async fn write_json_appends_newline() {
        let mut buf: Vec<u8> = Vec::new();
        let value = serde_json::json!({"jsonrpc": "2.0", "result": {}, "id": 1});
        write_json(&mut buf, &value).await.unwrap();
        let output = String::from_utf8(buf).unwrap();
        assert!(output.ends_with('\n'));
        assert_eq!(output.matches('\n').count(), 1);
        let parsed: Value = serde_json::from_str(output.trim_end()).unwrap();
        assert_eq!(parsed["id"], 1);
    }

    fn parse_lines(buf: &[u8]) -> Vec<Value> {
        String::from_utf8_lossy(buf)
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn scripted_session_over_in_memory_pipe() {
        let (engine, _store) = test_engine(Arc::new(ScriptedSource::released()));
        let mut dispatcher = Dispatcher::new(engine.clone());

        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"method\":\"initialize\",\"params\":{\"protocolVersion\":\"0.1.0\",\"client\":\"test\"},\"id\":1}\n",
            "\n",
            "not json\n",
            "{\"jsonrpc\":\"1.0\",\"method\":\"health.check\",\"id\":2}\n",
            "{\"jsonrpc\":\"2.0\",\"method\":\"health.check\",\"id\":3}\n",
        );
        let mut output: Vec<u8> = Vec::new();

        run_transport_loop(
            BufReader::new(input.as_bytes()),
            &mut output,
            &mut dispatcher,
            engine.gateway().connect(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let lines = parse_lines(&output);
        assert_eq!(lines[0]["method"], "connected");
        assert!(lines[0].get("id").is_none());
        assert_eq!(lines[1]["id"], 1);
        assert_eq!(lines[1]["result"]["protocolVersion"], "0.1.0");
        assert_eq!(lines[2]["error"]["code"], errors::PARSE_ERROR);
        assert_eq!(lines[3]["error"]["code"], errors::INVALID_REQUEST);
        assert_eq!(lines[4]["result"]["subscribers"], 1);
        assert_eq!(lines.len(), 5);

        // EOF closed the stream and released its subscription.
        assert_eq!(engine.bus().subscriber_count(), 0);
    }

    #[tokio::test]
    async fn client_that_stops_reading_is_evicted() {
        let config = earnwatch_core::config::EngineConfig {
            subscriber_buffer: 4,
            ..crate::testing::test_config()
        };
        let engine = Arc::new(crate::engine::Engine::new(
            config,
            Arc::new(ScriptedSource::released()),
            None,
            Arc::new(earnwatch_core::source::SystemClock),
        ));
        let mut dispatcher = Dispatcher::new(engine.clone());

        // A tiny pipe the client never drains: the server blocks writing.
        let (client, server) = tokio::io::duplex(64);
        let (server_read, mut server_write) = tokio::io::split(server);
        let (client_read, _client_write) = tokio::io::split(client);

        let loop_engine = engine.clone();
        let server_task = tokio::spawn(async move {
            run_transport_loop(
                BufReader::new(server_read),
                &mut server_write,
                &mut dispatcher,
                loop_engine.gateway().connect(),
                CancellationToken::new(),
            )
            .await
        });

        while engine.bus().subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }
        for i in 0..100 {
            engine.bus().publish(earnwatch_core::events::PollEvent::PollingStopped {
                subject: format!("S{i}"),
            });
        }
        assert_eq!(engine.bus().subscriber_count(), 0);

        // Once the client catches up it gets what was queued, then EOF.
        let mut lines = BufReader::new(client_read).lines();
        let mut frames = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            frames.push(serde_json::from_str::<Value>(&line).unwrap());
        }
        assert_eq!(frames[0]["method"], "connected");
        let stopped = frames.iter().filter(|f| f["method"] == "polling_stopped").count();
        assert!(stopped <= 4, "{stopped} frames delivered");

        server_task.await.unwrap().unwrap();
    }

    async fn read_msg<R: AsyncBufRead + Unpin>(lines: &mut Lines<R>) -> Value {
        let line = lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn frames_interleave_with_responses() {
        let source = Arc::new(ScriptedSource::released());
        let (engine, _store) = test_engine(source.clone());
        let mut dispatcher = Dispatcher::new(engine.clone());

        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, mut server_write) = tokio::io::split(server);
        let (client_read, mut client_write) = tokio::io::split(client);
        let shutdown = CancellationToken::new();

        let loop_engine = engine.clone();
        let loop_shutdown = shutdown.clone();
        let server_task = tokio::spawn(async move {
            run_transport_loop(
                BufReader::new(server_read),
                &mut server_write,
                &mut dispatcher,
                loop_engine.gateway().connect(),
                loop_shutdown,
            )
            .await
        });

        let mut client_lines = BufReader::new(client_read).lines();

        assert_eq!(read_msg(&mut client_lines).await["method"], "connected");

        client_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"initialize\",\"params\":{\"protocolVersion\":\"0.1.0\",\"client\":\"test\"},\"id\":1}\n")
            .await
            .unwrap();
        assert_eq!(read_msg(&mut client_lines).await["id"], 1);

        client_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"polling.start\",\"params\":{\"subject\":\"Acme\",\"intervalMs\":60000},\"id\":2}\n")
            .await
            .unwrap();

        let mut methods = Vec::new();
        let mut saw_response = false;
        while methods.len() < 3 || !saw_response {
            let msg = read_msg(&mut client_lines).await;
            if msg["id"] == 2 {
                assert_eq!(msg["result"]["activeSessions"][0], "Acme");
                saw_response = true;
            } else {
                methods.push(msg["method"].as_str().unwrap().to_string());
            }
        }
        assert_eq!(methods, vec!["update", "change", "polling_started"]);

        // Idle: the next frame is a heartbeat 30s after connect.
        let msg = tokio::time::timeout(Duration::from_secs(31), read_msg(&mut client_lines))
            .await
            .unwrap();
        assert_eq!(msg["method"], "heartbeat");

        shutdown.cancel();
        server_task.await.unwrap().unwrap();
        assert_eq!(engine.bus().subscriber_count(), 0);
        engine.shutdown().await;
    }
}
