mod bridge;
mod bus;
mod engine;
mod gateway;
mod handler;
mod io;
mod polling;
mod protocol;
mod sources;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use earnwatch_core::config::EngineConfig;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::engine::Engine;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_usage() {
    eprintln!("Usage: earnwatch-agent (--stdio | --listen <addr>) [--config <path>]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --stdio            Serve NDJSON over stdin/stdout");
    eprintln!("  --listen <addr>    Serve NDJSON over TCP (e.g. 127.0.0.1:7685)");
    eprintln!("  --config <path>    JSON config file (source, store, intervals)");
    eprintln!("  --version          Print version and exit");
    eprintln!("  --help             Print this help message");
}

enum Mode {
    Stdio,
    Listen(Option<String>),
}

struct Args {
    mode: Mode,
    config: Option<PathBuf>,
}

fn parse_args(args: &[String]) -> anyhow::Result<Args> {
    let mut mode = None;
    let mut config = None;
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--stdio" => mode = Some(Mode::Stdio),
            "--listen" => {
                let addr = iter
                    .next()
                    .ok_or_else(|| anyhow!("--listen requires an address"))?;
                mode = Some(Mode::Listen(Some(addr.clone())));
            }
            "--config" => {
                let path = iter
                    .next()
                    .ok_or_else(|| anyhow!("--config requires a path"))?;
                config = Some(PathBuf::from(path));
            }
            other => return Err(anyhow!("Unknown option: {other}")),
        }
    }

    // A config file with `listen` set is enough to pick TCP mode.
    let mode = mode.unwrap_or(Mode::Listen(None));
    Ok(Args { mode, config })
}

fn init_tracing() {
    // Logs go to stderr so they never mix with the protocol on stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C"),
            Err(e) => warn!("Failed to listen for Ctrl-C: {e}"),
        }
        on_signal.cancel();
    });
    token
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.first().map(String::as_str) {
        Some("--version") => {
            println!("earnwatch-agent {}", VERSION);
            return Ok(());
        }
        Some("--help") => {
            print_usage();
            return Ok(());
        }
        None => {
            print_usage();
            std::process::exit(1);
        }
        _ => {}
    }

    let args = match parse_args(&args) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{e}");
            print_usage();
            std::process::exit(1);
        }
    };

    init_tracing();

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let engine = Arc::new(Engine::from_config(config)?);
    let shutdown = shutdown_on_ctrl_c();

    match args.mode {
        Mode::Stdio => {
            info!("earnwatch-agent {} starting in stdio mode", VERSION);
            io::stdio::run_stdio_loop(engine, shutdown).await
        }
        Mode::Listen(addr) => {
            let addr = addr
                .or_else(|| engine.config().listen.clone())
                .ok_or_else(|| anyhow!("No listen address (pass --listen or set \"listen\")"))?;
            info!("earnwatch-agent {} starting in TCP mode", VERSION);
            io::tcp::run_tcp_listener(&addr, engine, shutdown).await
        }
    }
}
