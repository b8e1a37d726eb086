//! Chorus server binary.
//!
//! # Usage
//!
//! ```bash
//! # Readiness reactor on the default endpoint (127.0.0.1:7777)
//! chorus-server
//!
//! # Completion tasks on all interfaces
//! chorus-server --host 0.0.0.0 --port 8888 --strategy completion
//! ```

use std::time::Duration;

use chorus_server::{
    DEFAULT_EVENTS_CAPACITY, DEFAULT_HOST, DEFAULT_MAX_PENDING_BYTES, DEFAULT_PORT,
    DEFAULT_WRITE_TIMEOUT, ServerConfig, Strategy,
};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Chorus broadcast chat server
#[derive(Parser, Debug)]
#[command(name = "chorus-server")]
#[command(about = "Broadcast chat server")]
#[command(version)]
struct Args {
    /// Host to bind to
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Port to bind to
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Concurrency strategy
    #[arg(short, long, value_enum, default_value_t = Strategy::Reactor)]
    strategy: Strategy,

    /// Read buffer capacity per connection, in bytes
    #[arg(long, default_value_t = chorus_core::BUFFER_SIZE)]
    buffer_size: usize,

    /// Reactor and completion: outbound bytes a slow peer may have pending
    #[arg(long, default_value_t = DEFAULT_MAX_PENDING_BYTES)]
    max_pending_bytes: usize,

    /// Threaded only: milliseconds a broadcast write may block on a slow peer
    #[arg(long, default_value_t = DEFAULT_WRITE_TIMEOUT.as_millis() as u64)]
    write_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stdout))
        .with(filter)
        .init();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        buffer_size: args.buffer_size,
        max_pending_bytes: args.max_pending_bytes,
        write_timeout: Duration::from_millis(args.write_timeout_ms),
        events_capacity: DEFAULT_EVENTS_CAPACITY,
    };

    chorus_server::run(config, args.strategy)?;

    Ok(())
}
