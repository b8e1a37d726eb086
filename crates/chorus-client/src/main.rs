//! Chorus client binary.
//!
//! # Usage
//!
//! ```bash
//! # Connect to the default endpoint (127.0.0.1:7777)
//! chorus-client
//!
//! # Connect elsewhere
//! chorus-client --host 10.0.0.5 --port 8888
//! ```
//!
//! Console lines longer than the buffer are sent in buffer-sized pieces.
//!
//! Exits 0 after `quit`, 1 if the server closes the connection.

use std::{
    io::{self, BufReader},
    process::ExitCode,
};

use chorus_client::{ClientConfig, ClientExit, DEFAULT_HOST, DEFAULT_PORT};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Chorus console chat client
#[derive(Parser, Debug)]
#[command(name = "chorus-client")]
#[command(about = "Console client for the Chorus broadcast chat")]
#[command(version)]
struct Args {
    /// Server host
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    // Stdout carries the conversation; logs go to stderr.
    tracing_subscriber::registry().with(fmt::layer().with_writer(io::stderr)).with(filter).init();

    let config = ClientConfig { host: args.host, port: args.port, ..ClientConfig::default() };

    match chorus_client::run(&config, BufReader::new(io::stdin()), io::stdout()) {
        Ok(ClientExit::Quit) => ExitCode::from(ClientExit::Quit.code()),
        Ok(exit @ ClientExit::ServerClosed) => {
            tracing::error!("server closed the connection");
            ExitCode::from(exit.code())
        },
        Err(e) => {
            tracing::error!(error = %e, "client failed");
            ExitCode::FAILURE
        },
    }
}
