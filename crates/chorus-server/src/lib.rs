//! Chorus server.
//!
//! A broadcast chat server: every message a client sends is forwarded to
//! every other connected client as `"<id>: <text>"`. A client leaves by
//! sending `quit` or by closing its connection.
//!
//! # Strategies
//!
//! The same registry, buffers and router from [`chorus_core`] run under
//! three concurrency models:
//!
//! - [`Reactor`]: one thread multiplexing non-blocking sockets with mio
//! - [`CompletionServer`]: reader and writer tasks on a tokio runtime
//! - [`ThreadedServer`]: one blocking thread per connection
//!
//! [`run`] binds the chosen strategy and serves until it stops.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod completion;
mod config;
mod error;
mod peer;
mod reactor;
mod session;
mod threaded;

pub use completion::CompletionServer;
pub use config::{
    DEFAULT_EVENTS_CAPACITY, DEFAULT_HOST, DEFAULT_MAX_PENDING_BYTES, DEFAULT_PORT,
    DEFAULT_WRITE_TIMEOUT, ServerConfig, Strategy,
};
pub use error::ServerError;
pub use peer::{ChannelPeer, ReactorPeer, StreamPeer};
pub use reactor::{LISTENER, Reactor, ReactorState, ShutdownHandle, WAKER};
pub use threaded::{ThreadedServer, ThreadedShutdown};

/// Bind `strategy` on `config` and serve until it stops.
///
/// The completion strategy builds its own runtime and stops on Ctrl-C. The
/// other two serve until the process exits.
pub fn run(config: ServerConfig, strategy: Strategy) -> Result<(), ServerError> {
    tracing::info!(%strategy, host = %config.host, port = config.port, "starting server");

    match strategy {
        Strategy::Reactor => Reactor::bind(config)?.run(),
        Strategy::Completion => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|e| ServerError::Runtime(e.to_string()))?;

            runtime.block_on(async {
                let server = CompletionServer::bind(config).await?;
                server
                    .run_until(async {
                        if let Err(e) = tokio::signal::ctrl_c().await {
                            tracing::warn!(error = %e, "cannot listen for Ctrl-C");
                            std::future::pending::<()>().await;
                        }
                    })
                    .await
            })
        },
        Strategy::Threaded => ThreadedServer::bind(config)?.run(),
    }
}
