/// === IMPORTS ===

// Standard library type for holding an IP address and port together.
use std::net::SocketAddr;

// Arc is an atomic reference counter for shared ownership across tasks.
use std::sync::Arc;

// Tokio's non-blocking TCP listener and stream.
use tokio::net::{TcpListener, TcpStream};

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time;

/// === MODULES ===

// Ctrl+C listener and the one-shot shutdown flag
pub mod shutdown;

use crate::config::ServerConfig;
use crate::error::{ChatError, Result};
use crate::logger::{Journal, Logger};
use crate::session::handler::handle_session;
use crate::session::protocol;
use crate::session::registry::{SessionRegistry, SessionWriter, SharedWriter};

pub use shutdown::{Shutdown, spawn_shutdown_listener};


/// === SERVER ===

/// A bound listener plus the shared state every session task works on.
pub struct ChatServer {
    listener: TcpListener,
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    shutdown: Shutdown,
    logger: Logger,
}

impl ChatServer {
    /// Binds `config.host:config.port` and records the start banner.
    pub async fn bind(
        config: ServerConfig,
        journal: Arc<dyn Journal>,
        logger: Logger,
    ) -> Result<Self> {
        let addr = config.addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ChatError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let port = listener.local_addr()?.port();

        let registry = Arc::new(
            SessionRegistry::new(
                config.max_clients,
                config.history_limit,
                journal.clone(),
                logger.clone(),
            )
            .with_write_timeout(config.write_timeout()),
        );

        let started = protocol::started_line(&journal.format_timestamp(), &config.host, port);
        logger.info(&format!("🚀 {}", protocol::strip_line_ending(&started)));
        journal.append_log(&started);

        Ok(ChatServer {
            listener,
            config,
            registry,
            shutdown: Shutdown::new(),
            logger,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    /// Handle that stops `run` when fired
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Accepts connections until the shutdown flag fires, then closes the
    /// listener. Sessions already running are left alone.
    pub async fn run(self) -> Result<()> {
        let ChatServer {
            listener,
            config,
            registry,
            shutdown,
            logger,
        } = self;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    logger.info("🧹 Server received shutdown signal.");
                    break;
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            // Admission waits on the registry lock; shutdown must not
                            tokio::select! {
                                biased;
                                _ = shutdown.cancelled() => {
                                    logger.info("🧹 Server received shutdown signal.");
                                    break;
                                }
                                _ = admit(stream, addr, &registry, &config, &logger) => {}
                            }
                        }
                        Err(e) => {
                            if shutdown.is_shutting_down() {
                                break;
                            }
                            // Transient (e.g. too many open files): warn and pause briefly
                            logger.warn(&format!("⚠️ Failed to accept connection: {}", e));
                            time::sleep(config.accept_error_backoff()).await;
                        }
                    }
                }
            }
        }

        drop(listener);
        Ok(())
    }
}

/// Binds, installs the Ctrl+C listener and serves until shutdown.
pub async fn run_server(
    config: ServerConfig,
    journal: Arc<dyn Journal>,
    logger: Logger,
) -> Result<()> {
    let server = ChatServer::bind(config, journal.clone(), logger.clone()).await?;
    let signal_handle = spawn_shutdown_listener(server.shutdown_handle(), journal, logger);

    let result = server.run().await;

    signal_handle.abort();
    result
}


/// === CONNECTIONS ===

/// Claims a registry slot for the connection and spawns its session, or
/// turns it away when the server is full.
async fn admit(
    stream: TcpStream,
    addr: SocketAddr,
    registry: &Arc<SessionRegistry>,
    config: &ServerConfig,
    logger: &Logger,
) {
    // Disable Nagle's algorithm so short chat lines go out immediately
    if let Err(e) = stream.set_nodelay(true) {
        logger.warn(&format!("⚠️ Failed to set TCP_NODELAY for {}: {}", addr, e));
    }

    let (reader_half, writer_half) = stream.into_split();
    let boxed: SessionWriter = Box::new(writer_half);
    let writer: SharedWriter = Arc::new(Mutex::new(boxed));

    let id = match registry.try_register(addr, writer.clone()).await {
        Ok(id) => id,
        Err(full) => {
            logger.warn(&format!("🔒 Rejecting {}: {}", addr, full));
            let log = logger.clone();
            tokio::spawn(async move {
                let mut w = writer.lock().await;
                let sent = async {
                    w.write_all(protocol::SERVER_FULL.as_bytes()).await?;
                    w.shutdown().await
                }
                .await;
                if let Err(e) = sent {
                    log.debug(&format!("Could not notify {} of full server: {}", addr, e));
                }
            });
            return;
        }
    };

    let active = registry.snapshot_count().await;
    logger.info(&format!(
        "🔌 {} connected as session {}. Active sessions: {}",
        addr, id, active
    ));

    tokio::spawn(handle_session(
        id,
        addr,
        reader_half,
        writer,
        registry.clone(),
        config.max_line_length,
        logger.clone(),
    ));
}
