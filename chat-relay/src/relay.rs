use std::{future::Future, io, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::{OwnedSemaphorePermit, Semaphore},
};
use tracing::{info, warn};

use crate::{config::RelayConfig, registry::ConnectionRegistry, session};

/// Accepts connections and runs one session task per client.
pub struct Relay {
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    config: Arc<RelayConfig>,
}

impl Relay {
    pub fn new(listener: TcpListener, config: RelayConfig) -> Self {
        Self {
            listener,
            registry: Arc::new(ConnectionRegistry::new()),
            config: Arc::new(config),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Runs the accept loop until `shutdown` resolves or the listener fails.
    ///
    /// Transient accept errors are logged and skipped; any other listener error ends the
    /// loop and is returned. Sessions already running are left to finish on their own.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Relay {
            listener,
            registry,
            config,
        } = self;
        let limiter = config
            .max_connections
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));
        tokio::pin!(shutdown);

        loop {
            let permit = select! {
                () = &mut shutdown => break,
                permit = acquire_slot(limiter.as_ref()) => permit?,
            };

            let accepted = select! {
                () = &mut shutdown => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => spawn_session(stream, peer, &registry, &config, permit),
                Err(err) if is_transient(&err) => {
                    warn!(error = ?err, "failed to accept connection");
                }
                Err(err) => return Err(err).context("listener failed; no longer accepting"),
            }
        }

        info!("relay shutting down");
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn acquire_slot(limiter: Option<&Arc<Semaphore>>) -> Result<Option<OwnedSemaphorePermit>> {
    let Some(limiter) = limiter else {
        return Ok(None);
    };
    let permit = Arc::clone(limiter)
        .acquire_owned()
        .await
        .context("connection limiter closed")?;
    Ok(Some(permit))
}

fn spawn_session(
    stream: TcpStream,
    peer: SocketAddr,
    registry: &Arc<ConnectionRegistry>,
    config: &Arc<RelayConfig>,
    permit: Option<OwnedSemaphorePermit>,
) {
    let registry = Arc::clone(registry);
    let config = Arc::clone(config);
    tokio::spawn(async move {
        // Held for the session's lifetime so the slot frees only once it is done.
        let _permit = permit;
        info!(%peer, "connection accepted");
        if let Err(err) = session::handle_connection(stream, registry, config).await {
            warn!(%peer, error = ?err, "client connection closed with error");
        }
    });
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}
