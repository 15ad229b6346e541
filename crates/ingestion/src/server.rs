//! TCP listener spawning one task per device connection

use std::net::SocketAddr;
use std::time::Instant;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::connection::{handle_connection, CloseReason};
use crate::context::IngestContext;
use crate::error::{IngestionError, Result};

/// Accept loop over a bound listener
pub struct TcpServer {
    listener: TcpListener,
    ctx: IngestContext,
}

impl TcpServer {
    /// Bind to `server.host:server.port` from the context's configuration
    pub async fn bind(ctx: IngestContext) -> Result<Self> {
        let addr = format!("{}:{}", ctx.config.server.host, ctx.config.server.port);
        Self::bind_addr(&addr, ctx).await
    }

    /// Bind to an explicit address, e.g. `127.0.0.1:0` in tests
    pub async fn bind_addr(addr: &str, ctx: IngestContext) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| IngestionError::bind(addr, e))?;
        info!(addr = %addr, "TCP server bound");
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` turns true.
    ///
    /// Also runs the periodic TP session sweep. Open connections are told to
    /// stop and awaited before this returns.
    #[instrument(name = "tcp_server", skip_all)]
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut connections = JoinSet::new();
        let mut sweep = tokio::time::interval(self.ctx.config.tp.sweep_interval());
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                warn!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                            }
                            let ctx = self.ctx.clone();
                            let shutdown = shutdown.clone();
                            connections.spawn(serve_connection(stream, peer, ctx, shutdown));
                        }
                        Err(e) => {
                            error!(error = %e, "Accept failed");
                        }
                    }
                }
                _ = sweep.tick() => {
                    let expired = self.ctx.reassembler.sweep_expired(Instant::now());
                    if expired > 0 {
                        debug!(expired, "TP sweep");
                    }
                }
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = ?e, "Connection task panicked");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(open = connections.len(), "TCP server stopping");
        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                error!(error = ?e, "Connection task panicked");
            }
        }
        info!("TCP server stopped");
        Ok(())
    }
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    ctx: IngestContext,
    shutdown: watch::Receiver<bool>,
) {
    let metrics = ctx.metrics.clone();
    metrics.record_connection_opened();
    observability::record_connection_event("opened", metrics.snapshot().connections_active);
    info!(peer = %peer, "Connection established");

    let reason = match handle_connection(stream, peer, ctx, shutdown).await {
        Ok(reason) => reason_label(reason),
        Err(e) => {
            warn!(peer = %peer, error = %e, "Connection error");
            "error"
        }
    };

    metrics.record_connection_closed();
    observability::record_connection_event(reason, metrics.snapshot().connections_active);
    info!(peer = %peer, reason, "Connection closed");
}

fn reason_label(reason: CloseReason) -> &'static str {
    match reason {
        CloseReason::Eof => "eof",
        CloseReason::IdleTimeout => "idle_timeout",
        CloseReason::Shutdown => "shutdown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{context, encode_can};
    use contracts::{GatewayConfig, RecordKind};
    use protocol::parse_reply;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_server_acks_and_shuts_down() {
        let ctx = context(GatewayConfig::default());
        let server = TcpServer::bind_addr("127.0.0.1:0", ctx.clone()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(server.run(rx));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(&encode_can(0x0CF0_0400, &[0x00, 0x80]))
            .await
            .unwrap();
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert!(parse_reply(&reply).unwrap().positive);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let snap = ctx.metrics.snapshot();
        assert_eq!(snap.connections_opened, 1);
        assert_eq!(snap.connections_active, 0);
        assert_eq!(ctx.gate.len(RecordKind::CanSignals), 1);
    }

    #[tokio::test]
    async fn test_bind_error_reported() {
        let ctx = context(GatewayConfig::default());
        let first = TcpServer::bind_addr("127.0.0.1:0", ctx.clone()).await.unwrap();
        let addr = first.local_addr().unwrap().to_string();

        let err = TcpServer::bind_addr(&addr, ctx).await.err().unwrap();
        assert!(matches!(err, IngestionError::Bind { .. }));
    }
}
