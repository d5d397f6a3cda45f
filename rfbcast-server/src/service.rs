//! rfbcast service core logic.
//!
//! Builds the frame source, reaches the viewer over the configured
//! transport and runs one [`RfbSession`] at a time until stopped.
//!
//! - **websocket**: dial the relay once and serve the viewer behind it.
//! - **listen**: accept viewers on a TCP port, one session after another.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{error, info, warn, Instrument};

use rfbcast_core::{FrameSource, RfbConnection, RfbError, RfbSession, UpdateEngine, UpdateGate};

use crate::capture::{ImageFileSource, SyntheticSource};
use crate::config::{ServerConfig, SourceKind, TransportMode};

// ── RfbService ───────────────────────────────────────────────────

/// The top-level rfbcast service.
pub struct RfbService {
    config: ServerConfig,
    running: Arc<AtomicBool>,
}

impl RfbService {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Obtain a handle that can be used to stop the service from
    /// another task.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run the service until stopped or, in WebSocket mode, until the
    /// single relayed session ends.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.running.store(true, Ordering::SeqCst);
        let result = match self.config.transport.mode {
            TransportMode::Websocket => self.run_websocket().await,
            TransportMode::Listen => self.run_listen().await,
        };
        self.running.store(false, Ordering::SeqCst);
        info!("rfbcast service stopped");
        result
    }

    /// Signal the service to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Whether the service is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ── Internal ─────────────────────────────────────────────────

    async fn run_websocket(&self) -> Result<(), Box<dyn std::error::Error>> {
        let url = self.config.websocket_url();
        info!("dialing relay {url}");
        let connection = RfbConnection::connect_websocket(&url).await?;
        self.serve(connection).await?;
        Ok(())
    }

    async fn run_listen(&self) -> Result<(), Box<dyn std::error::Error>> {
        let addr: SocketAddr = format!("0.0.0.0:{}", self.config.transport.listen_port).parse()?;
        let listener = TcpListener::bind(addr).await?;
        info!("rfbcast listening on {addr}");

        while self.running.load(Ordering::SeqCst) {
            let accept = tokio::select! {
                result = listener.accept() => result,
                _ = Self::wait_for_stop(&self.running) => break,
            };
            let (stream, peer) = match accept {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept error: {e}");
                    continue;
                }
            };
            info!("viewer connected from {peer}");
            if let Err(e) = stream.set_nodelay(true) {
                warn!("set_nodelay failed for {peer}: {e}");
            }

            match self.serve(RfbConnection::from_io(stream)).await {
                Ok(()) => info!("session with {peer} ended"),
                Err(e) => error!("session with {peer} failed: {e}"),
            }
        }
        Ok(())
    }

    /// Run one session on `connection`, aborting it when the service
    /// is stopped.
    async fn serve(&self, connection: RfbConnection) -> Result<(), RfbError> {
        let source = self.open_source().await?;
        let gate = UpdateGate::new();
        let engine = UpdateEngine::new(source, self.config.to_session_config(), gate.clone());
        let session = RfbSession::new(engine);

        let running = Arc::clone(&self.running);
        let watchdog = tokio::spawn(async move {
            Self::wait_for_stop(&running).await;
            gate.abort();
        });

        let span = tracing::info_span!("session", channel = %self.config.transport.channel);
        let result = session.run(connection).instrument(span).await;
        watchdog.abort();

        let stats = result?;
        info!(
            updates = stats.updates_sent,
            dropped = stats.requests_dropped,
            unknown = stats.unknown_messages,
            "session stats"
        );
        Ok(())
    }

    async fn open_source(&self) -> Result<Box<dyn FrameSource>, RfbError> {
        let capture = &self.config.capture;
        Ok(match capture.source {
            SourceKind::Synthetic => Box::new(SyntheticSource::new(
                capture.width,
                capture.height,
                capture.fps_hint,
            )),
            SourceKind::File => Box::new(ImageFileSource::open(&capture.path).await?),
        })
    }

    /// Async helper: resolves when `running` becomes false.
    async fn wait_for_stop(running: &Arc<AtomicBool>) {
        loop {
            if !running.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn service_creates_with_defaults() {
        let svc = RfbService::new(ServerConfig::default());
        assert!(!svc.is_running());
        assert_eq!(svc.config().transport.mode, TransportMode::Listen);
    }

    #[test]
    fn stop_handle_works() {
        let svc = RfbService::new(ServerConfig::default());
        let handle = svc.stop_handle();
        handle.store(true, Ordering::SeqCst);
        assert!(svc.is_running());
        svc.stop();
        assert!(!svc.is_running());
    }

    #[tokio::test]
    async fn missing_image_fails_session() {
        let mut config = ServerConfig::default();
        config.capture.source = SourceKind::File;
        config.capture.path = "/nonexistent/rfbcast.png".into();
        let svc = RfbService::new(config);
        let (_client, server) = tokio::io::duplex(64);
        assert!(svc.serve(RfbConnection::from_io(server)).await.is_err());
    }

    #[tokio::test]
    async fn stop_aborts_running_session() {
        let mut config = ServerConfig::default();
        config.capture.width = 32;
        config.capture.height = 32;
        let svc = Arc::new(RfbService::new(config));
        svc.stop_handle().store(true, Ordering::SeqCst);

        let (mut client, server) = tokio::io::duplex(4096);
        let task = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.serve(RfbConnection::from_io(server)).await })
        };

        let mut version = [0u8; 12];
        client.read_exact(&mut version).await.unwrap();
        assert_eq!(&version, b"RFB 003.008\n");
        client.write_all(&version).await.unwrap();

        svc.stop();
        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("session did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
