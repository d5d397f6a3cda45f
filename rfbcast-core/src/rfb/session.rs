//! Per-viewer RFB session.
//!
//! Drives the handshake, parses client messages and hands update
//! requests to the [`UpdateEngine`]. The engine is moved into a spawned
//! task for the duration of a cycle, so the session keeps reading while
//! an update is being produced and can drop requests that arrive
//! meanwhile.
//!
//! ```text
//!   delivery ──► handshake ──► Established ──► ClientMessageCodec
//!                                                   │
//!                         FramebufferUpdateRequest ─┤
//!                                                   ▼
//!                 UpdateGate::try_begin ─► spawn(engine.update) ─► send
//! ```

use bytes::{Bytes, BytesMut};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::codec::Decoder;

use crate::codec::{ClientMessage, ClientMessageCodec, PROTOCOL_VERSION};
use crate::error::RfbError;
use crate::rfb::handshake::{HandshakePhase, ServerInit};
use crate::rfb::pixel_format::PixelFormat;
use crate::rfb::service::{Admission, UpdateEngine, UpdateGate};
use crate::rfb::transport::{ConnectionSender, RfbConnection};
use crate::rfb::types::Region;

type CycleOutput = (UpdateEngine, Result<Option<Bytes>, RfbError>);

/// Counters reported when a session ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub updates_sent: u64,
    pub requests_dropped: u64,
    pub unknown_messages: u64,
}

pub struct RfbSession {
    phase: HandshakePhase,
    server_init: ServerInit,
    inbound: BytesMut,
    codec: ClientMessageCodec,
    pixel_format: PixelFormat,
    gate: UpdateGate,
    /// `None` while a cycle owns it.
    engine: Option<UpdateEngine>,
    in_flight: Option<JoinHandle<CycleOutput>>,
    first_update: bool,
    stats: SessionStats,
}

impl RfbSession {
    pub fn new(engine: UpdateEngine) -> Self {
        let (width, height) = engine.dimensions();
        Self {
            phase: HandshakePhase::default(),
            server_init: ServerInit::new(width, height),
            inbound: BytesMut::new(),
            codec: ClientMessageCodec,
            pixel_format: PixelFormat::default(),
            gate: engine.gate().clone(),
            engine: Some(engine),
            in_flight: None,
            first_update: true,
            stats: SessionStats::default(),
        }
    }

    /// Handle for aborting the session from outside.
    pub fn gate(&self) -> UpdateGate {
        self.gate.clone()
    }

    pub fn phase(&self) -> &HandshakePhase {
        &self.phase
    }

    pub fn pixel_format(&self) -> &PixelFormat {
        &self.pixel_format
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Run until the peer disconnects or the session is aborted with no
    /// cycle in flight.
    pub async fn run(mut self, connection: RfbConnection) -> Result<SessionStats, RfbError> {
        let (tx, mut rx) = connection.into_parts();
        tx.send(Bytes::from_static(PROTOCOL_VERSION)).await?;
        tracing::info!(
            width = self.server_init.width,
            height = self.server_init.height,
            "session started"
        );

        loop {
            if self.gate.is_aborted() && self.in_flight.is_none() {
                tracing::info!("session aborted");
                break;
            }
            tokio::select! {
                delivery = rx.recv() => match delivery {
                    Some(data) => self.handle_delivery(&data, &tx).await?,
                    None => {
                        tracing::info!("peer disconnected");
                        break;
                    }
                },
                joined = join_in_flight(&mut self.in_flight), if self.in_flight.is_some() => {
                    self.in_flight = None;
                    self.finish_cycle(joined, &tx).await?;
                }
                _ = self.gate.aborted(), if self.in_flight.is_none() => {}
            }
        }

        if let Some(handle) = self.in_flight.take() {
            self.gate.abort();
            let _ = handle.await;
        }
        tracing::info!(
            updates = self.stats.updates_sent,
            dropped = self.stats.requests_dropped,
            "session finished"
        );
        Ok(self.stats)
    }

    /// Feed one inbound chunk through the handshake or message parser.
    pub async fn handle_delivery(
        &mut self,
        data: &[u8],
        tx: &ConnectionSender,
    ) -> Result<(), RfbError> {
        self.inbound.extend_from_slice(data);

        if !self.phase.is_established() {
            if let Some(reply) = self.phase.advance(&mut self.inbound, &self.server_init)? {
                tx.send(reply).await?;
                tracing::debug!(phase = %self.phase, "handshake advanced");
            }
            return Ok(());
        }

        loop {
            match self.codec.decode(&mut self.inbound) {
                Ok(Some(message)) => self.dispatch(message),
                Ok(None) => break,
                Err(RfbError::ProtocolViolation(reason)) => {
                    tracing::warn!(reason, "protocol desync, discarding buffered input");
                    self.inbound.clear();
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, message: ClientMessage) {
        tracing::debug!(message = message.name(), "client message");
        match message {
            ClientMessage::SetPixelFormat(pf) => {
                if pf.is_supported() {
                    self.pixel_format = pf;
                    if let Some(engine) = self.engine.as_mut() {
                        engine.set_pixel_format(pf);
                    }
                    tracing::info!(
                        bpp = pf.bits_per_pixel,
                        big_endian = pf.big_endian,
                        "pixel format set"
                    );
                } else {
                    tracing::warn!(?pf, "unsupported pixel format ignored");
                }
            }
            ClientMessage::SetEncodings(encodings) => {
                tracing::debug!(?encodings, "client encodings");
            }
            ClientMessage::FramebufferUpdateRequest { incremental, region } => {
                self.request_update(incremental, region);
            }
            ClientMessage::KeyEvent { down, key } => {
                tracing::trace!(down, key, "key event ignored");
            }
            ClientMessage::PointerEvent { buttons, x, y } => {
                tracing::trace!(buttons, x, y, "pointer event ignored");
            }
            ClientMessage::ClientCutText(text) => {
                tracing::trace!(len = text.len(), "cut text ignored");
            }
            ClientMessage::Unknown(kind) => {
                self.stats.unknown_messages += 1;
                tracing::warn!(kind, "unknown message type, rest of delivery discarded");
            }
        }
    }

    fn request_update(&mut self, incremental: bool, region: Region) {
        match self.gate.try_begin() {
            Admission::Started => {}
            Admission::Busy => {
                self.stats.requests_dropped += 1;
                tracing::debug!("update in progress, request dropped");
                return;
            }
            Admission::Aborted => {
                self.stats.requests_dropped += 1;
                tracing::debug!("session aborted, request dropped");
                return;
            }
        }
        let Some(mut engine) = self.engine.take() else {
            self.gate.finish();
            tracing::warn!("update engine unavailable, request dropped");
            return;
        };

        let (width, height) = engine.dimensions();
        let (incremental, region) = if self.first_update {
            self.first_update = false;
            (false, Region::new(0, 0, width, height))
        } else {
            (incremental, region.clamp_to(width, height))
        };
        if region.is_empty() {
            self.engine = Some(engine);
            self.gate.finish();
            tracing::debug!("empty update region, nothing to do");
            return;
        }

        engine.set_pixel_format(self.pixel_format);
        self.in_flight = Some(tokio::spawn(async move {
            let result = engine.update(incremental, region).await;
            (engine, result)
        }));
    }

    async fn finish_cycle(
        &mut self,
        joined: Result<CycleOutput, JoinError>,
        tx: &ConnectionSender,
    ) -> Result<(), RfbError> {
        let (engine, result) = match joined {
            Ok(output) => output,
            Err(e) => {
                self.gate.finish();
                return Err(e.into());
            }
        };
        self.engine = Some(engine);

        let outcome = match result {
            Ok(Some(update)) if !self.gate.is_aborted() => {
                let sent = tx.send(update).await.map_err(RfbError::from);
                if sent.is_ok() {
                    self.stats.updates_sent += 1;
                }
                sent
            }
            Ok(_) => {
                tracing::debug!("update cycle ended without an update");
                Ok(())
            }
            Err(e) => Err(e),
        };
        self.gate.finish();
        outcome
    }
}

async fn join_in_flight(
    handle: &mut Option<JoinHandle<CycleOutput>>,
) -> Result<CycleOutput, JoinError> {
    match handle {
        Some(h) => h.await,
        None => std::future::pending().await,
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rfb::capture::SharedFrame;
    use crate::rfb::service::SessionConfig;
    use crate::rfb::types::Framebuffer;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn session(width: u16, height: u16) -> (RfbSession, SharedFrame) {
        let shared = SharedFrame::new(Framebuffer::new(width, height));
        let engine = UpdateEngine::with_rng(
            Box::new(shared.clone()),
            SessionConfig::default(),
            UpdateGate::new(),
            StdRng::seed_from_u64(1),
        );
        (RfbSession::new(engine), shared)
    }

    async fn handshake(
        session: &mut RfbSession,
        tx: &ConnectionSender,
        rx: &mut mpsc::Receiver<Bytes>,
    ) {
        session.handle_delivery(b"RFB 003.008\n", tx).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), &[1u8, 1][..]);
        session.handle_delivery(&[1], tx).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), &[0u8, 0, 0, 0][..]);
        session.handle_delivery(&[1], tx).await.unwrap();
        let init = rx.recv().await.unwrap();
        assert_eq!(init.len(), 28);
        assert!(session.phase().is_established());
    }

    const INCREMENTAL_FULL: [u8; 10] = [3, 1, 0, 0, 0, 0, 0xff, 0xff, 0xff, 0xff];

    #[tokio::test]
    async fn handshake_replies_are_exact() {
        let (mut s, _) = session(640, 480);
        let (tx, mut rx) = mpsc::channel(8);
        handshake(&mut s, &tx, &mut rx).await;
    }

    #[tokio::test]
    async fn split_message_is_parsed_once_complete() {
        let (mut s, _) = session(16, 16);
        let (tx, mut rx) = mpsc::channel(8);
        handshake(&mut s, &tx, &mut rx).await;

        s.handle_delivery(&INCREMENTAL_FULL[..4], &tx).await.unwrap();
        assert!(s.in_flight.is_none());
        s.handle_delivery(&INCREMENTAL_FULL[4..], &tx).await.unwrap();
        assert!(s.in_flight.is_some());
    }

    #[tokio::test]
    async fn unknown_type_discards_and_recovers() {
        let (mut s, _) = session(16, 16);
        let (tx, mut rx) = mpsc::channel(8);
        handshake(&mut s, &tx, &mut rx).await;

        let mut bytes = vec![0xee, 1, 2];
        bytes.extend_from_slice(&INCREMENTAL_FULL);
        s.handle_delivery(&bytes, &tx).await.unwrap();
        assert_eq!(s.stats().unknown_messages, 1);
        assert!(s.in_flight.is_none());

        s.handle_delivery(&INCREMENTAL_FULL, &tx).await.unwrap();
        assert!(s.in_flight.is_some());
    }

    #[tokio::test]
    async fn busy_request_is_dropped() {
        let (mut s, _) = session(16, 16);
        let (tx, mut rx) = mpsc::channel(8);
        handshake(&mut s, &tx, &mut rx).await;

        let mut two = INCREMENTAL_FULL.to_vec();
        two.extend_from_slice(&INCREMENTAL_FULL);
        s.handle_delivery(&two, &tx).await.unwrap();
        assert_eq!(s.stats().requests_dropped, 1);

        let joined = join_in_flight(&mut s.in_flight).await;
        s.in_flight = None;
        s.finish_cycle(joined, &tx).await.unwrap();
        assert!(s.gate.is_idle());
        assert_eq!(s.stats().updates_sent, 1);

        let update = rx.recv().await.unwrap();
        assert_eq!(&update[..2], &[0, 0]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsupported_pixel_format_is_ignored() {
        let (mut s, _) = session(16, 16);
        let (tx, mut rx) = mpsc::channel(8);
        handshake(&mut s, &tx, &mut rx).await;

        let bad = PixelFormat {
            true_color: false,
            ..PixelFormat::default()
        };
        let mut msg = vec![0, 0, 0, 0];
        msg.extend_from_slice(&bad.to_bytes());
        s.handle_delivery(&msg, &tx).await.unwrap();
        assert_eq!(s.pixel_format(), &PixelFormat::default());

        let good = PixelFormat {
            big_endian: true,
            ..PixelFormat::default()
        };
        let mut msg = vec![0, 0, 0, 0];
        msg.extend_from_slice(&good.to_bytes());
        s.handle_delivery(&msg, &tx).await.unwrap();
        assert_eq!(s.pixel_format(), &good);
    }

    #[tokio::test]
    async fn out_of_range_shift_is_rejected_and_updates_continue() {
        let (mut s, _) = session(16, 16);
        let (tx, mut rx) = mpsc::channel(8);
        handshake(&mut s, &tx, &mut rx).await;

        let bad = PixelFormat {
            red_shift: 40,
            ..PixelFormat::default()
        };
        let mut msg = vec![0, 0, 0, 0];
        msg.extend_from_slice(&bad.to_bytes());
        msg.extend_from_slice(&[3, 0, 0, 0, 0, 0, 0, 16, 0, 16]);
        s.handle_delivery(&msg, &tx).await.unwrap();
        assert_eq!(s.pixel_format(), &PixelFormat::default());

        let joined = join_in_flight(&mut s.in_flight).await;
        s.in_flight = None;
        s.finish_cycle(joined, &tx).await.unwrap();
        assert_eq!(s.stats().updates_sent, 1);
        let update = rx.recv().await.unwrap();
        assert_eq!(&update[..2], &[0, 0]);
    }

    #[tokio::test]
    async fn aborted_session_drops_requests() {
        let (mut s, _) = session(16, 16);
        let (tx, mut rx) = mpsc::channel(8);
        handshake(&mut s, &tx, &mut rx).await;

        s.gate().abort();
        s.handle_delivery(&INCREMENTAL_FULL, &tx).await.unwrap();
        assert!(s.in_flight.is_none());
        assert_eq!(s.stats().requests_dropped, 1);
    }

    /// Read from `client` until `got` holds at least `n` bytes.
    async fn fill_to(client: &mut RfbConnection, got: &mut BytesMut, n: usize) {
        while got.len() < n {
            got.extend_from_slice(&client.recv().await.unwrap());
        }
    }

    #[tokio::test]
    async fn run_ends_when_source_ends() {
        let (s, shared) = session(16, 16);
        let (client, server) = tokio::io::duplex(4096);
        let task = tokio::spawn(s.run(RfbConnection::from_io(server)));

        shared.end().unwrap();
        let mut client = RfbConnection::from_io(client);
        let mut got = BytesMut::new();
        fill_to(&mut client, &mut got, 12).await;
        assert_eq!(&got[..12], PROTOCOL_VERSION);
        client.send(Bytes::from_static(b"RFB 003.008\n")).await.unwrap();
        fill_to(&mut client, &mut got, 14).await;
        client.send(Bytes::from_static(&[1])).await.unwrap();
        fill_to(&mut client, &mut got, 18).await;
        client.send(Bytes::from_static(&[1])).await.unwrap();
        fill_to(&mut client, &mut got, 46).await;
        client.send(Bytes::from_static(&INCREMENTAL_FULL)).await.unwrap();

        let stats = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("session did not end")
            .unwrap()
            .unwrap();
        assert_eq!(stats.updates_sent, 0);
        assert_eq!(got.len(), 46);
    }
}
