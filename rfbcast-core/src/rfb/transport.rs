//! Byte-stream plumbing between a session and its peer.
//!
//! [`RfbConnection`] hides whether the viewer is reached over a raw TCP
//! socket or WebSocket binary frames. Two background tasks move data:
//!
//! - **reader**: network → `mpsc` → [`recv`](RfbConnection::recv)
//! - **writer**: [`send`](RfbConnection::send) → `mpsc` → network
//!
//! Message boundaries are not preserved; the session treats every
//! delivery as an arbitrary chunk of the inbound byte stream.

use bytes::{Bytes, BytesMut};
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::codec::{BytesCodec, Framed};

use crate::error::RfbError;

/// Capacity of the inbound and outbound channels.
const CHANNEL_CAPACITY: usize = 64;

/// WebSocket subprotocol requested from the relay.
pub const WEBSOCKET_SUBPROTOCOL: &str = "binary";

pub type ConnectionSender = mpsc::Sender<Bytes>;

/// A connection to a single viewer.
#[derive(Debug)]
pub struct RfbConnection {
    tx: mpsc::Sender<Bytes>,
    rx: mpsc::Receiver<Bytes>,
}

impl RfbConnection {
    /// Wrap any byte stream (TCP socket, in-memory duplex, ...).
    pub fn from_io<T>(io: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (sink, stream) = Framed::new(io, BytesCodec::new()).split::<Bytes>();
        Self::spawn(
            stream.map(|r| r.map(BytesMut::freeze).map_err(RfbError::from)),
            sink.sink_map_err(RfbError::from),
        )
    }

    /// Wrap an established WebSocket. Binary frames carry the RFB stream;
    /// text frames are ignored and a close frame ends the inbound side.
    pub fn from_websocket<S>(ws: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();
        let stream = stream
            .take_while(|m| future::ready(!matches!(m, Ok(Message::Close(_)))))
            .filter_map(|m| {
                future::ready(match m {
                    Ok(Message::Binary(data)) => Some(Ok(Bytes::from(data))),
                    Ok(Message::Text(text)) => {
                        tracing::debug!(len = text.len(), "ignoring text frame");
                        None
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(RfbError::from(e))),
                })
            });
        let sink = sink.with(|data: Bytes| {
            future::ready(Ok::<_, RfbError>(Message::binary(data.to_vec())))
        });
        Self::spawn(Box::pin(stream), Box::pin(sink))
    }

    /// Dial a WebSocket endpoint (`ws://` or `wss://`) requesting the
    /// binary subprotocol.
    pub async fn connect_websocket(url: &str) -> Result<Self, RfbError> {
        let mut request = url.into_client_request()?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(WEBSOCKET_SUBPROTOCOL),
        );
        let (ws, response) = tokio_tungstenite::connect_async(request).await?;
        tracing::info!(url, status = %response.status(), "websocket connected");
        Ok(Self::from_websocket(ws))
    }

    fn spawn<R, W>(mut reader: R, mut writer: W) -> Self
    where
        R: Stream<Item = Result<Bytes, RfbError>> + Unpin + Send + 'static,
        W: Sink<Bytes, Error = RfbError> + Unpin + Send + 'static,
    {
        // User -> Network
        let (user_tx, mut network_rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);

        // Network -> User
        let (network_tx, user_rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            while let Some(data) = network_rx.recv().await {
                if let Err(e) = writer.send(data).await {
                    tracing::warn!(error = %e, "network write failed");
                    break;
                }
            }
            let _ = writer.close().await;
        });

        tokio::spawn(async move {
            loop {
                let result = tokio::select! {
                    // Connection dropped: release the read half too.
                    _ = network_tx.closed() => break,
                    next = reader.next() => match next {
                        Some(result) => result,
                        None => break,
                    },
                };
                match result {
                    Ok(data) if data.is_empty() => continue,
                    Ok(data) => {
                        if network_tx.send(data).await.is_err() {
                            // Receiver dropped.
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "network read failed");
                        break;
                    }
                }
            }
            tracing::debug!("reader finished");
        });

        Self {
            tx: user_tx,
            rx: user_rx,
        }
    }

    pub async fn send(&self, data: Bytes) -> Result<(), RfbError> {
        self.tx.send(data).await?;
        Ok(())
    }

    /// Next inbound chunk, `None` once the peer has gone.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    pub fn sender(&self) -> ConnectionSender {
        self.tx.clone()
    }

    pub fn into_parts(self) -> (ConnectionSender, mpsc::Receiver<Bytes>) {
        (self.tx, self.rx)
    }
}

// ── Tests ────────────────────────────────────────────────────────
