// websocket-client/src/transport.rs
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

use crate::error::DriverError;

/// What the driver asks the transport to write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

/// What the transport reports back.
///
/// `Error` and `Closed` are terminal; nothing follows them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(Vec<u8>),
    Error(String),
    Closed { code: Option<u16>, reason: String },
}

/// An open transport: a writer channel and a reader channel
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<Outbound>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens transports to a URL
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self, url: &str) -> Result<TransportLink, DriverError>;
}

/// WebSocket transport over tokio-tungstenite
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn open(&self, url: &str) -> Result<TransportLink, DriverError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| DriverError::TransportError(e.to_string()))?;
        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<TransportEvent>();

        // Forward driver frames to the socket
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let result = match frame {
                    Outbound::Text(text) => ws_sink.send(WsMessage::Text(text)).await,
                    Outbound::Close => {
                        let close = CloseFrame {
                            code: CloseCode::Normal,
                            reason: Cow::Borrowed("client closed connection"),
                        };
                        let _ = ws_sink.send(WsMessage::Close(Some(close))).await;
                        break;
                    },
                };
                if let Err(e) = result {
                    tracing::error!("Error sending to WebSocket server: {}", e);
                    break;
                }
            }
            let _ = ws_sink.close().await;
        });

        // Forward socket frames to the driver
        tokio::spawn(async move {
            while let Some(msg) = ws_stream.next().await {
                let event = match msg {
                    Ok(WsMessage::Text(text)) => TransportEvent::Frame(text.into_bytes()),
                    Ok(WsMessage::Binary(data)) => TransportEvent::Frame(data),
                    Ok(WsMessage::Close(frame)) => {
                        let (code, reason) = match frame {
                            Some(f) => (Some(u16::from(f.code)), f.reason.into_owned()),
                            None => (None, String::new()),
                        };
                        let _ = in_tx.send(TransportEvent::Closed { code, reason });
                        return;
                    },
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = in_tx.send(TransportEvent::Error(e.to_string()));
                        return;
                    },
                };
                if in_tx.send(event).is_err() {
                    // Driver dropped the link
                    return;
                }
            }
            let _ = in_tx.send(TransportEvent::Closed {
                code: None,
                reason: "stream ended".to_string(),
            });
        });

        Ok(TransportLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
