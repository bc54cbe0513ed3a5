//! WebSocket connector: a persistent socket, one text frame per payload.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use iotsim_core::target_system::{TargetSystemType, WebSocketSettings};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::connector::{Ack, Connector, Session};
use crate::error::ConnectorError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long `disconnect` waits for the close handshake.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

pub struct WebSocketConnector {
    settings: WebSocketSettings,
}

impl WebSocketConnector {
    pub fn new(settings: WebSocketSettings) -> Result<Self, ConnectorError> {
        if !(settings.url.starts_with("ws://") || settings.url.starts_with("wss://")) {
            return Err(ConnectorError::Config(format!(
                "WebSocket URL must use ws:// or wss://: {}",
                settings.url
            )));
        }
        Ok(Self { settings })
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.settings.timeout.max(1))
    }
}

fn classify(err: WsError) -> ConnectorError {
    match err {
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Protocol(ProtocolError::SendAfterClosing) => {
            ConnectorError::ConnectionLost("socket closed".into())
        }
        WsError::Io(e) => ConnectorError::from_io(&e),
        WsError::Http(response) => {
            let status = response.status().as_u16();
            let body = response
                .body()
                .as_deref()
                .map(String::from_utf8_lossy)
                .unwrap_or_default();
            ConnectorError::from_status(status, &body)
        }
        WsError::Url(e) => ConnectorError::Config(e.to_string()),
        WsError::Tls(e) => ConnectorError::Protocol(format!("TLS error: {e}")),
        other => ConnectorError::Protocol(other.to_string()),
    }
}

/// Drain inbound frames so control frames are answered, and flag closure.
async fn read_loop(mut stream: SplitStream<WsStream>, lost: watch::Sender<Option<String>>) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| format!("closed by peer: {} {}", u16::from(f.code), f.reason))
                    .unwrap_or_else(|| "closed by peer".into());
                let _ = lost.send(Some(reason));
                return;
            }
            Ok(_) => {}
            Err(e) => {
                let _ = lost.send(Some(e.to_string()));
                return;
            }
        }
    }
    let _ = lost.send(Some("stream ended".into()));
}

#[async_trait]
impl Connector for WebSocketConnector {
    fn system_type(&self) -> TargetSystemType {
        TargetSystemType::WebSocket
    }

    fn describe(&self) -> String {
        self.settings.url.clone()
    }

    async fn connect(&self) -> Result<Box<dyn Session>, ConnectorError> {
        let timeout = self.timeout();
        let (ws_stream, _response) = tokio::time::timeout(timeout, connect_async(&self.settings.url))
            .await
            .map_err(|_| ConnectorError::timeout(timeout))?
            .map_err(classify)?;

        tracing::debug!(url = %self.settings.url, "WebSocket connected");

        let (sink, stream) = ws_stream.split();
        let (lost_tx, lost_rx) = watch::channel(None);
        let reader = tokio::spawn(read_loop(stream, lost_tx));

        Ok(Box::new(WebSocketSession {
            sink,
            lost: lost_rx,
            reader,
            timeout,
        }))
    }
}

struct WebSocketSession {
    sink: SplitSink<WsStream, Message>,
    lost: watch::Receiver<Option<String>>,
    reader: JoinHandle<()>,
    timeout: Duration,
}

#[async_trait]
impl Session for WebSocketSession {
    async fn send(&mut self, payload: &Value) -> Result<Ack, ConnectorError> {
        let lost = self.lost.borrow().clone();
        if let Some(reason) = lost {
            return Err(ConnectorError::ConnectionLost(reason));
        }
        let text = serde_json::to_string(payload)
            .map_err(|e| ConnectorError::Serialization(e.to_string()))?;
        let bytes = text.len();

        tokio::time::timeout(self.timeout, self.sink.send(Message::Text(text)))
            .await
            .map_err(|_| ConnectorError::timeout(self.timeout))?
            .map_err(classify)?;

        Ok(Ack::new("frame sent", bytes))
    }

    async fn disconnect(self: Box<Self>) {
        let mut this = *self;
        let closed = tokio::time::timeout(CLOSE_GRACE, async {
            let _ = this.sink.send(Message::Close(None)).await;
            let _ = this.sink.close().await;
        })
        .await;
        if closed.is_err() {
            tracing::debug!("WebSocket close handshake timed out");
        }
        this.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;

    fn settings(url: String) -> WebSocketSettings {
        WebSocketSettings { url, timeout: 2 }
    }

    /// Accepts one connection and returns the text frames it received.
    async fn echo_server() -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let mut frames = Vec::new();
            while let Some(Ok(msg)) = ws.next().await {
                match msg {
                    Message::Text(text) => frames.push(text.to_string()),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            frames
        });
        (format!("ws://{addr}"), handle)
    }

    #[tokio::test]
    async fn sends_one_text_frame_per_payload() {
        let (url, server) = echo_server().await;
        let connector = WebSocketConnector::new(settings(url)).unwrap();

        let mut session = connector.connect().await.unwrap();
        session.send(&json!({"n": 1})).await.unwrap();
        session.send(&json!({"n": 2})).await.unwrap();
        session.disconnect().await;

        let frames = server.await.unwrap();
        assert_eq!(frames, vec![r#"{"n":1}"#, r#"{"n":2}"#]);
    }

    #[tokio::test]
    async fn peer_close_is_reported_as_connection_lost() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let connector = WebSocketConnector::new(settings(format!("ws://{addr}"))).unwrap();
        let mut session = connector.connect().await.unwrap();

        let mut last = Ok(Ack::new("", 0));
        for _ in 0..50 {
            last = session.send(&json!({})).await;
            if last.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(last.unwrap_err().needs_reconnect());
    }

    #[test]
    fn rejects_non_ws_urls() {
        assert!(WebSocketConnector::new(settings("http://x".into())).is_err());
    }
}
