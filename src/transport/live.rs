//! WebSocket connector for the live inference service

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::wire::decode_server_message;
use super::{Connector, Outbound, Session, SessionEvent, SessionSetup};
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to the service over a WebSocket, key passed as a query parameter
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveConnector;

impl LiveConnector {
    /// Endpoint URL with the credential attached
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the endpoint is not a valid URL
    pub fn authorized_url(endpoint: &str, credential: &SecretString) -> Result<Url> {
        let mut url =
            Url::parse(endpoint).map_err(|e| Error::Config(format!("invalid endpoint: {e}")))?;
        url.query_pairs_mut()
            .append_pair("key", credential.expose_secret());
        Ok(url)
    }
}

#[async_trait]
impl Connector for LiveConnector {
    async fn open(&self, credential: &SecretString, setup: &SessionSetup) -> Result<Session> {
        let url = Self::authorized_url(&setup.endpoint, credential)?;

        tracing::info!(
            endpoint = %setup.endpoint,
            model = %setup.model,
            voice = %setup.voice,
            "opening live session"
        );

        let (ws, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::Transport(format!("connect failed: {e}")))?;

        let (mut write, read) = ws.split();

        let setup_json = serde_json::to_string(&setup.to_wire())?;
        write
            .send(Message::Text(setup_json))
            .await
            .map_err(|e| Error::Transport(format!("setup send failed: {e}")))?;

        let (session, peer) = Session::pair();
        tokio::spawn(write_loop(write, peer.outbound));
        tokio::spawn(read_loop(read, peer.events));

        tracing::debug!("live session open");
        Ok(session)
    }
}

async fn write_loop(
    mut write: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(frame) = outbound.recv().await {
        let Some(message) = frame.to_wire() else {
            break;
        };

        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize outbound frame");
                continue;
            }
        };

        if let Err(e) = write.send(Message::Text(json)).await {
            tracing::warn!(error = %e, "outbound send failed");
            break;
        }
    }

    let _ = write.send(Message::Close(None)).await;
    let _ = write.close().await;
    tracing::debug!("live session writer stopped");
}

async fn read_loop(mut read: SplitStream<WsStream>, events: mpsc::UnboundedSender<SessionEvent>) {
    while let Some(message) = read.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(e) => {
                    let _ = events.send(SessionEvent::Malformed(format!("non-UTF-8 frame: {e}")));
                    continue;
                }
            },
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| f.reason.into_owned())
                    .filter(|r| !r.is_empty());
                let _ = events.send(SessionEvent::Closed { reason });
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                let _ = events.send(SessionEvent::Error(e.to_string()));
                return;
            }
        };

        let event = match decode_server_message(&text) {
            Ok(inbound) => SessionEvent::Inbound(inbound),
            Err(e) => SessionEvent::Malformed(e.to_string()),
        };

        if events.send(event).is_err() {
            // Session handle dropped
            return;
        }
    }

    let _ = events.send(SessionEvent::Closed { reason: None });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attaches_key_as_query_parameter() {
        let key = SecretString::from("abc123".to_string());
        let url = LiveConnector::authorized_url("wss://example.test/ws/live", &key).unwrap();
        assert_eq!(url.as_str(), "wss://example.test/ws/live?key=abc123");
    }

    #[test]
    fn rejects_invalid_endpoint() {
        let key = SecretString::from("abc123".to_string());
        assert!(matches!(
            LiveConnector::authorized_url("not a url", &key),
            Err(Error::Config(_))
        ));
    }
}
