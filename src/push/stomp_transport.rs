//! STOMP over WebSocket push transport.
//!
//! Connects with tokio-tungstenite, performs the STOMP CONNECT handshake,
//! subscribes to the user's private notification destination and waits for
//! the subscription receipt before handing the session to the manager.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::stomp::{self, Inbound, StompCommand, StompFrame};
use super::transport::{
    HeartbeatTerms, PushSession, PushTransport, TransportError, TransportEvent,
};
use crate::config::ConnectionSettings;
use crate::lifecycle::Identity;

/// Default per-user destination for notification pushes.
pub const DEFAULT_DESTINATION: &str = "/user/queue/notifications";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`PushTransport`] speaking STOMP 1.2 over a WebSocket.
#[derive(Debug, Clone)]
pub struct StompTransport {
    ws_url: String,
    destination: String,
    heartbeat: Duration,
    connect_timeout: Duration,
}

impl StompTransport {
    pub fn new(ws_url: impl Into<String>, settings: &ConnectionSettings) -> Self {
        Self {
            ws_url: ws_url.into(),
            destination: settings.destination.clone(),
            heartbeat: settings.heartbeat_interval,
            connect_timeout: settings.connect_timeout,
        }
    }

    async fn handshake(&self, identity: &Identity) -> Result<StompSession, TransportError> {
        let mut request = self
            .ws_url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let bearer = format!("Bearer {}", identity.token);
        let header = HeaderValue::from_str(&bearer)
            .map_err(|e| TransportError::Connect(format!("invalid credential: {}", e)))?;
        request.headers_mut().insert(AUTHORIZATION, header);
        let host = request
            .uri()
            .host()
            .unwrap_or("localhost")
            .to_string();

        let (ws, _) = connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let mut session = StompSession {
            ws,
            pending: VecDeque::new(),
            heartbeat: HeartbeatTerms::default(),
        };

        let heartbeat_ms = u64::try_from(self.heartbeat.as_millis()).unwrap_or(u64::MAX);
        session
            .send_frame(
                StompFrame::new(StompCommand::Connect)
                    .header("accept-version", "1.2")
                    .header("host", host)
                    .header("heart-beat", format!("{},{}", heartbeat_ms, heartbeat_ms))
                    .header("Authorization", bearer),
            )
            .await?;

        let connected = session
            .wait_for(|frame| frame.command == StompCommand::Connected)
            .await?;
        // An absent or unreadable header means the server sends none.
        let server_heart_beat = connected
            .get_header("heart-beat")
            .and_then(stomp::parse_heart_beat)
            .unwrap_or((0, 0));
        session.heartbeat =
            stomp::negotiate_heart_beat((heartbeat_ms, heartbeat_ms), server_heart_beat);
        debug!(
            "STOMP session established (version {}, server heart-beat {:?}, agreed {:?})",
            connected.get_header("version").unwrap_or("?"),
            server_heart_beat,
            session.heartbeat
        );

        let subscription_id = format!("sub-{}", uuid::Uuid::new_v4());
        let receipt_id = format!("receipt-{}", subscription_id);
        session
            .send_frame(
                StompFrame::new(StompCommand::Subscribe)
                    .header("id", subscription_id.as_str())
                    .header("destination", self.destination.as_str())
                    .header("ack", "auto")
                    .header("receipt", receipt_id.as_str()),
            )
            .await?;

        session
            .wait_for(|frame| {
                frame.command == StompCommand::Receipt
                    && frame.get_header("receipt-id") == Some(receipt_id.as_str())
            })
            .await?;
        info!(
            "Subscribed to {} ({})",
            self.destination, subscription_id
        );

        Ok(session)
    }
}

#[async_trait]
impl PushTransport for StompTransport {
    async fn open(&self, identity: &Identity) -> Result<Box<dyn PushSession>, TransportError> {
        match tokio::time::timeout(self.connect_timeout, self.handshake(identity)).await {
            Ok(Ok(session)) => Ok(Box::new(session)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::Timeout(self.connect_timeout)),
        }
    }
}

/// An open STOMP session.
pub struct StompSession {
    ws: WsStream,
    /// Units decoded but not yet handed out.
    pending: VecDeque<Inbound>,
    heartbeat: HeartbeatTerms,
}

impl StompSession {
    async fn send_frame(&mut self, frame: StompFrame) -> Result<(), TransportError> {
        self.ws
            .send(Message::text(frame.encode()))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    /// Read the next decoded unit, pulling from the socket as needed.
    async fn next_inbound(&mut self) -> Option<Result<Inbound, TransportError>> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(Ok(item));
            }

            let message = match self.ws.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(TransportError::Io(e.to_string()))),
            };

            let text = match &message {
                Message::Text(text) => text.as_str(),
                Message::Binary(bytes) => match std::str::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => {
                        return Some(Err(TransportError::Protocol(
                            "binary frame is not UTF-8".to_string(),
                        )))
                    }
                },
                Message::Ping(_) | Message::Pong(_) => return Some(Ok(Inbound::Heartbeat)),
                Message::Close(_) => return None,
                Message::Frame(_) => continue,
            };

            match stomp::decode(text) {
                Ok(items) => self.pending.extend(items),
                Err(e) => return Some(Err(TransportError::Protocol(e.to_string()))),
            }
        }
    }

    /// Wait for a frame matching `predicate` during the handshake. MESSAGE
    /// frames that arrive early are kept for delivery afterwards.
    async fn wait_for<F>(&mut self, predicate: F) -> Result<StompFrame, TransportError>
    where
        F: Fn(&StompFrame) -> bool,
    {
        let mut deferred = Vec::new();
        let result = loop {
            match self.next_inbound().await {
                None => break Err(TransportError::Closed),
                Some(Err(e)) => break Err(e),
                Some(Ok(Inbound::Heartbeat)) => continue,
                Some(Ok(Inbound::Frame(frame))) => {
                    if frame.command == StompCommand::Error {
                        break Err(rejection(&frame));
                    }
                    if predicate(&frame) {
                        break Ok(frame);
                    }
                    if frame.command == StompCommand::Message {
                        deferred.push(Inbound::Frame(frame));
                    }
                }
            }
        };
        for item in deferred.into_iter().rev() {
            self.pending.push_front(item);
        }
        result
    }
}

#[async_trait]
impl PushSession for StompSession {
    async fn next_event(&mut self) -> Option<Result<TransportEvent, TransportError>> {
        loop {
            let frame = match self.next_inbound().await? {
                Ok(Inbound::Heartbeat) => return Some(Ok(TransportEvent::Heartbeat)),
                Ok(Inbound::Frame(frame)) => frame,
                Err(e) => return Some(Err(e)),
            };

            match frame.command {
                StompCommand::Message => return Some(Ok(TransportEvent::Message(frame.body))),
                StompCommand::Error => return Some(Err(rejection(&frame))),
                other => debug!("Ignoring STOMP {} frame", other),
            }
        }
    }

    fn heartbeat(&self) -> HeartbeatTerms {
        self.heartbeat
    }

    async fn send_heartbeat(&mut self) -> Result<(), TransportError> {
        self.ws
            .send(Message::text("\n"))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self
            .send_frame(StompFrame::new(StompCommand::Disconnect))
            .await
        {
            debug!("Failed to send DISCONNECT: {}", e);
        }
        if let Err(e) = self.ws.close(None).await {
            warn!("Failed to close push WebSocket: {}", e);
        }
    }
}

fn rejection(frame: &StompFrame) -> TransportError {
    let summary = frame.get_header("message").unwrap_or("ERROR frame");
    if frame.body.is_empty() {
        TransportError::Rejected(summary.to_string())
    } else {
        TransportError::Rejected(format!("{}: {}", summary, frame.body.trim()))
    }
}
