//! Realtime ingress: one task per websocket connection.
//!
//! The socket is authenticated before the upgrade. Once open, each text frame
//! is decoded as a [`SendMessageEnvelope`], stored, rendered and broadcast to
//! the channel. Bad frames are logged and dropped; only a transport error or
//! a close frame ends the loop.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use murmur_shared::protocol::{ErrorNotice, SendMessageEnvelope, ServerEvent};
use murmur_shared::{ChatError, UserId};

use crate::api::AppState;
use crate::auth::bearer_token;
use crate::error::ServerError;
use crate::hub::Hub;
use crate::messaging::MessageService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// What became of one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Stored and queued on this many connections.
    Broadcast(usize),
    /// Undecodable or impersonating; nothing stored.
    Dropped,
    /// The send was refused; an `error` event went back to this connection.
    Rejected,
}

/// Server side of one realtime connection.
pub struct Session {
    user: UserId,
    conn_id: Uuid,
    tx: mpsc::Sender<String>,
    state: ConnectionState,
    messages: MessageService,
    hub: Hub,
}

impl Session {
    /// `Connecting -> Open`: register `tx` as `user`'s live connection.
    pub async fn open(
        user: UserId,
        tx: mpsc::Sender<String>,
        messages: MessageService,
        hub: Hub,
    ) -> Self {
        let mut session = Self {
            user,
            conn_id: Uuid::nil(),
            tx,
            state: ConnectionState::Connecting,
            messages,
            hub,
        };
        session.conn_id = session.hub.register(user, session.tx.clone()).await;
        session.state = ConnectionState::Open;
        session
    }

    pub async fn handle_frame(&self, frame: &str) -> FrameOutcome {
        let envelope = match SendMessageEnvelope::from_json(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(user = %self.user, error = %e, "Dropping undecodable frame");
                return FrameOutcome::Dropped;
            }
        };
        if envelope.sender_id != self.user {
            warn!(
                user = %self.user,
                claimed = %envelope.sender_id,
                "Dropping frame with mismatched sender"
            );
            return FrameOutcome::Dropped;
        }

        let channel = envelope.channel_id;
        let message = match self.messages.send_message(envelope).await {
            Ok(message) => message,
            Err(e) => {
                debug!(user = %self.user, channel = %channel, error = %e, "Send refused");
                self.reply_error(&e);
                return FrameOutcome::Rejected;
            }
        };

        let payload = self.messages.render(&message, channel).await;
        match self
            .hub
            .broadcast_to_channel(&channel, &ServerEvent::MessageNew(payload))
            .await
        {
            Ok(n) => FrameOutcome::Broadcast(n),
            Err(e) => {
                // Stored; members pick it up from history.
                warn!(channel = %channel, message = %message.id, error = %e, "Broadcast failed");
                FrameOutcome::Broadcast(0)
            }
        }
    }

    /// `Open -> Closed`. Leaves a newer connection for the same user alone.
    pub async fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.hub.unregister(&self.user, self.conn_id).await;
        self.state = ConnectionState::Closed;
    }

    fn reply_error(&self, err: &ChatError) {
        let message = match err {
            ChatError::Dependency(_) => "Upstream dependency failed".to_string(),
            other => other.to_string(),
        };
        let event = ServerEvent::Error(ErrorNotice { message });
        match event.to_json() {
            Ok(frame) => {
                if let Err(e) = self.tx.try_send(frame) {
                    warn!(user = %self.user, error = %e, "Could not queue error event");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode error event"),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// `GET /ws/messages?token=...`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let token = params
        .token
        .as_deref()
        .or_else(|| bearer_token(&headers))
        .unwrap_or_default();
    let Some(user) = state.auth.authenticate(token) else {
        return ServerError::Unauthorized("invalid or missing token".into()).into_response();
    };

    info!(user = %user, "WebSocket upgrade accepted");
    ws.on_upgrade(move |socket| run_socket(socket, user, state))
}

async fn run_socket(socket: WebSocket, user: UserId, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(state.config.outbound_queue);

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(WsMessage::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    let mut session = Session::open(user, tx, state.messages.clone(), state.hub.clone()).await;

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => {
                session.handle_frame(&text).await;
            }
            Ok(WsMessage::Close(_)) => {
                debug!(user = %user, "Close frame received");
                break;
            }
            // Pings are answered by the transport.
            Ok(_) => {}
            Err(e) => {
                debug!(user = %user, error = %e, "WebSocket read failed");
                break;
            }
        }
    }

    session.close().await;
    writer.abort();
    info!(user = %user, "WebSocket connection closed");
}
