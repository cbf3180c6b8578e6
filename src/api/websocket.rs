//! WebSocket handler for real-time metric streaming
//!
//! Adapts axum's socket to [`Frame`] and hands it to a [`ViewerSession`].

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt, future};
use tracing::debug;

use crate::api::state::ApiState;
use crate::session::{Frame, ViewerSession};

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Frame::Text(text),
            Message::Binary(data) => Frame::Binary(data),
            Message::Ping(data) => Frame::Ping(data),
            Message::Pong(data) => Frame::Pong(data),
            Message::Close(_) => Frame::Close,
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(data) => Message::Binary(data),
            Frame::Ping(data) => Message::Ping(data),
            Frame::Pong(data) => Message::Pong(data),
            Frame::Close => Message::Close(None),
        }
    }
}

/// WebSocket upgrade handler
///
/// GET /api/v1/stream
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

/// Run one viewer session on the upgraded socket
async fn handle_websocket(socket: WebSocket, state: ApiState) {
    let (sender, receiver) = socket.split();

    let sink = sender.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(Message::from(frame))));
    let stream = receiver.map(|message| message.map(Frame::from));

    let session = ViewerSession::new(state.hub.clone(), state.session_settings.clone());
    debug!("upgraded {}", session.id());

    state
        .sessions
        .track_future(session.run(sink, stream, state.force_close.clone()))
        .await;
}
