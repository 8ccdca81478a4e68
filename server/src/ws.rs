use crate::api::AppState;
use crate::auth::Identity;
use crate::hub::ChatHub;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

#[derive(Deserialize, Default)]
pub struct WsParams {
    #[serde(default)]
    token: Option<String>,
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_owned)
}

/// Authenticate before upgrading; a rejected handshake never gets a session.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
) -> Response {
    let token = bearer(&headers).or(params.token);
    match state.auth.authenticate(token.as_deref()).await {
        Ok(who) => {
            let hub = state.hub.clone();
            ws.on_upgrade(move |socket| handle_socket(socket, hub, who))
        }
        Err(e) => {
            debug!(error = %e, "websocket handshake rejected");
            e.into_response()
        }
    }
}

async fn handle_socket(socket: WebSocket, hub: Arc<ChatHub>, who: Identity) {
    let (connection, rx) = hub.activate(&who).await;
    let (mut sender, mut receiver) = socket.split();
    let mut outbound = UnboundedReceiverStream::new(rx);
    loop {
        tokio::select! {
            Some(frame) = outbound.next() => {
                if sender.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            },
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => hub.dispatch(&who, connection, &text).await,
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    hub.close(&who, connection).await;
}
