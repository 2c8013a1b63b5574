use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{header::AUTHORIZATION, HeaderMap},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::{
    auth::{self, Identity, Principal},
    AppResult,
};

use super::{Hub, ServerEvent};

#[derive(Debug, Deserialize)]
pub(crate) struct ConnectQuery {
    token: Option<String>,
}

/// Authenticates the handshake, then hands the socket to the hub. Browsers
/// cannot set headers on a websocket, so `?token=` is accepted as well.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn chat_ws(
    State(hub): State<Arc<Hub>>,
    State(identity): State<Identity>,
    Query(ConnectQuery { token }): Query<ConnectQuery>,
    headers: HeaderMap,

    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let credential = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(auth::bearer)
        .map(str::to_owned)
        .or(token);

    let principal = hub.bounded(identity.authenticate(credential.as_deref())).await?;

    Ok(ws
        .on_upgrade(move |socket| serve_socket(hub, principal, socket))
        .into_response())
}

async fn serve_socket(hub: Arc<Hub>, principal: Principal, mut socket: WebSocket) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let guard = match hub.connect(principal, tx).await {
        Ok(guard) => guard,
        Err(err) => {
            warn!("could not register session: {err}");
            if let Ok(frame) = serde_json::to_string(&ServerEvent::from(&err)) {
                let _ = socket.send(Message::Text(frame.into())).await;
            }
            return;
        }
    };
    let session_id = guard.session().id;

    let (mut sender, mut receiver) = socket.split();

    // The only writer for this socket; drains the session queue in order.
    let mut writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let frame = match serde_json::to_string(&event) {
                Ok(frame) => frame,
                Err(err) => {
                    error!(session = %session_id, "failed to encode event: {err}");
                    continue;
                }
            };
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut writer => break,
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => hub.handle_frame(guard.session(), text.as_bytes()).await,
                Some(Ok(Message::Binary(bytes))) => hub.handle_frame(guard.session(), &bytes).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(session = %session_id, "socket error: {err}");
                    break;
                }
            },
        }
    }

    drop(guard);
    writer.abort();
}
