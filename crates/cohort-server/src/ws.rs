//! WebSocket transport.
//!
//! Each connection gets a writer task draining its hub queue and a read loop
//! that decodes [`ClientEvent`] frames and hands them to the [`Fanout`].
//!
//! [`Fanout`]: crate::fanout::Fanout

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use cohort_shared::protocol::{ClientEvent, ServerEvent};
use cohort_shared::ErrorCode;
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::auth::CurrentUser;

/// `GET /ws`: the caller's identity is resolved before the upgrade.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    user: CurrentUser,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
}

async fn handle_socket(socket: WebSocket, state: AppState, user: CurrentUser) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (conn, mut rx) = state.fanout.hub().register(user.id).await;
    info!(%conn, user_id = %user.id, "socket connected");

    let sender_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender
                .send(Message::Text(frame.to_string().into()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_receiver.next().await {
        match msg {
            Message::Text(text) => match ClientEvent::from_json(text.as_str()) {
                Ok(event) => state.fanout.handle(conn, user.id, event).await,
                Err(e) => {
                    warn!(%conn, error = %e, "invalid socket frame");
                    state
                        .fanout
                        .hub()
                        .send_to(
                            conn,
                            &ServerEvent::error(ErrorCode::InvalidRequest, "Malformed event"),
                        )
                        .await;
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.fanout.disconnect(conn).await;
    sender_task.abort();
    debug!(%conn, user_id = %user.id, "socket handler finished");
}
