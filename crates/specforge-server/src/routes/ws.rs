use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt as _, StreamExt as _};
use serde::Deserialize;

use crate::auth::{self, Principal};
use crate::error::AppError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// GET /api/v1/ws?token=<jwt>: the token is checked before the upgrade so
/// anonymous clients get a plain 401.
pub async fn ws_upgrade(
    State(app): State<AppState>,
    Query(q): Query<WsQuery>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(token) = q.token.filter(|t| !t.is_empty()) else {
        return AppError::auth_failed("missing token").into_response();
    };
    let principal = match auth::verify(&app.config, &token) {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };
    let upgrade = match upgrade {
        Ok(u) => u,
        Err(rejection) => return rejection.into_response(),
    };
    upgrade.on_upgrade(move |socket| pump(app, principal, socket))
}

/// Forward hub messages to the socket until either side closes.
async fn pump(app: AppState, principal: Principal, socket: WebSocket) {
    let (sub_id, mut outbound) = app.hub.register(principal.user_id);
    let (mut sink, mut inbound) = socket.split();
    tracing::info!(user_id = %principal.user_id, subscriber = sub_id, "websocket connected");

    loop {
        tokio::select! {
            msg = outbound.recv() => {
                let Some(text) = msg else { break };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = inbound.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }

    app.hub.unregister(sub_id);
    tracing::info!(user_id = %principal.user_id, subscriber = sub_id, "websocket closed");
}
