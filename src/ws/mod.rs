pub mod handlers;
mod race;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;

use crate::auth::{bearer_token, Identity};
use crate::broadcast::{LobbyReceiver, RaceReceiver};
use crate::protocol::{ClientMessage, ServerMessage, PROTOCOL_VERSION};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler.
///
/// The token may come from `?token=` (browsers can't set headers on a
/// WebSocket) or from an `Authorization: Bearer` header.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let token = params.token.as_deref().or_else(|| bearer_token(&headers));
    let identity = state.auth.identify(token);
    tracing::info!(
        "WebSocket connection request: subject={:?}",
        identity.as_ref().map(|i| &i.subject)
    );

    ws.on_upgrade(move |socket| handle_socket(socket, identity, state))
}

/// Per-connection subscriptions
#[derive(Default)]
struct Subscriptions {
    race: Option<RaceReceiver>,
    lobby: Option<LobbyReceiver>,
}

/// Wait for the next race push, forever if not subscribed
async fn recv_race(rx: Option<&mut RaceReceiver>) -> Result<ServerMessage, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Wait for the next lobby push, forever if not subscribed
async fn recv_lobby(rx: Option<&mut LobbyReceiver>) -> Result<ServerMessage, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn send_json(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!("Failed to serialize message: {}", e);
            true
        }
    }
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, identity: Option<Identity>, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let welcome = ServerMessage::Welcome {
        protocol: PROTOCOL_VERSION.to_string(),
        user: state.get_current_user(identity.as_ref()).await,
        server_now: chrono::Utc::now().to_rfc3339(),
    };
    if !send_json(&mut sender, &welcome).await {
        tracing::error!("Failed to send welcome message");
        return;
    }

    let mut subs = Subscriptions::default();

    loop {
        tokio::select! {
            // Pushes for the subscribed race
            race_msg = recv_race(subs.race.as_mut()) => {
                let push = match race_msg {
                    Ok(msg) => Some(msg),
                    Err(RecvError::Lagged(skipped)) => {
                        // Only the latest snapshot matters. A fresh receiver
                        // skips the stale backlog.
                        let Some(stale) = subs.race.take() else { continue };
                        let race_id = stale.race_id().clone();
                        drop(stale);
                        tracing::debug!("Race subscriber lagged by {} messages, resyncing", skipped);
                        match state.subscribe_race(&race_id).await {
                            Ok((race, rx)) => {
                                subs.race = rx;
                                Some(ServerMessage::RaceUpdate { race })
                            }
                            Err(_) => Some(ServerMessage::RaceDeleted { race_id }),
                        }
                    }
                    Err(RecvError::Closed) => {
                        subs.race = None;
                        None
                    }
                };
                if let Some(msg) = push {
                    if matches!(msg, ServerMessage::RaceDeleted { .. }) {
                        subs.race = None;
                    }
                    if !send_json(&mut sender, &msg).await {
                        break;
                    }
                }
            }

            // Waiting list pushes
            lobby_msg = recv_lobby(subs.lobby.as_mut()) => {
                let push = match lobby_msg {
                    Ok(msg) => Some(msg),
                    Err(RecvError::Lagged(_)) => Some(ServerMessage::WaitingRaces {
                        races: state.list_waiting_races().await,
                    }),
                    Err(RecvError::Closed) => {
                        subs.lobby = None;
                        None
                    }
                };
                if let Some(msg) = push {
                    if !send_json(&mut sender, &msg).await {
                        break;
                    }
                }
            }

            // Handle client messages
            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!("Received message: {}", text);

                        let responses = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                handle_client_message(client_msg, identity.as_ref(), &state, &mut subs).await
                            }
                            Err(e) => {
                                tracing::warn!("Failed to parse client message: {}", e);
                                vec![ServerMessage::Error {
                                    code: "PARSE_ERROR".to_string(),
                                    msg: format!("Invalid message format: {}", e),
                                }]
                            }
                        };

                        let mut sent = true;
                        for response in &responses {
                            if !send_json(&mut sender, response).await {
                                tracing::error!("Failed to send response");
                                sent = false;
                                break;
                            }
                        }
                        if !sent {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("WebSocket closed");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    tracing::info!(
        "WebSocket connection closed for subject: {:?}",
        identity.as_ref().map(|i| &i.subject)
    );
}

/// Apply subscription messages to the connection, dispatch everything else
async fn handle_client_message(
    msg: ClientMessage,
    identity: Option<&Identity>,
    state: &AppState,
    subs: &mut Subscriptions,
) -> Vec<ServerMessage> {
    match msg {
        ClientMessage::Subscribe { race_id } => {
            subs.race = None;
            match state.subscribe_race(&race_id).await {
                Ok((snapshot, rx)) => {
                    subs.race = rx;
                    vec![
                        ServerMessage::Subscribed { race_id },
                        ServerMessage::RaceUpdate { race: snapshot },
                    ]
                }
                Err(e) => vec![e.into()],
            }
        }
        ClientMessage::Unsubscribe => {
            subs.race = None;
            vec![]
        }
        ClientMessage::SubscribeLobby => {
            subs.lobby = Some(state.hub.subscribe_lobby());
            vec![ServerMessage::WaitingRaces {
                races: state.list_waiting_races().await,
            }]
        }
        msg => handlers::handle_message(msg, identity, state)
            .await
            .into_iter()
            .collect(),
    }
}
