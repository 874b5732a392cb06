//! Race message handlers
//!
//! Thin adapters from client messages to race operations. Every failure is
//! reported back to the caller as an `error` message.

use crate::auth::Identity;
use crate::protocol::ServerMessage;
use crate::state::AppState;
use crate::typing::ProgressReport;
use crate::types::RaceId;

pub async fn handle_create_race(state: &AppState, identity: &Identity) -> Option<ServerMessage> {
    match state.create_race(identity).await {
        Ok(race_id) => Some(ServerMessage::RaceCreated { race_id }),
        Err(e) => Some(e.into()),
    }
}

pub async fn handle_join_race(
    state: &AppState,
    identity: &Identity,
    race_id: RaceId,
) -> Option<ServerMessage> {
    match state.join_race(identity, &race_id).await {
        Ok(race_id) => Some(ServerMessage::RaceJoined { race_id }),
        Err(e) => Some(e.into()),
    }
}

pub async fn handle_leave_race(
    state: &AppState,
    identity: &Identity,
    race_id: RaceId,
) -> Option<ServerMessage> {
    match state.leave_race(identity, &race_id).await {
        Ok(()) => Some(ServerMessage::RaceLeft { race_id }),
        Err(e) => Some(e.into()),
    }
}

pub async fn handle_start_race(
    state: &AppState,
    identity: &Identity,
    race_id: RaceId,
) -> Option<ServerMessage> {
    match state.start_race(identity, &race_id).await {
        Ok(()) => Some(ServerMessage::RaceStarting {
            race_id,
            countdown_ms: state.config.countdown.as_millis() as u64,
        }),
        Err(e) => Some(e.into()),
    }
}

pub async fn handle_report_progress(
    state: &AppState,
    identity: &Identity,
    race_id: RaceId,
    report: ProgressReport,
) -> Option<ServerMessage> {
    match state.report_progress(identity, &race_id, report).await {
        Ok(()) => Some(ServerMessage::ProgressAck),
        Err(e) => {
            tracing::debug!("Progress report for race {} rejected: {}", race_id, e);
            Some(e.into())
        }
    }
}
