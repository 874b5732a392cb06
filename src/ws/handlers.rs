//! WebSocket message dispatch
//!
//! Authentication is checked here, then dispatched to the race handlers.
//! Subscription messages only touch connection state and are handled by the
//! socket loop before they reach this module.

use crate::auth::Identity;
use crate::error::RaceError;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
use crate::typing::ProgressReport;

use super::race;

/// Macro to require an authenticated caller and return early otherwise
macro_rules! require_identity {
    ($identity:expr) => {
        match $identity {
            Some(identity) => identity,
            None => return Some(RaceError::Unauthenticated.into()),
        }
    };
}

/// Handle client messages and return optional response
pub async fn handle_message(
    msg: ClientMessage,
    identity: Option<&Identity>,
    state: &AppState,
) -> Option<ServerMessage> {
    match msg {
        // Queries, open to anonymous callers
        ClientMessage::ListWaitingRaces => Some(ServerMessage::WaitingRaces {
            races: state.list_waiting_races().await,
        }),

        ClientMessage::GetActiveRace => Some(ServerMessage::ActiveRace {
            race_id: state.get_active_race_for_user(identity).await,
        }),

        ClientMessage::GetRace { race_id } => Some(ServerMessage::Race {
            race: state.get_race(&race_id).await,
        }),

        ClientMessage::GetCurrentUser => Some(ServerMessage::CurrentUser {
            user: state.get_current_user(identity).await,
        }),

        // Mutations (identity checked before dispatch)
        ClientMessage::CreateRace => {
            let identity = require_identity!(identity);
            race::handle_create_race(state, identity).await
        }

        ClientMessage::JoinRace { race_id } => {
            let identity = require_identity!(identity);
            race::handle_join_race(state, identity, race_id).await
        }

        ClientMessage::LeaveRace { race_id } => {
            let identity = require_identity!(identity);
            race::handle_leave_race(state, identity, race_id).await
        }

        ClientMessage::StartRace { race_id } => {
            let identity = require_identity!(identity);
            race::handle_start_race(state, identity, race_id).await
        }

        ClientMessage::ReportProgress {
            race_id,
            progress,
            wpm,
            accuracy,
            is_finished,
        } => {
            let identity = require_identity!(identity);
            let report = ProgressReport {
                progress,
                wpm,
                accuracy,
                is_finished,
            };
            race::handle_report_progress(state, identity, race_id, report).await
        }

        ClientMessage::Subscribe { .. }
        | ClientMessage::Unsubscribe
        | ClientMessage::SubscribeLobby => {
            tracing::debug!("Subscription message outside a socket, ignoring");
            None
        }
    }
}
