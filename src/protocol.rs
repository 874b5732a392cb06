use crate::types::*;
use serde::{Deserialize, Serialize};

/// Wire protocol version announced in `Welcome`
pub const PROTOCOL_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    CreateRace,
    JoinRace {
        race_id: RaceId,
    },
    LeaveRace {
        race_id: RaceId,
    },
    StartRace {
        race_id: RaceId,
    },
    ListWaitingRaces,
    GetActiveRace,
    GetRace {
        race_id: RaceId,
    },
    ReportProgress {
        race_id: RaceId,
        progress: f64,
        wpm: f64,
        accuracy: f64,
        is_finished: bool,
    },
    GetCurrentUser,
    /// Receive `race_update` pushes for one race (replaces any previous one)
    Subscribe {
        race_id: RaceId,
    },
    Unsubscribe,
    /// Receive the waiting list whenever it changes
    SubscribeLobby,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        protocol: String,
        user: Option<User>,
        server_now: String,
    },
    RaceCreated {
        race_id: RaceId,
    },
    RaceJoined {
        race_id: RaceId,
    },
    RaceLeft {
        race_id: RaceId,
    },
    RaceStarting {
        race_id: RaceId,
        countdown_ms: u64,
    },
    ProgressAck,
    WaitingRaces {
        races: Vec<Race>,
    },
    ActiveRace {
        race_id: Option<RaceId>,
    },
    Race {
        race: Option<RaceSnapshot>,
    },
    CurrentUser {
        user: Option<User>,
    },
    Subscribed {
        race_id: RaceId,
    },
    RaceUpdate {
        race: RaceSnapshot,
    },
    RaceDeleted {
        race_id: RaceId,
    },
    Error {
        code: String,
        msg: String,
    },
}

impl From<crate::error::RaceError> for ServerMessage {
    fn from(e: crate::error::RaceError) -> Self {
        ServerMessage::Error {
            code: e.code().to_string(),
            msg: e.to_string(),
        }
    }
}
