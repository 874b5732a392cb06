use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque ID types for type safety
pub type UserId = String;
pub type RaceId = String;

/// Default display name for identities that carry none
pub const ANONYMOUS_NAME: &str = "Anonymous";

/// Maximum number of races returned by the waiting list
pub const WAITING_RACES_LIMIT: usize = 10;

/// How many of the newest unfinished races are scanned for a user's active race
pub const ACTIVE_RACE_SCAN_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RaceStatus {
    Waiting,
    Countdown,
    Racing,
    Finished,
}

impl RaceStatus {
    /// Check if a status transition is valid
    pub fn can_transition_to(&self, to: RaceStatus) -> bool {
        use RaceStatus::*;

        matches!(
            (self, to),
            (Waiting, Countdown) | (Countdown, Racing) | (Racing, Finished)
        )
    }

    /// Whether the race still counts as "active" for its participants
    pub fn is_active(&self) -> bool {
        !matches!(self, RaceStatus::Finished)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: UserId,
    /// Subject id issued by the identity provider (unique)
    pub subject: String,
    pub name: String,
}

/// Denormalized participant entry, snapshotted at join time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Participant {
    pub user_id: UserId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Race {
    pub id: RaceId,
    pub status: RaceStatus,
    pub participants: Vec<Participant>,
    /// Epoch milliseconds, set when the race enters `racing`
    pub start_time: Option<i64>,
    /// Reference text every participant types
    pub text: String,
    pub created_at: String,
    /// Monotonic creation order, newest has the highest value
    #[serde(skip)]
    pub created_seq: u64,
    /// Incremented on every status change; guards deferred transitions
    pub status_version: u64,
}

impl Race {
    pub fn has_participant(&self, user_id: &UserId) -> bool {
        self.participants.iter().any(|p| &p.user_id == user_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RaceProgress {
    pub race_id: RaceId,
    pub user_id: UserId,
    /// Percent complete, 0-100
    pub progress: f64,
    pub wpm: f64,
    pub accuracy: f64,
    pub is_finished: bool,
}

impl RaceProgress {
    /// Zeroed row created for every participant when a race starts
    pub fn zeroed(race_id: &RaceId, user_id: &UserId) -> Self {
        Self {
            race_id: race_id.clone(),
            user_id: user_id.clone(),
            progress: 0.0,
            wpm: 0.0,
            accuracy: 100.0,
            is_finished: false,
        }
    }
}

/// A race together with the progress rows of its users
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceSnapshot {
    #[serde(flatten)]
    pub race: Race,
    pub progress: HashMap<UserId, RaceProgress>,
}
