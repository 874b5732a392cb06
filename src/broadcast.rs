use crate::protocol::ServerMessage;
use crate::state::AppState;
use crate::types::RaceId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

const RACE_CHANNEL_CAPACITY: usize = 64;
const LOBBY_CHANNEL_CAPACITY: usize = 32;

type Channels = Arc<Mutex<HashMap<RaceId, broadcast::Sender<ServerMessage>>>>;

pub type LobbyReceiver = broadcast::Receiver<ServerMessage>;

/// Subscription to one race's channel.
///
/// Dropping the last receiver of a race removes its channel from the hub.
pub struct RaceReceiver {
    race_id: RaceId,
    rx: Option<broadcast::Receiver<ServerMessage>>,
    channels: Channels,
}

impl RaceReceiver {
    pub fn race_id(&self) -> &RaceId {
        &self.race_id
    }

    pub async fn recv(&mut self) -> Result<ServerMessage, RecvError> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => Err(RecvError::Closed),
        }
    }

    pub fn try_recv(&mut self) -> Result<ServerMessage, TryRecvError> {
        match self.rx.as_mut() {
            Some(rx) => rx.try_recv(),
            None => Err(TryRecvError::Closed),
        }
    }
}

impl Drop for RaceReceiver {
    fn drop(&mut self) {
        // Drop the receiver under the map lock so two subscribers leaving at
        // once can't both see the other one still counted
        let mut channels = self.channels.lock();
        drop(self.rx.take());
        if channels
            .get(&self.race_id)
            .is_some_and(|tx| tx.receiver_count() == 0)
        {
            channels.remove(&self.race_id);
        }
    }
}

/// Publish/subscribe hub for race snapshots.
///
/// Each race gets its own broadcast channel, created on first subscription
/// and dropped once the race is deleted or finished, or its last receiver
/// goes away. The lobby channel carries the waiting-race list.
///
/// Every method is synchronous so publishers can send while still holding
/// the database write lock, which keeps snapshots in commit order.
#[derive(Clone)]
pub struct RaceHub {
    races: Channels,
    lobby: broadcast::Sender<ServerMessage>,
}

impl RaceHub {
    pub fn new() -> Self {
        let (lobby, _rx) = broadcast::channel(LOBBY_CHANNEL_CAPACITY);
        Self {
            races: Arc::new(Mutex::new(HashMap::new())),
            lobby,
        }
    }

    /// Subscribe to every committed change of a race.
    ///
    /// Only reachable through `AppState::subscribe_race`, which checks that
    /// the race exists under the database lock.
    pub(crate) fn subscribe(&self, race_id: &RaceId) -> RaceReceiver {
        let rx = self
            .races
            .lock()
            .entry(race_id.clone())
            .or_insert_with(|| broadcast::channel(RACE_CHANNEL_CAPACITY).0)
            .subscribe();
        RaceReceiver {
            race_id: race_id.clone(),
            rx: Some(rx),
            channels: Arc::clone(&self.races),
        }
    }

    pub fn subscribe_lobby(&self) -> LobbyReceiver {
        self.lobby.subscribe()
    }

    pub fn has_lobby_subscribers(&self) -> bool {
        self.lobby.receiver_count() > 0
    }

    /// Send a message to subscribers of a race
    pub fn publish(&self, race_id: &RaceId, msg: ServerMessage) {
        let mut races = self.races.lock();
        if let Some(tx) = races.get(race_id) {
            if tx.send(msg).is_err() {
                races.remove(race_id);
            }
        }
    }

    /// Send a last message to subscribers of a race and drop its channel.
    ///
    /// Receivers get `last` and then see the channel closed.
    pub fn close(&self, race_id: &RaceId, last: ServerMessage) {
        if let Some(tx) = self.races.lock().remove(race_id) {
            // Ignore send errors (no receivers connected is fine)
            let _ = tx.send(last);
        }
    }

    pub fn publish_lobby(&self, msg: ServerMessage) {
        let _ = self.lobby.send(msg);
    }

    /// Number of races that currently have a channel
    pub fn channel_count(&self) -> usize {
        self.races.lock().len()
    }
}

impl Default for RaceHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the deferred countdown -> racing transition.
///
/// There is no cancellation handle: the transition only applies if the race
/// still carries `status_version` when the timer fires.
pub fn spawn_countdown_timer(
    state: AppState,
    race_id: RaceId,
    status_version: u64,
    delay: Duration,
) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let applied = state.advance_to_racing(&race_id, status_version).await;
        if !applied {
            tracing::debug!(
                "Countdown for race {} expired on a stale race, ignoring",
                race_id
            );
        }
    });
}
