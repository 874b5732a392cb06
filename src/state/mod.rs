mod progress;
mod race;
mod user;

use crate::auth::AuthConfig;
use crate::broadcast::{RaceHub, RaceReceiver};
use crate::config::Config;
use crate::error::{RaceError, RaceResult};
use crate::protocol::ServerMessage;
use crate::types::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// All persisted records.
///
/// Every mutating operation runs against `&mut Database` while holding the
/// write lock in [`AppState`], which makes each one a serializable, atomic
/// transaction.
#[derive(Debug, Default)]
pub struct Database {
    pub users: HashMap<UserId, User>,
    /// Unique index: identity subject -> user id
    users_by_subject: HashMap<String, UserId>,
    pub races: HashMap<RaceId, Race>,
    /// Keyed by (race, user) so a pair can never have two rows
    pub progress: HashMap<(RaceId, UserId), RaceProgress>,
    next_seq: u64,
}

impl Database {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Progress rows of a race, keyed by user
    pub fn progress_for_race(&self, race_id: &RaceId) -> HashMap<UserId, RaceProgress> {
        self.progress
            .values()
            .filter(|p| &p.race_id == race_id)
            .map(|p| (p.user_id.clone(), p.clone()))
            .collect()
    }

    /// A race together with its progress rows
    pub fn snapshot(&self, race_id: &RaceId) -> Option<RaceSnapshot> {
        let race = self.races.get(race_id)?.clone();
        let progress = self.progress_for_race(race_id);
        Some(RaceSnapshot { race, progress })
    }

    /// Races matching `filter`, newest first
    fn races_newest_first(&self, filter: impl Fn(&Race) -> bool) -> Vec<&Race> {
        let mut races: Vec<&Race> = self.races.values().filter(|r| filter(r)).collect();
        races.sort_by(|a, b| b.created_seq.cmp(&a.created_seq));
        races
    }
}

/// What a committed mutation did to a race, used to notify subscribers
#[derive(Debug)]
enum Change {
    Updated(RaceSnapshot),
    Deleted(RaceId),
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<RwLock<Database>>,
    /// Pub/sub of race snapshots and the waiting list
    pub hub: RaceHub,
    pub config: Arc<Config>,
    pub auth: Arc<AuthConfig>,
}

impl AppState {
    pub fn new() -> Self {
        Self::with_config(Config::default(), AuthConfig::default())
    }

    pub fn with_config(config: Config, auth: AuthConfig) -> Self {
        Self {
            db: Arc::new(RwLock::new(Database::default())),
            hub: RaceHub::new(),
            config: Arc::new(config),
            auth: Arc::new(auth),
        }
    }

    /// Notify subscribers about a committed change.
    ///
    /// Must be called while the database write lock is still held, so that
    /// subscribers receive snapshots in commit order.
    fn publish(&self, change: Change) {
        match change {
            Change::Updated(snapshot) => {
                let race_id = snapshot.race.id.clone();
                let finished = snapshot.race.status == RaceStatus::Finished;
                let msg = ServerMessage::RaceUpdate { race: snapshot };
                if finished {
                    // Nothing is published for a finished race anymore
                    self.hub.close(&race_id, msg);
                } else {
                    self.hub.publish(&race_id, msg);
                }
            }
            Change::Deleted(race_id) => {
                let msg = ServerMessage::RaceDeleted {
                    race_id: race_id.clone(),
                };
                self.hub.close(&race_id, msg);
            }
        }
    }

    /// Publish whatever state a race is in after a commit
    pub(crate) fn publish_race(&self, db: &Database, race_id: &RaceId) {
        let change = match db.snapshot(race_id) {
            Some(snapshot) => Change::Updated(snapshot),
            None => Change::Deleted(race_id.clone()),
        };
        self.publish(change);
    }

    /// Push the current waiting list to lobby subscribers
    pub(crate) fn publish_lobby(&self, db: &Database) {
        if !self.hub.has_lobby_subscribers() {
            return;
        }
        self.hub.publish_lobby(ServerMessage::WaitingRaces {
            races: db.waiting_races(),
        });
    }

    /// Subscribe to a race and get its current snapshot.
    ///
    /// Both are taken under the database lock, so the receiver sees every
    /// commit after the snapshot and none before it. A finished race gets
    /// no receiver since nothing is published for it anymore.
    pub async fn subscribe_race(
        &self,
        race_id: &RaceId,
    ) -> RaceResult<(RaceSnapshot, Option<RaceReceiver>)> {
        let db = self.db.read().await;
        let snapshot = db.snapshot(race_id).ok_or(RaceError::NotFound)?;
        let rx = (snapshot.race.status != RaceStatus::Finished)
            .then(|| self.hub.subscribe(race_id));
        Ok((snapshot, rx))
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::Identity;
    use crate::typing::ProgressReport;

    pub fn identity(subject: &str, name: &str) -> Identity {
        Identity {
            subject: subject.to_string(),
            name: Some(name.to_string()),
        }
    }

    async fn subscribe(state: &AppState, race_id: &RaceId) -> RaceReceiver {
        let (_, rx) = state.subscribe_race(race_id).await.unwrap();
        rx.expect("Race should still publish updates")
    }

    async fn racing_race(state: &AppState, alice: &Identity, bob: &Identity) -> RaceId {
        let race_id = state.create_race(alice).await.unwrap();
        state.join_race(bob, &race_id).await.unwrap();
        state.start_race(alice, &race_id).await.unwrap();
        let version = state.get_race(&race_id).await.unwrap().race.status_version;
        assert!(state.advance_to_racing(&race_id, version).await);
        race_id
    }

    fn finished_report() -> ProgressReport {
        ProgressReport {
            progress: 100.0,
            wpm: 50.0,
            accuracy: 100.0,
            is_finished: true,
        }
    }

    #[tokio::test]
    async fn test_snapshot_includes_progress() {
        let state = AppState::new();
        let alice = identity("alice", "Alice");
        let race_id = state.create_race(&alice).await.unwrap();
        state.start_race(&alice, &race_id).await.unwrap();

        let db = state.db.read().await;
        let snapshot = db.snapshot(&race_id).unwrap();
        assert_eq!(snapshot.race.status, RaceStatus::Countdown);
        assert_eq!(snapshot.progress.len(), 1);
        assert!(db.snapshot(&"missing".to_string()).is_none());
    }

    #[tokio::test]
    async fn test_subscribe_race_returns_current_snapshot() {
        let state = AppState::new();
        let alice = identity("alice", "Alice");
        let race_id = state.create_race(&alice).await.unwrap();

        let (snapshot, rx) = state.subscribe_race(&race_id).await.unwrap();
        assert_eq!(snapshot.race.id, race_id);
        assert_eq!(snapshot.race.participants.len(), 1);
        assert!(rx.is_some());
        assert_eq!(state.hub.channel_count(), 1);

        drop(rx);
        assert_eq!(state.hub.channel_count(), 0);

        assert!(matches!(
            state.subscribe_race(&"missing".to_string()).await,
            Err(RaceError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_mutations_publish_snapshots() {
        let state = AppState::new();
        let alice = identity("alice", "Alice");
        let bob = identity("bob", "Bob");
        let race_id = state.create_race(&alice).await.unwrap();

        let mut rx = subscribe(&state, &race_id).await;
        state.join_race(&bob, &race_id).await.unwrap();

        match rx.recv().await.unwrap() {
            ServerMessage::RaceUpdate { race } => {
                assert_eq!(race.race.participants.len(), 2);
            }
            other => panic!("Expected RaceUpdate, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_deletion_notifies_subscribers() {
        let state = AppState::new();
        let alice = identity("alice", "Alice");
        let race_id = state.create_race(&alice).await.unwrap();

        let mut rx = subscribe(&state, &race_id).await;
        state.leave_race(&alice, &race_id).await.unwrap();

        match rx.recv().await.unwrap() {
            ServerMessage::RaceDeleted { race_id: id } => assert_eq!(id, race_id),
            other => panic!("Expected RaceDeleted, got {:?}", other),
        }
        assert_eq!(state.hub.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_finished_race_closes_channel() {
        let state = AppState::new();
        let alice = identity("alice", "Alice");
        let bob = identity("bob", "Bob");
        let race_id = racing_race(&state, &alice, &bob).await;

        let mut rx = subscribe(&state, &race_id).await;
        state
            .report_progress(&alice, &race_id, finished_report())
            .await
            .unwrap();
        state
            .report_progress(&bob, &race_id, finished_report())
            .await
            .unwrap();

        assert_eq!(state.hub.channel_count(), 0);
        let mut last_status = None;
        while let Ok(ServerMessage::RaceUpdate { race }) = rx.recv().await {
            last_status = Some(race.race.status);
        }
        assert_eq!(last_status, Some(RaceStatus::Finished));

        // Finished races hand out the snapshot but no channel
        let (snapshot, rx) = state.subscribe_race(&race_id).await.unwrap();
        assert_eq!(snapshot.race.status, RaceStatus::Finished);
        assert!(rx.is_none());
        assert_eq!(state.hub.channel_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_commits_publish_in_order() {
        let state = AppState::new();
        let alice = identity("alice", "Alice");
        let bob = identity("bob", "Bob");
        let race_id = racing_race(&state, &alice, &bob).await;
        let mut rx = subscribe(&state, &race_id).await;

        let mut handles = Vec::new();
        for racer in [alice, bob] {
            let state = state.clone();
            let race_id = race_id.clone();
            handles.push(tokio::spawn(async move {
                for step in 1..=20 {
                    let report = ProgressReport {
                        progress: step as f64 * 5.0,
                        wpm: 40.0,
                        accuracy: 100.0,
                        is_finished: step == 20,
                    };
                    state.report_progress(&racer, &race_id, report).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Every commit only raises one row, so the total never drops when
        // snapshots arrive in commit order
        let mut last_total = 0.0;
        let mut last_status = RaceStatus::Racing;
        let mut received = 0;
        while let Ok(msg) = rx.try_recv() {
            if let ServerMessage::RaceUpdate { race } = msg {
                let total: f64 = race.progress.values().map(|p| p.progress).sum();
                assert!(
                    total >= last_total,
                    "snapshot went back from {} to {}",
                    last_total,
                    total
                );
                last_total = total;
                last_status = race.race.status;
                received += 1;
            }
        }
        assert_eq!(received, 40);
        assert_eq!(last_total, 200.0);
        assert_eq!(last_status, RaceStatus::Finished);
    }

    #[tokio::test]
    async fn test_lobby_receives_waiting_list() {
        let state = AppState::new();
        let mut lobby = state.hub.subscribe_lobby();
        let alice = identity("alice", "Alice");
        let race_id = state.create_race(&alice).await.unwrap();

        match lobby.recv().await.unwrap() {
            ServerMessage::WaitingRaces { races } => {
                assert_eq!(races.len(), 1);
                assert_eq!(races[0].id, race_id);
            }
            other => panic!("Expected WaitingRaces, got {:?}", other),
        }
    }
}
