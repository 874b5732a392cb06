use super::{AppState, Database};
use crate::auth::Identity;
use crate::broadcast::spawn_countdown_timer;
use crate::error::{RaceError, RaceResult};
use crate::types::*;

impl Race {
    /// Move to a new status, bumping the status generation
    fn transition_to(&mut self, to: RaceStatus) -> RaceResult<()> {
        if !self.status.can_transition_to(to) {
            return Err(RaceError::InvalidState(format!(
                "Invalid race transition from {:?} to {:?}",
                self.status, to
            )));
        }
        tracing::info!("Race {}: {:?} -> {:?}", self.id, self.status, to);
        self.status = to;
        self.status_version += 1;
        Ok(())
    }
}

impl Database {
    fn race_mut(&mut self, race_id: &RaceId) -> RaceResult<&mut Race> {
        self.races.get_mut(race_id).ok_or(RaceError::NotFound)
    }

    /// Remove a race together with its progress rows
    fn delete_race(&mut self, race_id: &RaceId) {
        self.races.remove(race_id);
        self.progress.retain(|(rid, _), _| rid != race_id);
        tracing::info!("Deleted race {}", race_id);
    }

    /// Whether every current participant has a finished progress row.
    ///
    /// Rows of users who already left are ignored so they can't hold the
    /// race open.
    pub(crate) fn all_participants_finished(&self, race: &Race) -> bool {
        let finished_rows = race
            .participants
            .iter()
            .filter_map(|p| self.progress.get(&(race.id.clone(), p.user_id.clone())))
            .filter(|row| row.is_finished)
            .count();
        !race.participants.is_empty() && finished_rows == race.participants.len()
    }

    /// Up to 10 newest waiting races, newest first
    pub fn waiting_races(&self) -> Vec<Race> {
        self.races_newest_first(|r| r.status == RaceStatus::Waiting)
            .into_iter()
            .take(WAITING_RACES_LIMIT)
            .cloned()
            .collect()
    }

    /// Finish a racing race if all participants are done. Returns true if it
    /// transitioned.
    pub(crate) fn finish_if_complete(&mut self, race_id: &RaceId) -> RaceResult<bool> {
        let race = self.races.get(race_id).ok_or(RaceError::NotFound)?;
        if race.status != RaceStatus::Racing || !self.all_participants_finished(race) {
            return Ok(false);
        }
        self.race_mut(race_id)?.transition_to(RaceStatus::Finished)?;
        Ok(true)
    }
}

impl AppState {
    /// Create a race in `waiting` with the caller as sole participant
    pub async fn create_race(&self, identity: &Identity) -> RaceResult<RaceId> {
        let mut db = self.db.write().await;
        let user = db.get_or_create_user(identity);
        let created_seq = db.next_seq();

        let race = Race {
            id: ulid::Ulid::new().to_string(),
            status: RaceStatus::Waiting,
            participants: vec![Participant {
                user_id: user.id.clone(),
                name: user.name.clone(),
            }],
            start_time: None,
            text: crate::passages::random_passage().to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            created_seq,
            status_version: 0,
        };

        tracing::info!("User {} created race {}", user.id, race.id);
        let race_id = race.id.clone();
        db.races.insert(race_id.clone(), race);

        self.publish_race(&db, &race_id);
        self.publish_lobby(&db);
        Ok(race_id)
    }

    /// Join a waiting race. Joining twice is a no-op.
    pub async fn join_race(&self, identity: &Identity, race_id: &RaceId) -> RaceResult<RaceId> {
        let mut db = self.db.write().await;
        let race = db.races.get(race_id).ok_or(RaceError::NotFound)?;
        if race.status != RaceStatus::Waiting {
            return Err(RaceError::InvalidState("Race already started".to_string()));
        }

        let user = db.get_or_create_user(identity);
        let race = db.race_mut(race_id)?;
        if race.has_participant(&user.id) {
            return Ok(race_id.clone());
        }

        race.participants.push(Participant {
            user_id: user.id.clone(),
            name: user.name.clone(),
        });
        tracing::info!(
            "User {} joined race {} ({} participants)",
            user.id,
            race_id,
            race.participants.len()
        );

        self.publish_race(&db, race_id);
        self.publish_lobby(&db);
        Ok(race_id.clone())
    }

    /// Leave a race in any status.
    ///
    /// An emptied race is deleted if it never started racing and finished
    /// otherwise. Progress rows are kept.
    pub async fn leave_race(&self, identity: &Identity, race_id: &RaceId) -> RaceResult<()> {
        let mut db = self.db.write().await;
        if !db.races.contains_key(race_id) {
            return Err(RaceError::NotFound);
        }
        let user = db.get_or_create_user(identity);
        let race = db.race_mut(race_id)?;

        race.participants.retain(|p| p.user_id != user.id);
        let status = race.status;
        let remaining = race.participants.len();
        tracing::info!("User {} left race {}", user.id, race_id);

        if remaining == 0 {
            match status {
                RaceStatus::Waiting | RaceStatus::Countdown => db.delete_race(race_id),
                RaceStatus::Racing => {
                    db.race_mut(race_id)?.transition_to(RaceStatus::Finished)?;
                }
                RaceStatus::Finished => {}
            }
        } else if status == RaceStatus::Racing {
            // The leaver may have been the last one still typing
            db.finish_if_complete(race_id)?;
        }

        self.publish_race(&db, race_id);
        self.publish_lobby(&db);
        Ok(())
    }

    /// Start the countdown of a waiting race.
    ///
    /// Creates a zeroed progress row per participant and schedules the
    /// transition to `racing`. Any participant may start.
    pub async fn start_race(&self, identity: &Identity, race_id: &RaceId) -> RaceResult<()> {
        let mut db = self.db.write().await;
        let race = db.races.get(race_id).ok_or(RaceError::NotFound)?;
        if race.status != RaceStatus::Waiting {
            return Err(RaceError::InvalidState("Race already started".to_string()));
        }
        // Participants always have a user row, so no need to create one
        let is_participant = db
            .user_by_subject(&identity.subject)
            .is_some_and(|user| race.has_participant(&user.id));
        if !is_participant {
            return Err(RaceError::Forbidden("Not a participant".to_string()));
        }

        let race = db.race_mut(race_id)?;
        race.transition_to(RaceStatus::Countdown)?;
        let status_version = race.status_version;
        let participants = race.participants.clone();

        for participant in &participants {
            db.progress
                .entry((race_id.clone(), participant.user_id.clone()))
                .or_insert_with(|| RaceProgress::zeroed(race_id, &participant.user_id));
        }

        spawn_countdown_timer(
            self.clone(),
            race_id.clone(),
            status_version,
            self.config.countdown,
        );

        self.publish_race(&db, race_id);
        self.publish_lobby(&db);
        Ok(())
    }

    /// Deferred countdown -> racing transition.
    ///
    /// Silently does nothing unless the race still exists, is in countdown
    /// and carries the status generation captured when it was scheduled.
    /// Returns true if the race went live.
    pub async fn advance_to_racing(&self, race_id: &RaceId, status_version: u64) -> bool {
        let mut db = self.db.write().await;
        let Some(race) = db.races.get_mut(race_id) else {
            return false;
        };
        if race.status != RaceStatus::Countdown || race.status_version != status_version {
            return false;
        }
        if race.transition_to(RaceStatus::Racing).is_err() {
            return false;
        }
        race.start_time = Some(chrono::Utc::now().timestamp_millis());

        self.publish_race(&db, race_id);
        true
    }

    /// Up to 10 newest waiting races, newest first
    pub async fn list_waiting_races(&self) -> Vec<Race> {
        self.db.read().await.waiting_races()
    }

    /// The newest unfinished race the caller participates in
    pub async fn get_active_race_for_user(&self, identity: Option<&Identity>) -> Option<RaceId> {
        let identity = identity?;
        let db = self.db.read().await;
        let user = db.user_by_subject(&identity.subject)?;

        db.races_newest_first(|r| r.status.is_active())
            .into_iter()
            .take(ACTIVE_RACE_SCAN_LIMIT)
            .find(|r| r.has_participant(&user.id))
            .map(|r| r.id.clone())
    }

    /// A race plus its progress rows keyed by user id
    pub async fn get_race(&self, race_id: &RaceId) -> Option<RaceSnapshot> {
        self.db.read().await.snapshot(race_id)
    }
}
