use super::AppState;
use crate::auth::Identity;
use crate::error::{RaceError, RaceResult};
use crate::typing::ProgressReport;
use crate::types::*;

/// Reject reports that could never come from a real typing session
fn validate_report(report: &ProgressReport) -> RaceResult<()> {
    let numbers = [report.progress, report.wpm, report.accuracy];
    if numbers.iter().any(|n| !n.is_finite() || *n < 0.0) {
        return Err(RaceError::InvalidArgument(
            "values must be finite and non-negative".to_string(),
        ));
    }
    if report.progress > 100.0 {
        return Err(RaceError::InvalidArgument(
            "progress must be between 0 and 100".to_string(),
        ));
    }
    if report.accuracy > 100.0 {
        return Err(RaceError::InvalidArgument(
            "accuracy must be between 0 and 100".to_string(),
        ));
    }
    Ok(())
}

impl AppState {
    /// Store the caller's progress in a racing race.
    ///
    /// The row is created if the caller has none yet. A finished report
    /// re-checks the stored rows and may finish the race.
    pub async fn report_progress(
        &self,
        identity: &Identity,
        race_id: &RaceId,
        report: ProgressReport,
    ) -> RaceResult<()> {
        validate_report(&report)?;

        let mut db = self.db.write().await;
        let race = db.races.get(race_id).ok_or(RaceError::NotFound)?;
        if race.status != RaceStatus::Racing {
            return Err(RaceError::InvalidState("Race not in progress".to_string()));
        }

        let user = db.get_or_create_user(identity);
        let key = (race_id.clone(), user.id.clone());
        let row = db
            .progress
            .entry(key)
            .or_insert_with(|| RaceProgress::zeroed(race_id, &user.id));
        row.progress = report.progress;
        row.wpm = report.wpm;
        row.accuracy = report.accuracy;
        row.is_finished = report.is_finished;

        tracing::debug!(
            "Progress in race {} from {}: {:.1}% at {} wpm",
            race_id,
            user.id,
            report.progress,
            report.wpm
        );

        if report.is_finished {
            tracing::info!("User {} finished race {}", user.id, race_id);
            db.finish_if_complete(race_id)?;
        }

        self.publish_race(&db, race_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::identity;

    fn report(progress: f64, is_finished: bool) -> ProgressReport {
        ProgressReport {
            progress,
            wpm: 42.0,
            accuracy: 100.0,
            is_finished,
        }
    }

    async fn racing_race(state: &AppState, racers: &[&Identity]) -> RaceId {
        let race_id = state.create_race(racers[0]).await.unwrap();
        for racer in &racers[1..] {
            state.join_race(racer, &race_id).await.unwrap();
        }
        state.start_race(racers[0], &race_id).await.unwrap();
        let version = state.get_race(&race_id).await.unwrap().race.status_version;
        assert!(state.advance_to_racing(&race_id, version).await);
        race_id
    }

    async fn status(state: &AppState, race_id: &RaceId) -> RaceStatus {
        state.get_race(race_id).await.unwrap().race.status
    }

    #[tokio::test]
    async fn test_report_updates_row() {
        let state = AppState::new();
        let alice = identity("alice", "Alice");
        let race_id = racing_race(&state, &[&alice]).await;

        state
            .report_progress(&alice, &race_id, report(37.5, false))
            .await
            .unwrap();

        let snapshot = state.get_race(&race_id).await.unwrap();
        let user = state.get_or_create_user(&alice).await;
        let row = &snapshot.progress[&user.id];
        assert_eq!(row.progress, 37.5);
        assert_eq!(row.wpm, 42.0);
        assert!(!row.is_finished);
        assert_eq!(snapshot.race.status, RaceStatus::Racing);
    }

    #[tokio::test]
    async fn test_two_player_finish() {
        let state = AppState::new();
        let alice = identity("alice", "Alice");
        let bob = identity("bob", "Bob");
        let race_id = racing_race(&state, &[&alice, &bob]).await;

        state
            .report_progress(&bob, &race_id, report(100.0, true))
            .await
            .unwrap();
        assert_eq!(status(&state, &race_id).await, RaceStatus::Racing);

        state
            .report_progress(&alice, &race_id, report(100.0, true))
            .await
            .unwrap();
        assert_eq!(status(&state, &race_id).await, RaceStatus::Finished);
    }

    #[tokio::test]
    async fn test_departed_racer_does_not_block_finish() {
        let state = AppState::new();
        let alice = identity("alice", "Alice");
        let bob = identity("bob", "Bob");
        let race_id = racing_race(&state, &[&alice, &bob]).await;

        state.leave_race(&bob, &race_id).await.unwrap();
        state
            .report_progress(&alice, &race_id, report(100.0, true))
            .await
            .unwrap();

        let snapshot = state.get_race(&race_id).await.unwrap();
        assert_eq!(snapshot.race.status, RaceStatus::Finished);
        // Bob's unfinished row is still there
        assert_eq!(snapshot.progress.len(), 2);
    }

    #[tokio::test]
    async fn test_last_unfinished_racer_leaving_finishes_race() {
        let state = AppState::new();
        let alice = identity("alice", "Alice");
        let bob = identity("bob", "Bob");
        let race_id = racing_race(&state, &[&alice, &bob]).await;

        state
            .report_progress(&alice, &race_id, report(100.0, true))
            .await
            .unwrap();
        assert_eq!(status(&state, &race_id).await, RaceStatus::Racing);

        state.leave_race(&bob, &race_id).await.unwrap();
        assert_eq!(status(&state, &race_id).await, RaceStatus::Finished);
    }

    #[tokio::test]
    async fn test_missing_row_is_created() {
        let state = AppState::new();
        let alice = identity("alice", "Alice");
        let race_id = racing_race(&state, &[&alice]).await;

        let user = state.get_or_create_user(&alice).await;
        state
            .db
            .write()
            .await
            .progress
            .remove(&(race_id.clone(), user.id.clone()));

        state
            .report_progress(&alice, &race_id, report(10.0, false))
            .await
            .unwrap();
        let snapshot = state.get_race(&race_id).await.unwrap();
        assert_eq!(snapshot.progress[&user.id].progress, 10.0);
    }

    #[tokio::test]
    async fn test_unfinished_report_never_finishes() {
        let state = AppState::new();
        let alice = identity("alice", "Alice");
        let race_id = racing_race(&state, &[&alice]).await;

        state
            .report_progress(&alice, &race_id, report(100.0, false))
            .await
            .unwrap();
        assert_eq!(status(&state, &race_id).await, RaceStatus::Racing);
    }

    #[tokio::test]
    async fn test_report_errors() {
        let state = AppState::new();
        let alice = identity("alice", "Alice");

        assert_eq!(
            state
                .report_progress(&alice, &"nope".to_string(), report(5.0, false))
                .await,
            Err(RaceError::NotFound)
        );

        let race_id = state.create_race(&alice).await.unwrap();
        assert!(matches!(
            state
                .report_progress(&alice, &race_id, report(5.0, false))
                .await,
            Err(RaceError::InvalidState(_))
        ));

        // Countdown is not racing either
        state.start_race(&alice, &race_id).await.unwrap();
        assert!(matches!(
            state
                .report_progress(&alice, &race_id, report(5.0, false))
                .await,
            Err(RaceError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_report_rejected_after_finish() {
        let state = AppState::new();
        let alice = identity("alice", "Alice");
        let race_id = racing_race(&state, &[&alice]).await;
        state
            .report_progress(&alice, &race_id, report(100.0, true))
            .await
            .unwrap();

        assert!(matches!(
            state
                .report_progress(&alice, &race_id, report(50.0, false))
                .await,
            Err(RaceError::InvalidState(_))
        ));
    }

    #[test]
    fn test_validate_report() {
        assert!(validate_report(&report(0.0, false)).is_ok());
        assert!(validate_report(&report(100.0, true)).is_ok());

        for bad in [
            report(100.5, false),
            report(-1.0, false),
            report(f64::NAN, false),
            ProgressReport {
                accuracy: 120.0,
                ..report(10.0, false)
            },
            ProgressReport {
                wpm: f64::INFINITY,
                ..report(10.0, false)
            },
        ] {
            assert!(matches!(
                validate_report(&bad),
                Err(RaceError::InvalidArgument(_))
            ));
        }
    }
}
