use std::collections::HashMap;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::AppError;

use super::models::*;
use super::{
    AdvanceDatabase, AuditDatabase, MatchDatabase, SubmissionDatabase, TournamentDatabase,
};

#[derive(Debug, Default)]
struct Inner {
    tournaments: HashMap<i32, Tournament>,
    entrants: HashMap<i32, Vec<Entrant>>,
    matches: HashMap<String, Match>,
    submissions: Vec<Submission>,
    operations: HashMap<Uuid, AdvanceOperation>,
    overrides: Vec<OverrideAudit>,
    next_tournament_id: i32,
    next_submission_id: i64,
    next_override_id: i64,
}

/// An in-memory database with the same semantics as [`super::PgDatabase`].
///
/// A single mutex guards all state, which makes every trait method atomic the
/// way a single SQL transaction is.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    inner: Mutex<Inner>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sequence_of(match_id: &str) -> i32 {
    match_id
        .split('.')
        .nth(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

impl TournamentDatabase for MemoryDatabase {
    type Error = AppError;

    async fn create_tournament(
        &self,
        name: &str,
        require_evidence: bool,
        players: &[String],
    ) -> Result<(Tournament, Vec<Match>), Self::Error> {
        let mut inner = self.inner.lock().await;

        inner.next_tournament_id += 1;
        let tournament = Tournament {
            tournament_id: inner.next_tournament_id,
            name: name.to_string(),
            status: TournamentStatus::Started,
            current_round: Round::R16.number(),
            require_evidence,
            created_at: Utc::now(),
        };

        let entrants: Vec<Entrant> = players
            .iter()
            .enumerate()
            .map(|(i, player_id)| Entrant {
                tournament_id: tournament.tournament_id,
                player_id: player_id.clone(),
                seed: i as i32 + 1,
            })
            .collect();

        let matches = crate::advance::seed_round_of_16(tournament.tournament_id, &entrants);
        for m in &matches {
            inner.matches.insert(m.match_id.clone(), m.clone());
        }
        inner
            .entrants
            .insert(tournament.tournament_id, entrants);
        inner
            .tournaments
            .insert(tournament.tournament_id, tournament.clone());

        Ok((tournament, matches))
    }

    async fn get_tournament(&self, tournament_id: i32) -> Result<Option<Tournament>, Self::Error> {
        Ok(self.inner.lock().await.tournaments.get(&tournament_id).cloned())
    }

    async fn get_entrants(&self, tournament_id: i32) -> Result<Vec<Entrant>, Self::Error> {
        let mut entrants = self
            .inner
            .lock()
            .await
            .entrants
            .get(&tournament_id)
            .cloned()
            .unwrap_or_default();
        entrants.sort_by_key(|e| e.seed);
        Ok(entrants)
    }

    async fn set_tournament_status(
        &self,
        tournament_id: i32,
        status: TournamentStatus,
    ) -> Result<(), Self::Error> {
        let mut inner = self.inner.lock().await;
        let tournament = inner
            .tournaments
            .get_mut(&tournament_id)
            .ok_or_else(|| anyhow!("Tournament {} not found", tournament_id))?;
        tournament.status = status;
        Ok(())
    }
}

impl MatchDatabase for MemoryDatabase {
    type Error = AppError;

    async fn get_match(&self, match_id: &str) -> Result<Option<Match>, Self::Error> {
        Ok(self.inner.lock().await.matches.get(match_id).cloned())
    }

    async fn get_matches_by_round(
        &self,
        tournament_id: i32,
        round: Round,
    ) -> Result<Vec<Match>, Self::Error> {
        let inner = self.inner.lock().await;
        let mut matches: Vec<Match> = inner
            .matches
            .values()
            .filter(|m| m.tournament_id == tournament_id && m.round == round)
            .cloned()
            .collect();
        matches.sort_by_key(|m| sequence_of(&m.match_id));
        Ok(matches)
    }

    async fn get_matches_by_tournament(
        &self,
        tournament_id: i32,
    ) -> Result<Vec<Match>, Self::Error> {
        let inner = self.inner.lock().await;
        let mut matches: Vec<Match> = inner
            .matches
            .values()
            .filter(|m| m.tournament_id == tournament_id)
            .cloned()
            .collect();
        matches.sort_by_key(|m| (m.round.number(), sequence_of(&m.match_id)));
        Ok(matches)
    }
}

impl SubmissionDatabase for MemoryDatabase {
    type Error = AppError;

    async fn record_submission(
        &self,
        submission: &NewSubmission,
        transition: Option<MatchTransition>,
    ) -> Result<Submission, Self::Error> {
        let mut inner = self.inner.lock().await;

        if !inner.matches.contains_key(&submission.match_id) {
            return Err(anyhow!("Match {} not found", submission.match_id));
        }

        inner.next_submission_id += 1;
        let stored = Submission {
            id: inner.next_submission_id,
            match_id: submission.match_id.clone(),
            reporter_psn: submission.reporter_psn.clone(),
            score_home: submission.score_home,
            score_away: submission.score_away,
            evidence_path: submission.evidence_path.clone(),
            created_at: Utc::now(),
        };
        inner.submissions.push(stored.clone());

        if let Some(transition) = transition {
            let m = inner
                .matches
                .get_mut(&submission.match_id)
                .ok_or_else(|| anyhow!("Match {} not found", submission.match_id))?;
            match transition {
                MatchTransition::Confirmed {
                    home_score,
                    away_score,
                } => {
                    m.home_score = Some(home_score);
                    m.away_score = Some(away_score);
                    m.status = MatchStatus::Confirmed;
                }
                MatchTransition::Disputed => m.status = MatchStatus::Disputed,
            }
        }

        Ok(stored)
    }

    async fn get_submissions(&self, match_id: &str) -> Result<Vec<Submission>, Self::Error> {
        Ok(self
            .inner
            .lock()
            .await
            .submissions
            .iter()
            .filter(|s| s.match_id == match_id)
            .cloned()
            .collect())
    }

}

impl AdvanceDatabase for MemoryDatabase {
    type Error = AppError;

    async fn get_operation(
        &self,
        idempotency_key: Uuid,
    ) -> Result<Option<AdvanceOperation>, Self::Error> {
        Ok(self
            .inner
            .lock()
            .await
            .operations
            .get(&idempotency_key)
            .cloned())
    }

    async fn get_active_operation(
        &self,
        tournament_id: i32,
        round: Round,
    ) -> Result<Option<AdvanceOperation>, Self::Error> {
        Ok(self
            .inner
            .lock()
            .await
            .operations
            .values()
            .find(|op| {
                op.tournament_id == tournament_id
                    && op.round == round
                    && op.reverted_at.is_none()
            })
            .cloned())
    }

    async fn try_record_advance(
        &self,
        operation: &AdvanceOperation,
        matches: &[Match],
    ) -> Result<bool, Self::Error> {
        let mut inner = self.inner.lock().await;

        let claimed_by_other = inner.operations.values().any(|op| {
            op.tournament_id == operation.tournament_id
                && op.round == operation.round
                && op.reverted_at.is_none()
        });
        if claimed_by_other || inner.operations.contains_key(&operation.idempotency_key) {
            return Ok(false);
        }

        for m in matches {
            inner.matches.insert(m.match_id.clone(), m.clone());
        }
        inner
            .operations
            .insert(operation.idempotency_key, operation.clone());
        if let Some(next) = operation.round.next() {
            if let Some(t) = inner.tournaments.get_mut(&operation.tournament_id) {
                t.current_round = next.number();
            }
        }

        Ok(true)
    }

    async fn revert_advance(
        &self,
        idempotency_key: Uuid,
        reverted_at: DateTime<Utc>,
    ) -> Result<(), Self::Error> {
        let mut inner = self.inner.lock().await;

        let operation = inner
            .operations
            .get(&idempotency_key)
            .cloned()
            .ok_or_else(|| anyhow!("Advance operation {} not found", idempotency_key))?;

        for match_id in &operation.created_match_ids {
            inner.matches.remove(match_id);
        }
        if let Some(op) = inner.operations.get_mut(&idempotency_key) {
            op.reverted_at = Some(reverted_at);
        }
        if let Some(t) = inner.tournaments.get_mut(&operation.tournament_id) {
            t.current_round = operation.round.number();
        }

        Ok(())
    }
}

impl AuditDatabase for MemoryDatabase {
    type Error = AppError;

    async fn record_override(
        &self,
        audit: &NewOverrideAudit,
    ) -> Result<OverrideAudit, Self::Error> {
        let mut inner = self.inner.lock().await;

        inner.next_override_id += 1;
        let stored = OverrideAudit {
            id: inner.next_override_id,
            match_id: audit.match_id.clone(),
            actor: audit.actor.clone(),
            prev_status: audit.prev_status,
            prev_home_score: audit.prev_home_score,
            prev_away_score: audit.prev_away_score,
            home_score: audit.home_score,
            away_score: audit.away_score,
            created_at: Utc::now(),
        };

        let m = inner
            .matches
            .get_mut(&audit.match_id)
            .ok_or_else(|| anyhow!("Match {} not found", audit.match_id))?;
        m.home_score = Some(audit.home_score);
        m.away_score = Some(audit.away_score);
        m.status = MatchStatus::Confirmed;

        inner.overrides.push(stored.clone());
        Ok(stored)
    }

    async fn get_overrides(&self, match_id: &str) -> Result<Vec<OverrideAudit>, Self::Error> {
        Ok(self
            .inner
            .lock()
            .await
            .overrides
            .iter()
            .filter(|o| o.match_id == match_id)
            .cloned()
            .collect())
    }
}
