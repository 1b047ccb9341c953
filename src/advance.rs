use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use chrono::{Duration, Utc};
use serde::Serialize;
use strum::Display;
use tracing::info;
use uuid::Uuid;

use crate::error::Error;
use crate::events::{DomainEvent, EventBus};
use crate::store::models::{AdvanceOperation, Entrant, Match, MatchStatus, Principal, Round, Tournament};
use crate::store::Database;

/// How long an advancement can be undone. The window exists to correct an
/// immediate admin mis-click, not to rewrite history.
pub const REVERT_WINDOW_SECS: i64 = 30;

/// A full bracket holds exactly this many entrants.
pub const BRACKET_SIZE: usize = 16;

/// Where a round sits in its lifecycle. Derived from stored state, never
/// cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundState {
    NotStarted,
    MatchesActive,
    ReadyToAdvance,
    Advanced,
}

/// One next-round pairing produced by preview or confirm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pairing {
    pub home_id: String,
    pub away_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmOutcome {
    pub match_ids: Vec<String>,
    pub operation_id: Uuid,
    /// True when an earlier call with the same idempotency key already did the
    /// work.
    #[serde(skip)]
    pub replayed: bool,
}

/// Orders players by seed ascending and pairs position `i` with `n - 1 - i`,
/// so the top seed meets the bottom seed first. Pure: same input, same
/// pairing, always.
pub fn pair_by_seed(seeded: &[(String, i32)]) -> Vec<Pairing> {
    let mut ordered = seeded.to_vec();
    ordered.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

    let n = ordered.len();
    (0..n / 2)
        .map(|i| Pairing {
            home_id: ordered[i].0.clone(),
            away_id: ordered[n - 1 - i].0.clone(),
        })
        .collect()
}

/// Bulk-generates the round-of-16 matches for a freshly created tournament.
pub fn seed_round_of_16(tournament_id: i32, entrants: &[Entrant]) -> Vec<Match> {
    let seeded: Vec<(String, i32)> = entrants
        .iter()
        .map(|e| (e.player_id.clone(), e.seed))
        .collect();

    pair_by_seed(&seeded)
        .into_iter()
        .enumerate()
        .map(|(i, p)| {
            Match::new(
                tournament_id,
                Round::R16,
                i as i32 + 1,
                Some(p.home_id),
                Some(p.away_id),
            )
        })
        .collect()
}

/// Creates a tournament with its 16 seeded entrants and the generated
/// round-of-16 bracket.
pub async fn create_tournament<DB: Database>(
    db: &DB,
    name: &str,
    players: &[String],
    require_evidence: bool,
    principal: &Principal,
) -> Result<(Tournament, Vec<Match>), Error> {
    if !principal.is_admin() {
        return Err(Error::Forbidden);
    }
    if players.len() != BRACKET_SIZE {
        return Err(Error::InvalidEntrantCount(players.len()));
    }
    let mut seen = HashSet::new();
    for player in players {
        if !seen.insert(player.as_str()) {
            return Err(Error::DuplicateEntrant(player.clone()));
        }
    }

    let (tournament, matches) = db.create_tournament(name, require_evidence, players).await?;
    info!(
        "Created tournament {} ({}) with {} round-of-16 matches",
        tournament.tournament_id,
        tournament.name,
        matches.len()
    );
    Ok((tournament, matches))
}

/// The state machine governing round-to-round progression.
///
/// Confirm and revert for the same `(tournament, round)` are mutually
/// exclusive through a per-round lock; the storage claim row backstops the
/// lock across processes. Operations on different rounds never block each
/// other.
#[derive(Debug, Default)]
pub struct Advancer {
    locks: Mutex<HashMap<(i32, Round), Arc<tokio::sync::Mutex<()>>>>,
}

impl Advancer {
    pub fn new() -> Self {
        Self::default()
    }

    fn round_lock(&self, tournament_id: i32, round: Round) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("round lock registry poisoned");
        locks
            .entry((tournament_id, round))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Dry run: validates the winner set and returns the deterministic
    /// next-round pairing without persisting anything.
    ///
    /// Seeds default to the stored entrant seeds; `seed_override` supports
    /// what-if previews and must parallel `winners`.
    pub async fn preview<DB: Database>(
        &self,
        db: &DB,
        tournament_id: i32,
        round: Round,
        winners: &[String],
        seed_override: Option<&[i32]>,
    ) -> Result<Vec<Pairing>, Error> {
        let round_matches = db.get_matches_by_round(tournament_id, round).await?;
        validate_winners(&round_matches, winners)?;

        let seeded = self
            .seeded_winners(db, tournament_id, winners, seed_override)
            .await?;
        Ok(pair_by_seed(&seeded))
    }

    /// Commits an advancement: creates the next round's matches with fresh
    /// tokens and pins, records the operation, and bumps the tournament's
    /// current round, atomically.
    ///
    /// Replaying the same idempotency key returns the original match ids
    /// without creating rows. A different key while a live operation exists
    /// fails with `DuplicateOperation`.
    pub async fn confirm<DB: Database>(
        &self,
        db: &DB,
        events: &EventBus,
        tournament_id: i32,
        round: Round,
        winners: &[String],
        idempotency_key: Uuid,
    ) -> Result<ConfirmOutcome, Error> {
        let lock = self.round_lock(tournament_id, round);
        let _guard = lock.lock().await;

        if let Some(op) = db.get_operation(idempotency_key).await? {
            // A reverted operation's key is spent; the intent it named was
            // undone and a retry must carry a fresh key.
            if op.tournament_id != tournament_id || op.round != round || op.reverted_at.is_some() {
                return Err(Error::DuplicateOperation);
            }
            return Ok(ConfirmOutcome {
                match_ids: op.created_match_ids,
                operation_id: op.operation_id,
                replayed: true,
            });
        }

        if db
            .get_active_operation(tournament_id, round)
            .await?
            .is_some()
        {
            return Err(Error::DuplicateOperation);
        }

        let round_matches = db.get_matches_by_round(tournament_id, round).await?;
        validate_winners(&round_matches, winners)?;

        let next_round = round
            .next()
            .ok_or_else(|| Error::Internal(anyhow!("no round follows the final")))?;
        let seeded = self.seeded_winners(db, tournament_id, winners, None).await?;
        let matches: Vec<Match> = pair_by_seed(&seeded)
            .into_iter()
            .enumerate()
            .map(|(i, p)| {
                Match::new(
                    tournament_id,
                    next_round,
                    i as i32 + 1,
                    Some(p.home_id),
                    Some(p.away_id),
                )
            })
            .collect();

        let operation = AdvanceOperation {
            idempotency_key,
            operation_id: Uuid::new_v4(),
            tournament_id,
            round,
            winners: winners.to_vec(),
            created_match_ids: matches.iter().map(|m| m.match_id.clone()).collect(),
            created_at: Utc::now(),
            reverted_at: None,
        };

        if !db.try_record_advance(&operation, &matches).await? {
            return Err(Error::DuplicateOperation);
        }

        info!(
            "Advanced tournament {} from {} to {}: {} matches created",
            tournament_id,
            round,
            next_round,
            matches.len()
        );
        events.publish(DomainEvent::RoundAdvanced {
            tournament_id,
            round,
            operation_id: operation.operation_id,
            match_ids: operation.created_match_ids.clone(),
        });

        Ok(ConfirmOutcome {
            match_ids: operation.created_match_ids,
            operation_id: operation.operation_id,
            replayed: false,
        })
    }

    /// Undoes an advancement within the revert window, as long as none of the
    /// created matches has received a submission or result yet.
    pub async fn revert<DB: Database>(
        &self,
        db: &DB,
        events: &EventBus,
        idempotency_key: Uuid,
    ) -> Result<(), Error> {
        let probe = db
            .get_operation(idempotency_key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Advance operation {}", idempotency_key)))?;

        let lock = self.round_lock(probe.tournament_id, probe.round);
        let _guard = lock.lock().await;

        // Re-read under the lock; a concurrent revert may have won.
        let operation = db
            .get_operation(idempotency_key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Advance operation {}", idempotency_key)))?;
        if operation.reverted_at.is_some() {
            return Err(Error::NotFound(format!(
                "Advance operation {} (already reverted)",
                idempotency_key
            )));
        }

        // Wall-clock business rule, evaluated against the stored timestamp.
        if Utc::now() - operation.created_at > Duration::seconds(REVERT_WINDOW_SECS) {
            return Err(Error::RevertWindowExpired);
        }

        for match_id in &operation.created_match_ids {
            if !db.get_submissions(match_id).await?.is_empty() {
                return Err(Error::AlreadyInProgress(match_id.clone()));
            }
            if let Some(m) = db.get_match(match_id).await? {
                if m.has_result() {
                    return Err(Error::AlreadyInProgress(match_id.clone()));
                }
            }
        }

        db.revert_advance(idempotency_key, Utc::now()).await?;

        info!(
            "Reverted advancement of tournament {} round {}",
            operation.tournament_id, operation.round
        );
        events.publish(DomainEvent::RoundReverted {
            tournament_id: operation.tournament_id,
            round: operation.round,
        });

        Ok(())
    }

    async fn seeded_winners<DB: Database>(
        &self,
        db: &DB,
        tournament_id: i32,
        winners: &[String],
        seed_override: Option<&[i32]>,
    ) -> Result<Vec<(String, i32)>, Error> {
        if let Some(seeds) = seed_override {
            if seeds.len() != winners.len() {
                return Err(Error::SeedCountMismatch {
                    winners: winners.len(),
                    seeds: seeds.len(),
                });
            }
            return Ok(winners
                .iter()
                .cloned()
                .zip(seeds.iter().copied())
                .collect());
        }

        let entrants = db.get_entrants(tournament_id).await?;
        let seeds: HashMap<&str, i32> = entrants
            .iter()
            .map(|e| (e.player_id.as_str(), e.seed))
            .collect();

        winners
            .iter()
            .map(|w| {
                let seed = seeds.get(w.as_str()).copied().ok_or_else(|| {
                    Error::Internal(anyhow!("winner {} has no entrant seed", w))
                })?;
                Ok((w.clone(), seed))
            })
            .collect()
    }
}

/// Where a round currently sits, derived from its matches and the advancement
/// ledger.
pub async fn round_state<DB: Database>(
    db: &DB,
    tournament_id: i32,
    round: Round,
) -> Result<RoundState, Error> {
    let matches = db.get_matches_by_round(tournament_id, round).await?;
    if matches.is_empty() {
        return Ok(RoundState::NotStarted);
    }
    if matches.iter().any(|m| m.status != MatchStatus::Confirmed) {
        return Ok(RoundState::MatchesActive);
    }
    if db
        .get_active_operation(tournament_id, round)
        .await?
        .is_some()
    {
        Ok(RoundState::Advanced)
    } else {
        Ok(RoundState::ReadyToAdvance)
    }
}

fn validate_winners(round_matches: &[Match], winners: &[String]) -> Result<(), Error> {
    if winners.is_empty() {
        return Err(Error::EmptyWinnerSet);
    }
    if winners.len() % 2 != 0 {
        return Err(Error::OddWinnerCount(winners.len()));
    }

    let mut seen = HashSet::new();
    for winner in winners {
        if !seen.insert(winner.as_str()) {
            return Err(Error::DuplicateWinner(winner.clone()));
        }
    }

    let confirmed: HashSet<&str> = round_matches.iter().filter_map(|m| m.winner_id()).collect();
    for winner in winners {
        if !confirmed.contains(winner.as_str()) {
            return Err(Error::UnconfirmedWinner(winner.clone()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryDatabase;
    use crate::store::models::{MatchTransition, NewSubmission};
    use crate::store::{
        AdvanceDatabase, MatchDatabase, SubmissionDatabase, TournamentDatabase,
    };

    fn players() -> Vec<String> {
        (1..=16).map(|i| format!("player-{}", i)).collect()
    }

    async fn setup() -> (MemoryDatabase, i32) {
        let db = MemoryDatabase::new();
        let (t, _) = db
            .create_tournament("Cup", false, &players())
            .await
            .unwrap();
        (db, t.tournament_id)
    }

    /// Confirms every match of a round with a home win, straight through the
    /// store, and returns the winner ids.
    async fn sweep_round(db: &MemoryDatabase, tournament_id: i32, round: Round) -> Vec<String> {
        let matches = db.get_matches_by_round(tournament_id, round).await.unwrap();
        let mut winners = Vec::new();
        for m in matches {
            for reporter in ["home", "away"] {
                let transition = (reporter == "away").then_some(MatchTransition::Confirmed {
                    home_score: 2,
                    away_score: 0,
                });
                db.record_submission(
                    &NewSubmission {
                        match_id: m.match_id.clone(),
                        reporter_psn: reporter.to_string(),
                        score_home: 2,
                        score_away: 0,
                        evidence_path: None,
                    },
                    transition,
                )
                .await
                .unwrap();
            }
            winners.push(m.home_id.clone().unwrap());
        }
        winners
    }

    #[test]
    fn pairing_is_deterministic_and_seed_ordered() {
        let seeded = vec![
            ("B".to_string(), 2),
            ("D".to_string(), 4),
            ("A".to_string(), 1),
            ("C".to_string(), 3),
        ];
        let first = pair_by_seed(&seeded);
        assert_eq!(
            first,
            vec![
                Pairing {
                    home_id: "A".to_string(),
                    away_id: "D".to_string()
                },
                Pairing {
                    home_id: "B".to_string(),
                    away_id: "C".to_string()
                },
            ]
        );
        assert_eq!(pair_by_seed(&seeded), first);
    }

    #[test]
    fn seeding_pairs_top_against_bottom() {
        let entrants: Vec<Entrant> = players()
            .into_iter()
            .enumerate()
            .map(|(i, player_id)| Entrant {
                tournament_id: 1,
                player_id,
                seed: i as i32 + 1,
            })
            .collect();
        let matches = seed_round_of_16(1, &entrants);
        assert_eq!(matches.len(), 8);
        assert_eq!(matches[0].home_id.as_deref(), Some("player-1"));
        assert_eq!(matches[0].away_id.as_deref(), Some("player-16"));
        assert_eq!(matches[7].home_id.as_deref(), Some("player-8"));
        assert_eq!(matches[7].away_id.as_deref(), Some("player-9"));
        assert_eq!(matches[0].match_id, "1.1.1");
    }

    #[tokio::test]
    async fn tournament_creation_is_validated() {
        let db = MemoryDatabase::new();
        let admin = Principal::admin("marshal");

        let err = create_tournament(&db, "Cup", &players()[..15], false, &admin)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidEntrantCount(15)));

        let mut dup = players();
        dup[1] = dup[0].clone();
        let err = create_tournament(&db, "Cup", &dup, false, &admin)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateEntrant(_)));

        let err = create_tournament(&db, "Cup", &players(), false, &Principal::anonymous())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden));

        let (t, matches) = create_tournament(&db, "Cup", &players(), false, &admin)
            .await
            .unwrap();
        assert_eq!(matches.len(), 8);
        assert_eq!(t.current_round, Round::R16.number());
    }

    #[tokio::test]
    async fn preview_is_pure_and_deterministic() {
        let (db, t) = setup().await;
        let advancer = Advancer::new();
        let winners = sweep_round(&db, t, Round::R16).await;

        let first = advancer
            .preview(&db, t, Round::R16, &winners, None)
            .await
            .unwrap();
        let second = advancer
            .preview(&db, t, Round::R16, &winners, None)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
        // Seeds 1..8 remain: 1v8, 2v7, 3v6, 4v5.
        assert_eq!(first[0].home_id, "player-1");
        assert_eq!(first[0].away_id, "player-8");
        assert_eq!(first[3].home_id, "player-4");
        assert_eq!(first[3].away_id, "player-5");

        // No persistence happened.
        assert!(db
            .get_matches_by_round(t, Round::Qf)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn preview_guards_the_winner_set() {
        let (db, t) = setup().await;
        let advancer = Advancer::new();
        let winners = sweep_round(&db, t, Round::R16).await;

        let err = advancer
            .preview(&db, t, Round::R16, &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyWinnerSet));

        let err = advancer
            .preview(&db, t, Round::R16, &winners[..3], None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OddWinnerCount(3)));

        let doubled = vec![winners[0].clone(), winners[0].clone()];
        let err = advancer
            .preview(&db, t, Round::R16, &doubled, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateWinner(_)));

        // player-16 lost their match and cannot advance.
        let smuggled = vec![winners[0].clone(), "player-16".to_string()];
        let err = advancer
            .preview(&db, t, Round::R16, &smuggled, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnconfirmedWinner(id) if id == "player-16"));
    }

    #[tokio::test]
    async fn confirm_is_idempotent_per_key() {
        let (db, t) = setup().await;
        let advancer = Advancer::new();
        let events = EventBus::default();
        let winners = sweep_round(&db, t, Round::R16).await;
        let key = Uuid::new_v4();

        let first = advancer
            .confirm(&db, &events, t, Round::R16, &winners, key)
            .await
            .unwrap();
        assert_eq!(first.match_ids.len(), 4);
        assert!(!first.replayed);

        let replay = advancer
            .confirm(&db, &events, t, Round::R16, &winners, key)
            .await
            .unwrap();
        assert_eq!(replay.match_ids, first.match_ids);
        assert_eq!(replay.operation_id, first.operation_id);
        assert!(replay.replayed);

        // No duplicate rows appeared.
        let qf = db.get_matches_by_round(t, Round::Qf).await.unwrap();
        assert_eq!(qf.len(), 4);
        assert_eq!(
            round_state(&db, t, Round::R16).await.unwrap(),
            RoundState::Advanced
        );
    }

    #[tokio::test]
    async fn confirm_with_a_different_key_is_rejected() {
        let (db, t) = setup().await;
        let advancer = Advancer::new();
        let events = EventBus::default();
        let winners = sweep_round(&db, t, Round::R16).await;

        advancer
            .confirm(&db, &events, t, Round::R16, &winners, Uuid::new_v4())
            .await
            .unwrap();
        let err = advancer
            .confirm(&db, &events, t, Round::R16, &winners, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateOperation));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_confirms_admit_exactly_one() {
        let (db, t) = setup().await;
        let db = Arc::new(db);
        let advancer = Arc::new(Advancer::new());
        let events = EventBus::default();
        let winners = Arc::new(sweep_round(&db, t, Round::R16).await);

        let mut handles = Vec::new();
        for _ in 0..2 {
            let db = Arc::clone(&db);
            let advancer = Arc::clone(&advancer);
            let events = events.clone();
            let winners = Arc::clone(&winners);
            handles.push(tokio::spawn(async move {
                advancer
                    .confirm(&*db, &events, t, Round::R16, &winners, Uuid::new_v4())
                    .await
            }));
        }

        let mut ok = 0;
        let mut duplicate = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(Error::DuplicateOperation) => duplicate += 1,
                Err(e) => panic!("unexpected error {:?}", e),
            }
        }
        assert_eq!((ok, duplicate), (1, 1));
        assert_eq!(db.get_matches_by_round(t, Round::Qf).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn revert_inside_the_window_undoes_the_advancement() {
        let (db, t) = setup().await;
        let advancer = Advancer::new();
        let events = EventBus::default();
        let winners = sweep_round(&db, t, Round::R16).await;
        let key = Uuid::new_v4();

        advancer
            .confirm(&db, &events, t, Round::R16, &winners, key)
            .await
            .unwrap();
        advancer.revert(&db, &events, key).await.unwrap();

        assert!(db
            .get_matches_by_round(t, Round::Qf)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            round_state(&db, t, Round::R16).await.unwrap(),
            RoundState::ReadyToAdvance
        );
        let tournament = db.get_tournament(t).await.unwrap().unwrap();
        assert_eq!(tournament.current_round, Round::R16.number());

        // A fresh key can advance again; the reverted key is spent.
        let err = advancer
            .confirm(&db, &events, t, Round::R16, &winners, key)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateOperation));
        advancer
            .confirm(&db, &events, t, Round::R16, &winners, Uuid::new_v4())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn revert_window_is_a_wall_clock_rule() {
        for (age_secs, should_pass) in [(29, true), (31, false)] {
            let (db, t) = setup().await;
            let advancer = Advancer::new();
            let events = EventBus::default();
            let winners = sweep_round(&db, t, Round::R16).await;

            // Record the advancement with a backdated timestamp.
            let seeded: Vec<(String, i32)> = winners
                .iter()
                .enumerate()
                .map(|(i, w)| (w.clone(), i as i32 + 1))
                .collect();
            let matches: Vec<Match> = pair_by_seed(&seeded)
                .into_iter()
                .enumerate()
                .map(|(i, p)| {
                    Match::new(t, Round::Qf, i as i32 + 1, Some(p.home_id), Some(p.away_id))
                })
                .collect();
            let operation = AdvanceOperation {
                idempotency_key: Uuid::new_v4(),
                operation_id: Uuid::new_v4(),
                tournament_id: t,
                round: Round::R16,
                winners: winners.clone(),
                created_match_ids: matches.iter().map(|m| m.match_id.clone()).collect(),
                created_at: Utc::now() - Duration::seconds(age_secs),
                reverted_at: None,
            };
            assert!(db.try_record_advance(&operation, &matches).await.unwrap());

            let result = advancer
                .revert(&db, &events, operation.idempotency_key)
                .await;
            if should_pass {
                result.unwrap();
            } else {
                assert!(matches!(result.unwrap_err(), Error::RevertWindowExpired));
            }
        }
    }

    #[tokio::test]
    async fn revert_refuses_to_destroy_reported_data() {
        let (db, t) = setup().await;
        let advancer = Advancer::new();
        let events = EventBus::default();
        let winners = sweep_round(&db, t, Round::R16).await;
        let key = Uuid::new_v4();

        let outcome = advancer
            .confirm(&db, &events, t, Round::R16, &winners, key)
            .await
            .unwrap();

        // One player already reported on a next-round match.
        db.record_submission(
            &NewSubmission {
                match_id: outcome.match_ids[0].clone(),
                reporter_psn: "eager".to_string(),
                score_home: 1,
                score_away: 0,
                evidence_path: None,
            },
            None,
        )
        .await
        .unwrap();

        let err = advancer.revert(&db, &events, key).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyInProgress(id) if id == outcome.match_ids[0]));
        assert_eq!(db.get_matches_by_round(t, Round::Qf).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn revert_unknown_or_spent_keys() {
        let (db, t) = setup().await;
        let advancer = Advancer::new();
        let events = EventBus::default();

        let err = advancer
            .revert(&db, &events, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let winners = sweep_round(&db, t, Round::R16).await;
        let key = Uuid::new_v4();
        advancer
            .confirm(&db, &events, t, Round::R16, &winners, key)
            .await
            .unwrap();
        advancer.revert(&db, &events, key).await.unwrap();
        let err = advancer.revert(&db, &events, key).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn round_state_follows_the_lifecycle() {
        let (db, t) = setup().await;
        let advancer = Advancer::new();
        let events = EventBus::default();

        assert_eq!(
            round_state(&db, t, Round::Qf).await.unwrap(),
            RoundState::NotStarted
        );
        assert_eq!(
            round_state(&db, t, Round::R16).await.unwrap(),
            RoundState::MatchesActive
        );

        let winners = sweep_round(&db, t, Round::R16).await;
        assert_eq!(
            round_state(&db, t, Round::R16).await.unwrap(),
            RoundState::ReadyToAdvance
        );

        advancer
            .confirm(&db, &events, t, Round::R16, &winners, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(
            round_state(&db, t, Round::R16).await.unwrap(),
            RoundState::Advanced
        );
        assert_eq!(
            round_state(&db, t, Round::Qf).await.unwrap(),
            RoundState::MatchesActive
        );
    }
}
