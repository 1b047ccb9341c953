use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Error;
use crate::events::{DomainEvent, EventBus};
use crate::store::models::{
    Evidence, MatchStatus, MatchTransition, NewSubmission, Round, Tournament, TournamentStatus,
};
use crate::store::Database;

/// Upper bound on attached proof. Anything larger is an upload concern, not a
/// score report.
pub const MAX_EVIDENCE_BYTES: i64 = 25 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub match_id: String,
    pub token: String,
    pub reporter_psn: String,
    pub score_home: i32,
    pub score_away: i32,
    pub pin: String,
    pub evidence: Option<Evidence>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub status: MatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Decides a match's authoritative result from independent submissions, never
/// trusting either player alone.
///
/// Submissions to the same match are serialized through a per-match lock so two
/// reporters can never both observe an empty submission trail; different
/// matches proceed fully in parallel.
#[derive(Debug, Default)]
pub struct Reconciler {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    fn match_lock(&self, match_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("match lock registry poisoned");
        locks
            .entry(match_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Accepts one player's score report and reconciles it against whatever the
    /// other party already reported.
    pub async fn submit<DB: Database>(
        &self,
        db: &DB,
        events: &EventBus,
        request: SubmitRequest,
    ) -> Result<SubmitOutcome, Error> {
        let lock = self.match_lock(&request.match_id);
        let _guard = lock.lock().await;

        let m = db
            .get_match(&request.match_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Match {}", request.match_id)))?;

        if m.token != request.token {
            return Err(Error::InvalidToken);
        }
        if m.pin != request.pin {
            return Err(Error::InvalidPin);
        }

        let tournament = db
            .get_tournament(m.tournament_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Tournament {}", m.tournament_id)))?;
        check_evidence(&tournament, request.evidence.as_ref())?;

        let submission = NewSubmission {
            match_id: request.match_id.clone(),
            reporter_psn: request.reporter_psn.clone(),
            score_home: request.score_home,
            score_away: request.score_away,
            evidence_path: request.evidence.map(|e| e.path),
        };

        // A match that already left PENDING keeps its result forever; late
        // reports only extend the audit trail.
        if m.status != MatchStatus::Pending {
            db.record_submission(&submission, None).await?;
            return Ok(SubmitOutcome {
                status: m.status,
                reason: Some("result already recorded".to_string()),
            });
        }

        let prior = db.get_submissions(&request.match_id).await?;
        let transition = prior.first().map(|first| {
            if (first.score_home, first.score_away) == (request.score_home, request.score_away) {
                MatchTransition::Confirmed {
                    home_score: request.score_home,
                    away_score: request.score_away,
                }
            } else {
                MatchTransition::Disputed
            }
        });

        db.record_submission(&submission, transition).await?;

        match transition {
            None => Ok(SubmitOutcome {
                status: MatchStatus::Pending,
                reason: None,
            }),
            Some(MatchTransition::Confirmed {
                home_score,
                away_score,
            }) => {
                info!(
                    "Match {} confirmed {}-{} by two independent reports",
                    m.match_id, home_score, away_score
                );
                if m.round == Round::F {
                    db.set_tournament_status(m.tournament_id, TournamentStatus::Done)
                        .await?;
                    info!("Tournament {} completed", m.tournament_id);
                }
                events.publish(DomainEvent::MatchConfirmed {
                    match_id: m.match_id,
                    home_score,
                    away_score,
                });
                Ok(SubmitOutcome {
                    status: MatchStatus::Confirmed,
                    reason: None,
                })
            }
            Some(MatchTransition::Disputed) => {
                info!("Match {} disputed: reports disagree", m.match_id);
                events.publish(DomainEvent::MatchDisputed {
                    match_id: m.match_id,
                });
                Ok(SubmitOutcome {
                    status: MatchStatus::Disputed,
                    reason: Some("score mismatch".to_string()),
                })
            }
        }
    }
}

fn check_evidence(tournament: &Tournament, evidence: Option<&Evidence>) -> Result<(), Error> {
    let evidence = match evidence {
        Some(evidence) => evidence,
        None => {
            if tournament.require_evidence {
                return Err(Error::EvidenceRequired(
                    "this tournament requires proof with every report".to_string(),
                ));
            }
            return Ok(());
        }
    };

    if !evidence.content_type.starts_with("image/") && !evidence.content_type.starts_with("video/")
    {
        return Err(Error::EvidenceRequired(format!(
            "unsupported content type {}",
            evidence.content_type
        )));
    }
    if evidence.size_bytes <= 0 || evidence.size_bytes > MAX_EVIDENCE_BYTES {
        return Err(Error::EvidenceRequired(format!(
            "evidence must be between 1 byte and {} bytes",
            MAX_EVIDENCE_BYTES
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryDatabase;
    use crate::store::models::Match;
    use crate::store::{MatchDatabase, SubmissionDatabase, TournamentDatabase};

    async fn setup(require_evidence: bool) -> (MemoryDatabase, Match) {
        let db = MemoryDatabase::new();
        let players: Vec<String> = (1..=16).map(|i| format!("player-{}", i)).collect();
        let (_, matches) = db
            .create_tournament("Friday Night Cup", require_evidence, &players)
            .await
            .unwrap();
        let first = matches.into_iter().next().unwrap();
        (db, first)
    }

    fn request(m: &Match, reporter: &str, home: i32, away: i32) -> SubmitRequest {
        SubmitRequest {
            match_id: m.match_id.clone(),
            token: m.token.clone(),
            reporter_psn: reporter.to_string(),
            score_home: home,
            score_away: away,
            pin: m.pin.clone(),
            evidence: None,
        }
    }

    #[tokio::test]
    async fn first_submission_leaves_match_pending() {
        let (db, m) = setup(false).await;
        let reconciler = Reconciler::new();
        let events = EventBus::default();

        let outcome = reconciler
            .submit(&db, &events, request(&m, "alice", 3, 1))
            .await
            .unwrap();

        assert_eq!(outcome.status, MatchStatus::Pending);
        let stored = db.get_match(&m.match_id).await.unwrap().unwrap();
        assert_eq!(stored.status, MatchStatus::Pending);
        assert!(!stored.has_result());
    }

    #[tokio::test]
    async fn agreeing_submissions_confirm_the_match() {
        let (db, m) = setup(false).await;
        let reconciler = Reconciler::new();
        let events = EventBus::default();
        let mut rx = events.subscribe();

        reconciler
            .submit(&db, &events, request(&m, "alice", 3, 1))
            .await
            .unwrap();
        let outcome = reconciler
            .submit(&db, &events, request(&m, "bob", 3, 1))
            .await
            .unwrap();

        assert_eq!(outcome.status, MatchStatus::Confirmed);
        let stored = db.get_match(&m.match_id).await.unwrap().unwrap();
        assert_eq!(stored.home_score, Some(3));
        assert_eq!(stored.away_score, Some(1));
        assert!(matches!(
            rx.recv().await.unwrap(),
            DomainEvent::MatchConfirmed { .. }
        ));
    }

    #[tokio::test]
    async fn conflicting_submissions_dispute_the_match() {
        let (db, m) = setup(false).await;
        let reconciler = Reconciler::new();
        let events = EventBus::default();

        reconciler
            .submit(&db, &events, request(&m, "alice", 3, 1))
            .await
            .unwrap();
        let outcome = reconciler
            .submit(&db, &events, request(&m, "bob", 1, 3))
            .await
            .unwrap();

        assert_eq!(outcome.status, MatchStatus::Disputed);
        assert_eq!(outcome.reason.as_deref(), Some("score mismatch"));
        let stored = db.get_match(&m.match_id).await.unwrap().unwrap();
        assert_eq!(stored.status, MatchStatus::Disputed);
        // Disputed matches keep null scores until an admin decides.
        assert!(!stored.has_result());
    }

    #[tokio::test]
    async fn wrong_pin_is_rejected_without_persisting() {
        let (db, m) = setup(false).await;
        let reconciler = Reconciler::new();
        let events = EventBus::default();

        let mut bad = request(&m, "alice", 3, 1);
        bad.pin = "000000".to_string();
        if bad.pin == m.pin {
            bad.pin = "000001".to_string();
        }

        let err = reconciler.submit(&db, &events, bad).await.unwrap_err();
        assert!(matches!(err, Error::InvalidPin));

        let stored = db.get_match(&m.match_id).await.unwrap().unwrap();
        assert_eq!(stored.status, MatchStatus::Pending);
        assert!(db.get_submissions(&m.match_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn wrong_token_is_rejected() {
        let (db, m) = setup(false).await;
        let reconciler = Reconciler::new();
        let events = EventBus::default();

        let mut bad = request(&m, "alice", 3, 1);
        bad.token = "not-the-token".to_string();

        let err = reconciler.submit(&db, &events, bad).await.unwrap_err();
        assert!(matches!(err, Error::InvalidToken));
        assert!(db.get_submissions(&m.match_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_match_is_not_found() {
        let (db, m) = setup(false).await;
        let reconciler = Reconciler::new();
        let events = EventBus::default();

        let mut bad = request(&m, "alice", 3, 1);
        bad.match_id = "9.9.9".to_string();

        let err = reconciler.submit(&db, &events, bad).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn resubmission_after_confirmation_keeps_the_original_result() {
        let (db, m) = setup(false).await;
        let reconciler = Reconciler::new();
        let events = EventBus::default();

        reconciler
            .submit(&db, &events, request(&m, "alice", 3, 1))
            .await
            .unwrap();
        reconciler
            .submit(&db, &events, request(&m, "bob", 3, 1))
            .await
            .unwrap();

        // A post-hoc rewrite attempt is archived but changes nothing.
        let outcome = reconciler
            .submit(&db, &events, request(&m, "alice", 9, 0))
            .await
            .unwrap();
        assert_eq!(outcome.status, MatchStatus::Confirmed);

        let stored = db.get_match(&m.match_id).await.unwrap().unwrap();
        assert_eq!(stored.home_score, Some(3));
        assert_eq!(stored.away_score, Some(1));
        assert_eq!(db.get_submissions(&m.match_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn evidence_policy_is_enforced() {
        let (db, m) = setup(true).await;
        let reconciler = Reconciler::new();
        let events = EventBus::default();

        let err = reconciler
            .submit(&db, &events, request(&m, "alice", 3, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EvidenceRequired(_)));

        let mut with_proof = request(&m, "alice", 3, 1);
        with_proof.evidence = Some(Evidence {
            path: "uploads/final.png".to_string(),
            content_type: "image/png".to_string(),
            size_bytes: 120_000,
        });
        let outcome = reconciler.submit(&db, &events, with_proof).await.unwrap();
        assert_eq!(outcome.status, MatchStatus::Pending);
    }

    #[tokio::test]
    async fn bad_evidence_is_rejected_even_when_optional() {
        let (db, m) = setup(false).await;
        let reconciler = Reconciler::new();
        let events = EventBus::default();

        let mut wrong_type = request(&m, "alice", 3, 1);
        wrong_type.evidence = Some(Evidence {
            path: "uploads/notes.txt".to_string(),
            content_type: "text/plain".to_string(),
            size_bytes: 100,
        });
        assert!(matches!(
            reconciler.submit(&db, &events, wrong_type).await.unwrap_err(),
            Error::EvidenceRequired(_)
        ));

        let mut too_big = request(&m, "alice", 3, 1);
        too_big.evidence = Some(Evidence {
            path: "uploads/raw.mp4".to_string(),
            content_type: "video/mp4".to_string(),
            size_bytes: MAX_EVIDENCE_BYTES + 1,
        });
        assert!(matches!(
            reconciler.submit(&db, &events, too_big).await.unwrap_err(),
            Error::EvidenceRequired(_)
        ));

        assert!(db.get_submissions(&m.match_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn late_report_on_a_disputed_match_changes_nothing() {
        let (db, m) = setup(false).await;
        let reconciler = Reconciler::new();
        let events = EventBus::default();

        reconciler
            .submit(&db, &events, request(&m, "alice", 3, 1))
            .await
            .unwrap();
        reconciler
            .submit(&db, &events, request(&m, "bob", 0, 3))
            .await
            .unwrap();

        let outcome = reconciler
            .submit(&db, &events, request(&m, "alice", 3, 1))
            .await
            .unwrap();
        assert_eq!(outcome.status, MatchStatus::Disputed);
        let stored = db.get_match(&m.match_id).await.unwrap().unwrap();
        assert_eq!(stored.status, MatchStatus::Disputed);
    }
}
