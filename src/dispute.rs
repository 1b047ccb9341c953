use anyhow::anyhow;
use tracing::info;

use crate::error::Error;
use crate::events::{DomainEvent, EventBus};
use crate::store::models::{Match, NewOverrideAudit, Principal, Round, TournamentStatus};
use crate::store::Database;

/// Terminates a match with a binding score, regardless of what the players
/// reported. This does not reconcile, it decrees.
///
/// Always available, including on already-confirmed matches; every call leaves
/// an immutable audit entry naming the actor and the state it replaced.
pub async fn override_result<DB: Database>(
    db: &DB,
    events: &EventBus,
    match_id: &str,
    home_score: i32,
    away_score: i32,
    principal: &Principal,
) -> Result<Match, Error> {
    if !principal.is_admin() {
        return Err(Error::Forbidden);
    }

    let m = db
        .get_match(match_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Match {}", match_id)))?;

    let audit = NewOverrideAudit {
        match_id: m.match_id.clone(),
        actor: principal.name.clone(),
        prev_status: m.status,
        prev_home_score: m.home_score,
        prev_away_score: m.away_score,
        home_score,
        away_score,
    };
    db.record_override(&audit).await?;
    if m.round == Round::F {
        db.set_tournament_status(m.tournament_id, TournamentStatus::Done)
            .await?;
        info!("Tournament {} completed by override", m.tournament_id);
    }

    info!(
        "Match {} overridden to {}-{} by {} (was {})",
        match_id, home_score, away_score, principal.name, m.status
    );
    events.publish(DomainEvent::MatchConfirmed {
        match_id: m.match_id.clone(),
        home_score,
        away_score,
    });

    db.get_match(match_id)
        .await?
        .ok_or_else(|| Error::Internal(anyhow!("Match {} vanished after override", match_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::{Reconciler, SubmitRequest};
    use crate::store::memory::MemoryDatabase;
    use crate::store::models::MatchStatus;
    use crate::store::{AuditDatabase, MatchDatabase, TournamentDatabase};

    async fn setup() -> (MemoryDatabase, Match) {
        let db = MemoryDatabase::new();
        let players: Vec<String> = (1..=16).map(|i| format!("player-{}", i)).collect();
        let (_, matches) = db
            .create_tournament("Cup", false, &players)
            .await
            .unwrap();
        let first = matches.into_iter().next().unwrap();
        (db, first)
    }

    fn report(m: &Match, reporter: &str, home: i32, away: i32) -> SubmitRequest {
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
    async fn non_admin_is_forbidden() {
        let (db, m) = setup().await;
        let events = EventBus::default();

        let err = override_result(&db, &events, &m.match_id, 2, 0, &Principal::anonymous())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden));
        assert!(db.get_overrides(&m.match_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_match_is_not_found() {
        let (db, _) = setup().await;
        let events = EventBus::default();

        let err = override_result(&db, &events, "9.9.9", 2, 0, &Principal::admin("marshal"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn override_settles_a_dispute_and_records_the_audit() {
        let (db, m) = setup().await;
        let events = EventBus::default();
        let reconciler = Reconciler::new();

        reconciler
            .submit(&db, &events, report(&m, "alice", 3, 1))
            .await
            .unwrap();
        reconciler
            .submit(&db, &events, report(&m, "bob", 1, 3))
            .await
            .unwrap();

        let updated = override_result(&db, &events, &m.match_id, 3, 1, &Principal::admin("marshal"))
            .await
            .unwrap();
        assert_eq!(updated.status, MatchStatus::Confirmed);
        assert_eq!(updated.home_score, Some(3));
        assert_eq!(updated.away_score, Some(1));

        let audits = db.get_overrides(&m.match_id).await.unwrap();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].actor, "marshal");
        assert_eq!(audits[0].prev_status, MatchStatus::Disputed);
        assert_eq!(audits[0].prev_home_score, None);
    }

    #[tokio::test]
    async fn override_is_always_authoritative_even_after_confirmation() {
        let (db, m) = setup().await;
        let events = EventBus::default();
        let reconciler = Reconciler::new();

        reconciler
            .submit(&db, &events, report(&m, "alice", 3, 1))
            .await
            .unwrap();
        reconciler
            .submit(&db, &events, report(&m, "bob", 3, 1))
            .await
            .unwrap();

        let updated = override_result(&db, &events, &m.match_id, 0, 3, &Principal::admin("marshal"))
            .await
            .unwrap();
        assert_eq!(updated.home_score, Some(0));
        assert_eq!(updated.away_score, Some(3));

        // Submission records stay untouched; the decree lives in the audit log.
        let audits = db.get_overrides(&m.match_id).await.unwrap();
        assert_eq!(audits[0].prev_home_score, Some(3));
        assert_eq!(audits[0].prev_status, MatchStatus::Confirmed);
    }

    #[tokio::test]
    async fn repeating_the_same_override_is_effectively_a_noop() {
        let (db, m) = setup().await;
        let events = EventBus::default();
        let admin = Principal::admin("marshal");

        let first = override_result(&db, &events, &m.match_id, 2, 0, &admin)
            .await
            .unwrap();
        let second = override_result(&db, &events, &m.match_id, 2, 0, &admin)
            .await
            .unwrap();
        assert_eq!(first.home_score, second.home_score);
        assert_eq!(first.away_score, second.away_score);
        assert_eq!(second.status, MatchStatus::Confirmed);

        let stored = db.get_match(&m.match_id).await.unwrap().unwrap();
        assert_eq!(stored.home_score, Some(2));
    }
}
