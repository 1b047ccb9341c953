use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::AppError;
use self::models::*;

/// The in-memory implementation of the database traits, used by the test suite
/// and for local development without Postgres.
pub mod memory;
/// Models for the database.
///
/// These models are specific to the current database design and schema.
/// Most if not all are directly mapped to a table in the database.
pub mod models;

/// The Postgres database used by the tournament server.
#[derive(Debug, Clone)]
pub struct PgDatabase {
    pub pool: PgPool,
}

impl PgDatabase {
    pub async fn connect() -> Result<Self, AppError> {
        #[cfg(debug_assertions)]
        dotenv::dotenv().ok();

        let db_url = match std::env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) => {
                return Err(anyhow!("DATABASE_URL environment variable not found"));
            }
        };
        let pool = PgPool::connect(db_url.as_str()).await?;
        info!("Successfully connected to the database.");

        Ok(PgDatabase { pool })
    }

    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Tournament bootstrap and round bookkeeping.
#[allow(async_fn_in_trait)]
pub trait TournamentDatabase {
    type Error;

    /// Creates a tournament with its seeded entrants and the bulk-generated
    /// round-of-16 matches, as a single atomic unit.
    ///
    /// `players` must already be validated (exactly 16, distinct); seeds are
    /// assigned 1..=16 in the order given.
    async fn create_tournament(
        &self,
        name: &str,
        require_evidence: bool,
        players: &[String],
    ) -> Result<(Tournament, Vec<Match>), Self::Error>;

    async fn get_tournament(&self, tournament_id: i32) -> Result<Option<Tournament>, Self::Error>;

    async fn get_entrants(&self, tournament_id: i32) -> Result<Vec<Entrant>, Self::Error>;

    async fn set_tournament_status(
        &self,
        tournament_id: i32,
        status: TournamentStatus,
    ) -> Result<(), Self::Error>;
}

/// Read and mutate match records.
#[allow(async_fn_in_trait)]
pub trait MatchDatabase {
    type Error;

    async fn get_match(&self, match_id: &str) -> Result<Option<Match>, Self::Error>;

    async fn get_matches_by_round(
        &self,
        tournament_id: i32,
        round: Round,
    ) -> Result<Vec<Match>, Self::Error>;

    /// Retrieves all matches of a tournament, ordered by round then sequence.
    async fn get_matches_by_tournament(
        &self,
        tournament_id: i32,
    ) -> Result<Vec<Match>, Self::Error>;
}

/// The append-only submission trail.
#[allow(async_fn_in_trait)]
pub trait SubmissionDatabase {
    type Error;

    /// Persists an accepted submission and, when a transition is supplied,
    /// applies it to the match row in the same atomic unit.
    async fn record_submission(
        &self,
        submission: &NewSubmission,
        transition: Option<MatchTransition>,
    ) -> Result<Submission, Self::Error>;

    /// Accepted submissions for a match, oldest first.
    async fn get_submissions(&self, match_id: &str) -> Result<Vec<Submission>, Self::Error>;
}

/// The advancement ledger. Claim semantics live here so that two processes
/// cannot both advance the same round even if the in-process lock is bypassed.
#[allow(async_fn_in_trait)]
pub trait AdvanceDatabase {
    type Error;

    async fn get_operation(
        &self,
        idempotency_key: Uuid,
    ) -> Result<Option<AdvanceOperation>, Self::Error>;

    /// The non-reverted operation for a round, if one exists.
    async fn get_active_operation(
        &self,
        tournament_id: i32,
        round: Round,
    ) -> Result<Option<AdvanceOperation>, Self::Error>;

    /// Records the operation, creates the next round's matches and bumps the
    /// tournament's current round, atomically. Returns `false` without writing
    /// anything when another live operation already claimed the round.
    async fn try_record_advance(
        &self,
        operation: &AdvanceOperation,
        matches: &[Match],
    ) -> Result<bool, Self::Error>;

    /// Deletes the operation's created matches, stamps `reverted_at` and
    /// restores the tournament's current round, atomically.
    async fn revert_advance(
        &self,
        idempotency_key: Uuid,
        reverted_at: DateTime<Utc>,
    ) -> Result<(), Self::Error>;
}

/// The immutable override audit log.
#[allow(async_fn_in_trait)]
pub trait AuditDatabase {
    type Error;

    /// Writes the audit entry and applies the decreed score to the match row in
    /// the same atomic unit.
    async fn record_override(
        &self,
        audit: &NewOverrideAudit,
    ) -> Result<OverrideAudit, Self::Error>;

    async fn get_overrides(&self, match_id: &str) -> Result<Vec<OverrideAudit>, Self::Error>;
}

/// Any database the server can operate the tournament on.
pub trait Database:
    TournamentDatabase<Error = AppError>
    + MatchDatabase<Error = AppError>
    + SubmissionDatabase<Error = AppError>
    + AdvanceDatabase<Error = AppError>
    + AuditDatabase<Error = AppError>
    + Send
    + Sync
{
}

impl<T> Database for T where
    T: TournamentDatabase<Error = AppError>
        + MatchDatabase<Error = AppError>
        + SubmissionDatabase<Error = AppError>
        + AdvanceDatabase<Error = AppError>
        + AuditDatabase<Error = AppError>
        + Send
        + Sync
{
}

// Row structs keep the runtime-checked queries honest: enums travel as text or
// ints and are parsed on the way out.

#[derive(FromRow)]
struct TournamentRow {
    tournament_id: i32,
    name: String,
    status: String,
    current_round: i32,
    require_evidence: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<TournamentRow> for Tournament {
    type Error = AppError;

    fn try_from(r: TournamentRow) -> Result<Self, Self::Error> {
        Ok(Tournament {
            tournament_id: r.tournament_id,
            name: r.name,
            status: TournamentStatus::from_str(&r.status)
                .map_err(|_| anyhow!("Unknown tournament status {}", r.status))?,
            current_round: r.current_round,
            require_evidence: r.require_evidence,
            created_at: r.created_at,
        })
    }
}

#[derive(FromRow)]
struct MatchRow {
    match_id: String,
    tournament_id: i32,
    round: i32,
    home_id: Option<String>,
    away_id: Option<String>,
    home_score: Option<i32>,
    away_score: Option<i32>,
    status: String,
    token: String,
    pin: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<MatchRow> for Match {
    type Error = AppError;

    fn try_from(r: MatchRow) -> Result<Self, Self::Error> {
        Ok(Match {
            match_id: r.match_id,
            tournament_id: r.tournament_id,
            round: Round::from_number(r.round)
                .ok_or_else(|| anyhow!("Unknown round number {}", r.round))?,
            home_id: r.home_id,
            away_id: r.away_id,
            home_score: r.home_score,
            away_score: r.away_score,
            status: MatchStatus::from_str(&r.status)
                .map_err(|_| anyhow!("Unknown match status {}", r.status))?,
            token: r.token,
            pin: r.pin,
            created_at: r.created_at,
        })
    }
}

#[derive(FromRow)]
struct OperationRow {
    idempotency_key: Uuid,
    operation_id: Uuid,
    tournament_id: i32,
    round: i32,
    winners: Json<Vec<String>>,
    created_match_ids: Json<Vec<String>>,
    created_at: DateTime<Utc>,
    reverted_at: Option<DateTime<Utc>>,
}

impl TryFrom<OperationRow> for AdvanceOperation {
    type Error = AppError;

    fn try_from(r: OperationRow) -> Result<Self, Self::Error> {
        Ok(AdvanceOperation {
            idempotency_key: r.idempotency_key,
            operation_id: r.operation_id,
            tournament_id: r.tournament_id,
            round: Round::from_number(r.round)
                .ok_or_else(|| anyhow!("Unknown round number {}", r.round))?,
            winners: r.winners.0,
            created_match_ids: r.created_match_ids.0,
            created_at: r.created_at,
            reverted_at: r.reverted_at,
        })
    }
}

#[derive(FromRow)]
struct AuditRow {
    id: i64,
    match_id: String,
    actor: String,
    prev_status: String,
    prev_home_score: Option<i32>,
    prev_away_score: Option<i32>,
    home_score: i32,
    away_score: i32,
    created_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for OverrideAudit {
    type Error = AppError;

    fn try_from(r: AuditRow) -> Result<Self, Self::Error> {
        Ok(OverrideAudit {
            id: r.id,
            match_id: r.match_id,
            actor: r.actor,
            prev_status: MatchStatus::from_str(&r.prev_status)
                .map_err(|_| anyhow!("Unknown match status {}", r.prev_status))?,
            prev_home_score: r.prev_home_score,
            prev_away_score: r.prev_away_score,
            home_score: r.home_score,
            away_score: r.away_score,
            created_at: r.created_at,
        })
    }
}

#[derive(FromRow)]
struct SubmissionRow {
    id: i64,
    match_id: String,
    reporter_psn: String,
    score_home: i32,
    score_away: i32,
    evidence_path: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<SubmissionRow> for Submission {
    fn from(r: SubmissionRow) -> Self {
        Submission {
            id: r.id,
            match_id: r.match_id,
            reporter_psn: r.reporter_psn,
            score_home: r.score_home,
            score_away: r.score_away,
            evidence_path: r.evidence_path,
            created_at: r.created_at,
        }
    }
}

impl TournamentDatabase for PgDatabase {
    type Error = AppError;

    async fn create_tournament(
        &self,
        name: &str,
        require_evidence: bool,
        players: &[String],
    ) -> Result<(Tournament, Vec<Match>), Self::Error> {
        let mut tx = self.pool.begin().await?;

        let row: TournamentRow = sqlx::query_as(
            r#"
            INSERT INTO tournaments (name, status, current_round, require_evidence)
            VALUES ($1, 'started', 1, $2)
            RETURNING tournament_id, name, status, current_round, require_evidence, created_at
            "#,
        )
        .bind(name)
        .bind(require_evidence)
        .fetch_one(&mut *tx)
        .await?;
        let tournament = Tournament::try_from(row)?;

        let entrants: Vec<Entrant> = players
            .iter()
            .enumerate()
            .map(|(i, player_id)| Entrant {
                tournament_id: tournament.tournament_id,
                player_id: player_id.clone(),
                seed: i as i32 + 1,
            })
            .collect();

        for entrant in &entrants {
            sqlx::query(
                r#"
                INSERT INTO tournament_entrants (tournament_id, player_id, seed)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(entrant.tournament_id)
            .bind(&entrant.player_id)
            .bind(entrant.seed)
            .execute(&mut *tx)
            .await?;
        }

        let matches = crate::advance::seed_round_of_16(tournament.tournament_id, &entrants);
        for m in &matches {
            insert_match(&mut tx, m).await?;
        }

        tx.commit().await?;
        Ok((tournament, matches))
    }

    async fn get_tournament(&self, tournament_id: i32) -> Result<Option<Tournament>, Self::Error> {
        let row: Option<TournamentRow> = sqlx::query_as(
            r#"
            SELECT tournament_id, name, status, current_round, require_evidence, created_at
            FROM tournaments
            WHERE tournament_id = $1
            "#,
        )
        .bind(tournament_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Tournament::try_from).transpose()
    }

    async fn get_entrants(&self, tournament_id: i32) -> Result<Vec<Entrant>, Self::Error> {
        #[derive(FromRow)]
        struct EntrantRow {
            tournament_id: i32,
            player_id: String,
            seed: i32,
        }

        let rows: Vec<EntrantRow> = sqlx::query_as(
            r#"
            SELECT tournament_id, player_id, seed
            FROM tournament_entrants
            WHERE tournament_id = $1
            ORDER BY seed
            "#,
        )
        .bind(tournament_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Entrant {
                tournament_id: r.tournament_id,
                player_id: r.player_id,
                seed: r.seed,
            })
            .collect())
    }

    async fn set_tournament_status(
        &self,
        tournament_id: i32,
        status: TournamentStatus,
    ) -> Result<(), Self::Error> {
        sqlx::query(
            r#"
            UPDATE tournaments
            SET status = $1
            WHERE tournament_id = $2
            "#,
        )
        .bind(status.to_string())
        .bind(tournament_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

async fn insert_match(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    m: &Match,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO matches
            (match_id, tournament_id, round, home_id, away_id,
             home_score, away_score, status, token, pin, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(&m.match_id)
    .bind(m.tournament_id)
    .bind(m.round.number())
    .bind(&m.home_id)
    .bind(&m.away_id)
    .bind(m.home_score)
    .bind(m.away_score)
    .bind(m.status.to_string())
    .bind(&m.token)
    .bind(&m.pin)
    .bind(m.created_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

const MATCH_COLUMNS: &str = r#"
    match_id, tournament_id, round, home_id, away_id,
    home_score, away_score, status, token, pin, created_at
"#;

impl MatchDatabase for PgDatabase {
    type Error = AppError;

    async fn get_match(&self, match_id: &str) -> Result<Option<Match>, Self::Error> {
        let row: Option<MatchRow> = sqlx::query_as(&format!(
            "SELECT {MATCH_COLUMNS} FROM matches WHERE match_id = $1"
        ))
        .bind(match_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Match::try_from).transpose()
    }

    async fn get_matches_by_round(
        &self,
        tournament_id: i32,
        round: Round,
    ) -> Result<Vec<Match>, Self::Error> {
        let rows: Vec<MatchRow> = sqlx::query_as(&format!(
            r#"
            SELECT {MATCH_COLUMNS} FROM matches
            WHERE tournament_id = $1 AND round = $2
            ORDER BY SPLIT_PART(match_id, '.', 3)::int
            "#
        ))
        .bind(tournament_id)
        .bind(round.number())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Match::try_from).collect()
    }

    async fn get_matches_by_tournament(
        &self,
        tournament_id: i32,
    ) -> Result<Vec<Match>, Self::Error> {
        let rows: Vec<MatchRow> = sqlx::query_as(&format!(
            r#"
            SELECT {MATCH_COLUMNS} FROM matches
            WHERE tournament_id = $1
            ORDER BY round, SPLIT_PART(match_id, '.', 3)::int
            "#
        ))
        .bind(tournament_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Match::try_from).collect()
    }
}

impl SubmissionDatabase for PgDatabase {
    type Error = AppError;

    async fn record_submission(
        &self,
        submission: &NewSubmission,
        transition: Option<MatchTransition>,
    ) -> Result<Submission, Self::Error> {
        let mut tx = self.pool.begin().await?;

        let row: SubmissionRow = sqlx::query_as(
            r#"
            INSERT INTO submissions (match_id, reporter_psn, score_home, score_away, evidence_path)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, match_id, reporter_psn, score_home, score_away, evidence_path, created_at
            "#,
        )
        .bind(&submission.match_id)
        .bind(&submission.reporter_psn)
        .bind(submission.score_home)
        .bind(submission.score_away)
        .bind(&submission.evidence_path)
        .fetch_one(&mut *tx)
        .await?;

        match transition {
            Some(MatchTransition::Confirmed {
                home_score,
                away_score,
            }) => {
                sqlx::query(
                    r#"
                    UPDATE matches
                    SET home_score = $1, away_score = $2, status = 'confirmed'
                    WHERE match_id = $3
                    "#,
                )
                .bind(home_score)
                .bind(away_score)
                .bind(&submission.match_id)
                .execute(&mut *tx)
                .await?;
            }
            Some(MatchTransition::Disputed) => {
                sqlx::query(
                    r#"
                    UPDATE matches
                    SET status = 'disputed'
                    WHERE match_id = $1
                    "#,
                )
                .bind(&submission.match_id)
                .execute(&mut *tx)
                .await?;
            }
            None => {}
        }

        tx.commit().await?;
        Ok(row.into())
    }

    async fn get_submissions(&self, match_id: &str) -> Result<Vec<Submission>, Self::Error> {
        let rows: Vec<SubmissionRow> = sqlx::query_as(
            r#"
            SELECT id, match_id, reporter_psn, score_home, score_away, evidence_path, created_at
            FROM submissions
            WHERE match_id = $1
            ORDER BY id
            "#,
        )
        .bind(match_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Submission::from).collect())
    }
}

impl AdvanceDatabase for PgDatabase {
    type Error = AppError;

    async fn get_operation(
        &self,
        idempotency_key: Uuid,
    ) -> Result<Option<AdvanceOperation>, Self::Error> {
        let row: Option<OperationRow> = sqlx::query_as(
            r#"
            SELECT idempotency_key, operation_id, tournament_id, round, winners,
                   created_match_ids, created_at, reverted_at
            FROM advance_operations
            WHERE idempotency_key = $1
            "#,
        )
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AdvanceOperation::try_from).transpose()
    }

    async fn get_active_operation(
        &self,
        tournament_id: i32,
        round: Round,
    ) -> Result<Option<AdvanceOperation>, Self::Error> {
        let row: Option<OperationRow> = sqlx::query_as(
            r#"
            SELECT idempotency_key, operation_id, tournament_id, round, winners,
                   created_match_ids, created_at, reverted_at
            FROM advance_operations
            WHERE tournament_id = $1 AND round = $2 AND reverted_at IS NULL
            "#,
        )
        .bind(tournament_id)
        .bind(round.number())
        .fetch_optional(&self.pool)
        .await?;

        row.map(AdvanceOperation::try_from).transpose()
    }

    async fn try_record_advance(
        &self,
        operation: &AdvanceOperation,
        matches: &[Match],
    ) -> Result<bool, Self::Error> {
        let mut tx = self.pool.begin().await?;

        // The partial unique index on (tournament_id, round) is the claim row.
        let claimed = sqlx::query(
            r#"
            INSERT INTO advance_operations
                (idempotency_key, operation_id, tournament_id, round, winners,
                 created_match_ids, created_at, reverted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NULL)
            ON CONFLICT (tournament_id, round) WHERE reverted_at IS NULL DO NOTHING
            "#,
        )
        .bind(operation.idempotency_key)
        .bind(operation.operation_id)
        .bind(operation.tournament_id)
        .bind(operation.round.number())
        .bind(Json(&operation.winners))
        .bind(Json(&operation.created_match_ids))
        .bind(operation.created_at)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if !claimed {
            tx.rollback().await?;
            return Ok(false);
        }

        for m in matches {
            insert_match(&mut tx, m).await?;
        }

        if let Some(next) = operation.round.next() {
            sqlx::query(
                r#"
                UPDATE tournaments
                SET current_round = $1
                WHERE tournament_id = $2
                "#,
            )
            .bind(next.number())
            .bind(operation.tournament_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn revert_advance(
        &self,
        idempotency_key: Uuid,
        reverted_at: DateTime<Utc>,
    ) -> Result<(), Self::Error> {
        let mut tx = self.pool.begin().await?;

        let row: Option<OperationRow> = sqlx::query_as(
            r#"
            SELECT idempotency_key, operation_id, tournament_id, round, winners,
                   created_match_ids, created_at, reverted_at
            FROM advance_operations
            WHERE idempotency_key = $1
            FOR UPDATE
            "#,
        )
        .bind(idempotency_key)
        .fetch_optional(&mut *tx)
        .await?;
        let operation = row
            .map(AdvanceOperation::try_from)
            .transpose()?
            .ok_or_else(|| anyhow!("Advance operation {} not found", idempotency_key))?;

        sqlx::query("DELETE FROM matches WHERE match_id = ANY($1)")
            .bind(&operation.created_match_ids)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            UPDATE advance_operations
            SET reverted_at = $1
            WHERE idempotency_key = $2
            "#,
        )
        .bind(reverted_at)
        .bind(idempotency_key)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE tournaments
            SET current_round = $1
            WHERE tournament_id = $2
            "#,
        )
        .bind(operation.round.number())
        .bind(operation.tournament_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

impl AuditDatabase for PgDatabase {
    type Error = AppError;

    async fn record_override(
        &self,
        audit: &NewOverrideAudit,
    ) -> Result<OverrideAudit, Self::Error> {
        let mut tx = self.pool.begin().await?;

        let row: AuditRow = sqlx::query_as(
            r#"
            INSERT INTO override_audits
                (match_id, actor, prev_status, prev_home_score, prev_away_score,
                 home_score, away_score)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, match_id, actor, prev_status, prev_home_score, prev_away_score,
                      home_score, away_score, created_at
            "#,
        )
        .bind(&audit.match_id)
        .bind(&audit.actor)
        .bind(audit.prev_status.to_string())
        .bind(audit.prev_home_score)
        .bind(audit.prev_away_score)
        .bind(audit.home_score)
        .bind(audit.away_score)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE matches
            SET home_score = $1, away_score = $2, status = 'confirmed'
            WHERE match_id = $3
            "#,
        )
        .bind(audit.home_score)
        .bind(audit.away_score)
        .bind(&audit.match_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    async fn get_overrides(&self, match_id: &str) -> Result<Vec<OverrideAudit>, Self::Error> {
        let rows: Vec<AuditRow> = sqlx::query_as(
            r#"
            SELECT id, match_id, actor, prev_status, prev_home_score, prev_away_score,
                   home_score, away_score, created_at
            FROM override_audits
            WHERE match_id = $1
            ORDER BY id
            "#,
        )
        .bind(match_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(OverrideAudit::try_from).collect()
    }
}
