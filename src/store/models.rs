use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// A round of the 16-player single-elimination bracket.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Round {
    R16,
    Qf,
    Sf,
    F,
}

impl Round {
    /// The numeric round used in composite match ids and storage.
    pub fn number(self) -> i32 {
        match self {
            Round::R16 => 1,
            Round::Qf => 2,
            Round::Sf => 3,
            Round::F => 4,
        }
    }

    pub fn from_number(n: i32) -> Option<Round> {
        match n {
            1 => Some(Round::R16),
            2 => Some(Round::Qf),
            3 => Some(Round::Sf),
            4 => Some(Round::F),
            _ => None,
        }
    }

    /// The round the winners advance into. `None` after the final.
    pub fn next(self) -> Option<Round> {
        Round::from_number(self.number() + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "snake_case")]
pub enum MatchStatus {
    Pending,
    Confirmed,
    Disputed,
}

/// A match within a tournament.
///
/// The id is the composite string `"{tournament}.{round}.{sequence}"`. The
/// `(home_id, away_id)` pair is immutable once assigned; only scores and status
/// change afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub match_id: String,
    pub tournament_id: i32,
    pub round: Round,
    pub home_id: Option<String>,
    pub away_id: Option<String>,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub status: MatchStatus,
    /// Unguessable bearer capability scoped to exactly this match.
    pub token: String,
    /// Short secret shown to both players before play; attests presence.
    pub pin: String,
    pub created_at: DateTime<Utc>,
}

impl Match {
    pub fn new(
        tournament_id: i32,
        round: Round,
        sequence_in_round: i32,
        home_id: Option<String>,
        away_id: Option<String>,
    ) -> Self {
        Self {
            match_id: Self::generate_id(tournament_id, round, sequence_in_round),
            tournament_id,
            round,
            home_id,
            away_id,
            home_score: None,
            away_score: None,
            status: MatchStatus::Pending,
            token: Uuid::new_v4().to_string(),
            pin: generate_pin(),
            created_at: Utc::now(),
        }
    }

    pub fn generate_id(tournament_id: i32, round: Round, sequence_in_round: i32) -> String {
        format!("{}.{}.{}", tournament_id, round.number(), sequence_in_round)
    }

    pub fn has_result(&self) -> bool {
        self.home_score.is_some() && self.away_score.is_some()
    }

    /// The player id that won this match, if it is confirmed with a decisive score.
    pub fn winner_id(&self) -> Option<&str> {
        if self.status != MatchStatus::Confirmed {
            return None;
        }
        match (self.home_score?, self.away_score?) {
            (h, a) if h > a => self.home_id.as_deref(),
            (h, a) if h < a => self.away_id.as_deref(),
            _ => None,
        }
    }
}

/// Six digits, generated once per match and displayed to both players.
pub fn generate_pin() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

/// An accepted score report from one of the two match participants.
///
/// Append-only: rows are never edited or deleted, and rejected reports are never
/// persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: i64,
    pub match_id: String,
    pub reporter_psn: String,
    pub score_home: i32,
    pub score_away: i32,
    pub evidence_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub match_id: String,
    pub reporter_psn: String,
    pub score_home: i32,
    pub score_away: i32,
    pub evidence_path: Option<String>,
}

/// A reference to uploaded proof. Storage of the blob itself is an external
/// collaborator concern; only the path and the basic constraints live here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    pub path: String,
    pub content_type: String,
    pub size_bytes: i64,
}

/// A status transition applied together with the submission that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTransition {
    Confirmed { home_score: i32, away_score: i32 },
    Disputed,
}

/// The idempotency and undo ledger for round advancement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceOperation {
    pub idempotency_key: Uuid,
    pub operation_id: Uuid,
    pub tournament_id: i32,
    pub round: Round,
    pub winners: Vec<String>,
    pub created_match_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub reverted_at: Option<DateTime<Utc>>,
}

/// An immutable record of an admin decree on a match result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideAudit {
    pub id: i64,
    pub match_id: String,
    pub actor: String,
    pub prev_status: MatchStatus,
    pub prev_home_score: Option<i32>,
    pub prev_away_score: Option<i32>,
    pub home_score: i32,
    pub away_score: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOverrideAudit {
    pub match_id: String,
    pub actor: String,
    pub prev_status: MatchStatus,
    pub prev_home_score: Option<i32>,
    pub prev_away_score: Option<i32>,
    pub home_score: i32,
    pub away_score: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "snake_case")]
pub enum TournamentStatus {
    Started,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tournament {
    pub tournament_id: i32,
    pub name: String,
    pub status: TournamentStatus,
    pub current_round: i32,
    /// Per-tournament submission policy: when set, a submission without valid
    /// evidence is rejected.
    pub require_evidence: bool,
    pub created_at: DateTime<Utc>,
}

/// A player entered into a tournament, with their fixed bracket seed (1..=16).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entrant {
    pub tournament_id: i32,
    pub player_id: String,
    pub seed: i32,
}

/// The identity injected by the external session collaborator.
///
/// The core trusts this blindly; establishing it is out of scope.
#[derive(Debug, Clone)]
pub struct Principal {
    pub name: String,
    pub admin: bool,
}

impl Principal {
    pub fn admin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            admin: true,
        }
    }

    pub fn anonymous() -> Self {
        Self {
            name: "anonymous".to_string(),
            admin: false,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.admin
    }
}
