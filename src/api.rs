use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use socketioxide::extract::{Data, SocketRef};
use socketioxide::SocketIo;
use tracing::{error, warn};
use uuid::Uuid;

use crate::advance::{self, Advancer, ConfirmOutcome, Pairing, RoundState};
use crate::dispute;
use crate::error::Error;
use crate::events::EventBus;
use crate::presence::{PresenceEntry, PresenceTracker};
use crate::reconcile::{Reconciler, SubmitOutcome, SubmitRequest};
use crate::store::models::{Evidence, Match, Principal, Round, Tournament};
use crate::store::{MatchDatabase, PgDatabase, TournamentDatabase};

/// Everything a request handler needs, cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<PgDatabase>,
    pub reconciler: Arc<Reconciler>,
    pub advancer: Arc<Advancer>,
    pub presence: Arc<PresenceTracker>,
    pub events: EventBus,
    pub admin_key: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::InvalidToken | Error::InvalidPin => StatusCode::UNAUTHORIZED,
            Error::Forbidden => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::DuplicateOperation
            | Error::AlreadyInProgress(_)
            | Error::RevertWindowExpired => StatusCode::CONFLICT,
            Error::EvidenceRequired(_)
            | Error::OddWinnerCount(_)
            | Error::EmptyWinnerSet
            | Error::UnconfirmedWinner(_)
            | Error::DuplicateWinner(_)
            | Error::DuplicateEntrant(_)
            | Error::InvalidEntrantCount(_)
            | Error::SeedCountMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Internal(e) => {
                error!("Internal error while handling request: {:?}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(json!({ "error": self.kind(), "reason": self.to_string() }));
        (status, body).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/matches/:match_id/submit", post(submit_result))
        .route("/matches/:match_id/override", post(override_match))
        .route("/tournaments", post(create_tournament))
        .route("/tournaments/:tournament_id/matches", get(list_matches))
        .route(
            "/tournaments/:tournament_id/advance/preview",
            post(preview_advance),
        )
        .route(
            "/tournaments/:tournament_id/advance/confirm",
            post(confirm_advance),
        )
        .route(
            "/tournaments/:tournament_id/advance/revert",
            post(revert_advance),
        )
        .route("/presence", get(presence_snapshot))
        .with_state(state)
}

/// The admin key is a single shared secret; whoever presents it acts as the
/// tournament marshal. An empty configured key disables admin access entirely.
fn principal_from(headers: &HeaderMap, admin_key: &str) -> Principal {
    match headers.get("x-admin-key").and_then(|v| v.to_str().ok()) {
        Some(presented) if !admin_key.is_empty() && presented == admin_key => {
            Principal::admin("admin")
        }
        _ => Principal::anonymous(),
    }
}

fn require_admin(headers: &HeaderMap, admin_key: &str) -> Result<Principal, Error> {
    let principal = principal_from(headers, admin_key);
    if !principal.is_admin() {
        return Err(Error::Forbidden);
    }
    Ok(principal)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitBody {
    reporter_psn: String,
    score_home: i32,
    score_away: i32,
    pin: String,
    evidence: Option<Evidence>,
}

async fn submit_result(
    State(state): State<AppState>,
    Path(match_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SubmitBody>,
) -> Result<Json<SubmitOutcome>, Error> {
    let token = headers
        .get("x-match-token")
        .and_then(|v| v.to_str().ok())
        .ok_or(Error::InvalidToken)?
        .to_string();

    let outcome = state
        .reconciler
        .submit(
            &*state.db,
            &state.events,
            SubmitRequest {
                match_id,
                token,
                reporter_psn: body.reporter_psn,
                score_home: body.score_home,
                score_away: body.score_away,
                pin: body.pin,
                evidence: body.evidence,
            },
        )
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OverrideBody {
    home_score: i32,
    away_score: i32,
}

async fn override_match(
    State(state): State<AppState>,
    Path(match_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<OverrideBody>,
) -> Result<Json<Match>, Error> {
    let principal = principal_from(&headers, &state.admin_key);
    let updated = dispute::override_result(
        &*state.db,
        &state.events,
        &match_id,
        body.home_score,
        body.away_score,
        &principal,
    )
    .await?;
    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTournamentBody {
    name: String,
    players: Vec<String>,
    #[serde(default)]
    require_evidence: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTournamentResponse {
    tournament: Tournament,
    /// Full match rows, tokens and pins included, so the marshal can hand
    /// credentials to the players.
    matches: Vec<Match>,
}

async fn create_tournament(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateTournamentBody>,
) -> Result<(StatusCode, Json<CreateTournamentResponse>), Error> {
    let principal = principal_from(&headers, &state.admin_key);
    let (tournament, matches) = advance::create_tournament(
        &*state.db,
        &body.name,
        &body.players,
        body.require_evidence,
        &principal,
    )
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateTournamentResponse {
            tournament,
            matches,
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct MatchesQuery {
    round: Option<Round>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MatchListResponse {
    matches: Vec<Match>,
    #[serde(skip_serializing_if = "Option::is_none")]
    round_state: Option<RoundState>,
}

/// Match rows carry their tokens and pins, so listing is marshal-only.
async fn list_matches(
    State(state): State<AppState>,
    Path(tournament_id): Path<i32>,
    headers: HeaderMap,
    Query(query): Query<MatchesQuery>,
) -> Result<Json<MatchListResponse>, Error> {
    require_admin(&headers, &state.admin_key)?;
    state
        .db
        .get_tournament(tournament_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Tournament {}", tournament_id)))?;

    let (matches, round_state) = match query.round {
        Some(round) => (
            state.db.get_matches_by_round(tournament_id, round).await?,
            Some(advance::round_state(&*state.db, tournament_id, round).await?),
        ),
        None => (
            state.db.get_matches_by_tournament(tournament_id).await?,
            None,
        ),
    };
    Ok(Json(MatchListResponse {
        matches,
        round_state,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreviewBody {
    round: Round,
    winners: Vec<String>,
    seeds: Option<Vec<i32>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PreviewResponse {
    matches: Vec<Pairing>,
}

async fn preview_advance(
    State(state): State<AppState>,
    Path(tournament_id): Path<i32>,
    Json(body): Json<PreviewBody>,
) -> Result<Json<PreviewResponse>, Error> {
    let matches = state
        .advancer
        .preview(
            &*state.db,
            tournament_id,
            body.round,
            &body.winners,
            body.seeds.as_deref(),
        )
        .await?;
    Ok(Json(PreviewResponse { matches }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmBody {
    round: Round,
    winners: Vec<String>,
    idempotency_key: Uuid,
}

async fn confirm_advance(
    State(state): State<AppState>,
    Path(tournament_id): Path<i32>,
    headers: HeaderMap,
    Json(body): Json<ConfirmBody>,
) -> Result<Json<ConfirmOutcome>, Error> {
    require_admin(&headers, &state.admin_key)?;
    let outcome = state
        .advancer
        .confirm(
            &*state.db,
            &state.events,
            tournament_id,
            body.round,
            &body.winners,
            body.idempotency_key,
        )
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RevertBody {
    idempotency_key: Uuid,
}

async fn revert_advance(
    State(state): State<AppState>,
    Path(_tournament_id): Path<i32>,
    headers: HeaderMap,
    Json(body): Json<RevertBody>,
) -> Result<Json<serde_json::Value>, Error> {
    require_admin(&headers, &state.admin_key)?;
    state
        .advancer
        .revert(&*state.db, &state.events, body.idempotency_key)
        .await?;
    Ok(Json(json!({ "ok": true })))
}

async fn presence_snapshot(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<PresenceEntry>>, Error> {
    require_admin(&headers, &state.admin_key)?;
    Ok(Json(state.presence.snapshot().await))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PresenceAuth {
    user_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatPayload {
    #[serde(default)]
    activity: bool,
}

/// Registers the `/presence` socket.io namespace.
///
/// The connect auth payload names the user; the connection id stays captured in
/// the per-socket handlers, so a socket can only ever heartbeat or drop itself.
pub fn register_presence(io: &SocketIo, presence: Arc<PresenceTracker>) {
    let io_handle = io.clone();
    io.ns(
        "/presence",
        move |socket: SocketRef, Data(auth): Data<PresenceAuth>| {
            let tracker = presence.clone();
            let io_handle = io_handle.clone();
            async move {
                let conn_id = tracker.connect(&auth.user_id).await;
                broadcast_presence(&io_handle, &tracker).await;

                let hb_tracker = tracker.clone();
                socket.on(
                    "heartbeat",
                    move |_s: SocketRef, Data(payload): Data<HeartbeatPayload>| {
                        let tracker = hb_tracker.clone();
                        async move {
                            tracker.heartbeat(conn_id, payload.activity).await;
                        }
                    },
                );

                socket.on_disconnect(move |_s: SocketRef| {
                    let tracker = tracker.clone();
                    let io_handle = io_handle.clone();
                    async move {
                        tracker.disconnect(conn_id).await;
                        broadcast_presence(&io_handle, &tracker).await;
                    }
                });
            }
        },
    );
}

async fn broadcast_presence(io: &SocketIo, tracker: &PresenceTracker) {
    let snapshot = tracker.snapshot().await;
    if let Some(ns) = io.of("/presence") {
        if let Err(e) = ns.emit("presence:update", snapshot) {
            warn!("Failed to broadcast presence update: {}", e);
        }
    }
}

/// Fans domain events out to connected presence clients as `bracket:update`.
pub fn spawn_event_forwarder(io: SocketIo, events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(ns) = io.of("/presence") {
                        if let Err(e) = ns.emit("bracket:update", &event) {
                            warn!("Failed to forward domain event: {}", e);
                        }
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event forwarder lagged, skipped {} events", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
