use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, State},
    http::{HeaderMap, Method, header, request::Parts},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post, put},
};
use chrono::Utc;
use futures_util::stream::{self, Stream};
use log::{info, warn};
use nfl_api::{Game, Side, Standing};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use crate::auth::{self, MAGIC_LINK_TTL_MINUTES};
use crate::email::{self, EmailMessage, UserOutcome, templates};
use crate::error::{AppError, AppResult, success};
use crate::live::{self, LiveGames, PollSnapshot, PollerHandle};
use crate::movies::{MovieDetails, MovieSummary};
use crate::picks::{self, PhilPicks, UserPick};
use crate::state::AppState;
use crate::store::paths;
use crate::style::{TeamColorMapping, TeamStyle, default_mapping};
use crate::users::{self, ClipboardVisibility, MoviePick, SuperBowlPick, User, UserProfile};

type Shared = State<Arc<AppState>>;

/// An `{id}` path segment checked to name a single document.
///
/// Path segments arrive percent-decoded, so `%2F` is already a `/` here.
struct DocId(String);

impl<S: Send + Sync> FromRequestParts<S> for DocId {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        paths::doc_id(&id)?;
        Ok(DocId(id))
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/api/scoreboard", get(scoreboard_handler))
        .route("/api/standings", get(standings_handler))
        .route("/api/games/{id}", get(game_handler))
        .route("/api/games/{id}/stream", get(game_stream_handler))
        .route("/api/live-games", get(live_games_handler))
        .route("/api/team-color-mappings", get(mappings_handler).put(set_mappings_handler))
        .route("/api/team-color-mappings/init", post(init_mappings_handler))
        .route("/api/teams/{abbr}/style", get(team_style_handler))
        .route("/api/users", post(upsert_user_handler))
        .route("/api/users/{id}", get(profile_handler))
        .route("/api/users/{id}/movie-picks", put(movie_picks_handler))
        .route("/api/users/{id}/super-bowl-pick", put(super_bowl_pick_handler))
        .route("/api/users/{id}/notifications", put(notifications_handler))
        .route(
            "/api/users/{id}/clipboard-visibility",
            get(clipboard_handler).put(set_clipboard_handler),
        )
        .route("/api/users/{id}/picks", get(user_picks_handler).post(save_pick_handler))
        .route("/api/cron/phil-picks", post(phil_picks_handler))
        .route("/api/cron/weekly-reminder", post(weekly_reminder_handler))
        .route("/api/audience/add", post(audience_add_handler))
        .route("/api/audience/remove", post(audience_remove_handler))
        .route("/api/audience/sync", post(audience_sync_handler))
        .route("/api/auth/magic-link", post(magic_link_handler))
        .route("/api/auth/verify", get(verify_handler))
        .route("/api/movies/search", get(movie_search_handler))
        .route("/api/movies/{id}", get(movie_handler))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Games
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct WeekQuery {
    week: Option<u8>,
}

async fn scoreboard_handler(State(state): Shared, Query(q): Query<WeekQuery>) -> AppResult<Vec<Game>> {
    success(state.nfl.fetch_scoreboard(q.week).await?)
}

async fn standings_handler(State(state): Shared) -> AppResult<Vec<Standing>> {
    success(state.nfl.fetch_standings().await?)
}

async fn game_handler(State(state): Shared, Path(id): Path<String>) -> AppResult<Game> {
    success(state.nfl.fetch_game(&id).await?)
}

#[derive(Deserialize)]
struct StreamQuery {
    #[serde(default = "default_live")]
    live: bool,
}

fn default_live() -> bool {
    true
}

/// Server-sent snapshots for one game. The poller lives exactly as long as the stream.
async fn game_stream_handler(
    State(state): Shared,
    Path(id): Path<String>,
    Query(q): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let handle = PollerHandle::spawn(state.nfl.clone(), &id, q.live, state.poll_intervals());
    let receiver = handle.subscribe();
    info!("streaming game {id}");

    let snapshots = stream::unfold(Some((handle, receiver, true)), |next| async move {
        let (handle, mut receiver, first) = next?;
        if !first && receiver.changed().await.is_err() {
            return None;
        }
        let snapshot = receiver.borrow_and_update().clone();
        let finished = !snapshot.loading && !snapshot.polling;
        let event = snapshot_event(&snapshot);
        let next = (!finished).then_some((handle, receiver, false));
        Some((Ok(event), next))
    });

    Sse::new(snapshots).keep_alive(KeepAlive::default())
}

fn snapshot_event(snapshot: &PollSnapshot) -> Event {
    Event::default()
        .event("snapshot")
        .json_data(snapshot)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

async fn live_games_handler(State(state): Shared) -> AppResult<LiveGames> {
    let live = live::fetch_live_games(state.nfl.as_ref()).await?;
    if let Err(e) = live::record_live_games(state.store.as_ref(), &live).await {
        warn!("Could not record live games: {e}");
    }
    success(live)
}

// ---------------------------------------------------------------------------
// Team styles
// ---------------------------------------------------------------------------

async fn mappings_handler(State(state): Shared) -> AppResult<Vec<TeamColorMapping>> {
    let set = state.styles.mappings().await?;
    let mut mappings: Vec<_> = set.values().cloned().collect();
    mappings.sort_by(|a, b| a.abbreviation.cmp(&b.abbreviation));
    success(mappings)
}

async fn set_mappings_handler(
    State(state): Shared,
    headers: HeaderMap,
    Json(mappings): Json<Vec<TeamColorMapping>>,
) -> AppResult<usize> {
    auth::verify_cron(state.config.cron_secret.as_deref(), &headers)?;
    for mapping in &mappings {
        paths::doc_id(&mapping.abbreviation)?;
    }
    let stored = state.styles.set_mappings(mappings).await?;
    success(stored.len())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitResult {
    created: Vec<String>,
    total: usize,
}

/// Seed a mapping for every team that has none, using the contrast fallback.
async fn init_mappings_handler(State(state): Shared, headers: HeaderMap) -> AppResult<InitResult> {
    auth::verify_cron(state.config.cron_secret.as_deref(), &headers)?;
    let teams = state.nfl.fetch_teams().await?;
    let existing = state.styles.force_reload().await?;

    let mut mappings: Vec<TeamColorMapping> = existing.values().cloned().collect();
    let mut created = Vec::new();
    for team in &teams {
        if !existing.contains_key(&team.abbreviation.to_uppercase()) {
            let mapping = default_mapping(team);
            created.push(mapping.abbreviation.clone());
            mappings.push(mapping);
        }
    }

    if created.is_empty() {
        return success(InitResult { created, total: existing.len() });
    }
    let stored = state.styles.set_mappings(mappings).await?;
    info!("initialized {} team color mappings", created.len());
    success(InitResult { created, total: stored.len() })
}

async fn team_style_handler(State(state): Shared, Path(abbr): Path<String>) -> AppResult<TeamStyle> {
    let teams = state.nfl.fetch_teams().await?;
    let team = teams
        .iter()
        .find(|t| t.abbreviation.eq_ignore_ascii_case(&abbr))
        .ok_or_else(|| AppError::NotFound(format!("team {abbr}")))?;
    success(state.styles.style_for(team).await)
}

// ---------------------------------------------------------------------------
// Users and picks
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertUser {
    id: String,
    email: String,
    display_name: Option<String>,
}

#[derive(Serialize)]
struct Upserted {
    user: UserProfile,
    created: bool,
}

async fn upsert_user_handler(State(state): Shared, Json(body): Json<UpsertUser>) -> AppResult<Upserted> {
    let email = normalize_email(&body.email)?;
    paths::doc_id(&body.id)?;
    let (user, created) =
        users::upsert_user(state.store.as_ref(), &body.id, &email, body.display_name.as_deref()).await?;
    if created {
        email::welcome_new_user(&state.mailer, &email, user.display_name.as_deref(), &state.config.app_url)
            .await;
    }
    success(Upserted { user, created })
}

async fn profile_handler(State(state): Shared, DocId(id): DocId) -> AppResult<User> {
    let profile = users::get_profile(state.store.as_ref(), &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {id}")))?;
    success(User { id, profile })
}

async fn movie_picks_handler(
    State(state): Shared,
    DocId(id): DocId,
    Json(picks): Json<Vec<MoviePick>>,
) -> AppResult<usize> {
    users::set_movie_picks(state.store.as_ref(), &id, &picks).await?;
    success(picks.len())
}

async fn super_bowl_pick_handler(
    State(state): Shared,
    DocId(id): DocId,
    Json(pick): Json<Option<SuperBowlPick>>,
) -> AppResult<Option<SuperBowlPick>> {
    if pick.as_ref().is_some_and(|p| !p.is_consistent()) {
        return Err(AppError::BadRequest("winner must be one of the two finalists".into()));
    }
    users::set_super_bowl_pick(state.store.as_ref(), &id, pick.as_ref()).await?;
    success(pick)
}

#[derive(Deserialize)]
struct Notifications {
    enabled: bool,
}

async fn notifications_handler(
    State(state): Shared,
    DocId(id): DocId,
    Json(body): Json<Notifications>,
) -> AppResult<bool> {
    users::set_notifications(state.store.as_ref(), &id, body.enabled).await?;
    success(body.enabled)
}

async fn clipboard_handler(State(state): Shared, DocId(id): DocId) -> AppResult<ClipboardVisibility> {
    success(users::clipboard_visibility(state.store.as_ref(), &id).await?)
}

async fn set_clipboard_handler(
    State(state): Shared,
    DocId(id): DocId,
    Json(setting): Json<ClipboardVisibility>,
) -> AppResult<ClipboardVisibility> {
    users::set_clipboard_visibility(state.store.as_ref(), &id, setting).await?;
    success(setting)
}

async fn user_picks_handler(
    State(state): Shared,
    DocId(id): DocId,
    Query(q): Query<WeekQuery>,
) -> AppResult<Vec<UserPick>> {
    success(picks::picks_for_user(state.store.as_ref(), &id, q.week).await?)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewPick {
    game_id: String,
    side: Side,
    week: Option<u8>,
}

async fn save_pick_handler(
    State(state): Shared,
    DocId(id): DocId,
    Json(body): Json<NewPick>,
) -> AppResult<UserPick> {
    let pick = UserPick { game_id: body.game_id, side: body.side, week: body.week, picked_at: Utc::now() };
    picks::save_pick(state.store.as_ref(), &id, &pick).await?;
    success(pick)
}

// ---------------------------------------------------------------------------
// Scheduled jobs
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PhilResult {
    written: usize,
    #[serde(flatten)]
    picks: PhilPicks,
}

async fn phil_picks_handler(State(state): Shared, headers: HeaderMap) -> AppResult<PhilResult> {
    auth::verify_cron(state.config.cron_secret.as_deref(), &headers)?;
    let games = state.nfl.fetch_scoreboard(None).await?;
    let phil = picks::generate_phil_picks(&games, Utc::now());
    let written = picks::write_phil_picks(state.store.as_ref(), &phil).await?;
    success(PhilResult { written, picks: phil })
}

async fn weekly_reminder_handler(
    State(state): Shared,
    headers: HeaderMap,
    Query(q): Query<WeekQuery>,
) -> AppResult<Vec<UserOutcome>> {
    auth::verify_cron(state.config.cron_secret.as_deref(), &headers)?;
    let week = match q.week {
        Some(week) => week,
        None => state
            .nfl
            .fetch_scoreboard(None)
            .await?
            .iter()
            .find_map(|g| g.week)
            .ok_or_else(|| AppError::BadRequest("no current week; pass ?week=".into()))?,
    };
    let results =
        email::send_weekly_reminders(state.store.as_ref(), &state.mailer, week, &state.config.app_url).await?;
    success(results)
}

// ---------------------------------------------------------------------------
// Audience
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AudienceMember {
    email: String,
    first_name: Option<String>,
}

async fn audience_add_handler(State(state): Shared, Json(body): Json<AudienceMember>) -> AppResult<String> {
    let email = normalize_email(&body.email)?;
    state.mailer.add_contact(&email, body.first_name.as_deref()).await?;
    success(email)
}

async fn audience_remove_handler(State(state): Shared, Json(body): Json<AudienceMember>) -> AppResult<String> {
    let email = normalize_email(&body.email)?;
    state.mailer.remove_contact(&email).await?;
    success(email)
}

async fn audience_sync_handler(State(state): Shared, headers: HeaderMap) -> AppResult<Vec<UserOutcome>> {
    auth::verify_cron(state.config.cron_secret.as_deref(), &headers)?;
    success(email::sync_audience(state.store.as_ref(), &state.mailer).await?)
}

// ---------------------------------------------------------------------------
// Magic-link sign-in
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct MagicLinkRequest {
    email: String,
}

async fn magic_link_handler(State(state): Shared, Json(body): Json<MagicLinkRequest>) -> AppResult<bool> {
    let signer = state
        .magic_links
        .as_ref()
        .ok_or(AppError::Misconfigured("MAGIC_LINK_SECRET"))?;
    let email = normalize_email(&body.email)?;
    let token = signer.issue(&email, Utc::now())?;
    let link = format!("{}/auth/verify?token={token}", state.config.app_url.trim_end_matches('/'));
    state
        .mailer
        .send(&EmailMessage::new(&email, templates::magic_link(&link, MAGIC_LINK_TTL_MINUTES)))
        .await?;
    success(true)
}

#[derive(Deserialize)]
struct VerifyQuery {
    token: String,
}

#[derive(Serialize)]
struct Verified {
    email: String,
}

async fn verify_handler(State(state): Shared, Query(q): Query<VerifyQuery>) -> AppResult<Verified> {
    let signer = state
        .magic_links
        .as_ref()
        .ok_or(AppError::Misconfigured("MAGIC_LINK_SECRET"))?;
    success(Verified { email: signer.verify(&q.token, Utc::now())? })
}

// ---------------------------------------------------------------------------
// Movies
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    query: String,
}

async fn movie_search_handler(State(state): Shared, Query(q): Query<SearchQuery>) -> AppResult<Vec<MovieSummary>> {
    success(state.movies.search(&q.query).await?)
}

async fn movie_handler(State(state): Shared, Path(id): Path<u64>) -> AppResult<MovieDetails> {
    success(state.movies.details(id).await?)
}

fn normalize_email(raw: &str) -> Result<String, AppError> {
    let email = raw.trim().to_lowercase();
    match email.split_once('@') {
        Some((user, domain)) if !user.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(AppError::BadRequest(format!("invalid email address: {raw:?}"))),
    }
}
