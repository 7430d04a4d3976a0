//! API REST de la radio : skip, morceau en cours, passe en cours, historique
//! récent et export M3U.
//!
//! Le skip ne répond jamais en erreur : qu'une session soit en cours ou non,
//! la requête est acquittée par une courte ligne de texte.

use crate::playback::{PlaybackStatus, PlaylistSnapshot, RecentTrack};
use crate::supervisor::{Outcome, ProcessSupervisor, SessionSnapshot, SessionState, SupervisorStatus};
use crate::track::Track;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tracing::debug;
use utoipa::OpenApi;

/// Réponse du skip quand une session a été annulée
pub const SKIP_ACK: &str = "Skip signal received! FFmpeg process terminated.";

/// Réponse du skip quand rien n'est en cours
pub const SKIP_IDLE: &str = "Nothing is playing, skip ignored.";

/// État partagé pour l'API de la radio
#[derive(Clone)]
pub struct RadioApiState {
    supervisor: Arc<ProcessSupervisor>,
    status: PlaybackStatus,
}

impl RadioApiState {
    pub fn new(supervisor: Arc<ProcessSupervisor>, status: PlaybackStatus) -> Self {
        Self { supervisor, status }
    }
}

/// Playlist M3U de la passe en cours
pub fn render_m3u(tracks: &[Track]) -> String {
    let mut out = String::from("#EXTM3U\n");
    for track in tracks {
        out.push_str(&format!(
            "#EXTINF:-1,{}\n{}\n",
            track.display_label,
            track.path.display()
        ));
    }
    out
}

/// GET|POST /skip - Annule le morceau en cours
#[utoipa::path(
    post,
    path = "/skip",
    responses(
        (status = 200, description = "Skip acquitté", body = String, content_type = "text/plain")
    ),
    tag = "Radio"
)]
pub async fn skip(State(state): State<RadioApiState>) -> impl IntoResponse {
    if state.supervisor.cancel() {
        SKIP_ACK
    } else {
        debug!("Skip requested while idle");
        SKIP_IDLE
    }
}

/// GET /current - Session en cours et dernière session terminée
#[utoipa::path(
    get,
    path = "/current",
    responses(
        (status = 200, description = "Etat de la lecture", body = SupervisorStatus)
    ),
    tag = "Radio"
)]
async fn get_current(State(state): State<RadioApiState>) -> Json<SupervisorStatus> {
    Json(state.supervisor.status())
}

/// GET /playlist - Ordre de la passe en cours
#[utoipa::path(
    get,
    path = "/playlist",
    responses(
        (status = 200, description = "Passe en cours", body = PlaylistSnapshot)
    ),
    tag = "Radio"
)]
async fn get_playlist(State(state): State<RadioApiState>) -> Json<PlaylistSnapshot> {
    Json(state.status.playlist().await)
}

/// GET /recent - Derniers morceaux joués, le plus récent en premier
#[utoipa::path(
    get,
    path = "/recent",
    responses(
        (status = 200, description = "Morceaux récents", body = Vec<RecentTrack>)
    ),
    tag = "Radio"
)]
async fn get_recent(State(state): State<RadioApiState>) -> Json<Vec<RecentTrack>> {
    Json(state.status.recent().await)
}

/// GET /playlist.m3u - Passe en cours au format M3U
#[utoipa::path(
    get,
    path = "/playlist.m3u",
    responses(
        (status = 200, description = "Playlist M3U", body = String, content_type = "audio/x-mpegurl"),
        (status = 404, description = "Playlist vide")
    ),
    tag = "Radio"
)]
async fn get_playlist_m3u(
    State(state): State<RadioApiState>,
) -> Result<impl IntoResponse, StatusCode> {
    let playlist = state.status.playlist().await;
    if playlist.sequence.is_empty() {
        return Err(StatusCode::NOT_FOUND);
    }

    Ok((
        [(header::CONTENT_TYPE, "audio/x-mpegurl")],
        render_m3u(&playlist.sequence),
    ))
}

/// Documentation OpenAPI pour l'API de la radio
#[derive(OpenApi)]
#[openapi(
    info(
        title = "PMORadio API",
        version = "1.0.0",
        description = "Contrôle et état de la radio HLS"
    ),
    paths(skip, get_current, get_playlist, get_recent, get_playlist_m3u),
    components(schemas(
        SupervisorStatus,
        SessionSnapshot,
        SessionState,
        PlaylistSnapshot,
        RecentTrack,
        Outcome,
        Track
    )),
    tags(
        (name = "Radio", description = "Lecture, skip et playlist")
    )
)]
pub struct RadioApiDoc;

/// Crée le router pour l'API de la radio
pub fn create_api_router(state: RadioApiState) -> Router {
    Router::new()
        .route("/skip", get(skip).post(skip))
        .route("/current", get(get_current))
        .route("/playlist", get(get_playlist))
        .route("/recent", get(get_recent))
        .route("/playlist.m3u", get(get_playlist_m3u))
        .with_state(state)
}
