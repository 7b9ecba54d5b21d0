use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::cli::ServeArgs;
use crate::embed::{EmbedCache, EmbedInfo, fetch_embed_metadata};
use crate::store::{read_json_lenient, write_json_atomic};

pub const VIEWED_FILE: &str = "viewed_state.json";

/// Local relay the dashboard talks to instead of hitting Bandcamp from
/// the browser (CORS). Serves cache-through embed metadata and the
/// viewed-release bookkeeping.
#[derive(Clone)]
struct AppState {
    data_dir: PathBuf,
    embeds: Arc<Mutex<EmbedCache>>,
    http: reqwest::Client,
}

pub async fn run(args: ServeArgs) -> anyhow::Result<()> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("build relay http client")?;

    let state = AppState {
        data_dir: args.data_dir.clone(),
        embeds: Arc::new(Mutex::new(EmbedCache::open(&args.data_dir))),
        http,
    };

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .with_context(|| format!("bind {}", args.addr))?;
    tracing::info!(addr = %args.addr, data_dir = %args.data_dir.display(), "relay listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("serve relay")?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok\n" }))
        .route("/embed-meta", get(embed_meta))
        .route("/viewed-state", get(viewed_state_get).post(viewed_state_post))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct EmbedMetaQuery {
    url: String,
}

#[derive(Debug, Serialize)]
struct EmbedMetaResponse {
    url: String,
    #[serde(flatten)]
    info: EmbedInfo,
}

async fn embed_meta(
    State(state): State<AppState>,
    Query(query): Query<EmbedMetaQuery>,
) -> Result<Json<EmbedMetaResponse>, (StatusCode, String)> {
    let url = query.url.trim().to_owned();
    if url.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "url is required".to_owned()));
    }

    let mut embeds = state.embeds.lock().await;
    if let Some(info) = embeds.get(&url).filter(|info| info.is_complete()) {
        return Ok(Json(EmbedMetaResponse {
            url,
            info: info.clone(),
        }));
    }

    let fetched = fetch_embed_metadata(&state.http, &url)
        .await
        .map_err(|err| (StatusCode::BAD_GATEWAY, format!("fetch embed metadata: {err:#}")))?;
    let info = embeds.merge(&url, fetched).clone();
    embeds
        .persist()
        .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, format!("persist embed cache: {err}")))?;

    Ok(Json(EmbedMetaResponse { url, info }))
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ViewedState {
    viewed: BTreeSet<String>,
}

async fn viewed_state_get(State(state): State<AppState>) -> Json<ViewedState> {
    let viewed = read_json_lenient(&state.data_dir.join(VIEWED_FILE)).unwrap_or_default();
    Json(ViewedState { viewed })
}

async fn viewed_state_post(
    State(state): State<AppState>,
    Json(body): Json<ViewedState>,
) -> Result<Json<ViewedState>, (StatusCode, String)> {
    write_json_atomic(&state.data_dir.join(VIEWED_FILE), &body.viewed).map_err(|err| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("persist viewed state: {err}"),
        )
    })?;
    Ok(Json(body))
}
