use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, DefaultBodyLimit, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use server_api::{
    apply_batch, list_items, reorder_items, select_item, service_status, ApiContext,
};
use shared::{
    error::{ApiError, ErrorCode},
    protocol::{ItemPage, ReorderRequest, SelectRequest, StatusResponse, SuccessResponse},
};
use storage::{FileSnapshotStore, PersistenceController};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;

use app_state::AppState;
use config::{load_settings, prepare_data_file};

const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct ListItemsQuery {
    search: Option<String>,
    offset: Option<String>,
    limit: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = load_settings();
    let data_file = prepare_data_file(&settings.data_file)?;
    let sink = Arc::new(FileSnapshotStore::new(&data_file));
    let store = PersistenceController::load_at_startup(sink.as_ref(), settings.item_count).await;
    let persistence =
        PersistenceController::spawn(store.clone(), sink, settings.persistence_options());

    let api = ApiContext {
        store,
        persistence: persistence.clone(),
        reorder_strategy: settings.reorder_strategy,
        max_page_size: settings.max_page_size,
    };
    let app = build_router(Arc::new(AppState { api }));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(
        %addr,
        data_file = %data_file.display(),
        reorder_strategy = %settings.reorder_strategy,
        "server listening"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped; flushing pending changes");
    if let Err(error) = persistence.shutdown().await {
        error!(%error, "final flush failed; unsaved changes are lost");
    }
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(http_status))
        .route("/items", get(http_list_items))
        .route("/select", post(http_select))
        .route("/sort", post(http_reorder))
        .route("/batch", post(http_batch))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!(%error, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                error!(%error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn reject(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match err.code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::InvalidReference | ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err))
}

fn json_body<T>(
    payload: Result<Json<T>, JsonRejection>,
) -> Result<T, (StatusCode, Json<ApiError>)> {
    payload.map(|Json(value)| value).map_err(|rejection| {
        reject(ApiError::new(ErrorCode::Validation, rejection.body_text()))
    })
}

async fn healthz() -> &'static str {
    "ok"
}

async fn http_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(service_status(&state.api).await)
}

async fn http_list_items(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListItemsQuery>,
) -> Json<ItemPage> {
    let page = list_items(
        &state.api,
        q.search.as_deref(),
        q.offset.as_deref(),
        q.limit.as_deref(),
    )
    .await;
    Json(page)
}

async fn http_select(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SelectRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, (StatusCode, Json<ApiError>)> {
    let req = json_body(payload)?;
    let response = select_item(&state.api, req).await.map_err(reject)?;
    Ok(Json(response))
}

async fn http_reorder(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ReorderRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, (StatusCode, Json<ApiError>)> {
    let req = json_body(payload)?;
    let response = reorder_items(&state.api, req).await.map_err(reject)?;
    Ok(Json(response))
}

async fn http_batch(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<SuccessResponse>, (StatusCode, Json<ApiError>)> {
    let response = apply_batch(&state.api, &body).await.map_err(reject)?;
    Ok(Json(response))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
