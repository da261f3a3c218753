use std::net::SocketAddr;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{delete, get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::{
    config::Config,
    error::{RecipeError, Result},
    scheduler::RefreshScheduler,
    service::{DeletionMode, RecipeService},
    store::{LikeOutcome, RecipeRecord, RecipeStats, RecipeSummary, UserRecord},
};

#[derive(Clone)]
struct AppState {
    service: RecipeService,
}

pub async fn run(config: Config) -> Result<()> {
    let service = RecipeService::open(&config)?;

    let scheduler = RefreshScheduler::new(
        service.clone(),
        config.refresh_interval(),
        config.refresh_timeout(),
    );
    let scheduler_handle = scheduler.spawn();

    let state = AppState {
        service: service.clone(),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/v1/users", post(create_user))
        .route("/v1/users/{user_id}", delete(delete_user))
        .route("/v1/recipes", post(create_recipe))
        .route("/v1/recipes/{recipe_id}", delete(delete_recipe))
        .route(
            "/v1/recipes/{recipe_id}/like",
            post(toggle_like).delete(unlike),
        )
        .route(
            "/v1/recipes/{recipe_id}/reviews",
            post(submit_review).patch(edit_review).delete(delete_review),
        )
        .route("/v1/recipes/{recipe_id}/stats", get(get_stats))
        .route("/v1/rankings/top-rated", get(top_rated))
        .route("/v1/rankings/trending", get(trending))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Starting tastebook server on {addr}");

    let listener = TcpListener::bind(addr).await?;
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| RecipeError::Storage(err.to_string()));

    scheduler_handle.abort();
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Runs a blocking storage operation off the async runtime, the same
/// spawn_blocking bridge used for every handler below.
async fn blocking<T, F>(operation: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(operation)
        .await
        .map_err(|err| RecipeError::Storage(format!("storage task failed: {err}")))?
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Deserialize)]
struct CreateUserRequest {
    id: Option<String>,
    display_name: String,
}

async fn create_user(
    State(state): State<AppState>,
    Json(request): Json<CreateUserRequest>,
) -> Result<Json<UserRecord>> {
    let user = UserRecord {
        id: request.id.unwrap_or_else(new_id),
        display_name: request.display_name,
        deleted: false,
        created_at: Utc::now(),
    };
    let service = state.service.clone();
    let user = blocking(move || service.add_user(user)).await?;
    Ok(Json(user))
}

#[derive(Deserialize)]
struct DeleteUserQuery {
    mode: DeleteUserMode,
}

#[derive(Deserialize, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum DeleteUserMode {
    Partial,
    Full,
}

impl From<DeleteUserMode> for DeletionMode {
    fn from(mode: DeleteUserMode) -> Self {
        match mode {
            DeleteUserMode::Partial => DeletionMode::Partial,
            DeleteUserMode::Full => DeletionMode::Full,
        }
    }
}

async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<DeleteUserQuery>,
) -> Result<Json<StatusResponse>> {
    let service = state.service.clone();
    blocking(move || service.delete_user_cascade(&user_id, query.mode.into())).await?;
    Ok(Json(StatusResponse { status: "deleted" }))
}

#[derive(Deserialize)]
struct CreateRecipeRequest {
    id: Option<String>,
    owner_id: String,
    name: String,
    image: Option<String>,
    cuisine_region: Option<String>,
    religious_restriction: Option<String>,
    dietary_restriction: Option<String>,
}

async fn create_recipe(
    State(state): State<AppState>,
    Json(request): Json<CreateRecipeRequest>,
) -> Result<Json<RecipeRecord>> {
    let recipe = RecipeRecord {
        id: request.id.unwrap_or_else(new_id),
        owner_id: request.owner_id,
        name: request.name,
        image: request.image,
        cuisine_region: request.cuisine_region,
        religious_restriction: request.religious_restriction,
        dietary_restriction: request.dietary_restriction,
        created_at: Utc::now(),
    };
    let service = state.service.clone();
    let recipe = blocking(move || service.add_recipe(recipe)).await?;
    Ok(Json(recipe))
}

async fn delete_recipe(
    State(state): State<AppState>,
    Path(recipe_id): Path<String>,
) -> Result<Json<StatusResponse>> {
    let service = state.service.clone();
    blocking(move || service.delete_recipe_cascade(&recipe_id)).await?;
    Ok(Json(StatusResponse { status: "deleted" }))
}

#[derive(Deserialize)]
struct LikeRequest {
    user_id: String,
}

#[derive(Serialize)]
struct LikeResponse {
    status: LikeOutcome,
}

async fn toggle_like(
    State(state): State<AppState>,
    Path(recipe_id): Path<String>,
    Json(request): Json<LikeRequest>,
) -> Result<Json<LikeResponse>> {
    let service = state.service.clone();
    let status = blocking(move || service.toggle_like(&request.user_id, &recipe_id)).await?;
    Ok(Json(LikeResponse { status }))
}

async fn unlike(
    State(state): State<AppState>,
    Path(recipe_id): Path<String>,
    Json(request): Json<LikeRequest>,
) -> Result<Json<StatusResponse>> {
    let service = state.service.clone();
    blocking(move || service.unlike(&request.user_id, &recipe_id)).await?;
    Ok(Json(StatusResponse { status: "unliked" }))
}

#[derive(Deserialize)]
struct SubmitReviewRequest {
    user_id: String,
    rating: u8,
    #[serde(default)]
    comment: String,
}

async fn submit_review(
    State(state): State<AppState>,
    Path(recipe_id): Path<String>,
    Json(request): Json<SubmitReviewRequest>,
) -> Result<Json<StatusResponse>> {
    let service = state.service.clone();
    blocking(move || {
        service.submit_review(&request.user_id, &recipe_id, request.rating, request.comment)
    })
    .await?;
    Ok(Json(StatusResponse { status: "added" }))
}

#[derive(Deserialize)]
struct EditReviewRequest {
    user_id: String,
    rating: Option<u8>,
    comment: Option<String>,
}

async fn edit_review(
    State(state): State<AppState>,
    Path(recipe_id): Path<String>,
    Json(request): Json<EditReviewRequest>,
) -> Result<Json<StatusResponse>> {
    let service = state.service.clone();
    blocking(move || {
        service.edit_review(&request.user_id, &recipe_id, request.rating, request.comment)
    })
    .await?;
    Ok(Json(StatusResponse { status: "updated" }))
}

#[derive(Deserialize)]
struct DeleteReviewRequest {
    user_id: String,
}

async fn delete_review(
    State(state): State<AppState>,
    Path(recipe_id): Path<String>,
    Json(request): Json<DeleteReviewRequest>,
) -> Result<Json<StatusResponse>> {
    let service = state.service.clone();
    blocking(move || service.delete_review(&request.user_id, &recipe_id)).await?;
    Ok(Json(StatusResponse { status: "deleted" }))
}

#[derive(Serialize)]
struct StatsResponse {
    recipe_id: String,
    available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<RecipeStats>,
}

async fn get_stats(
    State(state): State<AppState>,
    Path(recipe_id): Path<String>,
) -> Result<Json<StatsResponse>> {
    let service = state.service.clone();
    let lookup_id = recipe_id.clone();
    let stats = blocking(move || service.get_stats(&lookup_id)).await?;
    Ok(Json(StatsResponse {
        recipe_id,
        available: stats.is_some(),
        stats,
    }))
}

async fn top_rated(State(state): State<AppState>) -> Result<Json<Vec<RecipeSummary>>> {
    let service = state.service.clone();
    Ok(Json(blocking(move || service.get_top_rated()).await?))
}

async fn trending(State(state): State<AppState>) -> Result<Json<Vec<RecipeSummary>>> {
    let service = state.service.clone();
    Ok(Json(blocking(move || service.get_trending()).await?))
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
}
