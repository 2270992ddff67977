use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::{Authenticator, authenticate};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{
    Choice, ExportVote, HistoryEntry, NewStatementRequest, NextStatement, Statement,
    StatementId, StatementStats, Submission, Tally, VoteRequest,
};
use crate::pages;
use crate::store::Store;

// ===== App State =====

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub auth: Authenticator,
}

impl AppState {
    pub fn new(store: Store, auth: Authenticator) -> Self {
        Self {
            store: Arc::new(store),
            auth,
        }
    }

    pub async fn from_config(config: &Config) -> Result<Self> {
        let store = Store::from_config(config).await?;
        Ok(Self::new(store, Authenticator::from_config(&config.auth)))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/statements", post(create_statement))
        .route("/api/statements/next", get(next_statement))
        .route("/api/statements/:id", get(get_statement))
        .route("/api/statements/:id/tally", get(get_tally))
        .route("/api/statements/:id/vote", get(my_vote).post(submit_vote))
        .route("/api/statements/:id/subscribe", post(subscribe))
        .route("/api/subscriptions", get(subscriptions))
        .route("/api/history", get(vote_history))
        .route("/api/submissions", get(submissions))
        // TODO: protect once admin roles exist on the auth provider.
        .route("/admin/stats", get(get_stats))
        .route("/admin/export", get(export_votes))
        .route("/statement/:id", get(pages::statement_page))
        .route("/statement/:id/chart", get(pages::statement_chart))
        .route("/subscriptions", get(pages::subscriptions_page))
        .route("/history", get(pages::history_page))
        .route("/submissions", get(pages::submissions_page))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

// ===== Handlers =====

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.health().await {
        Ok(()) => Json(serde_json::json!({
            "status": "ok",
            "store": state.store.kind(),
        })),
        Err(_) => Json(serde_json::json!({
            "status": "error",
            "store": state.store.kind(),
        })),
    }
}

async fn create_statement(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<NewStatementRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Statement>), AppError> {
    let author = authenticate(&state, &headers).await?;
    let Json(req) = payload?;
    let statement = state.store.create_statement(Some(&author), &req.text).await?;
    Ok((StatusCode::CREATED, Json(statement)))
}

async fn next_statement(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<NextStatement>, AppError> {
    let voter = authenticate(&state, &headers).await?;
    Ok(Json(state.store.next_statement(&voter).await?))
}

async fn get_statement(
    State(state): State<AppState>,
    Path(id): Path<StatementId>,
) -> Result<Json<Statement>, AppError> {
    Ok(Json(state.store.get_statement(id).await?))
}

async fn get_tally(
    State(state): State<AppState>,
    Path(id): Path<StatementId>,
) -> Result<Json<Tally>, AppError> {
    Ok(Json(state.store.get_tally(id).await?))
}

async fn submit_vote(
    State(state): State<AppState>,
    Path(id): Path<StatementId>,
    headers: HeaderMap,
    payload: Result<Json<VoteRequest>, JsonRejection>,
) -> Result<Json<Tally>, AppError> {
    let voter = authenticate(&state, &headers).await?;
    // rejected before the vote is written
    let Json(vote_req) = payload?;
    let choice = vote_req.choice.parse::<Choice>()?;
    Ok(Json(state.store.record_vote(id, &voter, choice).await?))
}

async fn my_vote(
    State(state): State<AppState>,
    Path(id): Path<StatementId>,
    headers: HeaderMap,
) -> Result<Json<Option<Choice>>, AppError> {
    let voter = authenticate(&state, &headers).await?;
    state.store.get_statement(id).await?;
    Ok(Json(state.store.current_vote(id, &voter).await?))
}

async fn subscribe(
    State(state): State<AppState>,
    Path(id): Path<StatementId>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let voter = authenticate(&state, &headers).await?;
    state.store.subscribe(&voter, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn subscriptions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Statement>>, AppError> {
    let voter = authenticate(&state, &headers).await?;
    Ok(Json(state.store.subscriptions(&voter).await?))
}

async fn vote_history(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<HistoryEntry>>, AppError> {
    let voter = authenticate(&state, &headers).await?;
    Ok(Json(state.store.vote_history(&voter).await?))
}

async fn submissions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Submission>>, AppError> {
    let voter = authenticate(&state, &headers).await?;
    Ok(Json(state.store.submissions(&voter).await?))
}

async fn get_stats(State(state): State<AppState>) -> Result<Json<Vec<StatementStats>>, AppError> {
    Ok(Json(state.store.stats().await?))
}

async fn export_votes(State(state): State<AppState>) -> Result<Json<Vec<ExportVote>>, AppError> {
    Ok(Json(state.store.export().await?))
}
