//! User, balance and history endpoints

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use polyradar_common::db::{analyses, users, Analysis, Transaction, User};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// GET /api/users/:wallet
pub async fn get_user(
    State(state): State<AppState>,
    Path(wallet): Path<String>,
) -> ApiResult<Json<User>> {
    users::get_user_by_wallet(&state.db, &wallet)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("User not found: {}", wallet)))
}

/// GET /api/users/:wallet/analyses
///
/// Unknown wallets have no history, so they get an empty list.
pub async fn list_user_analyses(
    State(state): State<AppState>,
    Path(wallet): Path<String>,
) -> ApiResult<Json<Vec<Analysis>>> {
    let Some(user) = users::get_user_by_wallet(&state.db, &wallet).await? else {
        return Ok(Json(Vec::new()));
    };

    Ok(Json(analyses::list_for_user(&state.db, user.id).await?))
}

/// GET /api/users/:wallet/transactions
pub async fn list_user_transactions(
    State(state): State<AppState>,
    Path(wallet): Path<String>,
) -> ApiResult<Json<Vec<Transaction>>> {
    let Some(user) = users::get_user_by_wallet(&state.db, &wallet).await? else {
        return Ok(Json(Vec::new()));
    };

    Ok(Json(users::list_transactions(&state.db, user.id).await?))
}

/// Build user routes
pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/api/users/:wallet", get(get_user))
        .route("/api/users/:wallet/analyses", get(list_user_analyses))
        .route("/api/users/:wallet/transactions", get(list_user_transactions))
}
