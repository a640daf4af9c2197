//! HTTP surface of the COA Registry Service
//!
//! The seven state-transition operations are POST endpoints taking a
//! `SignedRequest` envelope; the caller principal is derived from the
//! verified signature before the core registry runs. Read endpoints are
//! unauthenticated.

use std::sync::Arc;

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;

use crate::auth::verify_signed_request;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::types::*;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health & stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        // Registry singleton
        .route("/registry/initialize", post(initialize))
        .route("/registry/config", get(get_config))
        // Onboarding & membership
        .route("/onboard", post(onboard))
        .route("/wallets/add", post(add_authorized_wallet))
        .route("/wallets/remove", post(remove_authorized_wallet))
        .route("/ownership/transfer", post(transfer_primary_ownership))
        .route("/ownership/set", post(set_new_primary_ownership))
        .route("/leave", post(leave_coa_account))
        // Lookups
        .route("/account/:wallet", get(get_account))
        .route("/group/:coa_user_id", get(get_group))
        // Event stream
        .route("/events", get(events_handler))
        .with_state(state)
}

/// Verify the envelope and hand back the authenticated caller.
fn authenticate<T: Serialize>(state: &AppState, req: &SignedRequest<T>) -> ApiResult<PrincipalId> {
    verify_signed_request(req, &state.nonces, state.config.max_clock_skew)
}

// ============ Health Endpoints ============

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(ApiResponse::success(state.health().await))
}

async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(ApiResponse::success(state.registry.stats().await))
}

// ============ Registry Singleton ============

async fn initialize(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignedRequest<InitializeRequest>>,
) -> ApiResult<impl IntoResponse> {
    let caller = authenticate(&state, &req)?;
    let config = state.initialize(&caller).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(ConfigResponse::from(&config))),
    ))
}

async fn get_config(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let config = state
        .registry
        .config()
        .await
        .ok_or_else(|| ApiError::NotFound("Registry is not initialized".into()))?;
    Ok(Json(ApiResponse::success(ConfigResponse::from(&config))))
}

// ============ Membership Operations ============

async fn onboard(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignedRequest<OnboardRequest>>,
) -> ApiResult<impl IntoResponse> {
    let caller = authenticate(&state, &req)?;
    let account = state.onboard(&caller).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(AccountResponse::from(&account))),
    ))
}

async fn add_authorized_wallet(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignedRequest<AddWalletRequest>>,
) -> ApiResult<impl IntoResponse> {
    let caller = authenticate(&state, &req)?;
    let account = state
        .add_authorized_wallet(&caller, &req.payload.wallet)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(AccountResponse::from(&account))),
    ))
}

async fn remove_authorized_wallet(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignedRequest<RemoveWalletRequest>>,
) -> ApiResult<impl IntoResponse> {
    let caller = authenticate(&state, &req)?;
    let account = state
        .remove_authorized_wallet(&caller, &req.payload.wallet)
        .await?;
    Ok(Json(ApiResponse::success(AccountResponse::from(&account))))
}

async fn transfer_primary_ownership(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignedRequest<TransferOwnershipRequest>>,
) -> ApiResult<impl IntoResponse> {
    let caller = authenticate(&state, &req)?;
    let transfer = state
        .transfer_primary_ownership(&caller, &req.payload.new_primary)
        .await?;
    Ok(Json(ApiResponse::success(transfer)))
}

async fn set_new_primary_ownership(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignedRequest<TransferOwnershipRequest>>,
) -> ApiResult<impl IntoResponse> {
    let caller = authenticate(&state, &req)?;
    let transfer = state
        .set_new_primary_ownership(&caller, &req.payload.new_primary)
        .await?;
    Ok(Json(ApiResponse::success(transfer)))
}

async fn leave_coa_account(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignedRequest<LeaveRequest>>,
) -> ApiResult<impl IntoResponse> {
    let caller = authenticate(&state, &req)?;
    let account = state.leave_coa_account(&caller).await?;
    Ok(Json(ApiResponse::success(AccountResponse::from(&account))))
}

// ============ Lookups ============

async fn get_account(
    State(state): State<Arc<AppState>>,
    Path(wallet): Path<PrincipalId>,
) -> ApiResult<impl IntoResponse> {
    let account = state
        .registry
        .get_account(&wallet)
        .await
        .ok_or_else(|| ApiError::NotFound("Wallet not found".into()))?;
    Ok(Json(ApiResponse::success(AccountResponse::from(&account))))
}

async fn get_group(
    State(state): State<Arc<AppState>>,
    Path(coa_user_id): Path<CoaUserId>,
) -> ApiResult<impl IntoResponse> {
    let primary = state
        .registry
        .group_primary(coa_user_id)
        .await
        .ok_or_else(|| ApiError::NotFound("Group not found".into()))?;
    Ok(Json(ApiResponse::success(AccountResponse::from(&primary))))
}

// ============ Event Stream ============

async fn events_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_events_socket(socket, state))
}

/// Forward registry events to the connected observer until either side
/// closes. Incoming frames are drained and ignored except for close.
async fn handle_events_socket(socket: axum::extract::ws::WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.events.subscribe();

    let send_task = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(_) => continue,
            };
            if sender
                .send(axum::extract::ws::Message::Text(json))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        if let axum::extract::ws::Message::Close(_) = msg {
            break;
        }
    }

    send_task.abort();
}
