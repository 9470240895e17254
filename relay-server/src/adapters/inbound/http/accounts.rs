// relay-server/src/adapters/inbound/http/accounts.rs
//
// REST endpoints over the account monitor: views, snapshots and the
// operator actions (copy override, unlink, merge).

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::domain::models::{AccountKey, AccountSnapshot, AccountsView, InvalidAccountKey, Role};

use super::{api_key, ApiResult, AppState, ProblemDetails};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetEnabledRequest {
    pub role: Role,
    pub enabled: bool,
}

/// Merge request; keys are written `PLATFORM:accountId`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRequest {
    pub from: String,
    pub into: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Grouped view of every account for the caller's API key
pub async fn get_accounts(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<AccountsView>> {
    let api_key = api_key(&headers)?;
    let view = state.monitor.view(&api_key).await?;
    tracing::debug!(accounts = view.len(), "Accounts view served");
    Ok(Json(view))
}

/// Raw file-derived snapshots, without registry data
pub async fn get_snapshots(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<AccountSnapshot>>> {
    let api_key = api_key(&headers)?;
    Ok(Json(state.monitor.snapshots(&api_key).await?))
}

pub async fn set_enabled(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(account_id): Path<String>,
    Json(request): Json<SetEnabledRequest>,
) -> ApiResult<Json<AccountsView>> {
    let api_key = api_key(&headers)?;
    let view = state
        .monitor
        .set_enabled(&api_key, &account_id, request.role, request.enabled)
        .await
        .map_err(|e| {
            ProblemDetails::from(e).with_instance(format!("/api/accounts/{}/enabled", account_id))
        })?;
    Ok(Json(view))
}

pub async fn remove_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(account): Path<String>,
) -> ApiResult<Json<AccountsView>> {
    let api_key = api_key(&headers)?;
    let key = parse_key(&account)?;

    let view = state
        .monitor
        .remove_account(&api_key, &key)
        .await
        .map_err(|e| ProblemDetails::from(e).with_instance(format!("/api/accounts/{}", key)))?;
    Ok(Json(view))
}

pub async fn merge_accounts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<MergeRequest>,
) -> ApiResult<Json<AccountsView>> {
    let api_key = api_key(&headers)?;
    let from = parse_key(&request.from)?;
    let into = parse_key(&request.into)?;

    let view = state.monitor.merge_accounts(&api_key, &from, &into).await?;
    Ok(Json(view))
}

fn parse_key(raw: &str) -> ApiResult<AccountKey> {
    raw.parse()
        .map_err(|e: InvalidAccountKey| ProblemDetails::validation_error(e.to_string()))
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("BUILD_INFO").to_string(),
    })
}
