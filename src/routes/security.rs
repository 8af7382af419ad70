//! Security surface: remote unlock/lock, the event log, and CSV export.

use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;

use crate::error::{ApiError, ApiResult};
use crate::repos::{credentials, security as repo};
use crate::routes::{client_ip, user_agent};
use crate::services::security as service;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct UnlockRequest {
    pub passphrase: String,
}

/// Remote unlock: verify the passphrase against the stored credentials and
/// open the session. Failures feed the sliding lockout before the response
/// leaves the handler.
pub async fn unlock(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<UnlockRequest>,
) -> ApiResult<Json<Value>> {
    let ip = client_ip(&headers, &ConnectInfo(addr));
    let agent = user_agent(&headers);

    if service::is_ip_locked_out(&state.pool, &ip).await? {
        let retry_after = service::lockout_remaining_seconds(&state.pool, &ip).await?;
        return Err(ApiError::RateLimited {
            retry_after: retry_after.max(1) as u64,
        });
    }

    if payload.passphrase.is_empty() {
        return Err(ApiError::Validation("Passphrase is required".into()));
    }

    match credentials::verify_passphrase(&state.pool, &payload.passphrase).await {
        Ok(()) => {
            state.session.set(payload.passphrase.clone()).await;
            service::clear_ip_lockout(&state.pool, &ip).await?;
            service::log_event(
                &state.pool,
                service::EVENT_REMOTE_UNLOCK,
                true,
                Some(&ip),
                None,
                agent.as_deref(),
            )
            .await;

            let notes_key = credentials::notes_key(&state.pool, &payload.passphrase).await?;
            Ok(Json(json!({ "success": true, "notesKey": notes_key })))
        }
        Err(error @ ApiError::Auth(_)) => {
            let locked = service::record_failed_remote_unlock(&state.pool, &ip).await?;
            service::log_event(
                &state.pool,
                service::EVENT_UNLOCK_ATTEMPT,
                false,
                Some(&ip),
                locked.then_some("ip locked out"),
                agent.as_deref(),
            )
            .await;
            Err(error)
        }
        Err(error) => Err(error),
    }
}

pub async fn lock(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let ip = client_ip(&headers, &ConnectInfo(addr));
    state.session.clear().await;
    service::log_event(
        &state.pool,
        service::EVENT_LOGOUT,
        true,
        Some(&ip),
        None,
        user_agent(&headers).as_deref(),
    )
    .await;
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
    pub mfa_secret: Option<String>,
    pub passphrase: String,
}

pub async fn save_credentials(
    State(state): State<AppState>,
    Json(payload): Json<CredentialsRequest>,
) -> ApiResult<Json<Value>> {
    if payload.email.trim().is_empty()
        || payload.password.is_empty()
        || payload.passphrase.is_empty()
    {
        return Err(ApiError::Validation(
            "email, password, and passphrase are required".into(),
        ));
    }

    credentials::save(
        &state.pool,
        &payload.passphrase,
        &credentials::Credentials {
            email: payload.email.trim().to_string(),
            password: payload.password,
            mfa_secret: payload.mfa_secret.filter(|secret| !secret.is_empty()),
        },
    )
    .await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EventsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub event_types: Option<String>,
    pub success: Option<bool>,
}

pub async fn get_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<Value>> {
    let filter = repo::EventFilter {
        limit: query.limit.unwrap_or(50).clamp(1, 1000),
        offset: query.offset.unwrap_or(0).max(0),
        event_types: query.event_types.as_deref().map(|types| {
            types
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        }),
        success: query.success,
    };

    let (events, total) = repo::get_events(&state.pool, &filter).await?;
    Ok(Json(json!({ "events": events, "total": total })))
}

pub async fn get_summary(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let summary = repo::get_summary(&state.pool).await?;
    Ok(Json(json!(summary)))
}

pub async fn get_alerts(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let events = service::failed_since_last_login(&state.pool).await?;
    Ok(Json(json!({ "events": events })))
}

pub async fn dismiss_alerts(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    service::dismiss_security_alert(&state.pool).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn export_events(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let csv = service::export_events_csv(&state.pool).await?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"security-events.csv\"",
            ),
        ],
        csv,
    ))
}
