//! /refunds/* endpoints for tracking purchases awaiting refunds.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::repos::refunds as repo;
use crate::routes::sanitize_name;
use crate::services::refunds as service;
use crate::state::AppState;

/// Distinguish "field absent" from "field explicitly null" in PATCH bodies.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

pub async fn get_config(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let config = repo::get_config(&state.pool).await?;
    Ok(Json(json!(crate::models::RefundsConfigDto::from(config))))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConfigRequest {
    #[serde(default, deserialize_with = "double_option")]
    pub replacement_tag_id: Option<Option<String>>,
    pub replace_tag_by_default: Option<bool>,
    pub aging_warning_days: Option<i64>,
    pub show_badge: Option<bool>,
    pub hide_matched_transactions: Option<bool>,
    pub hide_expected_transactions: Option<bool>,
}

pub async fn update_config(
    State(state): State<AppState>,
    Json(payload): Json<UpdateConfigRequest>,
) -> ApiResult<Json<Value>> {
    if let Some(days) = payload.aging_warning_days {
        if days < 0 {
            return Err(ApiError::Validation("agingWarningDays must be non-negative".into()));
        }
    }
    repo::update_config(
        &state.pool,
        repo::ConfigUpdate {
            replacement_tag_id: payload.replacement_tag_id,
            replace_tag_by_default: payload.replace_tag_by_default,
            aging_warning_days: payload.aging_warning_days,
            show_badge: payload.show_badge,
            hide_matched_transactions: payload.hide_matched_transactions,
            hide_expected_transactions: payload.hide_expected_transactions,
        },
    )
    .await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn get_pending_count(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let pending = service::get_pending_count(&state.pool, state.upstream.as_ref()).await?;
    Ok(Json(json!(pending)))
}

pub async fn get_tags(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let tags = state.upstream.list_tags().await?;
    Ok(Json(json!({ "tags": tags })))
}

// === Saved views ===

pub async fn get_views(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let views = repo::get_views(&state.pool).await?;
    let views: Vec<_> = views.iter().map(service::view_to_dto).collect();
    Ok(Json(json!({ "views": views })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateViewRequest {
    pub name: String,
    #[serde(default)]
    pub tag_ids: Vec<String>,
    pub category_ids: Option<Vec<String>>,
}

pub async fn create_view(
    State(state): State<AppState>,
    Json(payload): Json<CreateViewRequest>,
) -> ApiResult<Json<Value>> {
    let name = sanitize_name(&payload.name);
    if name.is_empty() {
        return Err(ApiError::Validation("Name is required".into()));
    }
    let has_tags = !payload.tag_ids.is_empty();
    let has_categories = payload
        .category_ids
        .as_ref()
        .is_some_and(|ids| !ids.is_empty());
    if !has_tags && !has_categories {
        return Err(ApiError::Validation(
            "At least one tag or category is required".into(),
        ));
    }

    let tag_ids_json =
        serde_json::to_string(&payload.tag_ids).map_err(|e| ApiError::Internal(e.to_string()))?;
    let category_ids_json = match &payload.category_ids {
        Some(ids) if !ids.is_empty() => {
            Some(serde_json::to_string(ids).map_err(|e| ApiError::Internal(e.to_string()))?)
        }
        _ => None,
    };

    let view =
        repo::create_view(&state.pool, &name, &tag_ids_json, category_ids_json.as_deref()).await?;
    Ok(Json(json!(service::view_to_dto(&view))))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateViewRequest {
    pub name: Option<String>,
    pub tag_ids: Option<Vec<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub category_ids: Option<Option<Vec<String>>>,
    pub sort_order: Option<i64>,
    pub exclude_from_all: Option<bool>,
}

pub async fn update_view(
    State(state): State<AppState>,
    Path(view_id): Path<String>,
    Json(payload): Json<UpdateViewRequest>,
) -> ApiResult<Json<Value>> {
    let name = payload.name.as_deref().map(sanitize_name);
    let tag_ids_json = match &payload.tag_ids {
        Some(ids) => {
            Some(serde_json::to_string(ids).map_err(|e| ApiError::Internal(e.to_string()))?)
        }
        None => None,
    };
    let category_ids_json = match &payload.category_ids {
        Some(Some(ids)) if !ids.is_empty() => Some(Some(
            serde_json::to_string(ids).map_err(|e| ApiError::Internal(e.to_string()))?,
        )),
        Some(_) => Some(None),
        None => None,
    };

    let updated = repo::update_view(
        &state.pool,
        &view_id,
        repo::ViewUpdate {
            name,
            tag_ids_json,
            category_ids_json,
            sort_order: payload.sort_order,
            exclude_from_all: payload.exclude_from_all,
        },
    )
    .await?;

    if !updated {
        return Err(ApiError::NotFound("View not found".into()));
    }
    Ok(Json(json!({ "success": true })))
}

pub async fn delete_view(
    State(state): State<AppState>,
    Path(view_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let deleted = repo::delete_view(&state.pool, &view_id).await?;
    Ok(Json(json!({ "success": deleted })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderViewsRequest {
    #[serde(default)]
    pub view_ids: Vec<String>,
}

pub async fn reorder_views(
    State(state): State<AppState>,
    Json(payload): Json<ReorderViewsRequest>,
) -> ApiResult<Json<Value>> {
    repo::reorder_views(&state.pool, &payload.view_ids).await?;
    Ok(Json(json!({ "success": true })))
}

// === Transactions ===

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GetTransactionsRequest {
    #[serde(default)]
    pub tag_ids: Vec<String>,
    #[serde(default)]
    pub category_ids: Vec<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

pub async fn get_transactions(
    State(state): State<AppState>,
    Json(payload): Json<GetTransactionsRequest>,
) -> ApiResult<Json<Value>> {
    if payload.tag_ids.is_empty() && payload.category_ids.is_empty() {
        return Ok(Json(json!({ "transactions": [] })));
    }

    let transactions = service::get_transactions(
        state.upstream.as_ref(),
        (!payload.tag_ids.is_empty()).then_some(payload.tag_ids.as_slice()),
        (!payload.category_ids.is_empty()).then_some(payload.category_ids.as_slice()),
        payload.start_date.as_deref(),
        payload.end_date.as_deref(),
    )
    .await?;
    Ok(Json(json!({ "transactions": transactions })))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub search: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub limit: Option<i64>,
    pub cursor: Option<i64>,
}

pub async fn search_transactions(
    State(state): State<AppState>,
    Json(payload): Json<SearchRequest>,
) -> ApiResult<Json<Value>> {
    let limit = payload.limit.unwrap_or(10).clamp(1, 100);
    let cursor = payload.cursor.unwrap_or(0).max(0);

    let page = service::search_for_refund(
        state.upstream.as_ref(),
        payload.search.as_deref().filter(|s| !s.is_empty()),
        payload.start_date.as_deref(),
        payload.end_date.as_deref(),
        limit,
        cursor,
    )
    .await?;
    Ok(Json(json!({
        "transactions": page.transactions,
        "nextCursor": page.next_cursor,
    })))
}

// === Matches ===

pub async fn get_matches(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let matches = service::get_matches(&state.pool).await?;
    Ok(Json(json!({ "matches": matches })))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateMatchRequest {
    pub original_transaction_id: String,
    pub refund_transaction_id: Option<String>,
    pub refund_amount: Option<f64>,
    pub refund_merchant: Option<String>,
    pub refund_date: Option<String>,
    pub refund_account: Option<String>,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    pub expected_refund: bool,
    pub expected_date: Option<String>,
    pub expected_account: Option<String>,
    pub expected_account_id: Option<String>,
    pub expected_note: Option<String>,
    pub expected_amount: Option<f64>,
    #[serde(default)]
    pub replace_tag: bool,
    pub original_tag_ids: Option<Vec<String>>,
    pub original_notes: Option<String>,
    pub view_tag_ids: Option<Vec<String>>,
    pub transaction_data: Option<Value>,
}

pub async fn create_match(
    State(state): State<AppState>,
    Json(payload): Json<CreateMatchRequest>,
) -> ApiResult<Json<Value>> {
    if payload.original_transaction_id.is_empty() {
        return Err(ApiError::Validation("originalTransactionId is required".into()));
    }

    let created = service::create_match(
        &state.pool,
        state.upstream.as_ref(),
        service::CreateMatch {
            original_transaction_id: payload.original_transaction_id,
            refund_transaction_id: payload.refund_transaction_id,
            refund_amount: payload.refund_amount,
            refund_merchant: payload.refund_merchant,
            refund_date: payload.refund_date,
            refund_account: payload.refund_account,
            skipped: payload.skipped,
            expected_refund: payload.expected_refund,
            expected_date: payload.expected_date,
            expected_account: payload.expected_account,
            expected_account_id: payload.expected_account_id,
            expected_note: payload.expected_note,
            expected_amount: payload.expected_amount,
            replace_tag: payload.replace_tag,
            original_tag_ids: payload.original_tag_ids,
            original_notes: payload.original_notes,
            view_tag_ids: payload.view_tag_ids,
            transaction_data: payload.transaction_data,
        },
    )
    .await?;

    Ok(Json(json!({ "success": true, "match": created })))
}

pub async fn delete_match(
    State(state): State<AppState>,
    Path(match_id): Path<String>,
) -> ApiResult<Json<Value>> {
    service::delete_match(&state.pool, state.upstream.as_ref(), &match_id).await?;
    Ok(Json(json!({ "success": true })))
}
