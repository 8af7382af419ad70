//! /notes/* endpoints for the monthly notes feature.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;

use crate::error::{ApiError, ApiResult};
use crate::models::CategoryType;
use crate::repos::{checkbox, notes};
use crate::routes::{
    require_month_key, sanitize_id, sanitize_name, Passphrase, ERR_INVALID_CATEGORY_ID,
    ERR_INVALID_CATEGORY_TYPE, ERR_INVALID_MONTH_KEY, ERR_INVALID_NOTE_ID,
    ERR_INVALID_VIEWING_MONTH,
};
use crate::state::AppState;

const MAX_CHECKBOX_INDEX: usize = 1000;

pub async fn get_month_notes(
    State(state): State<AppState>,
    Path(month_key): Path<String>,
    passphrase: Passphrase,
) -> ApiResult<Json<Value>> {
    require_month_key(&month_key, ERR_INVALID_MONTH_KEY)?;
    let month = notes::all_notes_for_month(&state.pool, &month_key, &passphrase.0).await?;
    Ok(Json(json!(month)))
}

pub async fn get_all_notes(
    State(state): State<AppState>,
    passphrase: Passphrase,
) -> ApiResult<Json<Value>> {
    let bundle = notes::all_notes(&state.pool, &passphrase.0).await?;
    Ok(Json(json!(bundle)))
}

pub async fn get_categories(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let groups = state.upstream.list_category_groups().await?;
    Ok(Json(json!({ "groups": groups })))
}

#[derive(Deserialize)]
pub struct SaveCategoryNoteRequest {
    pub category_type: String,
    pub category_id: String,
    pub category_name: String,
    pub month_key: String,
    #[serde(default)]
    pub content: String,
    pub group_id: Option<String>,
    pub group_name: Option<String>,
}

pub async fn save_category_note(
    State(state): State<AppState>,
    passphrase: Passphrase,
    Json(payload): Json<SaveCategoryNoteRequest>,
) -> ApiResult<Json<Value>> {
    let category_type = CategoryType::parse(&payload.category_type)
        .ok_or_else(|| ApiError::Validation(ERR_INVALID_CATEGORY_TYPE.into()))?;
    let category_id = sanitize_id(&payload.category_id)
        .ok_or_else(|| ApiError::Validation(ERR_INVALID_CATEGORY_ID.into()))?;
    let category_name = sanitize_name(&payload.category_name);
    if category_name.is_empty() {
        return Err(ApiError::Validation("Missing category_id or category_name.".into()));
    }
    require_month_key(&payload.month_key, ERR_INVALID_MONTH_KEY)?;

    let group_id = match &payload.group_id {
        Some(id) if !id.is_empty() => Some(
            sanitize_id(id).ok_or_else(|| ApiError::Validation(ERR_INVALID_CATEGORY_ID.into()))?,
        ),
        _ => None,
    };
    let group_name = payload
        .group_name
        .as_deref()
        .map(sanitize_name)
        .filter(|name| !name.is_empty());

    let note = notes::save_note(
        &state.pool,
        &passphrase.0,
        notes::SaveNote {
            category_type: category_type.as_str(),
            category_id: &category_id,
            category_name: &category_name,
            month_key: &payload.month_key,
            content: &payload.content,
            group_id: group_id.as_deref(),
            group_name: group_name.as_deref(),
        },
    )
    .await?;

    Ok(Json(json!({ "success": true, "note": note })))
}

pub async fn delete_category_note(
    State(state): State<AppState>,
    Path(note_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let note_id =
        sanitize_id(&note_id).ok_or_else(|| ApiError::Validation(ERR_INVALID_NOTE_ID.into()))?;
    let deleted = notes::delete_note(&state.pool, &note_id).await?;
    Ok(Json(json!({ "success": deleted })))
}

pub async fn get_general_note(
    State(state): State<AppState>,
    Path(month_key): Path<String>,
    passphrase: Passphrase,
) -> ApiResult<Json<Value>> {
    require_month_key(&month_key, ERR_INVALID_MONTH_KEY)?;
    let note = notes::get_general_note(&state.pool, &month_key, &passphrase.0).await?;
    Ok(Json(json!({ "note": note })))
}

#[derive(Deserialize)]
pub struct SaveGeneralNoteRequest {
    pub month_key: String,
    #[serde(default)]
    pub content: String,
}

pub async fn save_general_note(
    State(state): State<AppState>,
    passphrase: Passphrase,
    Json(payload): Json<SaveGeneralNoteRequest>,
) -> ApiResult<Json<Value>> {
    require_month_key(&payload.month_key, ERR_INVALID_MONTH_KEY)?;
    let note =
        notes::save_general_note(&state.pool, &payload.month_key, &payload.content, &passphrase.0)
            .await?;
    Ok(Json(json!({ "success": true, "note": note })))
}

#[derive(Deserialize, Default)]
pub struct DeleteGeneralNoteQuery {
    #[serde(default)]
    pub clear_checkboxes: bool,
}

pub async fn delete_general_note(
    State(state): State<AppState>,
    Path(month_key): Path<String>,
    Query(query): Query<DeleteGeneralNoteQuery>,
) -> ApiResult<Json<Value>> {
    require_month_key(&month_key, ERR_INVALID_MONTH_KEY)?;
    let deleted =
        notes::delete_general_note(&state.pool, &month_key, query.clear_checkboxes).await?;
    Ok(Json(json!({ "success": deleted })))
}

pub async fn get_archived_notes(
    State(state): State<AppState>,
    passphrase: Passphrase,
) -> ApiResult<Json<Value>> {
    let archived = notes::archived_notes(&state.pool, &passphrase.0).await?;
    Ok(Json(json!({ "archived_notes": archived })))
}

pub async fn delete_archived_note(
    State(state): State<AppState>,
    Path(note_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let note_id =
        sanitize_id(&note_id).ok_or_else(|| ApiError::Validation(ERR_INVALID_NOTE_ID.into()))?;
    let deleted = notes::delete_archived_note(&state.pool, &note_id).await?;
    Ok(Json(json!({ "success": deleted })))
}

/// Pull the current category set from the upstream and archive notes for
/// anything that disappeared. The passphrase is part of the shared notes
/// contract; archival itself copies ciphertext without decrypting.
pub async fn sync_categories(
    State(state): State<AppState>,
    _passphrase: Passphrase,
) -> ApiResult<Json<Value>> {
    let groups = state.upstream.list_category_groups().await?;

    let mut current_ids: HashSet<String> = HashSet::new();
    for group in &groups {
        current_ids.insert(group.id.clone());
        for category in &group.categories {
            current_ids.insert(category.id.clone());
        }
    }

    let archived_count = notes::sync_categories(&state.pool, &current_ids).await?;
    Ok(Json(json!({ "success": true, "archived_count": archived_count })))
}

pub async fn get_note_history(
    State(state): State<AppState>,
    Path((category_type, category_id)): Path<(String, String)>,
    passphrase: Passphrase,
) -> ApiResult<Json<Value>> {
    let category_type = CategoryType::parse(&category_type)
        .ok_or_else(|| ApiError::Validation(ERR_INVALID_CATEGORY_TYPE.into()))?;
    let category_id = sanitize_id(&category_id)
        .ok_or_else(|| ApiError::Validation(ERR_INVALID_CATEGORY_ID.into()))?;

    let history =
        notes::revision_history(&state.pool, category_type.as_str(), &category_id, &passphrase.0)
            .await?;
    Ok(Json(json!({ "history": history })))
}

// === Checkboxes ===

#[derive(Deserialize)]
pub struct CheckboxQuery {
    pub viewing_month: String,
    pub note_id: Option<String>,
    pub general_note_month_key: Option<String>,
}

fn validate_checkbox_keys(
    note_id: &Option<String>,
    general_note_month_key: &Option<String>,
) -> ApiResult<(Option<String>, Option<String>)> {
    let note_id = match note_id {
        Some(id) => Some(
            sanitize_id(id).ok_or_else(|| ApiError::Validation(ERR_INVALID_NOTE_ID.into()))?,
        ),
        None => None,
    };
    if let Some(month_key) = general_note_month_key {
        require_month_key(month_key, ERR_INVALID_MONTH_KEY)?;
    }
    Ok((note_id, general_note_month_key.clone()))
}

pub async fn get_checkbox_states(
    State(state): State<AppState>,
    Query(query): Query<CheckboxQuery>,
) -> ApiResult<Json<Value>> {
    require_month_key(&query.viewing_month, ERR_INVALID_VIEWING_MONTH)?;
    let (note_id, general) = validate_checkbox_keys(&query.note_id, &query.general_note_month_key)?;

    let states = checkbox::get_states(
        &state.pool,
        note_id.as_deref(),
        general.as_deref(),
        &query.viewing_month,
    )
    .await?;
    Ok(Json(json!({ "states": states })))
}

#[derive(Deserialize)]
pub struct UpdateCheckboxRequest {
    pub viewing_month: String,
    pub checkbox_index: usize,
    pub is_checked: bool,
    pub note_id: Option<String>,
    pub general_note_month_key: Option<String>,
}

pub async fn update_checkbox_state(
    State(state): State<AppState>,
    Json(payload): Json<UpdateCheckboxRequest>,
) -> ApiResult<Json<Value>> {
    require_month_key(&payload.viewing_month, ERR_INVALID_VIEWING_MONTH)?;
    if payload.checkbox_index >= MAX_CHECKBOX_INDEX {
        return Err(ApiError::Validation("Invalid checkbox_index.".into()));
    }
    let (note_id, general) =
        validate_checkbox_keys(&payload.note_id, &payload.general_note_month_key)?;

    let states = checkbox::update_state(
        &state.pool,
        &payload.viewing_month,
        payload.checkbox_index,
        payload.is_checked,
        note_id.as_deref(),
        general.as_deref(),
    )
    .await?;
    Ok(Json(json!({ "success": true, "states": states })))
}

pub async fn get_checkbox_states_for_month(
    State(state): State<AppState>,
    Path(month_key): Path<String>,
) -> ApiResult<Json<Value>> {
    require_month_key(&month_key, ERR_INVALID_VIEWING_MONTH)?;
    let states = checkbox::all_states_for_month(&state.pool, &month_key).await?;
    Ok(Json(json!({ "states": states })))
}

// === Inheritance impact ===

#[derive(Deserialize)]
pub struct InheritanceImpactQuery {
    pub category_type: String,
    pub category_id: Option<String>,
    pub month_key: String,
}

/// Impact of creating a note at `month_key`: which months would stop
/// inheriting, and which of them already hold checkbox data.
pub async fn get_inheritance_impact(
    State(state): State<AppState>,
    Query(query): Query<InheritanceImpactQuery>,
    passphrase: Passphrase,
) -> ApiResult<Json<Value>> {
    require_month_key(&query.month_key, ERR_INVALID_MONTH_KEY)?;

    let impact = if query.category_type == "general" {
        notes::general_inheritance_impact(&state.pool, &query.month_key, &passphrase.0).await?
    } else {
        let category_type = CategoryType::parse(&query.category_type)
            .ok_or_else(|| ApiError::Validation(ERR_INVALID_CATEGORY_TYPE.into()))?;
        let category_id = query
            .category_id
            .as_deref()
            .and_then(sanitize_id)
            .ok_or_else(|| ApiError::Validation(ERR_INVALID_CATEGORY_ID.into()))?;
        notes::inheritance_impact(
            &state.pool,
            category_type.as_str(),
            &category_id,
            &query.month_key,
            &passphrase.0,
        )
        .await?
    };

    Ok(Json(json!(impact)))
}
