//! Checkbox states, stored per (note, viewing month) as a JSON boolean
//! array so every viewing month tracks its boxes independently.

use chrono::Utc;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashMap;

use crate::error::{ApiError, ApiResult};

fn parse_states(states_json: &str) -> ApiResult<Vec<bool>> {
    serde_json::from_str(states_json)
        .map_err(|e| ApiError::Internal(format!("corrupt checkbox state: {e}")))
}

pub async fn get_states(
    pool: &SqlitePool,
    note_id: Option<&str>,
    general_note_month_key: Option<&str>,
    viewing_month: &str,
) -> ApiResult<Vec<bool>> {
    let row = match (note_id, general_note_month_key) {
        (Some(note_id), _) => {
            sqlx::query("SELECT states_json FROM checkbox_states WHERE note_id = ? AND viewing_month = ?")
                .bind(note_id)
                .bind(viewing_month)
                .fetch_optional(pool)
                .await?
        }
        (None, Some(month_key)) => sqlx::query(
            "SELECT states_json FROM checkbox_states WHERE general_note_month_key = ? AND viewing_month = ?",
        )
        .bind(month_key)
        .bind(viewing_month)
        .fetch_optional(pool)
        .await?,
        (None, None) => {
            return Err(ApiError::Validation(
                "Either note_id or general_note_month_key is required".into(),
            ))
        }
    };

    match row {
        Some(row) => parse_states(&row.get::<String, _>("states_json")),
        None => Ok(Vec::new()),
    }
}

/// Flip one checkbox. The array is extended sparsely with `false` up to the
/// target index, inside a single transaction.
pub async fn update_state(
    pool: &SqlitePool,
    viewing_month: &str,
    checkbox_index: usize,
    is_checked: bool,
    note_id: Option<&str>,
    general_note_month_key: Option<&str>,
) -> ApiResult<Vec<bool>> {
    if note_id.is_none() && general_note_month_key.is_none() {
        return Err(ApiError::Validation(
            "Either note_id or general_note_month_key is required".into(),
        ));
    }

    let now = Utc::now().to_rfc3339();
    let mut tx = pool.begin().await?;

    let existing = match (note_id, general_note_month_key) {
        (Some(note_id), _) => {
            sqlx::query("SELECT id, states_json FROM checkbox_states WHERE note_id = ? AND viewing_month = ?")
                .bind(note_id)
                .bind(viewing_month)
                .fetch_optional(&mut *tx)
                .await?
        }
        (None, Some(month_key)) => sqlx::query(
            "SELECT id, states_json FROM checkbox_states WHERE general_note_month_key = ? AND viewing_month = ?",
        )
        .bind(month_key)
        .bind(viewing_month)
        .fetch_optional(&mut *tx)
        .await?,
        (None, None) => unreachable!(),
    };

    let mut states = match &existing {
        Some(row) => parse_states(&row.get::<String, _>("states_json"))?,
        None => Vec::new(),
    };

    while states.len() <= checkbox_index {
        states.push(false);
    }
    states[checkbox_index] = is_checked;

    let states_json = serde_json::to_string(&states)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    match existing {
        Some(row) => {
            sqlx::query("UPDATE checkbox_states SET states_json = ?, updated_at = ? WHERE id = ?")
                .bind(&states_json)
                .bind(&now)
                .bind(row.get::<i64, _>("id"))
                .execute(&mut *tx)
                .await?;
        }
        None => {
            sqlx::query(
                r#"
                INSERT INTO checkbox_states
                    (note_id, general_note_month_key, viewing_month, states_json, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(note_id)
            .bind(general_note_month_key)
            .bind(viewing_month)
            .bind(&states_json)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    Ok(states)
}

/// All states for a viewing month, keyed by note id or `general:{month}`.
pub async fn all_states_for_month(
    pool: &SqlitePool,
    viewing_month: &str,
) -> ApiResult<HashMap<String, Vec<bool>>> {
    let rows = sqlx::query(
        "SELECT note_id, general_note_month_key, states_json FROM checkbox_states WHERE viewing_month = ?",
    )
    .bind(viewing_month)
    .fetch_all(pool)
    .await?;

    let mut result = HashMap::new();
    for row in rows {
        let states = parse_states(&row.get::<String, _>("states_json"))?;
        if let Some(note_id) = row.get::<Option<String>, _>("note_id") {
            result.insert(note_id, states);
        } else if let Some(month_key) = row.get::<Option<String>, _>("general_note_month_key") {
            result.insert(format!("general:{month_key}"), states);
        }
    }
    Ok(result)
}

pub async fn clear_states_for_note(pool: &SqlitePool, note_id: &str) -> ApiResult<u64> {
    let result = sqlx::query("DELETE FROM checkbox_states WHERE note_id = ?")
        .bind(note_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn clear_states_for_general_note(
    pool: &SqlitePool,
    source_month: &str,
) -> ApiResult<u64> {
    let result = sqlx::query("DELETE FROM checkbox_states WHERE general_note_month_key = ?")
        .bind(source_month)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Clear states for specific viewing months, used when breaking inheritance.
pub async fn clear_states_for_viewing_months(
    pool: &SqlitePool,
    viewing_months: &[String],
    note_id: Option<&str>,
    general_note_month_key: Option<&str>,
) -> ApiResult<u64> {
    if viewing_months.is_empty() {
        return Ok(0);
    }

    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new("DELETE FROM checkbox_states WHERE viewing_month IN (");
    let mut separated = builder.separated(", ");
    for month in viewing_months {
        separated.push_bind(month);
    }
    separated.push_unseparated(")");

    if let Some(note_id) = note_id {
        builder.push(" AND note_id = ").push_bind(note_id);
    } else if let Some(month_key) = general_note_month_key {
        builder
            .push(" AND general_note_month_key = ")
            .push_bind(month_key);
    }

    let result = builder.build().execute(pool).await?;
    Ok(result.rows_affected())
}

/// States for specific viewing months, keyed by viewing month. Used to show
/// which months hold checkbox data before inheritance is broken.
pub async fn states_by_viewing_months(
    pool: &SqlitePool,
    viewing_months: &[String],
    note_id: Option<&str>,
    general_note_month_key: Option<&str>,
) -> ApiResult<HashMap<String, Vec<bool>>> {
    if viewing_months.is_empty() {
        return Ok(HashMap::new());
    }

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT viewing_month, states_json FROM checkbox_states WHERE viewing_month IN (",
    );
    let mut separated = builder.separated(", ");
    for month in viewing_months {
        separated.push_bind(month);
    }
    separated.push_unseparated(")");

    if let Some(note_id) = note_id {
        builder.push(" AND note_id = ").push_bind(note_id);
    } else if let Some(month_key) = general_note_month_key {
        builder
            .push(" AND general_note_month_key = ")
            .push_bind(month_key);
    }

    let rows = builder.build().fetch_all(pool).await?;
    let mut result = HashMap::new();
    for row in rows {
        result.insert(
            row.get::<String, _>("viewing_month"),
            parse_states(&row.get::<String, _>("states_json"))?,
        );
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::test_pool;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn sparse_extension_fills_with_false() {
        let pool = test_pool().await;
        let states = update_state(&pool, "2025-03", 5, true, None, Some("2025-01"))
            .await
            .unwrap();
        assert_eq!(states, vec![false, false, false, false, false, true]);
    }

    #[tokio::test]
    async fn update_preserves_existing_entries() {
        let pool = test_pool().await;
        update_state(&pool, "2025-03", 0, true, None, Some("2025-01"))
            .await
            .unwrap();
        let states = update_state(&pool, "2025-03", 2, true, None, Some("2025-01"))
            .await
            .unwrap();
        assert_eq!(states, vec![true, false, true]);
    }

    #[tokio::test]
    async fn viewing_months_are_independent() {
        let pool = test_pool().await;
        update_state(&pool, "2025-03", 0, true, None, Some("2025-01"))
            .await
            .unwrap();

        let other = get_states(&pool, None, Some("2025-01"), "2025-04")
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn missing_state_reads_empty() {
        let pool = test_pool().await;
        let states = get_states(&pool, Some("no-such-note"), None, "2025-01")
            .await
            .unwrap();
        assert!(states.is_empty());
    }

    #[tokio::test]
    async fn bulk_month_fetch_keys_note_and_general() {
        let pool = test_pool().await;
        sqlx::query(
            r#"
            INSERT INTO notes (id, category_type, category_id, category_name, month_key,
                               content_enc, salt, created_at, updated_at)
            VALUES ('note-1', 'category', 'c1', 'n', '2025-01', 'ct', 's', 't', 't')
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        update_state(&pool, "2025-03", 0, true, Some("note-1"), None)
            .await
            .unwrap();
        update_state(&pool, "2025-03", 1, true, None, Some("2025-02"))
            .await
            .unwrap();

        let all = all_states_for_month(&pool, "2025-03").await.unwrap();
        assert_eq!(all.get("note-1"), Some(&vec![true]));
        assert_eq!(all.get("general:2025-02"), Some(&vec![false, true]));
    }

    #[tokio::test]
    async fn clear_by_viewing_months_is_scoped() {
        let pool = test_pool().await;
        update_state(&pool, "2025-03", 0, true, None, Some("2025-01"))
            .await
            .unwrap();
        update_state(&pool, "2025-04", 0, true, None, Some("2025-01"))
            .await
            .unwrap();

        let deleted = clear_states_for_viewing_months(
            &pool,
            &["2025-03".to_string()],
            None,
            Some("2025-01"),
        )
        .await
        .unwrap();
        assert_eq!(deleted, 1);

        let remaining = get_states(&pool, None, Some("2025-01"), "2025-04")
            .await
            .unwrap();
        assert_eq!(remaining, vec![true]);
    }

    #[tokio::test]
    async fn missing_key_is_validation_error() {
        let pool = test_pool().await;
        let result = get_states(&pool, None, None, "2025-01").await;
        assert!(matches!(result, Err(ApiError::Validation(_))));
    }
}
