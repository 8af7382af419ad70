use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{RefundsConfigRow, RefundsMatchRow, RefundsSavedViewRow};

const CONFIG_COLUMNS: &str = "replacement_tag_id, replace_tag_by_default, aging_warning_days, \
     show_badge, hide_matched_transactions, hide_expected_transactions";

/// Fetch the config singleton, creating the defaults row on first use.
pub async fn get_config(pool: &SqlitePool) -> ApiResult<RefundsConfigRow> {
    let existing = sqlx::query_as::<_, RefundsConfigRow>(&format!(
        "SELECT {CONFIG_COLUMNS} FROM refunds_config WHERE id = 1"
    ))
    .fetch_optional(pool)
    .await?;

    if let Some(config) = existing {
        return Ok(config);
    }

    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO refunds_config (id, created_at, updated_at)
        VALUES (1, ?, ?)
        ON CONFLICT(id) DO NOTHING
        "#,
    )
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    let config = sqlx::query_as::<_, RefundsConfigRow>(&format!(
        "SELECT {CONFIG_COLUMNS} FROM refunds_config WHERE id = 1"
    ))
    .fetch_one(pool)
    .await?;
    Ok(config)
}

#[derive(Debug, Default)]
pub struct ConfigUpdate {
    pub replacement_tag_id: Option<Option<String>>,
    pub replace_tag_by_default: Option<bool>,
    pub aging_warning_days: Option<i64>,
    pub show_badge: Option<bool>,
    pub hide_matched_transactions: Option<bool>,
    pub hide_expected_transactions: Option<bool>,
}

pub async fn update_config(pool: &SqlitePool, updates: ConfigUpdate) -> ApiResult<()> {
    // Make sure the singleton exists before the field updates.
    get_config(pool).await?;
    let now = Utc::now().to_rfc3339();

    if let Some(replacement_tag_id) = updates.replacement_tag_id {
        sqlx::query("UPDATE refunds_config SET replacement_tag_id = ?, updated_at = ? WHERE id = 1")
            .bind(replacement_tag_id)
            .bind(&now)
            .execute(pool)
            .await?;
    }
    if let Some(replace_tag_by_default) = updates.replace_tag_by_default {
        sqlx::query(
            "UPDATE refunds_config SET replace_tag_by_default = ?, updated_at = ? WHERE id = 1",
        )
        .bind(replace_tag_by_default)
        .bind(&now)
        .execute(pool)
        .await?;
    }
    if let Some(aging_warning_days) = updates.aging_warning_days {
        sqlx::query("UPDATE refunds_config SET aging_warning_days = ?, updated_at = ? WHERE id = 1")
            .bind(aging_warning_days)
            .bind(&now)
            .execute(pool)
            .await?;
    }
    if let Some(show_badge) = updates.show_badge {
        sqlx::query("UPDATE refunds_config SET show_badge = ?, updated_at = ? WHERE id = 1")
            .bind(show_badge)
            .bind(&now)
            .execute(pool)
            .await?;
    }
    if let Some(hide_matched) = updates.hide_matched_transactions {
        sqlx::query(
            "UPDATE refunds_config SET hide_matched_transactions = ?, updated_at = ? WHERE id = 1",
        )
        .bind(hide_matched)
        .bind(&now)
        .execute(pool)
        .await?;
    }
    if let Some(hide_expected) = updates.hide_expected_transactions {
        sqlx::query(
            "UPDATE refunds_config SET hide_expected_transactions = ?, updated_at = ? WHERE id = 1",
        )
        .bind(hide_expected)
        .bind(&now)
        .execute(pool)
        .await?;
    }

    Ok(())
}

// === Saved views ===

const VIEW_COLUMNS: &str = "id, name, tag_ids, category_ids, sort_order, exclude_from_all";

pub async fn get_views(pool: &SqlitePool) -> ApiResult<Vec<RefundsSavedViewRow>> {
    let views = sqlx::query_as::<_, RefundsSavedViewRow>(&format!(
        "SELECT {VIEW_COLUMNS} FROM refunds_saved_views ORDER BY sort_order"
    ))
    .fetch_all(pool)
    .await?;
    Ok(views)
}

pub async fn create_view(
    pool: &SqlitePool,
    name: &str,
    tag_ids_json: &str,
    category_ids_json: Option<&str>,
) -> ApiResult<RefundsSavedViewRow> {
    let now = Utc::now().to_rfc3339();
    let id = Uuid::new_v4().to_string();

    let next_order: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM refunds_saved_views",
    )
    .fetch_one(pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO refunds_saved_views
            (id, name, tag_ids, category_ids, sort_order, exclude_from_all, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(name)
    .bind(tag_ids_json)
    .bind(category_ids_json)
    .bind(next_order)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(RefundsSavedViewRow {
        id,
        name: name.to_string(),
        tag_ids: tag_ids_json.to_string(),
        category_ids: category_ids_json.map(str::to_string),
        sort_order: next_order,
        exclude_from_all: false,
    })
}

#[derive(Debug, Default)]
pub struct ViewUpdate {
    pub name: Option<String>,
    pub tag_ids_json: Option<String>,
    pub category_ids_json: Option<Option<String>>,
    pub sort_order: Option<i64>,
    pub exclude_from_all: Option<bool>,
}

pub async fn update_view(pool: &SqlitePool, view_id: &str, updates: ViewUpdate) -> ApiResult<bool> {
    let exists: Option<(String,)> =
        sqlx::query_as("SELECT id FROM refunds_saved_views WHERE id = ?")
            .bind(view_id)
            .fetch_optional(pool)
            .await?;
    if exists.is_none() {
        return Ok(false);
    }

    let now = Utc::now().to_rfc3339();
    if let Some(name) = updates.name {
        sqlx::query("UPDATE refunds_saved_views SET name = ?, updated_at = ? WHERE id = ?")
            .bind(name)
            .bind(&now)
            .bind(view_id)
            .execute(pool)
            .await?;
    }
    if let Some(tag_ids) = updates.tag_ids_json {
        sqlx::query("UPDATE refunds_saved_views SET tag_ids = ?, updated_at = ? WHERE id = ?")
            .bind(tag_ids)
            .bind(&now)
            .bind(view_id)
            .execute(pool)
            .await?;
    }
    if let Some(category_ids) = updates.category_ids_json {
        sqlx::query("UPDATE refunds_saved_views SET category_ids = ?, updated_at = ? WHERE id = ?")
            .bind(category_ids)
            .bind(&now)
            .bind(view_id)
            .execute(pool)
            .await?;
    }
    if let Some(sort_order) = updates.sort_order {
        sqlx::query("UPDATE refunds_saved_views SET sort_order = ?, updated_at = ? WHERE id = ?")
            .bind(sort_order)
            .bind(&now)
            .bind(view_id)
            .execute(pool)
            .await?;
    }
    if let Some(exclude_from_all) = updates.exclude_from_all {
        sqlx::query(
            "UPDATE refunds_saved_views SET exclude_from_all = ?, updated_at = ? WHERE id = ?",
        )
        .bind(exclude_from_all)
        .bind(&now)
        .bind(view_id)
        .execute(pool)
        .await?;
    }

    Ok(true)
}

pub async fn delete_view(pool: &SqlitePool, view_id: &str) -> ApiResult<bool> {
    let result = sqlx::query("DELETE FROM refunds_saved_views WHERE id = ?")
        .bind(view_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn reorder_views(pool: &SqlitePool, view_ids: &[String]) -> ApiResult<()> {
    let now = Utc::now().to_rfc3339();
    let mut tx = pool.begin().await?;
    for (index, view_id) in view_ids.iter().enumerate() {
        sqlx::query("UPDATE refunds_saved_views SET sort_order = ?, updated_at = ? WHERE id = ?")
            .bind(index as i64)
            .bind(&now)
            .bind(view_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

// === Matches ===

const MATCH_COLUMNS: &str = "id, original_transaction_id, refund_transaction_id, refund_amount, \
     refund_merchant, refund_date, refund_account, skipped, expected_refund, expected_date, \
     expected_account, expected_account_id, expected_note, expected_amount, transaction_data";

pub async fn get_matches(pool: &SqlitePool) -> ApiResult<Vec<RefundsMatchRow>> {
    let matches = sqlx::query_as::<_, RefundsMatchRow>(&format!(
        "SELECT {MATCH_COLUMNS} FROM refunds_matches ORDER BY created_at"
    ))
    .fetch_all(pool)
    .await?;
    Ok(matches)
}

pub async fn get_match(pool: &SqlitePool, match_id: &str) -> ApiResult<Option<RefundsMatchRow>> {
    let row = sqlx::query_as::<_, RefundsMatchRow>(&format!(
        "SELECT {MATCH_COLUMNS} FROM refunds_matches WHERE id = ?"
    ))
    .bind(match_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get_match_by_original(
    pool: &SqlitePool,
    original_transaction_id: &str,
) -> ApiResult<Option<RefundsMatchRow>> {
    let row = sqlx::query_as::<_, RefundsMatchRow>(&format!(
        "SELECT {MATCH_COLUMNS} FROM refunds_matches WHERE original_transaction_id = ?"
    ))
    .bind(original_transaction_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

#[derive(Debug, Default)]
pub struct NewMatch {
    pub original_transaction_id: String,
    pub refund_transaction_id: Option<String>,
    pub refund_amount: Option<f64>,
    pub refund_merchant: Option<String>,
    pub refund_date: Option<String>,
    pub refund_account: Option<String>,
    pub skipped: bool,
    pub expected_refund: bool,
    pub expected_date: Option<String>,
    pub expected_account: Option<String>,
    pub expected_account_id: Option<String>,
    pub expected_note: Option<String>,
    pub expected_amount: Option<f64>,
    pub transaction_data: Option<String>,
}

pub async fn create_match(pool: &SqlitePool, new: NewMatch) -> ApiResult<RefundsMatchRow> {
    let now = Utc::now().to_rfc3339();
    let id = Uuid::new_v4().to_string();

    let result = sqlx::query(
        r#"
        INSERT INTO refunds_matches
            (id, original_transaction_id, refund_transaction_id, refund_amount, refund_merchant,
             refund_date, refund_account, skipped, expected_refund, expected_date,
             expected_account, expected_account_id, expected_note, expected_amount,
             transaction_data, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&new.original_transaction_id)
    .bind(&new.refund_transaction_id)
    .bind(new.refund_amount)
    .bind(&new.refund_merchant)
    .bind(&new.refund_date)
    .bind(&new.refund_account)
    .bind(new.skipped)
    .bind(new.expected_refund)
    .bind(&new.expected_date)
    .bind(&new.expected_account)
    .bind(&new.expected_account_id)
    .bind(&new.expected_note)
    .bind(new.expected_amount)
    .bind(&new.transaction_data)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(RefundsMatchRow {
            id,
            original_transaction_id: new.original_transaction_id,
            refund_transaction_id: new.refund_transaction_id,
            refund_amount: new.refund_amount,
            refund_merchant: new.refund_merchant,
            refund_date: new.refund_date,
            refund_account: new.refund_account,
            skipped: new.skipped,
            expected_refund: new.expected_refund,
            expected_date: new.expected_date,
            expected_account: new.expected_account,
            expected_account_id: new.expected_account_id,
            expected_note: new.expected_note,
            expected_amount: new.expected_amount,
            transaction_data: new.transaction_data,
        }),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            Err(ApiError::Conflict("Transaction already matched".into()))
        }
        Err(error) => Err(error.into()),
    }
}

pub async fn delete_match(pool: &SqlitePool, match_id: &str) -> ApiResult<bool> {
    let result = sqlx::query("DELETE FROM refunds_matches WHERE id = ?")
        .bind(match_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::test_pool;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn config_defaults_on_first_read() {
        let pool = test_pool().await;
        let config = get_config(&pool).await.unwrap();
        assert_eq!(config.replacement_tag_id, None);
        assert!(config.replace_tag_by_default);
        assert_eq!(config.aging_warning_days, 30);
        assert!(config.show_badge);
        assert!(!config.hide_matched_transactions);
        assert!(!config.hide_expected_transactions);
    }

    #[tokio::test]
    async fn config_partial_update() {
        let pool = test_pool().await;
        update_config(
            &pool,
            ConfigUpdate {
                replacement_tag_id: Some(Some("tag-refunded".into())),
                aging_warning_days: Some(14),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let config = get_config(&pool).await.unwrap();
        assert_eq!(config.replacement_tag_id.as_deref(), Some("tag-refunded"));
        assert_eq!(config.aging_warning_days, 14);
        assert!(config.replace_tag_by_default);
    }

    #[tokio::test]
    async fn views_sort_and_reorder() {
        let pool = test_pool().await;
        let a = create_view(&pool, "Returns", r#"["t1"]"#, None).await.unwrap();
        let b = create_view(&pool, "Work", r#"["t2"]"#, Some(r#"["c1"]"#))
            .await
            .unwrap();
        assert_eq!(a.sort_order, 0);
        assert_eq!(b.sort_order, 1);

        reorder_views(&pool, &[b.id.clone(), a.id.clone()]).await.unwrap();
        let views = get_views(&pool).await.unwrap();
        assert_eq!(views[0].id, b.id);
        assert_eq!(views[1].id, a.id);
    }

    #[tokio::test]
    async fn duplicate_original_is_conflict() {
        let pool = test_pool().await;
        let new = |id: &str| NewMatch {
            original_transaction_id: id.to_string(),
            skipped: true,
            ..Default::default()
        };
        create_match(&pool, new("txn-1")).await.unwrap();
        let duplicate = create_match(&pool, new("txn-1")).await;
        assert!(matches!(duplicate, Err(ApiError::Conflict(_))));
    }

    #[tokio::test]
    async fn delete_match_removes_row() {
        let pool = test_pool().await;
        let created = create_match(
            &pool,
            NewMatch {
                original_transaction_id: "txn-9".into(),
                refund_transaction_id: Some("txn-10".into()),
                refund_amount: Some(12.5),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(delete_match(&pool, &created.id).await.unwrap());
        assert!(get_match(&pool, &created.id).await.unwrap().is_none());
        assert!(get_matches(&pool).await.unwrap().is_empty());
    }
}
