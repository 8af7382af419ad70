//! Persistence for frozen monthly targets on recurring categories.

use chrono::Utc;
use sqlx::{FromRow, SqlitePool};

use crate::error::ApiResult;

/// The frozen target together with the fingerprint it was computed from.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct StoredTarget {
    pub frozen_monthly_target: f64,
    pub target_month: String,
    pub frozen_amount: Option<f64>,
    pub frozen_frequency_months: Option<f64>,
    pub frozen_rollover_amount: Option<f64>,
    pub frozen_next_due_date: Option<String>,
}

pub async fn get_frozen_target(
    pool: &SqlitePool,
    recurring_id: &str,
) -> ApiResult<Option<StoredTarget>> {
    let row = sqlx::query_as::<_, StoredTarget>(
        r#"
        SELECT frozen_monthly_target, target_month, frozen_amount,
               frozen_frequency_months, frozen_rollover_amount, frozen_next_due_date
        FROM categories
        WHERE recurring_id = ?
          AND frozen_monthly_target IS NOT NULL
          AND target_month IS NOT NULL
        "#,
    )
    .bind(recurring_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Persist a freshly computed target with its fingerprint, creating a stub
/// category row for recurring ids that have not been synced yet.
pub async fn set_frozen_target(
    pool: &SqlitePool,
    recurring_id: &str,
    target: &StoredTarget,
) -> ApiResult<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO categories
            (recurring_id, upstream_category_id, name, target_amount, frequency_months,
             frozen_monthly_target, target_month, frozen_amount, frozen_frequency_months,
             frozen_rollover_amount, frozen_next_due_date, created_at)
        VALUES (?1, ?1, ?1, ?2, ?3, ?4, ?5, ?2, ?3, ?6, ?7, ?8)
        ON CONFLICT(recurring_id) DO UPDATE SET
            frozen_monthly_target = ?4,
            target_month = ?5,
            frozen_amount = ?2,
            frozen_frequency_months = ?3,
            frozen_rollover_amount = ?6,
            frozen_next_due_date = ?7
        "#,
    )
    .bind(recurring_id)
    .bind(target.frozen_amount)
    .bind(target.frozen_frequency_months)
    .bind(target.frozen_monthly_target)
    .bind(&target.target_month)
    .bind(target.frozen_rollover_amount)
    .bind(&target.frozen_next_due_date)
    .bind(&now)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn clear_frozen_target(pool: &SqlitePool, recurring_id: &str) -> ApiResult<()> {
    sqlx::query(
        r#"
        UPDATE categories SET
            frozen_monthly_target = NULL,
            target_month = NULL,
            frozen_amount = NULL,
            frozen_frequency_months = NULL,
            frozen_rollover_amount = NULL,
            frozen_next_due_date = NULL
        WHERE recurring_id = ?
        "#,
    )
    .bind(recurring_id)
    .execute(pool)
    .await?;
    Ok(())
}
