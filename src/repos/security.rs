//! Storage for security events, geolocation cache, IP lockouts, and
//! security preferences.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::error::ApiResult;
use crate::models::{IpLockoutRow, SecurityEventRow};

pub const GEO_CACHE_TTL_DAYS: i64 = 7;

const MAX_DETAILS_LEN: usize = 500;
const MAX_USER_AGENT_LEN: usize = 256;

fn truncate(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

pub struct NewEvent<'a> {
    pub event_type: &'a str,
    pub success: bool,
    pub ip_address: Option<&'a str>,
    pub country: Option<&'a str>,
    pub city: Option<&'a str>,
    pub details: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

pub async fn insert_event(pool: &SqlitePool, event: NewEvent<'_>) -> ApiResult<String> {
    let timestamp = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO security_events
            (event_type, success, timestamp, ip_address, country, city, details, user_agent)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(event.event_type)
    .bind(event.success)
    .bind(&timestamp)
    .bind(event.ip_address)
    .bind(event.country)
    .bind(event.city)
    .bind(event.details.map(|d| truncate(d, MAX_DETAILS_LEN)))
    .bind(event.user_agent.map(|ua| truncate(ua, MAX_USER_AGENT_LEN)))
    .execute(pool)
    .await?;
    Ok(timestamp)
}

#[derive(Debug, Default)]
pub struct EventFilter {
    pub limit: i64,
    pub offset: i64,
    pub event_types: Option<Vec<String>>,
    pub success: Option<bool>,
}

pub async fn get_events(
    pool: &SqlitePool,
    filter: &EventFilter,
) -> ApiResult<(Vec<SecurityEventRow>, i64)> {
    let mut count_builder: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT COUNT(*) AS total FROM security_events WHERE 1=1");
    let mut page_builder: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT * FROM security_events WHERE 1=1");

    for builder in [&mut count_builder, &mut page_builder] {
        if let Some(event_types) = &filter.event_types {
            builder.push(" AND event_type IN (");
            let mut separated = builder.separated(", ");
            for event_type in event_types {
                separated.push_bind(event_type.clone());
            }
            separated.push_unseparated(")");
        }
        if let Some(success) = filter.success {
            builder.push(" AND success = ").push_bind(success);
        }
    }

    let total: i64 = count_builder
        .build()
        .fetch_one(pool)
        .await?
        .get("total");

    page_builder
        .push(" ORDER BY timestamp DESC LIMIT ")
        .push_bind(filter.limit)
        .push(" OFFSET ")
        .push_bind(filter.offset);

    let events = page_builder
        .build_query_as::<SecurityEventRow>()
        .fetch_all(pool)
        .await?;

    Ok((events, total))
}

#[derive(Debug, Serialize, Default)]
pub struct SecuritySummary {
    pub total_events: i64,
    pub successful_logins: i64,
    pub failed_logins: i64,
    pub failed_unlock_attempts: i64,
    pub logouts: i64,
    pub session_timeouts: i64,
    pub unique_ips: i64,
    pub last_successful_login: Option<String>,
    pub last_failed_login: Option<String>,
}

pub async fn get_summary(pool: &SqlitePool) -> ApiResult<SecuritySummary> {
    let count = |sql: &'static str| async move {
        sqlx::query_scalar::<_, i64>(sql).fetch_one(pool).await
    };

    let last = |sql: &'static str| async move {
        sqlx::query_scalar::<_, String>(sql).fetch_optional(pool).await
    };

    Ok(SecuritySummary {
        total_events: count("SELECT COUNT(*) FROM security_events").await?,
        successful_logins: count(
            "SELECT COUNT(*) FROM security_events WHERE event_type = 'LOGIN_ATTEMPT' AND success = 1",
        )
        .await?,
        failed_logins: count(
            "SELECT COUNT(*) FROM security_events WHERE event_type = 'LOGIN_ATTEMPT' AND success = 0",
        )
        .await?,
        failed_unlock_attempts: count(
            "SELECT COUNT(*) FROM security_events \
             WHERE event_type IN ('UNLOCK_ATTEMPT', 'REMOTE_UNLOCK') AND success = 0",
        )
        .await?,
        logouts: count("SELECT COUNT(*) FROM security_events WHERE event_type = 'LOGOUT'").await?,
        session_timeouts: count(
            "SELECT COUNT(*) FROM security_events WHERE event_type = 'SESSION_TIMEOUT'",
        )
        .await?,
        unique_ips: count(
            "SELECT COUNT(DISTINCT ip_address) FROM security_events WHERE ip_address IS NOT NULL",
        )
        .await?,
        last_successful_login: last(
            "SELECT timestamp FROM security_events \
             WHERE event_type = 'LOGIN_ATTEMPT' AND success = 1 ORDER BY timestamp DESC LIMIT 1",
        )
        .await?,
        last_failed_login: last(
            "SELECT timestamp FROM security_events \
             WHERE event_type = 'LOGIN_ATTEMPT' AND success = 0 ORDER BY timestamp DESC LIMIT 1",
        )
        .await?,
    })
}

/// Failed login/unlock attempts after `cutoff`, newest first, capped at 10.
pub async fn failed_events_since(
    pool: &SqlitePool,
    cutoff: Option<&str>,
) -> ApiResult<Vec<SecurityEventRow>> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT * FROM security_events \
         WHERE event_type IN ('LOGIN_ATTEMPT', 'UNLOCK_ATTEMPT', 'REMOTE_UNLOCK') AND success = 0",
    );
    if let Some(cutoff) = cutoff {
        builder.push(" AND timestamp > ").push_bind(cutoff);
    }
    builder.push(" ORDER BY timestamp DESC LIMIT 10");

    let events = builder
        .build_query_as::<SecurityEventRow>()
        .fetch_all(pool)
        .await?;
    Ok(events)
}

pub async fn cleanup_old_events(pool: &SqlitePool, retention_days: i64) -> ApiResult<u64> {
    let cutoff = (Utc::now() - Duration::days(retention_days)).to_rfc3339();
    let result = sqlx::query("DELETE FROM security_events WHERE timestamp < ?")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn clear_events(pool: &SqlitePool) -> ApiResult<u64> {
    let result = sqlx::query("DELETE FROM security_events")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

// === Preferences ===

pub async fn get_preference(pool: &SqlitePool, key: &str) -> ApiResult<Option<String>> {
    let value = sqlx::query_scalar::<_, String>(
        "SELECT value FROM security_preferences WHERE key = ?",
    )
    .bind(key)
    .fetch_optional(pool)
    .await?;
    Ok(value)
}

pub async fn set_preference(pool: &SqlitePool, key: &str, value: &str) -> ApiResult<()> {
    sqlx::query(
        r#"
        INSERT INTO security_preferences (key, value)
        VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

// === Geolocation cache ===

pub async fn cached_geolocation(
    pool: &SqlitePool,
    ip_address: &str,
) -> ApiResult<Option<(Option<String>, Option<String>)>> {
    let row = sqlx::query(
        "SELECT country, city, cached_at FROM ip_geolocation_cache WHERE ip_address = ?",
    )
    .bind(ip_address)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let cached_at: String = row.get("cached_at");
    let fresh = DateTime::parse_from_rfc3339(&cached_at)
        .map(|at| Utc::now() - at.with_timezone(&Utc) < Duration::days(GEO_CACHE_TTL_DAYS))
        .unwrap_or(false);

    if fresh {
        Ok(Some((row.get("country"), row.get("city"))))
    } else {
        Ok(None)
    }
}

pub async fn cache_geolocation(
    pool: &SqlitePool,
    ip_address: &str,
    country: Option<&str>,
    city: Option<&str>,
) -> ApiResult<()> {
    sqlx::query(
        r#"
        INSERT INTO ip_geolocation_cache (ip_address, country, city, cached_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(ip_address) DO UPDATE SET
            country = excluded.country,
            city = excluded.city,
            cached_at = excluded.cached_at
        "#,
    )
    .bind(ip_address)
    .bind(country)
    .bind(city)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

// === IP lockouts ===

pub async fn get_lockout(pool: &SqlitePool, ip_address: &str) -> ApiResult<Option<IpLockoutRow>> {
    let row = sqlx::query_as::<_, IpLockoutRow>(
        "SELECT failed_attempts, locked_until FROM ip_lockouts WHERE ip_address = ?",
    )
    .bind(ip_address)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Bump the failure counter in one upsert, setting `locked_until` the
/// moment the new count crosses `threshold`. Returns the new count.
pub async fn record_failed_attempt(
    pool: &SqlitePool,
    ip_address: &str,
    threshold: i64,
    locked_until: &str,
) -> ApiResult<i64> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO ip_lockouts (ip_address, failed_attempts, locked_until, last_attempt)
        VALUES (?1, 1, CASE WHEN 1 >= ?2 THEN ?3 ELSE NULL END, ?4)
        ON CONFLICT(ip_address) DO UPDATE SET
            failed_attempts = ip_lockouts.failed_attempts + 1,
            locked_until = CASE
                WHEN ip_lockouts.failed_attempts + 1 >= ?2 THEN ?3
                ELSE ip_lockouts.locked_until
            END,
            last_attempt = ?4
        "#,
    )
    .bind(ip_address)
    .bind(threshold)
    .bind(locked_until)
    .bind(&now)
    .execute(pool)
    .await?;

    let count: i64 =
        sqlx::query_scalar("SELECT failed_attempts FROM ip_lockouts WHERE ip_address = ?")
            .bind(ip_address)
            .fetch_one(pool)
            .await?;
    Ok(count)
}

pub async fn clear_lockout(pool: &SqlitePool, ip_address: &str) -> ApiResult<()> {
    sqlx::query("DELETE FROM ip_lockouts WHERE ip_address = ?")
        .bind(ip_address)
        .execute(pool)
        .await?;
    Ok(())
}
