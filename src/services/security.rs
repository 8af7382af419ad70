//! Security events, IP geolocation, and brute-force lockout.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::OnceLock;

use crate::error::ApiResult;
use crate::models::SecurityEventRow;
use crate::repos::security as repo;

pub const LOCKOUT_THRESHOLD: i64 = 10;
pub const LOCKOUT_DURATION_MINUTES: i64 = 15;
pub const DEFAULT_RETENTION_DAYS: i64 = 90;

pub const EVENT_LOGIN_ATTEMPT: &str = "LOGIN_ATTEMPT";
pub const EVENT_REMOTE_UNLOCK: &str = "REMOTE_UNLOCK";
pub const EVENT_UNLOCK_ATTEMPT: &str = "UNLOCK_ATTEMPT";
pub const EVENT_LOGOUT: &str = "LOGOUT";

const PREF_LAST_LOGIN: &str = "last_login_timestamp";
const PREF_ALERT_DISMISSED: &str = "alert_dismissed_at";

const GEO_TIMEOUT_SECS: u64 = 5;

fn geo_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(GEO_TIMEOUT_SECS))
            .build()
            .expect("failed to build geolocation http client")
    })
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_unspecified()
}

fn is_private_v6(ip: Ipv6Addr) -> bool {
    // Unique-local fc00::/7 and link-local fe80::/10 alongside the basics.
    ip.is_loopback()
        || ip.is_unspecified()
        || (ip.segments()[0] & 0xfe00) == 0xfc00
        || (ip.segments()[0] & 0xffc0) == 0xfe80
}

/// A lookupable address: syntactically valid and not private, loopback, or
/// otherwise reserved. Anything else short-circuits to no location.
pub fn public_ip(ip_address: &str) -> Option<IpAddr> {
    let parsed: IpAddr = ip_address.parse().ok()?;
    let private = match parsed {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => is_private_v6(v6),
    };
    (!private).then_some(parsed)
}

#[derive(Deserialize)]
struct GeoResponse {
    status: String,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    city: Option<String>,
}

async fn geolocate(pool: &SqlitePool, ip_address: &str) -> (Option<String>, Option<String>) {
    let Some(parsed) = public_ip(ip_address) else {
        tracing::debug!(%ip_address, "skipping geolocation for private or invalid ip");
        return (None, None);
    };

    match repo::cached_geolocation(pool, ip_address).await {
        Ok(Some(cached)) => return cached,
        Ok(None) => {}
        Err(error) => tracing::warn!(%error, "failed to read geolocation cache"),
    }

    let url = format!("http://ip-api.com/json/{parsed}?fields=status,country,city");
    let result = async {
        let response = geo_client().get(&url).send().await?;
        response.json::<GeoResponse>().await
    }
    .await;

    match result {
        Ok(payload) if payload.status == "success" => {
            if let Err(error) = repo::cache_geolocation(
                pool,
                ip_address,
                payload.country.as_deref(),
                payload.city.as_deref(),
            )
            .await
            {
                tracing::warn!(%error, "failed to cache geolocation");
            }
            (payload.country, payload.city)
        }
        Ok(_) => {
            tracing::debug!(%ip_address, "geolocation service returned non-success");
            (None, None)
        }
        Err(error) => {
            tracing::warn!(%ip_address, %error, "geolocation lookup failed");
            (None, None)
        }
    }
}

/// Record a security event. Never fails the caller: storage errors are
/// logged and swallowed.
pub async fn log_event(
    pool: &SqlitePool,
    event_type: &str,
    success: bool,
    ip_address: Option<&str>,
    details: Option<&str>,
    user_agent: Option<&str>,
) {
    let (country, city) = match ip_address {
        Some(ip) => geolocate(pool, ip).await,
        None => (None, None),
    };

    let inserted = repo::insert_event(
        pool,
        repo::NewEvent {
            event_type,
            success,
            ip_address,
            country: country.as_deref(),
            city: city.as_deref(),
            details,
            user_agent,
        },
    )
    .await;

    match inserted {
        Ok(timestamp) => {
            if success && matches!(event_type, EVENT_LOGIN_ATTEMPT | EVENT_REMOTE_UNLOCK) {
                if let Err(error) = repo::set_preference(pool, PREF_LAST_LOGIN, &timestamp).await {
                    tracing::warn!(%error, "failed to update last login timestamp");
                }
            }
        }
        Err(error) => tracing::error!(%error, "failed to log security event"),
    }
}

// === Lockout ===

pub async fn is_ip_locked_out(pool: &SqlitePool, ip_address: &str) -> ApiResult<bool> {
    let Some(row) = repo::get_lockout(pool, ip_address).await? else {
        return Ok(false);
    };
    let Some(locked_until) = row.locked_until.as_deref() else {
        return Ok(false);
    };

    let still_locked = DateTime::parse_from_rfc3339(locked_until)
        .map(|until| Utc::now() < until.with_timezone(&Utc))
        .unwrap_or(false);

    if still_locked {
        Ok(true)
    } else {
        // Lockout lapsed: forget the row entirely.
        repo::clear_lockout(pool, ip_address).await?;
        Ok(false)
    }
}

/// Count a failed remote unlock. Returns true when this attempt tripped
/// the lockout.
pub async fn record_failed_remote_unlock(pool: &SqlitePool, ip_address: &str) -> ApiResult<bool> {
    let locked_until =
        (Utc::now() + Duration::minutes(LOCKOUT_DURATION_MINUTES)).to_rfc3339();
    let attempts =
        repo::record_failed_attempt(pool, ip_address, LOCKOUT_THRESHOLD, &locked_until).await?;

    let locked = attempts >= LOCKOUT_THRESHOLD;
    if locked {
        tracing::warn!(%ip_address, attempts, "ip locked out after repeated unlock failures");
    }
    Ok(locked)
}

pub async fn clear_ip_lockout(pool: &SqlitePool, ip_address: &str) -> ApiResult<()> {
    repo::clear_lockout(pool, ip_address).await
}

pub async fn lockout_remaining_seconds(pool: &SqlitePool, ip_address: &str) -> ApiResult<i64> {
    let Some(row) = repo::get_lockout(pool, ip_address).await? else {
        return Ok(0);
    };
    let Some(locked_until) = row.locked_until.as_deref() else {
        return Ok(0);
    };
    let remaining = DateTime::parse_from_rfc3339(locked_until)
        .map(|until| (until.with_timezone(&Utc) - Utc::now()).num_seconds())
        .unwrap_or(0);
    Ok(remaining.max(0))
}

// === Alerts ===

/// Failed attempts since the later of the last successful login and the
/// last alert dismissal.
pub async fn failed_since_last_login(pool: &SqlitePool) -> ApiResult<Vec<SecurityEventRow>> {
    let last_login = repo::get_preference(pool, PREF_LAST_LOGIN).await?;
    let dismissed_at = repo::get_preference(pool, PREF_ALERT_DISMISSED).await?;

    let cutoff = match (last_login, dismissed_at) {
        (Some(login), Some(dismissed)) => Some(login.max(dismissed)),
        (None, Some(dismissed)) => Some(dismissed),
        (Some(login), None) => Some(login),
        (None, None) => None,
    };

    repo::failed_events_since(pool, cutoff.as_deref()).await
}

pub async fn dismiss_security_alert(pool: &SqlitePool) -> ApiResult<()> {
    repo::set_preference(pool, PREF_ALERT_DISMISSED, &Utc::now().to_rfc3339()).await
}

// === CSV export ===

/// Sanitize a field for CSV export: HTML-escape, flatten control
/// characters, and defuse spreadsheet formula injection.
pub fn sanitize_csv_value(value: Option<&str>) -> String {
    let Some(value) = value else {
        return String::new();
    };
    let escaped = value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
        .replace('\r', " ")
        .replace('\n', " ")
        .replace('\t', " ");
    match escaped.chars().next() {
        Some(first) if "=+-@|%".contains(first) => format!("'{escaped}"),
        _ => escaped,
    }
}

pub async fn export_events_csv(pool: &SqlitePool) -> ApiResult<String> {
    let (events, _) = repo::get_events(
        pool,
        &repo::EventFilter {
            limit: 10_000,
            ..Default::default()
        },
    )
    .await?;

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "ID",
            "Event Type",
            "Success",
            "Timestamp",
            "IP Address",
            "Country",
            "City",
            "Details",
        ])
        .map_err(|e| crate::error::ApiError::Internal(e.to_string()))?;

    for event in &events {
        writer
            .write_record([
                event.id.to_string(),
                sanitize_csv_value(Some(&event.event_type)),
                if event.success { "Yes" } else { "No" }.to_string(),
                sanitize_csv_value(Some(&event.timestamp)),
                sanitize_csv_value(event.ip_address.as_deref()),
                sanitize_csv_value(event.country.as_deref()),
                sanitize_csv_value(event.city.as_deref()),
                sanitize_csv_value(event.details.as_deref()),
            ])
            .map_err(|e| crate::error::ApiError::Internal(e.to_string()))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| crate::error::ApiError::Internal(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| crate::error::ApiError::Internal(e.to_string()))
}
