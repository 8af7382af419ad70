pub mod notes;
pub mod refunds;
pub mod security;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::{header, request::Parts};
use regex::Regex;
use std::net::SocketAddr;
use std::sync::OnceLock;

use crate::error::ApiError;
use crate::state::AppState;

pub const ERR_INVALID_MONTH_KEY: &str = "Invalid month_key format. Expected YYYY-MM.";
pub const ERR_INVALID_VIEWING_MONTH: &str = "Invalid viewing_month. Expected YYYY-MM.";
pub const ERR_INVALID_CATEGORY_TYPE: &str = "Invalid category_type. Must be 'group' or 'category'.";
pub const ERR_INVALID_NOTE_ID: &str = "Invalid note_id.";
pub const ERR_INVALID_CATEGORY_ID: &str = "Invalid category_id.";
pub const ERR_SESSION_EXPIRED: &str = "Session expired. Please unlock again.";

const MAX_NAME_LEN: usize = 255;
const MAX_ID_LEN: usize = 100;

fn month_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{4}-\d{2}$").expect("invalid month key pattern"))
}

pub fn is_valid_month_key(value: &str) -> bool {
    month_key_pattern().is_match(value)
}

pub fn require_month_key(value: &str, message: &str) -> Result<(), ApiError> {
    if is_valid_month_key(value) {
        Ok(())
    } else {
        Err(ApiError::Validation(message.to_string()))
    }
}

/// Ids pass through to SQL and upstream URLs; only a conservative charset
/// is accepted.
pub fn sanitize_id(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_ID_LEN {
        return None;
    }
    trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        .then(|| trimmed.to_string())
}

pub fn sanitize_name(value: &str) -> String {
    value.trim().chars().take(MAX_NAME_LEN).collect()
}

/// The note-content passphrase for this request: the `X-Notes-Key` header
/// in desktop-proximal mode, otherwise the unlocked session cell.
pub struct Passphrase(pub String);

impl FromRequestParts<AppState> for Passphrase {
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let header_key = parts
            .headers
            .get("x-notes-key")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let session = state.session.clone();
        async move {
            if let Some(key) = header_key {
                if !key.is_empty() {
                    return Ok(Passphrase(key));
                }
            }
            match session.get().await {
                Some(passphrase) => Ok(Passphrase(passphrase)),
                None => Err(ApiError::Validation(ERR_SESSION_EXPIRED.into())),
            }
        }
    }
}

/// Best client address available: first X-Forwarded-For hop, else the
/// socket peer.
pub fn client_ip(headers: &axum::http::HeaderMap, addr: &ConnectInfo<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| addr.0.ip().to_string())
}

pub fn user_agent(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn month_key_grammar_is_strict() {
        assert!(is_valid_month_key("2025-01"));
        assert!(is_valid_month_key("1999-12"));
        assert!(!is_valid_month_key("2025-1"));
        assert!(!is_valid_month_key("25-01"));
        assert!(!is_valid_month_key("2025/01"));
        assert!(!is_valid_month_key("2025-013"));
        assert!(!is_valid_month_key(""));
    }

    #[test]
    fn id_sanitization_rejects_unsafe_input() {
        assert_eq!(sanitize_id(" cat-42 "), Some("cat-42".into()));
        assert_eq!(sanitize_id("a_b_C9"), Some("a_b_C9".into()));
        assert_eq!(sanitize_id("id; DROP TABLE notes"), None);
        assert_eq!(sanitize_id("../etc/passwd"), None);
        assert_eq!(sanitize_id(""), None);
        assert_eq!(sanitize_id(&"x".repeat(101)), None);
    }

    #[test]
    fn name_sanitization_trims_and_caps() {
        assert_eq!(sanitize_name("  Groceries  "), "Groceries");
        assert_eq!(sanitize_name(&"n".repeat(300)).len(), 255);
    }
}
