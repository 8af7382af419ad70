//! Upstream credentials singleton. All secret fields of the row share one
//! salt; the wrapped notes key lets remote sessions decrypt notes without
//! re-deriving from the login passphrase.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::crypto;
use crate::error::{ApiError, ApiResult};
use crate::models::CredentialsRow;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    pub mfa_secret: Option<String>,
}

pub async fn is_configured(pool: &SqlitePool) -> ApiResult<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM credentials WHERE id = 1")
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

async fn fetch_row(pool: &SqlitePool) -> ApiResult<CredentialsRow> {
    let row = sqlx::query_as::<_, CredentialsRow>(
        "SELECT salt, email_enc, password_enc, mfa_secret_enc, notes_key_enc \
         FROM credentials WHERE id = 1",
    )
    .fetch_optional(pool)
    .await?;
    row.ok_or_else(|| ApiError::NotConfigured("Credentials not configured".into()))
}

/// Save (or replace) the singleton row, re-encrypting everything under a
/// fresh salt. The notes key is preserved across saves so previously shared
/// remote sessions keep working; it is created on first save.
pub async fn save(
    pool: &SqlitePool,
    passphrase: &str,
    credentials: &Credentials,
) -> ApiResult<()> {
    let existing_notes_key = match fetch_row(pool).await {
        Ok(row) => match row.notes_key_enc {
            Some(wrapped) => Some(crypto::decrypt(&wrapped, &row.salt, passphrase)?),
            None => None,
        },
        Err(ApiError::NotConfigured(_)) => None,
        Err(error) => return Err(error),
    };
    let notes_key = existing_notes_key.unwrap_or_else(crypto::generate_notes_key);

    let salt = crypto::generate_salt();
    let email_enc = crypto::encrypt_with_salt(&credentials.email, passphrase, &salt)?;
    let password_enc = crypto::encrypt_with_salt(&credentials.password, passphrase, &salt)?;
    let mfa_secret_enc = match &credentials.mfa_secret {
        Some(secret) => Some(crypto::encrypt_with_salt(secret, passphrase, &salt)?),
        None => None,
    };
    let notes_key_enc = crypto::encrypt_with_salt(&notes_key, passphrase, &salt)?;
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO credentials
            (id, salt, email_enc, password_enc, mfa_secret_enc, notes_key_enc, created_at, updated_at)
        VALUES (1, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            salt = excluded.salt,
            email_enc = excluded.email_enc,
            password_enc = excluded.password_enc,
            mfa_secret_enc = excluded.mfa_secret_enc,
            notes_key_enc = excluded.notes_key_enc,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&salt)
    .bind(&email_enc)
    .bind(&password_enc)
    .bind(&mfa_secret_enc)
    .bind(&notes_key_enc)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load(pool: &SqlitePool, passphrase: &str) -> ApiResult<Credentials> {
    let row = fetch_row(pool).await?;
    let email = crypto::decrypt(&row.email_enc, &row.salt, passphrase)?;
    let password = crypto::decrypt(&row.password_enc, &row.salt, passphrase)?;
    let mfa_secret = match row.mfa_secret_enc {
        Some(encrypted) => Some(crypto::decrypt(&encrypted, &row.salt, passphrase)?),
        None => None,
    };
    Ok(Credentials {
        email,
        password,
        mfa_secret,
    })
}

/// Authenticated decrypt of the stored email doubles as passphrase
/// verification.
pub async fn verify_passphrase(pool: &SqlitePool, passphrase: &str) -> ApiResult<()> {
    let row = fetch_row(pool).await?;
    crypto::decrypt(&row.email_enc, &row.salt, passphrase)?;
    Ok(())
}

pub async fn notes_key(pool: &SqlitePool, passphrase: &str) -> ApiResult<Option<String>> {
    let row = fetch_row(pool).await?;
    match row.notes_key_enc {
        Some(wrapped) => Ok(Some(crypto::decrypt(&wrapped, &row.salt, passphrase)?)),
        None => Ok(None),
    }
}
