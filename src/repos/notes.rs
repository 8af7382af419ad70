//! Notes repository: encrypted per-category notes with month inheritance,
//! general month notes, archival, and inheritance-impact analysis.

use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::crypto;
use crate::error::ApiResult;
use crate::models::{
    ArchivedNoteDto, ArchivedNoteRow, EffectiveNote, GeneralNoteDto, GeneralNoteRow,
    InheritanceImpact, MonthNotes, NoteDto, NoteRow, NotesBundle, RevisionEntry,
    SourceNotePreview,
};
use crate::repos::checkbox;

const PREVIEW_CHARS: usize = 100;
const MAX_FUTURE_MONTHS: usize = 12;

fn encrypt_content(content: &str, passphrase: &str) -> ApiResult<(String, String)> {
    Ok(crypto::encrypt(content, passphrase)?)
}

fn decrypt_content(encrypted: &str, salt: &str, passphrase: &str) -> ApiResult<String> {
    Ok(crypto::decrypt(encrypted, salt, passphrase)?)
}

fn content_preview(content: &str) -> String {
    if content.chars().count() > PREVIEW_CHARS {
        let preview: String = content.chars().take(PREVIEW_CHARS).collect();
        format!("{preview}...")
    } else {
        content.to_string()
    }
}

pub struct SaveNote<'a> {
    pub category_type: &'a str,
    pub category_id: &'a str,
    pub category_name: &'a str,
    pub month_key: &'a str,
    pub content: &'a str,
    pub group_id: Option<&'a str>,
    pub group_name: Option<&'a str>,
}

// === Category/group notes ===

pub async fn save_note(
    pool: &SqlitePool,
    passphrase: &str,
    note: SaveNote<'_>,
) -> ApiResult<NoteDto> {
    let now = Utc::now().to_rfc3339();
    let (encrypted, salt) = encrypt_content(note.content, passphrase)?;

    let mut tx = pool.begin().await?;

    let existing = sqlx::query_as::<_, NoteRow>(
        r#"
        SELECT * FROM notes
        WHERE category_type = ? AND category_id = ? AND month_key = ?
        "#,
    )
    .bind(note.category_type)
    .bind(note.category_id)
    .bind(note.month_key)
    .fetch_optional(&mut *tx)
    .await?;

    let row = if let Some(existing) = existing {
        sqlx::query(
            r#"
            UPDATE notes
            SET content_enc = ?,
                salt = ?,
                updated_at = ?,
                category_name = ?,
                group_id = COALESCE(?, group_id),
                group_name = COALESCE(?, group_name)
            WHERE id = ?
            "#,
        )
        .bind(&encrypted)
        .bind(&salt)
        .bind(&now)
        .bind(note.category_name)
        .bind(note.group_id)
        .bind(note.group_name)
        .bind(&existing.id)
        .execute(&mut *tx)
        .await?;

        let group_id = note
            .group_id
            .map(str::to_string)
            .or_else(|| existing.group_id.clone());
        let group_name = note
            .group_name
            .map(str::to_string)
            .or_else(|| existing.group_name.clone());
        NoteRow {
            category_name: note.category_name.to_string(),
            group_id,
            group_name,
            content_enc: encrypted,
            salt,
            updated_at: now,
            ..existing
        }
    } else {
        let row = NoteRow {
            id: Uuid::new_v4().to_string(),
            category_type: note.category_type.to_string(),
            category_id: note.category_id.to_string(),
            category_name: note.category_name.to_string(),
            group_id: note.group_id.map(str::to_string),
            group_name: note.group_name.map(str::to_string),
            month_key: note.month_key.to_string(),
            content_enc: encrypted,
            salt,
            created_at: now.clone(),
            updated_at: now,
        };
        sqlx::query(
            r#"
            INSERT INTO notes (id, category_type, category_id, category_name, group_id,
                               group_name, month_key, content_enc, salt, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.category_type)
        .bind(&row.category_id)
        .bind(&row.category_name)
        .bind(&row.group_id)
        .bind(&row.group_name)
        .bind(&row.month_key)
        .bind(&row.content_enc)
        .bind(&row.salt)
        .bind(&row.created_at)
        .bind(&row.updated_at)
        .execute(&mut *tx)
        .await?;
        row
    };

    sqlx::query(
        r#"
        INSERT INTO known_categories (category_id, name)
        VALUES (?, ?)
        ON CONFLICT(category_id) DO UPDATE SET name = excluded.name
        "#,
    )
    .bind(note.category_id)
    .bind(note.category_name)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(NoteDto::from_row(&row, note.content.to_string()))
}

/// Delete a note and every checkbox state that hangs off it.
pub async fn delete_note(pool: &SqlitePool, note_id: &str) -> ApiResult<bool> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM checkbox_states WHERE note_id = ?")
        .bind(note_id)
        .execute(&mut *tx)
        .await?;
    let result = sqlx::query("DELETE FROM notes WHERE id = ?")
        .bind(note_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_note(
    pool: &SqlitePool,
    note_id: &str,
    passphrase: &str,
) -> ApiResult<Option<NoteDto>> {
    let row = sqlx::query_as::<_, NoteRow>("SELECT * FROM notes WHERE id = ?")
        .bind(note_id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => {
            let content = decrypt_content(&row.content_enc, &row.salt, passphrase)?;
            Ok(Some(NoteDto::from_row(&row, content)))
        }
        None => Ok(None),
    }
}

pub async fn notes_for_category(
    pool: &SqlitePool,
    category_type: &str,
    category_id: &str,
    passphrase: &str,
) -> ApiResult<Vec<NoteDto>> {
    let rows = sqlx::query_as::<_, NoteRow>(
        r#"
        SELECT * FROM notes
        WHERE category_type = ? AND category_id = ?
        ORDER BY month_key
        "#,
    )
    .bind(category_type)
    .bind(category_id)
    .fetch_all(pool)
    .await?;

    let mut notes = Vec::with_capacity(rows.len());
    for row in &rows {
        let content = decrypt_content(&row.content_enc, &row.salt, passphrase)?;
        notes.push(NoteDto::from_row(row, content));
    }
    Ok(notes)
}

/// The note that applies at `target_month`: latest note at or before it.
pub async fn effective_note(
    pool: &SqlitePool,
    category_type: &str,
    category_id: &str,
    target_month: &str,
    passphrase: &str,
) -> ApiResult<Option<EffectiveNote<NoteDto>>> {
    let row = sqlx::query_as::<_, NoteRow>(
        r#"
        SELECT * FROM notes
        WHERE category_type = ? AND category_id = ? AND month_key <= ?
        ORDER BY month_key DESC
        LIMIT 1
        "#,
    )
    .bind(category_type)
    .bind(category_id)
    .bind(target_month)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let content = decrypt_content(&row.content_enc, &row.salt, passphrase)?;
            let source_month = row.month_key.clone();
            Ok(Some(EffectiveNote {
                is_inherited: source_month != target_month,
                note: NoteDto::from_row(&row, content),
                source_month,
            }))
        }
        None => Ok(None),
    }
}

pub async fn all_notes_for_month(
    pool: &SqlitePool,
    month_key: &str,
    passphrase: &str,
) -> ApiResult<MonthNotes> {
    let refs: Vec<(String, String)> = sqlx::query_as(
        "SELECT DISTINCT category_type, category_id FROM notes",
    )
    .fetch_all(pool)
    .await?;

    let mut effective_notes = HashMap::new();
    for (category_type, category_id) in refs {
        if let Some(effective) =
            effective_note(pool, &category_type, &category_id, month_key, passphrase).await?
        {
            effective_notes.insert(format!("{category_type}:{category_id}"), effective);
        }
    }

    let effective_general_note = effective_general_note(pool, month_key, passphrase).await?;

    Ok(MonthNotes {
        month_key: month_key.to_string(),
        effective_notes,
        effective_general_note,
    })
}

pub async fn all_category_notes(pool: &SqlitePool, passphrase: &str) -> ApiResult<Vec<NoteDto>> {
    let rows = sqlx::query_as::<_, NoteRow>(
        "SELECT * FROM notes ORDER BY category_id, month_key ASC",
    )
    .fetch_all(pool)
    .await?;

    let mut notes = Vec::with_capacity(rows.len());
    for row in &rows {
        let content = decrypt_content(&row.content_enc, &row.salt, passphrase)?;
        notes.push(NoteDto::from_row(row, content));
    }
    Ok(notes)
}

/// Everything at once, so clients can resolve inheritance for any month
/// without further round-trips.
pub async fn all_notes(pool: &SqlitePool, passphrase: &str) -> ApiResult<NotesBundle> {
    Ok(NotesBundle {
        notes: all_category_notes(pool, passphrase).await?,
        general_notes: all_general_notes(pool, passphrase).await?,
    })
}

pub async fn revision_history(
    pool: &SqlitePool,
    category_type: &str,
    category_id: &str,
    passphrase: &str,
) -> ApiResult<Vec<RevisionEntry>> {
    let notes = notes_for_category(pool, category_type, category_id, passphrase).await?;
    Ok(notes
        .into_iter()
        .map(|note| RevisionEntry {
            month_key: note.month_key,
            content_preview: content_preview(&note.content),
            content: note.content,
            created_at: note.created_at,
            updated_at: note.updated_at,
        })
        .collect())
}

// === General notes ===

pub async fn save_general_note(
    pool: &SqlitePool,
    month_key: &str,
    content: &str,
    passphrase: &str,
) -> ApiResult<GeneralNoteDto> {
    let now = Utc::now().to_rfc3339();
    let (encrypted, salt) = encrypt_content(content, passphrase)?;

    let existing = sqlx::query_as::<_, GeneralNoteRow>(
        "SELECT * FROM general_notes WHERE month_key = ?",
    )
    .bind(month_key)
    .fetch_optional(pool)
    .await?;

    let row = if let Some(existing) = existing {
        sqlx::query(
            "UPDATE general_notes SET content_enc = ?, salt = ?, updated_at = ? WHERE month_key = ?",
        )
        .bind(&encrypted)
        .bind(&salt)
        .bind(&now)
        .bind(month_key)
        .execute(pool)
        .await?;
        GeneralNoteRow {
            content_enc: encrypted,
            salt,
            updated_at: now,
            ..existing
        }
    } else {
        let row = GeneralNoteRow {
            month_key: month_key.to_string(),
            id: Uuid::new_v4().to_string(),
            content_enc: encrypted,
            salt,
            created_at: now.clone(),
            updated_at: now,
        };
        sqlx::query(
            r#"
            INSERT INTO general_notes (month_key, id, content_enc, salt, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.month_key)
        .bind(&row.id)
        .bind(&row.content_enc)
        .bind(&row.salt)
        .bind(&row.created_at)
        .bind(&row.updated_at)
        .execute(pool)
        .await?;
        row
    };

    Ok(GeneralNoteDto::from_row(&row, content.to_string()))
}

pub async fn get_general_note(
    pool: &SqlitePool,
    month_key: &str,
    passphrase: &str,
) -> ApiResult<Option<GeneralNoteDto>> {
    let row = sqlx::query_as::<_, GeneralNoteRow>(
        "SELECT * FROM general_notes WHERE month_key = ?",
    )
    .bind(month_key)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let content = decrypt_content(&row.content_enc, &row.salt, passphrase)?;
            Ok(Some(GeneralNoteDto::from_row(&row, content)))
        }
        None => Ok(None),
    }
}

pub async fn all_general_notes(
    pool: &SqlitePool,
    passphrase: &str,
) -> ApiResult<Vec<GeneralNoteDto>> {
    let rows = sqlx::query_as::<_, GeneralNoteRow>(
        "SELECT * FROM general_notes ORDER BY month_key ASC",
    )
    .fetch_all(pool)
    .await?;

    let mut notes = Vec::with_capacity(rows.len());
    for row in &rows {
        let content = decrypt_content(&row.content_enc, &row.salt, passphrase)?;
        notes.push(GeneralNoteDto::from_row(row, content));
    }
    Ok(notes)
}

pub async fn effective_general_note(
    pool: &SqlitePool,
    target_month: &str,
    passphrase: &str,
) -> ApiResult<Option<EffectiveNote<GeneralNoteDto>>> {
    let row = sqlx::query_as::<_, GeneralNoteRow>(
        r#"
        SELECT * FROM general_notes
        WHERE month_key <= ?
        ORDER BY month_key DESC
        LIMIT 1
        "#,
    )
    .bind(target_month)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let content = decrypt_content(&row.content_enc, &row.salt, passphrase)?;
            let source_month = row.month_key.clone();
            Ok(Some(EffectiveNote {
                is_inherited: source_month != target_month,
                note: GeneralNoteDto::from_row(&row, content),
                source_month,
            }))
        }
        None => Ok(None),
    }
}

/// Delete a general note. Checkbox rows keyed to it are only removed when
/// the caller explicitly asks.
pub async fn delete_general_note(
    pool: &SqlitePool,
    month_key: &str,
    clear_checkboxes: bool,
) -> ApiResult<bool> {
    let mut tx = pool.begin().await?;
    if clear_checkboxes {
        sqlx::query("DELETE FROM checkbox_states WHERE general_note_month_key = ?")
            .bind(month_key)
            .execute(&mut *tx)
            .await?;
    }
    let result = sqlx::query("DELETE FROM general_notes WHERE month_key = ?")
        .bind(month_key)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}

// === Archived notes ===

pub async fn archived_notes(pool: &SqlitePool, passphrase: &str) -> ApiResult<Vec<ArchivedNoteDto>> {
    let rows = sqlx::query_as::<_, ArchivedNoteRow>("SELECT * FROM archived_notes")
        .fetch_all(pool)
        .await?;

    let mut notes = Vec::with_capacity(rows.len());
    for row in rows {
        let content = decrypt_content(&row.content_enc, &row.salt, passphrase)?;
        notes.push(ArchivedNoteDto {
            id: row.id,
            category_type: row.category_type,
            category_id: row.category_id,
            category_name: row.category_name,
            group_id: row.group_id,
            group_name: row.group_name,
            month_key: row.month_key,
            content,
            created_at: row.created_at,
            updated_at: row.updated_at,
            archived_at: row.archived_at,
            original_category_name: row.original_category_name,
            original_group_name: row.original_group_name,
        });
    }
    Ok(notes)
}

pub async fn delete_archived_note(pool: &SqlitePool, note_id: &str) -> ApiResult<bool> {
    let result = sqlx::query("DELETE FROM archived_notes WHERE id = ?")
        .bind(note_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Move every note for a deleted category into the archive. Ciphertext and
/// salt are copied verbatim; nothing is decrypted.
pub async fn archive_notes_for_category(pool: &SqlitePool, category_id: &str) -> ApiResult<u64> {
    let now = Utc::now().to_rfc3339();
    let mut tx = pool.begin().await?;

    let rows = sqlx::query_as::<_, NoteRow>("SELECT * FROM notes WHERE category_id = ?")
        .bind(category_id)
        .fetch_all(&mut *tx)
        .await?;

    for row in &rows {
        sqlx::query(
            r#"
            INSERT INTO archived_notes (id, category_type, category_id, category_name,
                group_id, group_name, month_key, content_enc, salt, created_at, updated_at,
                archived_at, original_category_name, original_group_name)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.category_type)
        .bind(&row.category_id)
        .bind(&row.category_name)
        .bind(&row.group_id)
        .bind(&row.group_name)
        .bind(&row.month_key)
        .bind(&row.content_enc)
        .bind(&row.salt)
        .bind(&row.created_at)
        .bind(&row.updated_at)
        .bind(&now)
        .bind(&row.category_name)
        .bind(&row.group_name)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM checkbox_states WHERE note_id = ?")
            .bind(&row.id)
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query("DELETE FROM notes WHERE category_id = ?")
        .bind(category_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM known_categories WHERE category_id = ?")
        .bind(category_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(rows.len() as u64)
}

/// Compare the known-category set with the ids currently present upstream
/// and archive notes for anything that disappeared.
pub async fn sync_categories(
    pool: &SqlitePool,
    current_ids: &HashSet<String>,
) -> ApiResult<u64> {
    let known: Vec<(String,)> = sqlx::query_as("SELECT category_id FROM known_categories")
        .fetch_all(pool)
        .await?;

    let mut archived_count = 0u64;
    for (category_id,) in known {
        if !current_ids.contains(&category_id) {
            archived_count += archive_notes_for_category(pool, &category_id).await?;
        }
    }
    Ok(archived_count)
}

// === Inheritance impact ===

pub async fn inheritance_impact(
    pool: &SqlitePool,
    category_type: &str,
    category_id: &str,
    month_key: &str,
    passphrase: &str,
) -> ApiResult<InheritanceImpact> {
    let notes = notes_for_category(pool, category_type, category_id, passphrase).await?;

    let source_note = notes.iter().rev().find(|n| n.month_key.as_str() < month_key);
    let Some(source_note) = source_note else {
        return Ok(InheritanceImpact::empty());
    };

    let next_custom_month = notes
        .iter()
        .find(|n| n.month_key.as_str() > month_key)
        .map(|n| n.month_key.clone());

    let affected_months =
        months_in_range(month_key, next_custom_month.as_deref(), MAX_FUTURE_MONTHS);

    let states = checkbox::states_by_viewing_months(
        pool,
        &affected_months,
        Some(&source_note.id),
        None,
    )
    .await?;

    Ok(InheritanceImpact {
        source_note: Some(SourceNotePreview {
            id: source_note.id.clone(),
            month_key: source_note.month_key.clone(),
            content_preview: content_preview(&source_note.content),
        }),
        affected_months,
        months_with_checkbox_states: count_checked(states),
        next_custom_note_month: next_custom_month,
    })
}

pub async fn general_inheritance_impact(
    pool: &SqlitePool,
    month_key: &str,
    passphrase: &str,
) -> ApiResult<InheritanceImpact> {
    let notes = all_general_notes(pool, passphrase).await?;

    let source_note = notes.iter().rev().find(|n| n.month_key.as_str() < month_key);
    let Some(source_note) = source_note else {
        return Ok(InheritanceImpact::empty());
    };

    let next_custom_month = notes
        .iter()
        .find(|n| n.month_key.as_str() > month_key)
        .map(|n| n.month_key.clone());

    let affected_months =
        months_in_range(month_key, next_custom_month.as_deref(), MAX_FUTURE_MONTHS);

    let states = checkbox::states_by_viewing_months(
        pool,
        &affected_months,
        None,
        Some(&source_note.month_key),
    )
    .await?;

    Ok(InheritanceImpact {
        source_note: Some(SourceNotePreview {
            id: source_note.id.clone(),
            month_key: source_note.month_key.clone(),
            content_preview: content_preview(&source_note.content),
        }),
        affected_months,
        months_with_checkbox_states: count_checked(states),
        next_custom_note_month: next_custom_month,
    })
}

fn count_checked(states: HashMap<String, Vec<bool>>) -> HashMap<String, usize> {
    states
        .into_iter()
        .filter_map(|(month, states)| {
            let checked = states.iter().filter(|s| **s).count();
            (checked > 0).then_some((month, checked))
        })
        .collect()
}

/// Consecutive month keys from `start_month` up to `end_month` (exclusive),
/// capped at `max_future_months` entries.
pub fn months_in_range(
    start_month: &str,
    end_month: Option<&str>,
    max_future_months: usize,
) -> Vec<String> {
    let mut parts = start_month.split('-');
    let (Some(year), Some(month)) = (parts.next(), parts.next()) else {
        return Vec::new();
    };
    let (Ok(mut year), Ok(mut month)) = (year.parse::<i32>(), month.parse::<u32>()) else {
        return Vec::new();
    };

    let mut months = Vec::new();
    while months.len() < max_future_months {
        let month_key = format!("{year:04}-{month:02}");
        if let Some(end) = end_month {
            if month_key.as_str() >= end {
                break;
            }
        }
        months.push(month_key);

        month += 1;
        if month > 12 {
            month = 1;
            year += 1;
        }
    }
    months
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::migrations::test_pool;
    use pretty_assertions::assert_eq;

    const PASS: &str = "test-passphrase";

    async fn seed_note(pool: &SqlitePool, month_key: &str, content: &str) -> NoteDto {
        save_note(
            pool,
            PASS,
            SaveNote {
                category_type: "category",
                category_id: "cat-42",
                category_name: "Groceries",
                month_key,
                content,
                group_id: Some("grp-1"),
                group_name: Some("Essentials"),
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn save_is_upsert_on_logical_key() {
        let pool = test_pool().await;
        let first = seed_note(&pool, "2025-01", "first").await;
        let second = seed_note(&pool, "2025-01", "second").await;

        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);

        let fetched = get_note(&pool, &first.id, PASS).await.unwrap().unwrap();
        assert_eq!(fetched.content, "second");

        let all = notes_for_category(&pool, "category", "cat-42", PASS)
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn save_updates_known_categories() {
        let pool = test_pool().await;
        seed_note(&pool, "2025-01", "x").await;

        let name: (String,) =
            sqlx::query_as("SELECT name FROM known_categories WHERE category_id = 'cat-42'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(name.0, "Groceries");
    }

    #[tokio::test]
    async fn effective_note_resolves_inheritance() {
        let pool = test_pool().await;
        seed_note(&pool, "2025-01", "january note").await;
        seed_note(&pool, "2025-06", "june note").await;

        let march = effective_note(&pool, "category", "cat-42", "2025-03", PASS)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(march.note.content, "january note");
        assert_eq!(march.source_month, "2025-01");
        assert!(march.is_inherited);

        let june = effective_note(&pool, "category", "cat-42", "2025-06", PASS)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(june.note.content, "june note");
        assert!(!june.is_inherited);

        // Latest note wins for any later month.
        let december = effective_note(&pool, "category", "cat-42", "2025-12", PASS)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(december.source_month, "2025-06");

        let before = effective_note(&pool, "category", "cat-42", "2024-12", PASS)
            .await
            .unwrap();
        assert!(before.is_none());
    }

    #[tokio::test]
    async fn wrong_passphrase_is_auth_error() {
        let pool = test_pool().await;
        let note = seed_note(&pool, "2025-01", "secret").await;
        let result = get_note(&pool, &note.id, "wrong-passphrase").await;
        assert!(matches!(result, Err(ApiError::Auth(_))));
    }

    #[tokio::test]
    async fn inheritance_impact_reports_window_and_next_note() {
        let pool = test_pool().await;
        let january = seed_note(&pool, "2025-01", "january note").await;
        seed_note(&pool, "2025-06", "june note").await;

        // A checked box in an affected month, scoped to the source note.
        checkbox::update_state(&pool, "2025-04", 0, true, Some(&january.id), None)
            .await
            .unwrap();

        let impact = inheritance_impact(&pool, "category", "cat-42", "2025-04", PASS)
            .await
            .unwrap();

        let source = impact.source_note.unwrap();
        assert_eq!(source.month_key, "2025-01");
        assert_eq!(impact.next_custom_note_month.as_deref(), Some("2025-06"));
        assert_eq!(impact.affected_months, vec!["2025-04", "2025-05"]);
        assert_eq!(impact.months_with_checkbox_states.get("2025-04"), Some(&1));
    }

    #[tokio::test]
    async fn inheritance_impact_without_prior_note_is_empty() {
        let pool = test_pool().await;
        seed_note(&pool, "2025-06", "june note").await;

        let impact = inheritance_impact(&pool, "category", "cat-42", "2025-01", PASS)
            .await
            .unwrap();
        assert!(impact.source_note.is_none());
        assert!(impact.affected_months.is_empty());
        assert!(impact.months_with_checkbox_states.is_empty());
        assert!(impact.next_custom_note_month.is_none());
    }

    #[tokio::test]
    async fn archive_on_category_deletion() {
        let pool = test_pool().await;
        seed_note(&pool, "2025-01", "jan").await;
        seed_note(&pool, "2025-02", "feb").await;

        let current: HashSet<String> = ["cat-7".to_string(), "cat-9".to_string()].into();
        let archived = sync_categories(&pool, &current).await.unwrap();
        assert_eq!(archived, 2);

        let remaining = notes_for_category(&pool, "category", "cat-42", PASS)
            .await
            .unwrap();
        assert!(remaining.is_empty());

        let archived = archived_notes(&pool, PASS).await.unwrap();
        assert_eq!(archived.len(), 2);
        assert!(archived.iter().all(|n| !n.archived_at.is_empty()));
        assert!(archived
            .iter()
            .all(|n| n.original_category_name == "Groceries"));

        let known: Option<(String,)> =
            sqlx::query_as("SELECT name FROM known_categories WHERE category_id = 'cat-42'")
                .fetch_optional(&pool)
                .await
                .unwrap();
        assert!(known.is_none());
    }

    #[tokio::test]
    async fn archived_content_still_decrypts() {
        let pool = test_pool().await;
        seed_note(&pool, "2025-01", "keep me").await;
        archive_notes_for_category(&pool, "cat-42").await.unwrap();

        let archived = archived_notes(&pool, PASS).await.unwrap();
        assert_eq!(archived[0].content, "keep me");
    }

    #[tokio::test]
    async fn delete_note_removes_checkbox_states() {
        let pool = test_pool().await;
        let note = seed_note(&pool, "2025-01", "x").await;
        checkbox::update_state(&pool, "2025-02", 0, true, Some(&note.id), None)
            .await
            .unwrap();

        assert!(delete_note(&pool, &note.id).await.unwrap());

        let states = checkbox::get_states(&pool, Some(&note.id), None, "2025-02")
            .await
            .unwrap();
        assert!(states.is_empty());
    }

    #[tokio::test]
    async fn general_note_inheritance_and_delete() {
        let pool = test_pool().await;
        save_general_note(&pool, "2025-01", "general jan", PASS)
            .await
            .unwrap();

        let effective = effective_general_note(&pool, "2025-03", PASS)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(effective.source_month, "2025-01");
        assert!(effective.is_inherited);

        assert!(delete_general_note(&pool, "2025-01", false).await.unwrap());
        assert!(effective_general_note(&pool, "2025-03", PASS)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn revision_history_previews_long_content() {
        let pool = test_pool().await;
        let long = "x".repeat(150);
        seed_note(&pool, "2025-01", &long).await;

        let history = revision_history(&pool, "category", "cat-42", PASS)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content_preview.chars().count(), 103);
        assert!(history[0].content_preview.ends_with("..."));
    }

    #[test]
    fn months_in_range_caps_at_twelve() {
        let months = months_in_range("2025-01", None, 12);
        assert_eq!(months.len(), 12);
        assert_eq!(months.first().map(String::as_str), Some("2025-01"));
        assert_eq!(months.last().map(String::as_str), Some("2025-12"));
    }

    #[test]
    fn months_in_range_stops_before_end() {
        let months = months_in_range("2025-04", Some("2025-06"), 12);
        assert_eq!(months, vec!["2025-04", "2025-05"]);
    }

    #[test]
    fn months_in_range_crosses_year_boundary() {
        let months = months_in_range("2025-11", Some("2026-02"), 12);
        assert_eq!(months, vec!["2025-11", "2025-12", "2026-01"]);
    }
}
