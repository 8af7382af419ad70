use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;

#[derive(Debug, Serialize, Deserialize, Copy, Clone, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum CategoryType {
    Group,
    Category,
}

impl CategoryType {
    pub const fn as_str(self) -> &'static str {
        match self {
            CategoryType::Group => "group",
            CategoryType::Category => "category",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "group" => Some(CategoryType::Group),
            "category" => Some(CategoryType::Category),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct NoteRow {
    pub id: String,
    pub category_type: String,
    pub category_id: String,
    pub category_name: String,
    pub group_id: Option<String>,
    pub group_name: Option<String>,
    pub month_key: String,
    pub content_enc: String,
    pub salt: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct GeneralNoteRow {
    pub month_key: String,
    pub id: String,
    pub content_enc: String,
    pub salt: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct ArchivedNoteRow {
    pub id: String,
    pub category_type: String,
    pub category_id: String,
    pub category_name: String,
    pub group_id: Option<String>,
    pub group_name: Option<String>,
    pub month_key: String,
    pub content_enc: String,
    pub salt: String,
    pub created_at: String,
    pub updated_at: String,
    pub archived_at: String,
    pub original_category_name: String,
    pub original_group_name: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct CredentialsRow {
    pub salt: String,
    pub email_enc: String,
    pub password_enc: String,
    pub mfa_secret_enc: Option<String>,
    pub notes_key_enc: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct RefundsConfigRow {
    pub replacement_tag_id: Option<String>,
    pub replace_tag_by_default: bool,
    pub aging_warning_days: i64,
    pub show_badge: bool,
    pub hide_matched_transactions: bool,
    pub hide_expected_transactions: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct RefundsSavedViewRow {
    pub id: String,
    pub name: String,
    pub tag_ids: String,
    pub category_ids: Option<String>,
    pub sort_order: i64,
    pub exclude_from_all: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct RefundsMatchRow {
    pub id: String,
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

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SecurityEventRow {
    pub id: i64,
    pub event_type: String,
    pub success: bool,
    pub timestamp: String,
    pub ip_address: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub details: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct IpLockoutRow {
    pub failed_attempts: i64,
    pub locked_until: Option<String>,
}

// === Decrypted DTOs ===

#[derive(Debug, Clone, Serialize)]
pub struct NoteDto {
    pub id: String,
    pub category_type: String,
    pub category_id: String,
    pub category_name: String,
    pub group_id: Option<String>,
    pub group_name: Option<String>,
    pub month_key: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

impl NoteDto {
    pub fn from_row(row: &NoteRow, content: String) -> Self {
        NoteDto {
            id: row.id.clone(),
            category_type: row.category_type.clone(),
            category_id: row.category_id.clone(),
            category_name: row.category_name.clone(),
            group_id: row.group_id.clone(),
            group_name: row.group_name.clone(),
            month_key: row.month_key.clone(),
            content,
            created_at: row.created_at.clone(),
            updated_at: row.updated_at.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneralNoteDto {
    pub id: String,
    pub month_key: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

impl GeneralNoteDto {
    pub fn from_row(row: &GeneralNoteRow, content: String) -> Self {
        GeneralNoteDto {
            id: row.id.clone(),
            month_key: row.month_key.clone(),
            content,
            created_at: row.created_at.clone(),
            updated_at: row.updated_at.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchivedNoteDto {
    pub id: String,
    pub category_type: String,
    pub category_id: String,
    pub category_name: String,
    pub group_id: Option<String>,
    pub group_name: Option<String>,
    pub month_key: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
    pub archived_at: String,
    pub original_category_name: String,
    pub original_group_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EffectiveNote<T> {
    pub note: T,
    pub source_month: String,
    pub is_inherited: bool,
}

#[derive(Debug, Serialize)]
pub struct MonthNotes {
    pub month_key: String,
    pub effective_notes: HashMap<String, EffectiveNote<NoteDto>>,
    pub effective_general_note: Option<EffectiveNote<GeneralNoteDto>>,
}

#[derive(Debug, Serialize)]
pub struct NotesBundle {
    pub notes: Vec<NoteDto>,
    pub general_notes: Vec<GeneralNoteDto>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevisionEntry {
    pub month_key: String,
    pub content: String,
    pub content_preview: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceNotePreview {
    pub id: String,
    pub month_key: String,
    pub content_preview: String,
}

#[derive(Debug, Serialize)]
pub struct InheritanceImpact {
    pub source_note: Option<SourceNotePreview>,
    pub affected_months: Vec<String>,
    pub months_with_checkbox_states: HashMap<String, usize>,
    pub next_custom_note_month: Option<String>,
}

impl InheritanceImpact {
    pub fn empty() -> Self {
        InheritanceImpact {
            source_note: None,
            affected_months: Vec::new(),
            months_with_checkbox_states: HashMap::new(),
            next_custom_note_month: None,
        }
    }
}

// === Refunds wire shapes (camelCase, matching the client) ===

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundsConfigDto {
    pub replacement_tag_id: Option<String>,
    pub replace_tag_by_default: bool,
    pub aging_warning_days: i64,
    pub show_badge: bool,
    pub hide_matched_transactions: bool,
    pub hide_expected_transactions: bool,
}

impl From<RefundsConfigRow> for RefundsConfigDto {
    fn from(row: RefundsConfigRow) -> Self {
        RefundsConfigDto {
            replacement_tag_id: row.replacement_tag_id,
            replace_tag_by_default: row.replace_tag_by_default,
            aging_warning_days: row.aging_warning_days,
            show_badge: row.show_badge,
            hide_matched_transactions: row.hide_matched_transactions,
            hide_expected_transactions: row.hide_expected_transactions,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedViewDto {
    pub id: String,
    pub name: String,
    pub tag_ids: Vec<String>,
    pub category_ids: Option<Vec<String>>,
    pub sort_order: i64,
    pub exclude_from_all: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchDto {
    pub id: String,
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
    pub transaction_data: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PendingCount {
    pub count: usize,
    pub view_counts: HashMap<String, usize>,
}
