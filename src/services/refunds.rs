//! Refund reconciliation: saved views, pending counts, and match
//! bookkeeping with best-effort upstream side-effects.
//!
//! Upstream note and tag mutations run after the local row is committed
//! and never roll it back; failures are logged and swallowed.

use chrono::NaiveDate;
use regex::Regex;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use crate::error::{ApiError, ApiResult};
use crate::models::{MatchDto, PendingCount, RefundsMatchRow, SavedViewDto};
use crate::repos::refunds as repo;
use crate::upstream::{SearchQuery, Transaction, TransactionQuery, UpstreamClient};

// ── Note block markers ──
// Blocks we append to upstream transaction notes are wrapped in these
// sentinels so they can be identified and stripped later.
const MATCHED_MARKER: &str = "── Refund Matched ──";
const EXPECTED_MARKER: &str = "── Expected Refund ──";
const BLOCK_END: &str = "──────────";

fn block_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)\n?── (?:Refund Matched|Expected Refund) ──\n.*?──────────\n?")
            .expect("invalid note block pattern")
    })
}

fn blank_lines() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\n{3,}").expect("invalid blank line pattern"))
}

/// Decode the HTML entities the upstream API escapes in free-text fields.
fn decode_html(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Strip every sentinel-delimited block and tidy the leftover whitespace.
pub fn strip_refund_notes(notes: &str) -> String {
    let cleaned = block_pattern().replace_all(notes, "");
    blank_lines().replace_all(&cleaned, "\n\n").trim().to_string()
}

fn has_refund_block(notes: &str) -> bool {
    block_pattern().is_match(notes)
}

fn prepare_original_notes(original_notes: Option<&str>) -> String {
    match original_notes {
        Some(notes) if !notes.is_empty() => strip_refund_notes(&decode_html(notes)),
        _ => String::new(),
    }
}

fn format_note_date(date: &str) -> String {
    match NaiveDate::parse_from_str(date, "%Y-%m-%d") {
        Ok(parsed) => parsed.format("%-m/%-d/%Y").to_string(),
        Err(_) => date.to_string(),
    }
}

fn build_refund_note(
    amount: Option<f64>,
    merchant: Option<&str>,
    date: Option<&str>,
    account: Option<&str>,
) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(amount) = amount {
        parts.push(format!("${:.2}", amount.abs()));
    }
    if let Some(merchant) = merchant {
        parts.push(format!("from \"{}\"", decode_html(merchant)));
    }
    if let Some(date) = date {
        parts.push(format!("on {}", format_note_date(date)));
    }
    if let Some(account) = account {
        parts.push(format!("via {}", decode_html(account)));
    }
    format!("{MATCHED_MARKER}\n{}\n{BLOCK_END}", parts.join(" "))
}

fn build_expected_refund_note(
    amount: Option<f64>,
    date: Option<&str>,
    account: Option<&str>,
    note: Option<&str>,
) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(amount) = amount {
        parts.push(format!("${:.2}", amount.abs()));
    }
    if let Some(date) = date {
        parts.push(format!("expected by {}", format_note_date(date)));
    }
    if let Some(account) = account {
        parts.push(format!("to {}", decode_html(account)));
    }
    let mut body = parts.join(" ");
    if let Some(note) = note {
        body.push('\n');
        body.push_str(note);
    }
    format!("{EXPECTED_MARKER}\n{body}\n{BLOCK_END}")
}

// === Saved views ===

fn parse_ids(json: &str) -> Vec<String> {
    serde_json::from_str(json).unwrap_or_default()
}

pub fn view_to_dto(row: &crate::models::RefundsSavedViewRow) -> SavedViewDto {
    SavedViewDto {
        id: row.id.clone(),
        name: row.name.clone(),
        tag_ids: parse_ids(&row.tag_ids),
        category_ids: row.category_ids.as_deref().map(parse_ids),
        sort_order: row.sort_order,
        exclude_from_all: row.exclude_from_all,
    }
}

struct ViewFilter {
    id: String,
    tags: HashSet<String>,
    categories: Option<HashSet<String>>,
    exclude_from_all: bool,
}

/// A transaction belongs to a view when one of its tags is in the view's
/// tag set (vacuously true for category-only views) and, if the view
/// restricts categories, its category is in that set.
fn txn_matches_view(
    txn: &Transaction,
    tags: &HashSet<String>,
    categories: Option<&HashSet<String>>,
) -> bool {
    let tags_match = if tags.is_empty() {
        categories.is_some()
    } else {
        txn.tags.iter().any(|tag| tags.contains(&tag.id))
    };
    let categories_match = match categories {
        None => true,
        Some(categories) => txn
            .category
            .as_ref()
            .is_some_and(|category| categories.contains(&category.id)),
    };
    tags_match && categories_match
}

/// Count unmatched refund-candidate expenses, per view and overall.
///
/// One upstream call on the union of every view's tags; category filters
/// are applied locally per view so views without a category restriction
/// are not narrowed by someone else's.
pub async fn get_pending_count(
    pool: &SqlitePool,
    upstream: &dyn UpstreamClient,
) -> ApiResult<PendingCount> {
    let views = repo::get_views(pool).await?;
    if views.is_empty() {
        return Ok(PendingCount {
            count: 0,
            view_counts: HashMap::new(),
        });
    }

    let filters: Vec<ViewFilter> = views
        .iter()
        .map(|view| ViewFilter {
            id: view.id.clone(),
            tags: parse_ids(&view.tag_ids).into_iter().collect(),
            categories: view
                .category_ids
                .as_deref()
                .map(|json| parse_ids(json).into_iter().collect()),
            exclude_from_all: view.exclude_from_all,
        })
        .collect();

    let all_tag_ids: Vec<String> = {
        let mut union: HashSet<String> = HashSet::new();
        for filter in &filters {
            union.extend(filter.tags.iter().cloned());
        }
        union.into_iter().collect()
    };
    if all_tag_ids.is_empty() {
        return Ok(PendingCount {
            count: 0,
            view_counts: HashMap::new(),
        });
    }

    let matched_ids: HashSet<String> = repo::get_matches(pool)
        .await?
        .into_iter()
        .map(|m| m.original_transaction_id)
        .collect();

    let transactions = upstream
        .get_transactions(TransactionQuery {
            tag_ids: Some(&all_tag_ids),
            category_ids: None,
            start_date: None,
            end_date: None,
        })
        .await?;

    // Only expenses count toward the pending tally.
    let unmatched_expenses: Vec<&Transaction> = transactions
        .iter()
        .filter(|t| t.amount < 0.0 && !matched_ids.contains(&t.id))
        .collect();

    let mut view_counts: HashMap<String, usize> = HashMap::new();
    let mut global_unmatched: HashSet<&str> = HashSet::new();
    for filter in &filters {
        let mut count = 0;
        for txn in &unmatched_expenses {
            if txn_matches_view(txn, &filter.tags, filter.categories.as_ref()) {
                count += 1;
                if !filter.exclude_from_all {
                    global_unmatched.insert(txn.id.as_str());
                }
            }
        }
        view_counts.insert(filter.id.clone(), count);
    }

    Ok(PendingCount {
        count: global_unmatched.len(),
        view_counts,
    })
}

// === Transactions ===

pub async fn get_transactions(
    upstream: &dyn UpstreamClient,
    tag_ids: Option<&[String]>,
    category_ids: Option<&[String]>,
    start_date: Option<&str>,
    end_date: Option<&str>,
) -> ApiResult<Vec<Transaction>> {
    Ok(upstream
        .get_transactions(TransactionQuery {
            tag_ids,
            category_ids,
            start_date,
            end_date,
        })
        .await?)
}

pub struct SearchPage {
    pub transactions: Vec<Transaction>,
    pub next_cursor: Option<i64>,
}

/// Credit-only search for refund candidates. The cursor is the raw
/// upstream offset; a short page means the results are exhausted.
pub async fn search_for_refund(
    upstream: &dyn UpstreamClient,
    search: Option<&str>,
    start_date: Option<&str>,
    end_date: Option<&str>,
    limit: i64,
    cursor: i64,
) -> ApiResult<SearchPage> {
    let transactions = upstream
        .search_transactions(SearchQuery {
            search,
            start_date,
            end_date,
            limit,
            offset: cursor,
            credits_only: true,
        })
        .await?;

    let exhausted = (transactions.len() as i64) < limit;
    Ok(SearchPage {
        next_cursor: if exhausted { None } else { Some(cursor + limit) },
        transactions,
    })
}

// === Matches ===

pub fn match_to_dto(row: &RefundsMatchRow) -> MatchDto {
    MatchDto {
        id: row.id.clone(),
        original_transaction_id: row.original_transaction_id.clone(),
        refund_transaction_id: row.refund_transaction_id.clone(),
        refund_amount: row.refund_amount,
        refund_merchant: row.refund_merchant.clone(),
        refund_date: row.refund_date.clone(),
        refund_account: row.refund_account.clone(),
        skipped: row.skipped,
        expected_refund: row.expected_refund,
        expected_date: row.expected_date.clone(),
        expected_account: row.expected_account.clone(),
        expected_account_id: row.expected_account_id.clone(),
        expected_note: row.expected_note.clone(),
        expected_amount: row.expected_amount,
        transaction_data: row
            .transaction_data
            .as_deref()
            .and_then(|data| serde_json::from_str(data).ok()),
    }
}

pub async fn get_matches(pool: &SqlitePool) -> ApiResult<Vec<MatchDto>> {
    let rows = repo::get_matches(pool).await?;
    Ok(rows.iter().map(match_to_dto).collect())
}

#[derive(Debug, Default)]
pub struct CreateMatch {
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
    pub replace_tag: bool,
    pub original_tag_ids: Option<Vec<String>>,
    pub original_notes: Option<String>,
    pub view_tag_ids: Option<Vec<String>>,
    pub transaction_data: Option<serde_json::Value>,
}

pub async fn create_match(
    pool: &SqlitePool,
    upstream: &dyn UpstreamClient,
    request: CreateMatch,
) -> ApiResult<MatchDto> {
    if repo::get_match_by_original(pool, &request.original_transaction_id)
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict("Transaction already matched".into()));
    }

    let row = repo::create_match(
        pool,
        repo::NewMatch {
            original_transaction_id: request.original_transaction_id.clone(),
            refund_transaction_id: request.refund_transaction_id.clone(),
            refund_amount: request.refund_amount,
            refund_merchant: request.refund_merchant.clone(),
            refund_date: request.refund_date.clone(),
            refund_account: request.refund_account.clone(),
            skipped: request.skipped,
            expected_refund: request.expected_refund,
            expected_date: request.expected_date.clone(),
            expected_account: request.expected_account.clone(),
            expected_account_id: request.expected_account_id.clone(),
            expected_note: request.expected_note.clone(),
            expected_amount: request.expected_amount,
            transaction_data: request
                .transaction_data
                .as_ref()
                .map(|data| data.to_string()),
        },
    )
    .await?;

    // Everything past this point is best-effort against the upstream.
    if request.expected_refund && request.expected_amount.is_some() {
        let note_block = build_expected_refund_note(
            request.expected_amount,
            request.expected_date.as_deref(),
            request.expected_account.as_deref(),
            request.expected_note.as_deref(),
        );
        append_note_block(
            upstream,
            &request.original_transaction_id,
            request.original_notes.as_deref(),
            &note_block,
        )
        .await;
    } else if !request.skipped && !request.expected_refund && request.refund_amount.is_some() {
        let note_block = build_refund_note(
            request.refund_amount,
            request.refund_merchant.as_deref(),
            request.refund_date.as_deref(),
            request.refund_account.as_deref(),
        );
        append_note_block(
            upstream,
            &request.original_transaction_id,
            request.original_notes.as_deref(),
            &note_block,
        )
        .await;
    }

    if request.replace_tag && !request.expected_refund {
        if let Some(original_tag_ids) = &request.original_tag_ids {
            replace_tags(
                pool,
                upstream,
                &request.original_transaction_id,
                original_tag_ids,
                request.view_tag_ids.as_deref(),
            )
            .await;
        }
    }

    Ok(match_to_dto(&row))
}

async fn append_note_block(
    upstream: &dyn UpstreamClient,
    transaction_id: &str,
    original_notes: Option<&str>,
    note_block: &str,
) {
    let base_notes = prepare_original_notes(original_notes);
    let new_notes = if base_notes.is_empty() {
        note_block.to_string()
    } else {
        format!("{base_notes}\n\n{note_block}")
    };
    if let Err(error) = upstream.update_notes(transaction_id, &new_notes).await {
        tracing::error!(%transaction_id, %error, "failed to update upstream transaction notes");
    }
}

/// Remove the active view's tags (or all original tags when none are
/// given) and add the configured replacement tag.
async fn replace_tags(
    pool: &SqlitePool,
    upstream: &dyn UpstreamClient,
    transaction_id: &str,
    original_tag_ids: &[String],
    view_tag_ids: Option<&[String]>,
) {
    let config = match repo::get_config(pool).await {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(%error, "failed to load refunds config for tag replacement");
            return;
        }
    };

    let tags_to_remove: HashSet<&str> = match view_tag_ids {
        Some(view_tags) if !view_tags.is_empty() => {
            view_tags.iter().map(String::as_str).collect()
        }
        _ => original_tag_ids.iter().map(String::as_str).collect(),
    };

    let mut new_tag_ids: Vec<String> = original_tag_ids
        .iter()
        .filter(|tag| !tags_to_remove.contains(tag.as_str()))
        .cloned()
        .collect();

    if let Some(replacement) = config.replacement_tag_id {
        if !new_tag_ids.contains(&replacement) {
            new_tag_ids.push(replacement);
        }
    }

    if let Err(error) = upstream.set_tags(transaction_id, &new_tag_ids).await {
        tracing::error!(%transaction_id, %error, "failed to update upstream transaction tags");
    }
}

pub async fn delete_match(
    pool: &SqlitePool,
    upstream: &dyn UpstreamClient,
    match_id: &str,
) -> ApiResult<()> {
    let row = repo::get_match(pool, match_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Match not found".into()))?;

    let original_transaction_id = row.original_transaction_id.clone();
    let should_strip_notes = !row.skipped;

    // Tag snapshot from match time; expected refunds never touched tags.
    let original_tag_ids: Option<Vec<String>> = if row.expected_refund {
        None
    } else {
        row.transaction_data.as_deref().and_then(|data| {
            let snapshot: serde_json::Value = serde_json::from_str(data).ok()?;
            let tags = snapshot.get("tags")?.as_array()?;
            Some(
                tags.iter()
                    .filter_map(|tag| tag.get("id")?.as_str().map(str::to_string))
                    .collect(),
            )
        })
    };

    if !repo::delete_match(pool, match_id).await? {
        return Err(ApiError::NotFound("Match not found".into()));
    }

    if should_strip_notes {
        match upstream.get_notes(&original_transaction_id).await {
            Ok(current_notes) if has_refund_block(&current_notes) => {
                let cleaned = strip_refund_notes(&decode_html(&current_notes));
                if let Err(error) = upstream
                    .update_notes(&original_transaction_id, &cleaned)
                    .await
                {
                    tracing::error!(%error, "failed to strip refund notes from upstream transaction");
                }
            }
            Ok(_) => {}
            Err(error) => {
                tracing::error!(%error, "failed to read upstream transaction notes");
            }
        }
    }

    if let Some(tag_ids) = original_tag_ids {
        if let Err(error) = upstream.set_tags(&original_transaction_id, &tag_ids).await {
            tracing::error!(%error, "failed to restore upstream transaction tags");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::test_pool;
    use crate::upstream::mock::MockUpstream;
    use crate::upstream::{CategoryRef, TagRef};
    use pretty_assertions::assert_eq;

    fn txn(id: &str, amount: f64, tags: &[&str], category: Option<&str>) -> Transaction {
        Transaction {
            id: id.to_string(),
            amount,
            date: "2025-05-01".to_string(),
            merchant: None,
            account: None,
            category: category.map(|id| CategoryRef { id: id.to_string() }),
            tags: tags
                .iter()
                .map(|id| TagRef { id: id.to_string() })
                .collect(),
            notes: None,
        }
    }

    #[test]
    fn note_block_builds_and_strips() {
        let block = build_refund_note(
            Some(-23.5),
            Some("Acme &amp; Co"),
            Some("2025-03-09"),
            Some("Checking"),
        );
        assert_eq!(
            block,
            "── Refund Matched ──\n$23.50 from \"Acme & Co\" on 3/9/2025 via Checking\n──────────"
        );

        let notes = format!("existing note\n\n{block}");
        assert_eq!(strip_refund_notes(&notes), "existing note");
    }

    #[test]
    fn expected_block_carries_free_text_note() {
        let block = build_expected_refund_note(
            Some(10.0),
            Some("2025-12-01"),
            Some("Savings"),
            Some("waiting on the courier"),
        );
        assert!(block.starts_with("── Expected Refund ──\n"));
        assert!(block.contains("$10.00 expected by 12/1/2025 to Savings\nwaiting on the courier"));
        assert!(block.ends_with(BLOCK_END));
    }

    #[test]
    fn strip_removes_every_block_and_collapses_blanks() {
        let matched = build_refund_note(Some(5.0), None, None, None);
        let expected = build_expected_refund_note(Some(7.0), None, None, None);
        let notes = format!("keep this\n\n{matched}\n\n\n\nand this\n\n{expected}");
        assert_eq!(strip_refund_notes(&notes), "keep this\n\nand this");
    }

    #[test]
    fn prepare_notes_decodes_entities_before_stripping() {
        let cleaned = prepare_original_notes(Some("caf&eacute;? &quot;quoted&quot; &amp; plain"));
        // Unknown entities pass through untouched; the common set decodes.
        assert_eq!(cleaned, "caf&eacute;? \"quoted\" & plain");
    }

    #[test]
    fn view_matching_applies_tag_and_category_filters() {
        let tags: HashSet<String> = ["tag-b".to_string()].into();
        let categories: HashSet<String> = ["cat-1".to_string()].into();

        let in_both = txn("t", -5.0, &["tag-b"], Some("cat-1"));
        let wrong_category = txn("t", -5.0, &["tag-b"], Some("cat-2"));
        let no_category = txn("t", -5.0, &["tag-b"], None);

        assert!(txn_matches_view(&in_both, &tags, Some(&categories)));
        assert!(!txn_matches_view(&wrong_category, &tags, Some(&categories)));
        assert!(!txn_matches_view(&no_category, &tags, Some(&categories)));
        assert!(txn_matches_view(&wrong_category, &tags, None));
    }

    #[tokio::test]
    async fn pending_count_scenario() {
        let pool = test_pool().await;
        repo::create_view(&pool, "V1", r#"["tag-a"]"#, None)
            .await
            .unwrap();
        let v2 = repo::create_view(&pool, "V2", r#"["tag-b"]"#, Some(r#"["cat-1"]"#))
            .await
            .unwrap();

        let upstream = MockUpstream::with_transactions(vec![
            txn("t1", -10.0, &["tag-a"], None),
            txn("t2", -5.0, &["tag-b"], Some("cat-1")),
            txn("t3", -1.0, &["tag-b"], Some("cat-2")),
            txn("t4", 2.0, &["tag-a"], None),
        ]);

        let pending = get_pending_count(&pool, &upstream).await.unwrap();
        assert_eq!(pending.count, 2);
        assert_eq!(pending.view_counts.len(), 2);
        assert_eq!(pending.view_counts.values().sum::<usize>(), 2);
        assert_eq!(pending.view_counts.get(&v2.id), Some(&1));
    }

    #[tokio::test]
    async fn pending_count_without_views_is_zero() {
        let pool = test_pool().await;
        let upstream = MockUpstream::default();
        let pending = get_pending_count(&pool, &upstream).await.unwrap();
        assert_eq!(pending.count, 0);
        assert!(pending.view_counts.is_empty());
    }

    #[tokio::test]
    async fn matched_transaction_leaves_pending_count() {
        let pool = test_pool().await;
        repo::create_view(&pool, "V1", r#"["tag-a"]"#, None)
            .await
            .unwrap();
        let upstream = MockUpstream::with_transactions(vec![txn("t1", -10.0, &["tag-a"], None)]);

        let before = get_pending_count(&pool, &upstream).await.unwrap();
        assert_eq!(before.count, 1);

        create_match(
            &pool,
            &upstream,
            CreateMatch {
                original_transaction_id: "t1".into(),
                refund_transaction_id: Some("r1".into()),
                refund_amount: Some(10.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let after = get_pending_count(&pool, &upstream).await.unwrap();
        assert_eq!(after.count, 0);
    }

    #[tokio::test]
    async fn excluded_view_counts_but_skips_the_all_tab() {
        let pool = test_pool().await;
        let view = repo::create_view(&pool, "Work", r#"["tag-a"]"#, None)
            .await
            .unwrap();
        repo::update_view(
            &pool,
            &view.id,
            repo::ViewUpdate {
                exclude_from_all: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let upstream = MockUpstream::with_transactions(vec![txn("t1", -10.0, &["tag-a"], None)]);
        let pending = get_pending_count(&pool, &upstream).await.unwrap();
        assert_eq!(pending.view_counts.get(&view.id), Some(&1));
        assert_eq!(pending.count, 0);
    }

    #[tokio::test]
    async fn create_match_appends_note_and_replaces_view_tags() {
        let pool = test_pool().await;
        repo::update_config(
            &pool,
            repo::ConfigUpdate {
                replacement_tag_id: Some(Some("tag-done".into())),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let upstream = MockUpstream::default();

        create_match(
            &pool,
            &upstream,
            CreateMatch {
                original_transaction_id: "t1".into(),
                refund_transaction_id: Some("r1".into()),
                refund_amount: Some(25.0),
                refund_merchant: Some("Store".into()),
                refund_date: Some("2025-04-02".into()),
                refund_account: Some("Visa".into()),
                replace_tag: true,
                original_tag_ids: Some(vec!["tag-a".into(), "tag-keep".into()]),
                original_notes: Some("bought a kettle".into()),
                view_tag_ids: Some(vec!["tag-a".into()]),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let note_writes = upstream.note_writes.lock().unwrap();
        assert_eq!(note_writes.len(), 1);
        assert_eq!(note_writes[0].0, "t1");
        assert!(note_writes[0].1.starts_with("bought a kettle\n\n── Refund Matched ──"));
        assert!(note_writes[0].1.contains("$25.00 from \"Store\" on 4/2/2025 via Visa"));

        let tag_writes = upstream.tag_writes.lock().unwrap();
        assert_eq!(tag_writes.len(), 1);
        assert_eq!(tag_writes[0].1, vec!["tag-keep".to_string(), "tag-done".to_string()]);
    }

    #[tokio::test]
    async fn expected_refund_appends_note_but_never_touches_tags() {
        let pool = test_pool().await;
        let upstream = MockUpstream::default();

        create_match(
            &pool,
            &upstream,
            CreateMatch {
                original_transaction_id: "t1".into(),
                expected_refund: true,
                expected_amount: Some(12.0),
                expected_date: Some("2025-06-01".into()),
                replace_tag: true,
                original_tag_ids: Some(vec!["tag-a".into()]),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(upstream.note_writes.lock().unwrap().len(), 1);
        assert!(upstream.tag_writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn skipped_match_has_no_side_effects() {
        let pool = test_pool().await;
        let upstream = MockUpstream::default();

        create_match(
            &pool,
            &upstream,
            CreateMatch {
                original_transaction_id: "t1".into(),
                skipped: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(upstream.note_writes.lock().unwrap().is_empty());
        assert!(upstream.tag_writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_match_is_conflict() {
        let pool = test_pool().await;
        let upstream = MockUpstream::default();
        let request = || CreateMatch {
            original_transaction_id: "t1".into(),
            skipped: true,
            ..Default::default()
        };
        create_match(&pool, &upstream, request()).await.unwrap();
        let duplicate = create_match(&pool, &upstream, request()).await;
        assert!(matches!(duplicate, Err(ApiError::Conflict(_))));
    }

    #[tokio::test]
    async fn upstream_failure_never_rolls_back_the_match() {
        let pool = test_pool().await;
        let upstream = MockUpstream::default();
        *upstream.fail_mutations.lock().unwrap() = true;

        create_match(
            &pool,
            &upstream,
            CreateMatch {
                original_transaction_id: "t1".into(),
                refund_transaction_id: Some("r1".into()),
                refund_amount: Some(3.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(get_matches(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_match_strips_notes_and_restores_tags() {
        let pool = test_pool().await;
        let upstream = MockUpstream::default();

        let created = create_match(
            &pool,
            &upstream,
            CreateMatch {
                original_transaction_id: "t1".into(),
                refund_transaction_id: Some("r1".into()),
                refund_amount: Some(8.0),
                replace_tag: true,
                original_tag_ids: Some(vec!["tag-a".into()]),
                transaction_data: Some(serde_json::json!({
                    "id": "t1",
                    "tags": [{"id": "tag-a"}, {"id": "tag-b"}],
                })),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        delete_match(&pool, &upstream, &created.id).await.unwrap();

        assert!(get_matches(&pool).await.unwrap().is_empty());

        // Notes were stripped back to nothing and the tag snapshot restored.
        let note_writes = upstream.note_writes.lock().unwrap();
        assert_eq!(note_writes.last().unwrap().1, "");
        let tag_writes = upstream.tag_writes.lock().unwrap();
        assert_eq!(
            tag_writes.last().unwrap().1,
            vec!["tag-a".to_string(), "tag-b".to_string()]
        );
    }

    #[tokio::test]
    async fn delete_missing_match_is_not_found() {
        let pool = test_pool().await;
        let upstream = MockUpstream::default();
        let result = delete_match(&pool, &upstream, "nope").await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn search_cursor_advances_until_exhausted() {
        let upstream = MockUpstream::with_transactions(vec![
            txn("c1", 5.0, &[], None),
            txn("c2", 6.0, &[], None),
            txn("c3", 7.0, &[], None),
        ]);

        let first = search_for_refund(&upstream, None, None, None, 2, 0)
            .await
            .unwrap();
        assert_eq!(first.transactions.len(), 2);
        assert_eq!(first.next_cursor, Some(2));

        let second = search_for_refund(&upstream, None, None, None, 2, 2)
            .await
            .unwrap();
        assert_eq!(second.transactions.len(), 1);
        assert_eq!(second.next_cursor, None);
    }
}
