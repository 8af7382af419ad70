//! Background sync callbacks driven by the scheduler.

use std::collections::HashSet;

use crate::services::refunds;
use crate::state::AppState;

pub type SyncError = Box<dyn std::error::Error + Send + Sync>;

/// Full sync: reconcile the known-category set against the upstream
/// (archiving notes of deleted categories) and refresh the pending count.
pub async fn full_sync(state: &AppState) -> Result<(), SyncError> {
    let groups = state.upstream.list_category_groups().await?;

    let mut current_ids: HashSet<String> = HashSet::new();
    for group in &groups {
        current_ids.insert(group.id.clone());
        for category in &group.categories {
            current_ids.insert(category.id.clone());
        }
    }

    let archived = crate::repos::notes::sync_categories(&state.pool, &current_ids).await?;
    if archived > 0 {
        tracing::info!(archived, "archived notes for categories deleted upstream");
    }

    let pending = refunds::get_pending_count(&state.pool, state.upstream.as_ref()).await?;
    tracing::info!(count = pending.count, "full sync complete");

    state.sync.mark_full_sync().await;
    Ok(())
}

/// Light sync: refresh the refunds pending count only.
pub async fn light_sync(state: &AppState) -> Result<(), SyncError> {
    let pending = refunds::get_pending_count(&state.pool, state.upstream.as_ref()).await?;
    tracing::debug!(count = pending.count, "light sync complete");
    Ok(())
}
