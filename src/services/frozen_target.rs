//! Frozen monthly savings targets.
//!
//! A target is locked at the start of each month and only recomputed when
//! the month rolls over or one of the fingerprint inputs (amount,
//! frequency, rollover, due date) changes. This keeps the displayed rate
//! stable while balances move during the month.

use sqlx::SqlitePool;

use crate::error::ApiResult;
use crate::repos::targets::{self, StoredTarget};

/// Round to the nearest dollar, half-up, with a $1 floor for any positive
/// rate. Zero or negative rates mean fully funded.
pub fn round_monthly_rate(rate: f64) -> f64 {
    if rate <= 0.0 {
        0.0
    } else {
        ((rate + 0.5).floor()).max(1.0)
    }
}

/// What the rate drops to once a catching-up item finishes its catch-up.
pub fn rate_after_catchup(frozen_target: f64, ideal_monthly_rate: f64) -> f64 {
    if frozen_target > ideal_monthly_rate {
        ideal_monthly_rate
    } else {
        frozen_target
    }
}

#[derive(Debug, Clone)]
pub struct TargetInputs {
    pub amount: f64,
    pub frequency_months: f64,
    pub months_until_due: f64,
    pub rollover_amount: f64,
    pub budgeted_this_month: f64,
    pub next_due_date: Option<String>,
    pub current_month: String,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FrozenTargetResult {
    pub frozen_target: f64,
    pub balance_at_start: f64,
    pub contributed_this_month: f64,
    pub monthly_progress_percent: f64,
    pub was_recalculated: bool,
}

fn calculate_target(
    amount: f64,
    frequency_months: f64,
    months_until_due: f64,
    starting_balance: f64,
) -> f64 {
    if frequency_months < 1.0 {
        // Sub-monthly (weekly, bi-weekly): monthly equivalent minus balance.
        let monthly_equivalent = amount / frequency_months;
        round_monthly_rate((monthly_equivalent - starting_balance).max(0.0))
    } else if frequency_months == 1.0 {
        // Monthly: the shortfall is the target.
        round_monthly_rate((amount - starting_balance).max(0.0))
    } else {
        // Infrequent: spread the shortfall over the months remaining.
        let shortfall = (amount - starting_balance).max(0.0);
        let months_remaining = months_until_due.max(1.0);
        if shortfall > 0.0 {
            round_monthly_rate(shortfall / months_remaining)
        } else {
            0.0
        }
    }
}

fn fingerprint_matches(stored: &StoredTarget, inputs: &TargetInputs) -> bool {
    stored.target_month == inputs.current_month
        && stored.frozen_amount == Some(inputs.amount)
        && stored.frozen_frequency_months == Some(inputs.frequency_months)
        && stored.frozen_rollover_amount == Some(inputs.rollover_amount)
        && stored.frozen_next_due_date == inputs.next_due_date
}

/// Pure evaluation: returns the result plus the new stored state when a
/// recalculation happened.
pub fn evaluate(
    inputs: &TargetInputs,
    stored: Option<&StoredTarget>,
) -> (FrozenTargetResult, Option<StoredTarget>) {
    let (frozen_target, balance_at_start, was_recalculated, to_persist) = match stored {
        Some(stored) if fingerprint_matches(stored, inputs) => (
            stored.frozen_monthly_target,
            stored.frozen_rollover_amount.unwrap_or(0.0),
            false,
            None,
        ),
        _ => {
            let frozen_target = calculate_target(
                inputs.amount,
                inputs.frequency_months,
                inputs.months_until_due,
                inputs.rollover_amount,
            );
            let new_stored = StoredTarget {
                frozen_monthly_target: frozen_target,
                target_month: inputs.current_month.clone(),
                frozen_amount: Some(inputs.amount),
                frozen_frequency_months: Some(inputs.frequency_months),
                frozen_rollover_amount: Some(inputs.rollover_amount),
                frozen_next_due_date: inputs.next_due_date.clone(),
            };
            (frozen_target, inputs.rollover_amount, true, Some(new_stored))
        }
    };

    let contributed_this_month = inputs.budgeted_this_month.max(0.0);
    let monthly_progress_percent = if frozen_target > 0.0 {
        contributed_this_month / frozen_target * 100.0
    } else {
        100.0
    };

    (
        FrozenTargetResult {
            frozen_target,
            balance_at_start,
            contributed_this_month,
            monthly_progress_percent,
            was_recalculated,
        },
        to_persist,
    )
}

/// Load the stored fingerprint, evaluate, and persist when recalculated.
pub async fn calculate_frozen_target(
    pool: &SqlitePool,
    recurring_id: &str,
    inputs: &TargetInputs,
) -> ApiResult<FrozenTargetResult> {
    let stored = targets::get_frozen_target(pool, recurring_id).await?;
    let (result, to_persist) = evaluate(inputs, stored.as_ref());
    if let Some(new_stored) = to_persist {
        targets::set_frozen_target(pool, recurring_id, &new_stored).await?;
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::test_pool;
    use pretty_assertions::assert_eq;

    fn inputs(
        amount: f64,
        frequency_months: f64,
        months_until_due: f64,
        rollover_amount: f64,
        budgeted_this_month: f64,
        next_due_date: &str,
        current_month: &str,
    ) -> TargetInputs {
        TargetInputs {
            amount,
            frequency_months,
            months_until_due,
            rollover_amount,
            budgeted_this_month,
            next_due_date: Some(next_due_date.to_string()),
            current_month: current_month.to_string(),
        }
    }

    #[test]
    fn round_zero_and_negative_rates() {
        assert_eq!(round_monthly_rate(0.0), 0.0);
        assert_eq!(round_monthly_rate(-5.0), 0.0);
    }

    #[test]
    fn round_positive_rates_floor_at_one_dollar() {
        assert_eq!(round_monthly_rate(0.08), 1.0);
        assert_eq!(round_monthly_rate(1.4), 1.0);
        assert_eq!(round_monthly_rate(1.5), 2.0);
        assert_eq!(round_monthly_rate(82.5), 83.0);
    }

    #[test]
    fn monthly_subscription_uses_shortfall() {
        let (result, _) = evaluate(&inputs(80.0, 1.0, 1.0, 30.0, 0.0, "2025-02-15", "2025-01"), None);
        assert_eq!(result.frozen_target, 50.0);
        assert!(result.was_recalculated);
        assert_eq!(result.balance_at_start, 30.0);
    }

    #[test]
    fn fully_funded_monthly_has_zero_target() {
        let (result, _) = evaluate(&inputs(80.0, 1.0, 1.0, 80.0, 0.0, "2025-02-15", "2025-01"), None);
        assert_eq!(result.frozen_target, 0.0);
        assert_eq!(result.monthly_progress_percent, 100.0);
    }

    #[test]
    fn overfunded_monthly_has_zero_target() {
        let (result, _) = evaluate(&inputs(80.0, 1.0, 1.0, 100.0, 0.0, "2025-02-15", "2025-01"), None);
        assert_eq!(result.frozen_target, 0.0);
    }

    #[test]
    fn sub_monthly_uses_monthly_equivalent() {
        // $78/week at 0.25 months between charges is $312/month.
        let (result, _) = evaluate(&inputs(78.0, 0.25, 0.25, 12.0, 0.0, "2025-01-08", "2025-01"), None);
        assert_eq!(result.frozen_target, 300.0);
    }

    #[test]
    fn yearly_spreads_shortfall_over_remaining_months() {
        let (result, _) =
            evaluate(&inputs(600.0, 12.0, 12.0, 0.0, 0.0, "2026-01-15", "2025-01"), None);
        assert_eq!(result.frozen_target, 50.0);
    }

    #[test]
    fn yearly_behind_schedule_catches_up() {
        let (result, _) =
            evaluate(&inputs(600.0, 12.0, 3.0, 300.0, 0.0, "2025-04-15", "2025-01"), None);
        assert_eq!(result.frozen_target, 100.0);
    }

    #[test]
    fn quarterly_subscription() {
        let (result, _) = evaluate(&inputs(90.0, 3.0, 3.0, 0.0, 0.0, "2025-04-15", "2025-01"), None);
        assert_eq!(result.frozen_target, 30.0);
    }

    #[test]
    fn zero_amount_yields_zero_target() {
        let (result, _) = evaluate(&inputs(0.0, 12.0, 6.0, 0.0, 0.0, "2025-07-15", "2025-01"), None);
        assert_eq!(result.frozen_target, 0.0);
    }

    #[test]
    fn zero_months_until_due_treated_as_one() {
        let (result, _) = evaluate(&inputs(100.0, 12.0, 0.0, 50.0, 0.0, "2025-01-15", "2025-01"), None);
        assert_eq!(result.frozen_target, 50.0);
    }

    #[test]
    fn negative_rollover_grows_the_shortfall() {
        let (result, _) =
            evaluate(&inputs(100.0, 12.0, 10.0, -10.0, 0.0, "2025-11-15", "2025-01"), None);
        assert_eq!(result.frozen_target, 11.0);
    }

    #[test]
    fn tiny_amounts_still_get_a_dollar() {
        let (result, _) = evaluate(&inputs(1.0, 12.0, 12.0, 0.0, 0.0, "2026-01-15", "2025-01"), None);
        assert_eq!(result.frozen_target, 1.0);
    }

    #[test]
    fn large_amounts_round_half_up() {
        let (result, _) =
            evaluate(&inputs(10000.0, 12.0, 12.0, 0.0, 0.0, "2026-01-15", "2025-01"), None);
        assert_eq!(result.frozen_target, 833.0);
    }

    #[test]
    fn cached_target_reused_within_month() {
        let stored = StoredTarget {
            frozen_monthly_target: 42.0,
            target_month: "2025-01".into(),
            frozen_amount: Some(100.0),
            frozen_frequency_months: Some(12.0),
            frozen_rollover_amount: Some(10.0),
            frozen_next_due_date: Some("2025-07-15".into()),
        };
        // Budget changed, fingerprint inputs did not.
        let (result, to_persist) = evaluate(
            &inputs(100.0, 12.0, 6.0, 10.0, 40.0, "2025-07-15", "2025-01"),
            Some(&stored),
        );
        assert_eq!(result.frozen_target, 42.0);
        assert!(!result.was_recalculated);
        assert_eq!(result.balance_at_start, 10.0);
        assert!(to_persist.is_none());
    }

    #[test]
    fn recalculates_on_new_month() {
        let stored = StoredTarget {
            frozen_monthly_target: 42.0,
            target_month: "2024-01".into(),
            frozen_amount: Some(100.0),
            frozen_frequency_months: Some(12.0),
            frozen_rollover_amount: Some(10.0),
            frozen_next_due_date: Some("2024-07-15".into()),
        };
        let (result, _) = evaluate(
            &inputs(100.0, 12.0, 6.0, 50.0, 0.0, "2024-07-15", "2024-02"),
            Some(&stored),
        );
        assert!(result.was_recalculated);
        assert_eq!(result.frozen_target, 8.0);
    }

    #[test]
    fn recalculates_on_amount_change() {
        let stored = StoredTarget {
            frozen_monthly_target: 42.0,
            target_month: "2025-01".into(),
            frozen_amount: Some(100.0),
            frozen_frequency_months: Some(12.0),
            frozen_rollover_amount: Some(50.0),
            frozen_next_due_date: Some("2025-07-15".into()),
        };
        let (result, _) = evaluate(
            &inputs(200.0, 12.0, 6.0, 50.0, 0.0, "2025-07-15", "2025-01"),
            Some(&stored),
        );
        assert!(result.was_recalculated);
        assert_eq!(result.frozen_target, 25.0);
    }

    #[test]
    fn recalculates_on_due_date_change() {
        let stored = StoredTarget {
            frozen_monthly_target: 50.0,
            target_month: "2025-01".into(),
            frozen_amount: Some(600.0),
            frozen_frequency_months: Some(12.0),
            frozen_rollover_amount: Some(100.0),
            frozen_next_due_date: Some("2025-12-15".into()),
        };
        let (result, _) = evaluate(
            &inputs(600.0, 12.0, 6.0, 100.0, 0.0, "2025-07-15", "2025-01"),
            Some(&stored),
        );
        assert!(result.was_recalculated);
        assert_eq!(result.frozen_target, 83.0);
    }

    #[test]
    fn progress_tracks_budgeted_amount() {
        let (result, _) =
            evaluate(&inputs(100.0, 12.0, 10.0, 25.0, 5.0, "2025-11-15", "2025-01"), None);
        assert_eq!(result.frozen_target, 8.0);
        assert_eq!(result.contributed_this_month, 5.0);
        assert_eq!(result.monthly_progress_percent, 62.5);
    }

    #[test]
    fn progress_can_exceed_hundred_percent() {
        let stored = StoredTarget {
            frozen_monthly_target: 50.0,
            target_month: "2025-01".into(),
            frozen_amount: Some(600.0),
            frozen_frequency_months: Some(12.0),
            frozen_rollover_amount: Some(100.0),
            frozen_next_due_date: Some("2025-11-15".into()),
        };
        let (result, _) = evaluate(
            &inputs(600.0, 12.0, 10.0, 100.0, 75.0, "2025-11-15", "2025-01"),
            Some(&stored),
        );
        assert_eq!(result.monthly_progress_percent, 150.0);
    }

    #[test]
    fn negative_budget_counts_as_zero_contribution() {
        let (result, _) =
            evaluate(&inputs(100.0, 12.0, 10.0, 25.0, -20.0, "2025-11-15", "2025-01"), None);
        assert_eq!(result.contributed_this_month, 0.0);
        assert_eq!(result.monthly_progress_percent, 0.0);
    }

    #[test]
    fn rate_after_catchup_caps_at_ideal() {
        assert_eq!(rate_after_catchup(100.0, 50.0), 50.0);
        assert_eq!(rate_after_catchup(50.0, 50.0), 50.0);
        assert_eq!(rate_after_catchup(25.0, 50.0), 25.0);
        assert_eq!(rate_after_catchup(0.0, 0.0), 0.0);
    }

    #[tokio::test]
    async fn persisted_target_is_stable_until_rollover_changes() {
        let pool = test_pool().await;

        // Yearly $600 due 2025-12-15, seen in March with $100 rolled over.
        let first = calculate_frozen_target(
            &pool,
            "rec-yearly",
            &inputs(600.0, 12.0, 10.0, 100.0, 0.0, "2025-12-15", "2025-03"),
        )
        .await
        .unwrap();
        assert_eq!(first.frozen_target, 50.0);
        assert!(first.was_recalculated);

        // Same inputs, same month: cached.
        let second = calculate_frozen_target(
            &pool,
            "rec-yearly",
            &inputs(600.0, 12.0, 10.0, 100.0, 0.0, "2025-12-15", "2025-03"),
        )
        .await
        .unwrap();
        assert_eq!(second.frozen_target, 50.0);
        assert!(!second.was_recalculated);

        // Mid-month rollover edit forces a refreeze.
        let third = calculate_frozen_target(
            &pool,
            "rec-yearly",
            &inputs(600.0, 12.0, 10.0, 200.0, 0.0, "2025-12-15", "2025-03"),
        )
        .await
        .unwrap();
        assert_eq!(third.frozen_target, 40.0);
        assert!(third.was_recalculated);
    }
}
