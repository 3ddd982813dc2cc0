use uuid::Uuid;

use crate::{
    domain::{
        AnalyticsSummary, CategoryTotal, DateRange, GroupKey, MonthlyTotal, RECENT_EXPENSES_LIMIT,
    },
    store::{ExpenseStore, StoreResult},
};

/// Builds the spending summary for `user_id`. The four derivations run
/// concurrently and the call fails as a whole if any of them fails.
pub async fn compute_summary(
    store: &dyn ExpenseStore,
    user_id: Uuid,
    range: &DateRange,
) -> StoreResult<AnalyticsSummary> {
    tracing::debug!(
        "Computing summary for user_id={} from {} to {}",
        user_id,
        range.start,
        range.end
    );

    let (total_expense, categories, months, recent_expenses) = futures::try_join!(
        store.sum_amount(user_id, range),
        store.group_sum(user_id, range, GroupKey::Category),
        store.group_sum(user_id, range, GroupKey::Month),
        store.recent(user_id, RECENT_EXPENSES_LIMIT),
    )
    .inspect_err(|err| {
        tracing::error!("Failed to compute summary for user_id={}: {}", user_id, err)
    })?;

    Ok(AnalyticsSummary {
        total_expense,
        category_expenses: categories
            .into_iter()
            .map(|group| CategoryTotal {
                category: group.label,
                total: group.total,
            })
            .collect(),
        monthly_expenses: months
            .into_iter()
            .map(|group| MonthlyTotal {
                month: group.label,
                total: group.total,
            })
            .collect(),
        recent_expenses,
    })
}
