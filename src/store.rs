use std::{cmp::Ordering, collections::BTreeMap};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{
    DateRange, Expense, ExpenseChanges, ExpenseFilter, GroupKey, GroupTotal, NewExpense,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("Amount total overflowed")]
    Overflow,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Owner-scoped access to expenses. Every method takes the owning user id and
/// never returns another user's records.
#[async_trait]
pub trait ExpenseStore: Send + Sync {
    async fn insert(&self, user_id: Uuid, expense: NewExpense) -> StoreResult<Expense>;

    async fn find(&self, user_id: Uuid, id: Uuid) -> StoreResult<Option<Expense>>;

    /// Sorted by `date` descending, then `created_at` descending, then `id`.
    async fn list(&self, user_id: Uuid, filter: &ExpenseFilter) -> StoreResult<Vec<Expense>>;

    /// Returns `None` when no expense with this id belongs to `user_id`.
    async fn update(
        &self,
        user_id: Uuid,
        id: Uuid,
        changes: &ExpenseChanges,
    ) -> StoreResult<Option<Expense>>;

    /// Returns `false` when no expense with this id belongs to `user_id`.
    async fn delete(&self, user_id: Uuid, id: Uuid) -> StoreResult<bool>;

    async fn sum_amount(&self, user_id: Uuid, range: &DateRange) -> StoreResult<Decimal>;

    /// Categories come back by total descending (ties by label ascending),
    /// months by label ascending.
    async fn group_sum(
        &self,
        user_id: Uuid,
        range: &DateRange,
        key: GroupKey,
    ) -> StoreResult<Vec<GroupTotal>>;

    /// Latest `limit` expenses by `date`, ignoring any range.
    async fn recent(&self, user_id: Uuid, limit: usize) -> StoreResult<Vec<Expense>>;
}

/// Newest first, with `created_at` and `id` as tie breakers.
pub fn by_date_desc(a: &Expense, b: &Expense) -> Ordering {
    b.date
        .cmp(&a.date)
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// In-process store. Groups and folds in memory with the same ordering rules
/// as the SQL queries in `db`.
#[derive(Default)]
pub struct MemoryExpenseStore {
    expenses: RwLock<Vec<Expense>>,
}

impl MemoryExpenseStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn in_range(&self, user_id: Uuid, range: &DateRange) -> Vec<Expense> {
        self.expenses
            .read()
            .await
            .iter()
            .filter(|expense| expense.user_id == user_id && range.contains(expense.date))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ExpenseStore for MemoryExpenseStore {
    async fn insert(&self, user_id: Uuid, expense: NewExpense) -> StoreResult<Expense> {
        let expense = Expense {
            id: Uuid::new_v4(),
            user_id,
            amount: expense.amount,
            category: expense.category,
            description: expense.description,
            date: expense.date,
            created_at: Utc::now(),
            updated_at: None,
        };
        self.expenses.write().await.push(expense.clone());
        Ok(expense)
    }

    async fn find(&self, user_id: Uuid, id: Uuid) -> StoreResult<Option<Expense>> {
        Ok(self
            .expenses
            .read()
            .await
            .iter()
            .find(|expense| expense.id == id && expense.user_id == user_id)
            .cloned())
    }

    async fn list(&self, user_id: Uuid, filter: &ExpenseFilter) -> StoreResult<Vec<Expense>> {
        let mut expenses: Vec<_> = self
            .expenses
            .read()
            .await
            .iter()
            .filter(|expense| expense.user_id == user_id && filter.matches(expense))
            .cloned()
            .collect();
        expenses.sort_by(by_date_desc);
        Ok(expenses)
    }

    async fn update(
        &self,
        user_id: Uuid,
        id: Uuid,
        changes: &ExpenseChanges,
    ) -> StoreResult<Option<Expense>> {
        let mut expenses = self.expenses.write().await;
        let Some(expense) = expenses
            .iter_mut()
            .find(|expense| expense.id == id && expense.user_id == user_id)
        else {
            return Ok(None);
        };
        changes.apply(expense, Utc::now());
        Ok(Some(expense.clone()))
    }

    async fn delete(&self, user_id: Uuid, id: Uuid) -> StoreResult<bool> {
        let mut expenses = self.expenses.write().await;
        let before = expenses.len();
        expenses.retain(|expense| !(expense.id == id && expense.user_id == user_id));
        Ok(expenses.len() != before)
    }

    async fn sum_amount(&self, user_id: Uuid, range: &DateRange) -> StoreResult<Decimal> {
        self.in_range(user_id, range)
            .await
            .iter()
            .try_fold(Decimal::ZERO, |total, expense| total.checked_add(expense.amount))
            .ok_or(StoreError::Overflow)
    }

    async fn group_sum(
        &self,
        user_id: Uuid,
        range: &DateRange,
        key: GroupKey,
    ) -> StoreResult<Vec<GroupTotal>> {
        let mut totals: BTreeMap<String, Decimal> = BTreeMap::new();
        for expense in self.in_range(user_id, range).await.iter() {
            let total = totals.entry(key.label(expense)).or_default();
            *total = total
                .checked_add(expense.amount)
                .ok_or(StoreError::Overflow)?;
        }

        // BTreeMap already yields labels ascending, which is the month order
        // and the tie order for categories.
        let mut groups: Vec<_> = totals
            .into_iter()
            .map(|(label, total)| GroupTotal { label, total })
            .collect();
        if key == GroupKey::Category {
            groups.sort_by(|a, b| b.total.cmp(&a.total));
        }
        Ok(groups)
    }

    async fn recent(&self, user_id: Uuid, limit: usize) -> StoreResult<Vec<Expense>> {
        let mut expenses = self.list(user_id, &ExpenseFilter::default()).await?;
        expenses.truncate(limit);
        Ok(expenses)
    }
}
