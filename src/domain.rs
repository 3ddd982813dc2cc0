use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

/// Window used by analytics when the caller gives no start date.
pub const DEFAULT_RANGE_DAYS: i64 = 30;

/// Largest amount the `NUMERIC(14, 2)` column holds.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(276_447_231, 23_283, 0, false, 2);

/// Number of expenses reported in `recentExpenses`.
pub const RECENT_EXPENSES_LIMIT: usize = 5;

#[derive(sqlx::FromRow, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub category: String,
    pub description: String,
    pub date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A validated expense ready to be inserted.
#[derive(Debug, Clone)]
pub struct NewExpense {
    pub amount: Decimal,
    pub category: String,
    pub description: String,
    pub date: DateTime<Utc>,
}

/// A validated partial update. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct ExpenseChanges {
    pub amount: Option<Decimal>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

impl ExpenseChanges {
    pub fn apply(&self, expense: &mut Expense, now: DateTime<Utc>) {
        if let Some(amount) = self.amount {
            expense.amount = amount;
        }
        if let Some(category) = &self.category {
            expense.category = category.clone();
        }
        if let Some(description) = &self.description {
            expense.description = description.clone();
        }
        if let Some(date) = self.date {
            expense.date = date;
        }
        expense.updated_at = Some(now);
    }
}

/// Filter for listing expenses. Both bounds are inclusive.
#[derive(Debug, Clone, Default)]
pub struct ExpenseFilter {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub category: Option<String>,
}

impl ExpenseFilter {
    pub fn matches(&self, expense: &Expense) -> bool {
        self.start.is_none_or(|start| expense.date >= start)
            && self.end.is_none_or(|end| expense.date <= end)
            && self
                .category
                .as_deref()
                .is_none_or(|category| expense.category == category)
    }
}

/// Inclusive `[start, end]` window for the range-bound analytics derivations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    /// Fills in the defaults: `start` is 30 days before `now`, `end` is `now`.
    /// An inverted range is accepted as is and simply matches nothing.
    pub fn resolve(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            start: start.unwrap_or(now - Duration::days(DEFAULT_RANGE_DAYS)),
            end: end.unwrap_or(now),
        }
    }

    pub fn contains(&self, date: DateTime<Utc>) -> bool {
        self.start <= date && date <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKey {
    Category,
    /// Calendar month of `date` in UTC, labelled `YYYY-MM`.
    Month,
}

impl GroupKey {
    pub fn label(&self, expense: &Expense) -> String {
        match self {
            GroupKey::Category => expense.category.clone(),
            GroupKey::Month => month_label(expense.date),
        }
    }
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct GroupTotal {
    pub label: String,
    pub total: Decimal,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CategoryTotal {
    pub category: String,
    pub total: Decimal,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MonthlyTotal {
    pub month: String,
    pub total: Decimal,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSummary {
    pub total_expense: Decimal,
    pub category_expenses: Vec<CategoryTotal>,
    pub monthly_expenses: Vec<MonthlyTotal>,
    pub recent_expenses: Vec<Expense>,
}

pub fn month_label(date: DateTime<Utc>) -> String {
    date.format("%Y-%m").to_string()
}

/// Accepts an RFC 3339 timestamp or a bare `YYYY-MM-DD` date, which is taken
/// as midnight UTC.
pub fn parse_iso_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(date_time) = DateTime::parse_from_rfc3339(value) {
        return Some(date_time.to_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|date_time| date_time.and_utc())
}
