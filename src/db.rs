use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, postgres::PgPoolOptions};
use uuid::Uuid;

use crate::{
    domain::{DateRange, Expense, ExpenseChanges, ExpenseFilter, GroupKey, GroupTotal, NewExpense},
    store::{ExpenseStore, StoreResult},
};

pub async fn create_pool(database_url: &str, max_connections: u32) -> StoreResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .inspect_err(|err| tracing::error!("Failed to run migrations: {}", err))?;

    Ok(pool)
}

pub async fn insert_expense(
    pool: &PgPool,
    user_id: Uuid,
    expense: &NewExpense,
    created_at: DateTime<Utc>,
) -> Result<Expense, sqlx::Error> {
    sqlx::query_as::<_, Expense>(
        "
            INSERT INTO expenses (
                id,
                user_id,
                amount,
                category,
                description,
                date,
                created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
        ",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(expense.amount)
    .bind(&expense.category)
    .bind(&expense.description)
    .bind(expense.date)
    .bind(created_at)
    .fetch_one(pool)
    .await
    .inspect_err(|err| {
        tracing::error!("Failed to insert expense for user_id={}: {}", user_id, err);
    })
}

pub async fn query_expense(
    pool: &PgPool,
    user_id: Uuid,
    id: Uuid,
) -> Result<Option<Expense>, sqlx::Error> {
    sqlx::query_as::<_, Expense>(
        "
            SELECT * FROM expenses
            WHERE id = $1 AND user_id = $2
        ",
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

pub async fn query_expenses(
    pool: &PgPool,
    user_id: Uuid,
    filter: &ExpenseFilter,
) -> Result<Vec<Expense>, sqlx::Error> {
    sqlx::query_as::<_, Expense>(
        "
            SELECT * FROM expenses
            WHERE user_id = $1
                AND ($2::timestamptz IS NULL OR date >= $2)
                AND ($3::timestamptz IS NULL OR date <= $3)
                AND ($4::text IS NULL OR category = $4)
            ORDER BY date DESC, created_at DESC, id ASC
        ",
    )
    .bind(user_id)
    .bind(filter.start)
    .bind(filter.end)
    .bind(&filter.category)
    .fetch_all(pool)
    .await
}

pub async fn update_expense(
    pool: &PgPool,
    user_id: Uuid,
    id: Uuid,
    changes: &ExpenseChanges,
    updated_at: DateTime<Utc>,
) -> Result<Option<Expense>, sqlx::Error> {
    sqlx::query_as::<_, Expense>(
        "
            UPDATE expenses SET
                amount = COALESCE($3, amount),
                category = COALESCE($4, category),
                description = COALESCE($5, description),
                date = COALESCE($6, date),
                updated_at = $7
            WHERE id = $1 AND user_id = $2
            RETURNING *
        ",
    )
    .bind(id)
    .bind(user_id)
    .bind(changes.amount)
    .bind(&changes.category)
    .bind(&changes.description)
    .bind(changes.date)
    .bind(updated_at)
    .fetch_optional(pool)
    .await
    .inspect_err(|err| {
        tracing::error!(
            "Failed to update expense id={} user_id={}: {}",
            id,
            user_id,
            err
        );
    })
}

pub async fn delete_expense(pool: &PgPool, user_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "
            DELETE FROM expenses
            WHERE id = $1 AND user_id = $2
        ",
    )
    .bind(id)
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn query_total(
    pool: &PgPool,
    user_id: Uuid,
    range: &DateRange,
) -> Result<Decimal, sqlx::Error> {
    sqlx::query_scalar::<_, Decimal>(
        "
            SELECT COALESCE(SUM(amount), 0) FROM expenses
            WHERE user_id = $1 AND date >= $2 AND date <= $3
        ",
    )
    .bind(user_id)
    .bind(range.start)
    .bind(range.end)
    .fetch_one(pool)
    .await
}

pub async fn query_category_totals(
    pool: &PgPool,
    user_id: Uuid,
    range: &DateRange,
) -> Result<Vec<GroupTotal>, sqlx::Error> {
    // Byte-wise collation keeps the tie order identical to the memory store.
    sqlx::query_as::<_, GroupTotal>(
        r#"
            SELECT category AS label, SUM(amount) AS total FROM expenses
            WHERE user_id = $1 AND date >= $2 AND date <= $3
            GROUP BY category
            ORDER BY total DESC, category COLLATE "C" ASC
        "#,
    )
    .bind(user_id)
    .bind(range.start)
    .bind(range.end)
    .fetch_all(pool)
    .await
}

pub async fn query_monthly_totals(
    pool: &PgPool,
    user_id: Uuid,
    range: &DateRange,
) -> Result<Vec<GroupTotal>, sqlx::Error> {
    sqlx::query_as::<_, GroupTotal>(
        "
            SELECT to_char(date AT TIME ZONE 'UTC', 'YYYY-MM') AS label, SUM(amount) AS total
            FROM expenses
            WHERE user_id = $1 AND date >= $2 AND date <= $3
            GROUP BY label
            ORDER BY label ASC
        ",
    )
    .bind(user_id)
    .bind(range.start)
    .bind(range.end)
    .fetch_all(pool)
    .await
}

pub async fn query_recent_expenses(
    pool: &PgPool,
    user_id: Uuid,
    limit: usize,
) -> Result<Vec<Expense>, sqlx::Error> {
    sqlx::query_as::<_, Expense>(
        "
            SELECT * FROM expenses
            WHERE user_id = $1
            ORDER BY date DESC, created_at DESC, id ASC
            LIMIT $2
        ",
    )
    .bind(user_id)
    .bind(limit as i64)
    .fetch_all(pool)
    .await
}

pub struct PgExpenseStore {
    pool: PgPool,
}

impl PgExpenseStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExpenseStore for PgExpenseStore {
    async fn insert(&self, user_id: Uuid, expense: NewExpense) -> StoreResult<Expense> {
        Ok(insert_expense(&self.pool, user_id, &expense, Utc::now()).await?)
    }

    async fn find(&self, user_id: Uuid, id: Uuid) -> StoreResult<Option<Expense>> {
        Ok(query_expense(&self.pool, user_id, id).await?)
    }

    async fn list(&self, user_id: Uuid, filter: &ExpenseFilter) -> StoreResult<Vec<Expense>> {
        Ok(query_expenses(&self.pool, user_id, filter).await?)
    }

    async fn update(
        &self,
        user_id: Uuid,
        id: Uuid,
        changes: &ExpenseChanges,
    ) -> StoreResult<Option<Expense>> {
        Ok(update_expense(&self.pool, user_id, id, changes, Utc::now()).await?)
    }

    async fn delete(&self, user_id: Uuid, id: Uuid) -> StoreResult<bool> {
        Ok(delete_expense(&self.pool, user_id, id).await?)
    }

    async fn sum_amount(&self, user_id: Uuid, range: &DateRange) -> StoreResult<Decimal> {
        Ok(query_total(&self.pool, user_id, range).await?)
    }

    async fn group_sum(
        &self,
        user_id: Uuid,
        range: &DateRange,
        key: GroupKey,
    ) -> StoreResult<Vec<GroupTotal>> {
        let groups = match key {
            GroupKey::Category => query_category_totals(&self.pool, user_id, range).await?,
            GroupKey::Month => query_monthly_totals(&self.pool, user_id, range).await?,
        };
        Ok(groups)
    }

    async fn recent(&self, user_id: Uuid, limit: usize) -> StoreResult<Vec<Expense>> {
        Ok(query_recent_expenses(&self.pool, user_id, limit).await?)
    }
}
