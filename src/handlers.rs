use std::sync::Arc;

use crate::{
    AppState,
    analytics::compute_summary,
    auth::AuthUser,
    domain::{
        AnalyticsSummary, DateRange, Expense, ExpenseChanges, ExpenseFilter, MAX_AMOUNT,
        NewExpense, parse_iso_date,
    },
    store::StoreError,
};
use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeParams {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExpenseRequest {
    pub amount: Option<Decimal>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ExpenseResponse {
    pub message: String,
    pub expense: Expense,
}

#[derive(Debug)]
pub enum AppError {
    Store(StoreError),
    NotFound(&'static str),
    BadRequest(String),
    Unauthorized(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Store(err)
    }
}

impl From<JsonRejection> for AppError {
    fn from(err: JsonRejection) -> Self {
        AppError::BadRequest(format!("Invalid request body: {}", err.body_text()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Store(err) => {
                tracing::error!("Store error while handling request: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An error occurred while processing the request".to_string(),
                )
            }
            AppError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{} not found", what)),
            AppError::BadRequest(msg) => {
                tracing::info!("Bad request: {}", &msg);
                (StatusCode::BAD_REQUEST, msg)
            }
            AppError::Unauthorized(msg) => {
                tracing::info!("Unauthorized: {}", &msg);
                (StatusCode::UNAUTHORIZED, msg)
            }
        };

        (
            status,
            Json(serde_json::json!({ "message": error_message })),
        )
            .into_response()
    }
}

/// Empty query values count as absent.
fn parse_date_param(value: Option<&str>, name: &str) -> Result<Option<DateTime<Utc>>, AppError> {
    match value.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(None),
        Some(raw) => parse_iso_date(raw)
            .map(Some)
            .ok_or_else(|| AppError::BadRequest(format!("Invalid {}: {}", name, raw))),
    }
}

fn parse_expense_id(id: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(id).map_err(|_| AppError::BadRequest(String::from("Invalid expense ID")))
}

fn validate_amount(amount: Decimal) -> Result<Decimal, AppError> {
    let amount = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    if amount <= Decimal::ZERO {
        return Err(AppError::BadRequest(String::from(
            "Amount must be a positive number",
        )));
    }
    if amount > MAX_AMOUNT {
        return Err(AppError::BadRequest(format!(
            "Amount must not exceed {}",
            MAX_AMOUNT
        )));
    }
    Ok(amount)
}

fn validate_text(value: &str, message: &str) -> Result<String, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::BadRequest(message.to_string()));
    }
    Ok(value.to_string())
}

impl ExpenseRequest {
    fn into_new_expense(self, now: DateTime<Utc>) -> Result<NewExpense, AppError> {
        let amount = self.amount.ok_or(AppError::BadRequest(String::from(
            "Amount must be a positive number",
        )))?;

        Ok(NewExpense {
            amount: validate_amount(amount)?,
            category: validate_text(
                self.category.as_deref().unwrap_or(""),
                "Category is required",
            )?,
            description: validate_text(
                self.description.as_deref().unwrap_or(""),
                "Description is required",
            )?,
            date: parse_date_param(self.date.as_deref(), "date")?.unwrap_or(now),
        })
    }

    fn into_changes(self) -> Result<ExpenseChanges, AppError> {
        Ok(ExpenseChanges {
            amount: self.amount.map(validate_amount).transpose()?,
            category: self
                .category
                .as_deref()
                .map(|category| validate_text(category, "Category cannot be empty"))
                .transpose()?,
            description: self
                .description
                .as_deref()
                .map(|description| validate_text(description, "Description cannot be empty"))
                .transpose()?,
            date: parse_date_param(self.date.as_deref(), "date")?,
        })
    }
}

#[axum::debug_handler(state = Arc<AppState>)]
pub async fn get_analytics(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(params): Query<RangeParams>,
) -> Result<Json<AnalyticsSummary>, AppError> {
    let range = DateRange::resolve(
        parse_date_param(params.start_date.as_deref(), "startDate")?,
        parse_date_param(params.end_date.as_deref(), "endDate")?,
        Utc::now(),
    );

    let summary = compute_summary(state.store.as_ref(), user.user_id, &range).await?;

    Ok(Json(summary))
}

#[axum::debug_handler(state = Arc<AppState>)]
pub async fn list_expenses(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<Expense>>, AppError> {
    let filter = ExpenseFilter {
        start: parse_date_param(params.start_date.as_deref(), "startDate")?,
        end: parse_date_param(params.end_date.as_deref(), "endDate")?,
        category: params.category.filter(|category| !category.is_empty()),
    };

    let expenses = state
        .store
        .list(user.user_id, &filter)
        .await
        .inspect_err(|err| {
            tracing::error!("Error listing expenses in list_expenses: {:#?}", err)
        })?;

    Ok(Json(expenses))
}

#[axum::debug_handler(state = Arc<AppState>)]
pub async fn get_expense(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Expense>, AppError> {
    let id = parse_expense_id(&id)?;

    state
        .store
        .find(user.user_id, id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("Expense"))
}

#[axum::debug_handler(state = Arc<AppState>)]
pub async fn create_expense(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    payload: Result<Json<ExpenseRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ExpenseResponse>), AppError> {
    let Json(request) = payload?;
    let new_expense = request.into_new_expense(Utc::now())?;

    let expense = state.store.insert(user.user_id, new_expense).await?;

    tracing::info!(
        "Created expense id={} for user_id={}",
        &expense.id,
        &user.user_id
    );

    Ok((
        StatusCode::CREATED,
        Json(ExpenseResponse {
            message: String::from("Expense added successfully"),
            expense,
        }),
    ))
}

#[axum::debug_handler(state = Arc<AppState>)]
pub async fn update_expense(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
    payload: Result<Json<ExpenseRequest>, JsonRejection>,
) -> Result<Json<ExpenseResponse>, AppError> {
    let id = parse_expense_id(&id)?;
    let Json(request) = payload?;
    let changes = request.into_changes()?;

    let expense = state
        .store
        .update(user.user_id, id, &changes)
        .await?
        .ok_or(AppError::NotFound("Expense"))?;

    Ok(Json(ExpenseResponse {
        message: String::from("Expense updated successfully"),
        expense,
    }))
}

#[axum::debug_handler(state = Arc<AppState>)]
pub async fn delete_expense(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    let id = parse_expense_id(&id)?;

    if !state.store.delete(user.user_id, id).await? {
        return Err(AppError::NotFound("Expense"));
    }

    tracing::info!("Deleted expense id={} for user_id={}", &id, &user.user_id);

    Ok(Json(MessageResponse {
        message: String::from("Expense deleted successfully"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{TokenVerifier, test_support::issue_token},
        build_router,
        store::MemoryExpenseStore,
    };
    use axum::{
        Router,
        body::Body,
        http::{Method, Request},
    };
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    const SECRET: &str = "test-secret";

    fn create_test_app() -> Router {
        build_router(Arc::new(AppState {
            store: Arc::new(MemoryExpenseStore::new()),
            token_verifier: TokenVerifier::new(SECRET),
        }))
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        user_id: Option<Uuid>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user_id) = user_id {
            builder = builder.header(
                "Authorization",
                format!("Bearer {}", issue_token(SECRET, user_id, 3600)),
            );
        }
        let request = match body {
            Some(body) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn create(app: &Router, user_id: Uuid, body: Value) -> Value {
        let (status, value) =
            send(app, Method::POST, "/api/expenses", Some(user_id), Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
        value["expense"].clone()
    }

    #[tokio::test]
    async fn health_needs_no_token() {
        let app = create_test_app();
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn requests_without_a_valid_token_are_rejected() {
        let app = create_test_app();
        let (status, body) = send(&app, Method::GET, "/api/analytics", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["message"].is_string());

        let request = Request::builder()
            .uri("/api/expenses")
            .header("Authorization", "Bearer garbage")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn analytics_for_a_new_user_is_empty() {
        let app = create_test_app();
        let (status, body) =
            send(&app, Method::GET, "/api/analytics", Some(Uuid::new_v4()), None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalExpense"].as_f64(), Some(0.0));
        assert_eq!(body["categoryExpenses"], json!([]));
        assert_eq!(body["monthlyExpenses"], json!([]));
        assert_eq!(body["recentExpenses"], json!([]));
    }

    #[tokio::test]
    async fn analytics_reports_a_single_expense() {
        let app = create_test_app();
        let user_id = Uuid::new_v4();
        let expense = create(
            &app,
            user_id,
            json!({"amount": 50, "category": "food", "description": "Groceries", "date": "2025-03-15"}),
        )
        .await;

        let (status, body) = send(
            &app,
            Method::GET,
            "/api/analytics?startDate=2025-03-01&endDate=2025-03-31",
            Some(user_id),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalExpense"].as_f64(), Some(50.0));
        assert_eq!(body["categoryExpenses"][0]["category"], "food");
        assert_eq!(body["categoryExpenses"][0]["total"].as_f64(), Some(50.0));
        assert_eq!(body["monthlyExpenses"][0]["month"], "2025-03");
        assert_eq!(body["monthlyExpenses"][0]["total"].as_f64(), Some(50.0));
        assert_eq!(body["recentExpenses"].as_array().unwrap().len(), 1);
        assert_eq!(body["recentExpenses"][0]["id"], expense["id"]);
        assert_eq!(body["recentExpenses"][0]["userId"], user_id.to_string());
    }

    #[tokio::test]
    async fn analytics_with_an_inverted_range_succeeds_empty() {
        let app = create_test_app();
        let user_id = Uuid::new_v4();
        create(
            &app,
            user_id,
            json!({"amount": 12.5, "category": "food", "description": "Lunch", "date": "2025-03-15"}),
        )
        .await;

        let (status, body) = send(
            &app,
            Method::GET,
            "/api/analytics?startDate=2025-04-01&endDate=2025-03-01",
            Some(user_id),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalExpense"].as_f64(), Some(0.0));
        assert_eq!(body["categoryExpenses"], json!([]));
        assert_eq!(body["recentExpenses"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn analytics_rejects_malformed_dates() {
        let app = create_test_app();
        let (status, body) = send(
            &app,
            Method::GET,
            "/api/analytics?startDate=last-tuesday",
            Some(Uuid::new_v4()),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid startDate: last-tuesday");
    }

    #[tokio::test]
    async fn create_validates_the_payload() {
        let app = create_test_app();
        let user_id = Uuid::new_v4();

        for (payload, message) in [
            (
                json!({"amount": 0, "category": "food", "description": "x"}),
                "Amount must be a positive number",
            ),
            (
                json!({"amount": -3, "category": "food", "description": "x"}),
                "Amount must be a positive number",
            ),
            (
                json!({"category": "food", "description": "x"}),
                "Amount must be a positive number",
            ),
            (
                json!({"amount": 3, "category": "   ", "description": "x"}),
                "Category is required",
            ),
            (
                json!({"amount": 3, "category": "food"}),
                "Description is required",
            ),
            (
                json!({"amount": 3, "category": "food", "description": "x", "date": "soon"}),
                "Invalid date: soon",
            ),
        ] {
            let (status, body) =
                send(&app, Method::POST, "/api/expenses", Some(user_id), Some(payload)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["message"], message);
        }
    }

    #[tokio::test]
    async fn oversized_amounts_are_rejected_and_analytics_keeps_working() {
        let app = create_test_app();
        let user_id = Uuid::new_v4();

        for _ in 0..2 {
            let (status, body) = send(
                &app,
                Method::POST,
                "/api/expenses",
                Some(user_id),
                Some(json!({
                    "amount": 5e28,
                    "category": "food",
                    "description": "Everything",
                    "date": "2025-03-15"
                })),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(body["message"].is_string());
        }

        let (_, listed) = send(&app, Method::GET, "/api/expenses", Some(user_id), None).await;
        assert_eq!(listed, json!([]));

        for _ in 0..2 {
            create(
                &app,
                user_id,
                json!({
                    "amount": "999999999999.99",
                    "category": "food",
                    "description": "Largest allowed",
                    "date": "2025-03-15"
                }),
            )
            .await;
        }

        let (status, body) = send(
            &app,
            Method::GET,
            "/api/analytics?startDate=2025-03-01&endDate=2025-03-31",
            Some(user_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["totalExpense"].as_f64().unwrap() > 1.9e12);
        assert_eq!(body["categoryExpenses"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_rejects_oversized_amounts() {
        let app = create_test_app();
        let user_id = Uuid::new_v4();
        let expense = create(
            &app,
            user_id,
            json!({"amount": 10, "category": "food", "description": "Snack"}),
        )
        .await;
        let uri = format!("/api/expenses/{}", expense["id"].as_str().unwrap());

        let (status, body) = send(
            &app,
            Method::PUT,
            &uri,
            Some(user_id),
            Some(json!({"amount": "1000000000000"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Amount must not exceed 999999999999.99");
    }

    #[test]
    fn amounts_round_half_away_from_zero() {
        assert_eq!(
            validate_amount("10.125".parse().unwrap()).unwrap().to_string(),
            "10.13"
        );
        assert_eq!(
            validate_amount("10.124".parse().unwrap()).unwrap().to_string(),
            "10.12"
        );
        assert!(validate_amount("0.004".parse().unwrap()).is_err());
        assert_eq!(
            validate_amount("0.005".parse().unwrap()).unwrap().to_string(),
            "0.01"
        );
        assert!(validate_amount("999999999999.994".parse().unwrap()).is_ok());
        assert!(validate_amount("999999999999.995".parse().unwrap()).is_err());
    }

    #[tokio::test]
    async fn create_trims_text_and_defaults_the_date() {
        let app = create_test_app();
        let before = Utc::now();
        let expense = create(
            &app,
            Uuid::new_v4(),
            json!({"amount": "19.99", "category": " travel ", "description": " Train "}),
        )
        .await;

        assert_eq!(expense["category"], "travel");
        assert_eq!(expense["description"], "Train");
        assert_eq!(expense["amount"].as_f64(), Some(19.99));
        assert!(expense["updatedAt"].is_null());
        let date = parse_iso_date(expense["date"].as_str().unwrap()).unwrap();
        assert!(date >= before);
    }

    #[tokio::test]
    async fn expenses_are_invisible_to_other_users() {
        let app = create_test_app();
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let expense = create(
            &app,
            owner,
            json!({"amount": 10, "category": "food", "description": "Snack", "date": "2025-03-15"}),
        )
        .await;
        let uri = format!("/api/expenses/{}", expense["id"].as_str().unwrap());

        let (status, _) = send(&app, Method::GET, &uri, Some(stranger), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            Method::PUT,
            &uri,
            Some(stranger),
            Some(json!({"amount": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app, Method::DELETE, &uri, Some(stranger), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Expense not found");

        let (status, body) = send(&app, Method::GET, "/api/expenses", Some(stranger), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));

        let (status, body) = send(&app, Method::GET, &uri, Some(owner), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], expense["id"]);
    }

    #[tokio::test]
    async fn update_changes_only_given_fields() {
        let app = create_test_app();
        let user_id = Uuid::new_v4();
        let expense = create(
            &app,
            user_id,
            json!({"amount": 10, "category": "food", "description": "Snack", "date": "2025-03-15"}),
        )
        .await;
        let uri = format!("/api/expenses/{}", expense["id"].as_str().unwrap());

        let (status, body) = send(
            &app,
            Method::PUT,
            &uri,
            Some(user_id),
            Some(json!({"amount": 25.5, "category": "dining"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Expense updated successfully");
        assert_eq!(body["expense"]["amount"].as_f64(), Some(25.5));
        assert_eq!(body["expense"]["category"], "dining");
        assert_eq!(body["expense"]["description"], "Snack");
        assert_eq!(body["expense"]["createdAt"], expense["createdAt"]);
        assert!(body["expense"]["updatedAt"].is_string());

        let (status, body) = send(
            &app,
            Method::PUT,
            &uri,
            Some(user_id),
            Some(json!({"description": ""})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Description cannot be empty");
    }

    #[tokio::test]
    async fn delete_removes_the_expense_for_good() {
        let app = create_test_app();
        let user_id = Uuid::new_v4();
        let expense = create(
            &app,
            user_id,
            json!({"amount": 10, "category": "food", "description": "Snack"}),
        )
        .await;
        let uri = format!("/api/expenses/{}", expense["id"].as_str().unwrap());

        let (status, body) = send(&app, Method::DELETE, &uri, Some(user_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Expense deleted successfully");

        let (status, _) = send(&app, Method::GET, &uri, Some(user_id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_ids_are_bad_requests() {
        let app = create_test_app();
        let (status, body) = send(
            &app,
            Method::GET,
            "/api/expenses/not-a-uuid",
            Some(Uuid::new_v4()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid expense ID");
    }

    #[tokio::test]
    async fn list_filters_by_category_and_range() {
        let app = create_test_app();
        let user_id = Uuid::new_v4();
        for (amount, category, date) in [
            (5, "food", "2025-01-10"),
            (6, "food", "2025-02-10"),
            (7, "rent", "2025-02-11"),
        ] {
            create(
                &app,
                user_id,
                json!({"amount": amount, "category": category, "description": "x", "date": date}),
            )
            .await;
        }

        let (status, body) = send(
            &app,
            Method::GET,
            "/api/expenses?startDate=2025-02-01&category=food",
            Some(user_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let listed = body.as_array().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["amount"].as_f64(), Some(6.0));

        let (_, body) = send(&app, Method::GET, "/api/expenses", Some(user_id), None).await;
        let amounts: Vec<_> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|expense| expense["amount"].as_f64().unwrap())
            .collect();
        assert_eq!(amounts, vec![7.0, 6.0, 5.0]);
    }
}
