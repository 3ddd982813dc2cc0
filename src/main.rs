mod analytics;
mod args;
mod auth;
mod db;
mod domain;
mod handlers;
mod logging;
mod store;

use std::{error::Error, sync::Arc};

use args::parse_args;
use auth::TokenVerifier;
use axum::{Router, routing::get};
use db::{PgExpenseStore, create_pool};
use handlers::{
    create_expense, delete_expense, get_analytics, get_expense, list_expenses, update_expense,
};
use logging::setup_logging;
use store::{ExpenseStore, MemoryExpenseStore};

pub struct AppState {
    store: Arc<dyn ExpenseStore>,
    token_verifier: TokenVerifier,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/analytics", get(get_analytics))
        .route("/api/expenses", get(list_expenses).post(create_expense))
        .route(
            "/api/expenses/{id}",
            get(get_expense).put(update_expense).delete(delete_expense),
        )
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();

    setup_logging(&args.base_log_dir, args.log_level);

    let store: Arc<dyn ExpenseStore> = match &args.database_url {
        Some(database_url) => {
            let pool = create_pool(database_url, args.max_db_connections)
                .await
                .inspect_err(|err| tracing::error!("Failed to create PostgreSQL pool: {}", err))?;
            Arc::new(PgExpenseStore::new(pool))
        }
        None => {
            tracing::warn!("No database URL given, expenses are kept in memory only");
            Arc::new(MemoryExpenseStore::new())
        }
    };

    let app_state = Arc::new(AppState {
        store,
        token_verifier: TokenVerifier::new(&args.jwt_secret),
    });

    let app = build_router(app_state);

    let bind_address = format!("0.0.0.0:{}", args.port);
    tracing::info!("Server listening on {}...", bind_address);

    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
