mod broadcast;
mod db;
mod routes;
mod services;
mod state;

use std::sync::Arc;

use crate::broadcast::Broadcaster;
use crate::services::store::PgStore;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()
        .expect("invalid PORT");

    let pool = db::init_pool(&database_url)
        .await
        .expect("database init failed");

    let store = Arc::new(PgStore::new(pool));
    let state = state::AppState::new(store, Broadcaster::new());

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "chat server listening");
    axum::serve(listener, app).await.expect("server failed");
}
