mod crypto;
mod error;
mod migrations;
mod models;
mod repos;
mod routes;
mod scheduler;
mod services;
mod state;
mod upstream;

use axum::routing::{get, post};
use axum::Router;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::state::{AppState, SessionKey, SyncStatus};
use crate::upstream::HttpUpstreamClient;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db_path =
        std::env::var("CHRYSALIS_DB").unwrap_or_else(|_| "data/chrysalis.sqlite".into());
    if let Some(parent) = Path::new(&db_path).parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .expect("failed to open database");

    migrations::run(&pool)
        .await
        .expect("failed to run migrations");

    let retention_days = std::env::var("SECURITY_EVENT_RETENTION_DAYS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(services::security::DEFAULT_RETENTION_DAYS);
    match repos::security::cleanup_old_events(&pool, retention_days).await {
        Ok(deleted) if deleted > 0 => {
            tracing::info!(deleted, "cleaned up old security events")
        }
        Ok(_) => {}
        Err(error) => tracing::error!(%error, "failed to clean up old security events"),
    }

    let upstream_url =
        std::env::var("UPSTREAM_API_URL").unwrap_or_else(|_| "http://localhost:9000".into());
    let upstream_token = std::env::var("UPSTREAM_API_TOKEN").unwrap_or_default();

    let state = AppState {
        pool,
        upstream: Arc::new(HttpUpstreamClient::new(upstream_url, upstream_token)),
        session: SessionKey::default(),
        sync: SyncStatus::default(),
    };

    let governor_conf = GovernorConfigBuilder::default()
        .per_second(5)
        .burst_size(20)
        .finish()
        .expect("failed to build rate limit config");

    let notes_routes = Router::new()
        .route("/month/{month_key}", get(routes::notes::get_month_notes))
        .route("/all", get(routes::notes::get_all_notes))
        .route("/categories", get(routes::notes::get_categories))
        .route("/category", post(routes::notes::save_category_note))
        .route(
            "/category/{note_id}",
            axum::routing::delete(routes::notes::delete_category_note),
        )
        .route(
            "/general/{month_key}",
            get(routes::notes::get_general_note)
                .delete(routes::notes::delete_general_note),
        )
        .route("/general", post(routes::notes::save_general_note))
        .route("/archived", get(routes::notes::get_archived_notes))
        .route(
            "/archived/{note_id}",
            axum::routing::delete(routes::notes::delete_archived_note),
        )
        .route("/sync-categories", post(routes::notes::sync_categories))
        .route(
            "/history/{category_type}/{category_id}",
            get(routes::notes::get_note_history),
        )
        .route(
            "/checkboxes",
            get(routes::notes::get_checkbox_states).post(routes::notes::update_checkbox_state),
        )
        .route(
            "/checkboxes/month/{month_key}",
            get(routes::notes::get_checkbox_states_for_month),
        )
        .route(
            "/inheritance-impact",
            get(routes::notes::get_inheritance_impact),
        );

    let refunds_routes = Router::new()
        .route(
            "/config",
            get(routes::refunds::get_config).patch(routes::refunds::update_config),
        )
        .route("/pending-count", get(routes::refunds::get_pending_count))
        .route("/tags", get(routes::refunds::get_tags))
        .route(
            "/views",
            get(routes::refunds::get_views).post(routes::refunds::create_view),
        )
        .route(
            "/views/{view_id}",
            axum::routing::patch(routes::refunds::update_view)
                .delete(routes::refunds::delete_view),
        )
        .route("/views/reorder", post(routes::refunds::reorder_views))
        .route("/transactions", post(routes::refunds::get_transactions))
        .route("/search", post(routes::refunds::search_transactions))
        .route("/matches", get(routes::refunds::get_matches))
        .route("/match", post(routes::refunds::create_match))
        .route(
            "/match/{match_id}",
            axum::routing::delete(routes::refunds::delete_match),
        );

    let security_routes = Router::new()
        .route("/events", get(routes::security::get_events))
        .route("/summary", get(routes::security::get_summary))
        .route("/alerts", get(routes::security::get_alerts))
        .route("/alerts/dismiss", post(routes::security::dismiss_alerts))
        .route("/export", get(routes::security::export_events));

    let app = Router::new()
        .route("/health", get(health))
        .route("/unlock", post(routes::security::unlock))
        .route("/lock", post(routes::security::lock))
        .route("/credentials", post(routes::security::save_credentials))
        .nest("/notes", notes_routes)
        .nest("/refunds", refunds_routes)
        .nest("/security", security_routes)
        .layer(CorsLayer::new().allow_origin(Any).allow_headers(Any))
        .layer(GovernorLayer::new(governor_conf))
        .with_state(state.clone());

    let jobs = scheduler::SyncJobs {
        full: {
            let state = state.clone();
            Arc::new(move || {
                let state = state.clone();
                Box::pin(async move { services::sync::full_sync(&state).await })
            })
        },
        light: {
            let state = state.clone();
            Arc::new(move || {
                let state = state.clone();
                Box::pin(async move { services::sync::light_sync(&state).await })
            })
        },
    };
    let _scheduler = scheduler::start(state.session.clone(), state.sync.clone(), jobs);

    let port = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("chrysalis API listening on {}", addr);

    axum::serve(
        tokio::net::TcpListener::bind(addr)
            .await
            .expect("failed to bind address"),
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("server error");
}

async fn health() -> &'static str {
    "ok"
}
