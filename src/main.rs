//! Electroshop - Self-hosted Electronics Storefront

use anyhow::Result;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use sqlx::postgres::PgPoolOptions;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use electroshop::{admin, handlers, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&std::env::var("DATABASE_URL")?)
        .await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let nats = match std::env::var("NATS_URL") {
        Ok(url) => match async_nats::connect(&url).await {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, events disabled");
                None
            }
        },
        Err(_) => None,
    };
    let state = AppState { db, nats };

    let app = Router::new()
        .route(
            "/health",
            get(|| async { Json(serde_json::json!({"status": "healthy", "service": "electroshop"})) }),
        )
        .route("/", get(handlers::home))
        .route("/products/:kind/:slug/", get(handlers::product_detail))
        .route("/category/:slug/", get(handlers::category_detail))
        .route("/cart/", get(handlers::cart_view))
        .route("/add-to-cart/:kind/:slug/", get(handlers::add_to_cart))
        .route(
            "/remove-from-cart/:kind/:slug/",
            get(handlers::remove_from_cart),
        )
        .route("/change-qty/:kind/:slug/", post(handlers::change_qty))
        .route("/checkout/", get(handlers::checkout_page))
        .route("/make-order/", post(handlers::make_order))
        .route("/api/categories/", get(handlers::api_categories))
        .route("/admin/categories/", post(admin::create_category))
        .route("/admin/products/:kind/", post(admin::create_product))
        .route("/admin/products/:kind/:slug/", put(admin::update_product))
        .route(
            "/admin/products/:kind/:slug/image",
            put(admin::upload_image),
        )
        .route("/admin/orders/", get(admin::list_orders))
        .route("/admin/orders/:id/status", put(admin::set_order_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "8083".to_string());
    tracing::info!("🚀 Electroshop listening on 0.0.0.0:{}", port);
    axum::serve(
        tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?,
        app,
    )
    .await?;
    Ok(())
}
