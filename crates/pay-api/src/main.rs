//! # litecart-pay
//!
//! Payment service for the litecart storefront.
//!
//! ## Usage
//!
//! ```bash
//! export BASE_URL=https://shop.example.com
//! export STRIPE_SECRET_KEY=sk_test_...
//! export STRIPE_WEBHOOK_SECRET=whsec_...
//! export DATABASE_PATH=./carts.db
//!
//! litecart-pay
//! ```

use pay_api::{routes, state::AppState};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let state = AppState::new()?;

    let addr = state.config.socket_addr()?;

    info!("Environment: {}", state.config.environment);
    info!(
        "Products loaded: {}",
        state.orchestrator.catalog().products.len()
    );
    info!("Payment providers: {:?}", state.orchestrator.providers());

    let is_prod = state.config.is_production();
    let app = routes::create_router(state);

    info!("litecart-pay listening on http://{}", addr);
    if !is_prod {
        info!("Checkout: POST http://{}/cart/payment", addr);
        info!("Callback: POST http://{}/cart/payment/callback", addr);
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// `RUST_LOG` filter (default INFO); `LOG_FORMAT=json` for JSON lines
fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}
