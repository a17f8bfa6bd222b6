use api::{
    create_router_with_cors, routes::subscriptions::validate_redirect_url, ApiDoc, AppState,
};
use services::subscription::{
    ports::{DurationCode, SubscriptionService, SystemClock},
    StripeCheckoutGateway, StripeWebhookVerifier, SubscriptionServiceConfig,
    SubscriptionServiceImpl,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

fn init_tracing(logging: &config::LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.filter_directives()));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Price codes for every duration that has one configured
fn price_map(checkout: &config::CheckoutConfig) -> HashMap<DurationCode, String> {
    DurationCode::ALL
        .into_iter()
        .filter_map(|code| {
            let price = checkout.price_for(code.as_str());
            if price.is_none() {
                tracing::warn!("No price configured for duration {}, purchases disabled", code);
            }
            price.map(|p| (code, p.to_string()))
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
        eprintln!("Continuing with environment variables...");
    }

    let config = config::Config::from_env();
    init_tracing(&config.logging);

    tracing::info!("Starting API server...");
    tracing::info!(
        "Database: {}:{}/{}",
        config.database.host.as_deref().unwrap_or("localhost"),
        config.database.port,
        config.database.database
    );
    tracing::info!("Server: {}:{}", config.server.host, config.server.port);

    validate_redirect_url(&config.checkout.success_url, "SUCCESS_URL")?;
    validate_redirect_url(&config.checkout.cancel_url, "CANCEL_URL")?;

    if !config.stripe.is_configured() {
        tracing::warn!("STRIPE_SECRET_KEY is not set; checkout calls will fail");
    }

    tracing::info!("Connecting to database...");
    let db = database::Database::from_config(&config.database).await?;

    tracing::info!("Running migrations...");
    db.run_migrations().await?;

    tracing::info!("Initializing services...");
    let checkout_gateway = Arc::new(StripeCheckoutGateway::new(
        &config.stripe.secret_key,
        config.checkout.success_url.clone(),
        config.checkout.cancel_url.clone(),
    ));
    let webhook_verifier = Arc::new(StripeWebhookVerifier::new(
        config.stripe.webhook_secret.clone(),
    ));

    let subscription_service = Arc::new(SubscriptionServiceImpl::new(SubscriptionServiceConfig {
        subscription_repo: db.subscription_repository(),
        checkout_gateway,
        webhook_verifier,
        clock: Arc::new(SystemClock),
        prices: price_map(&config.checkout),
    }));

    let app_state = AppState {
        subscription_service: subscription_service as Arc<dyn SubscriptionService>,
        session_repository: db.session_repository(),
    };

    let app = create_router_with_cors(app_state, config.cors.clone())
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/docs", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
