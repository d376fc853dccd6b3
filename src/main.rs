use {
    pay_sync::{
        AppState,
        adapters::{
            alerts::{LogAlertSink, SlackAlertSink},
            stripe_client::StripeProvider,
        },
        config::Config,
        domain::alert::AlertSink,
        infra::postgres::{PgCheckoutStore, PgWebhookEventStore},
        services::worker::Background,
    },
    sqlx::postgres::PgPoolOptions,
    std::{sync::Arc, time::Duration},
    tokio::signal,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::from_env().expect("invalid configuration");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(3))
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    let provider = StripeProvider::new(
        &config.stripe_secret_key,
        &config.stripe_api_base,
        config.provider_timeout,
    )
    .expect("failed to build Stripe client");

    let alerts: Arc<dyn AlertSink> = match &config.slack_webhook_url {
        Some(url) => Arc::new(SlackAlertSink::new(url.as_str()).expect("failed to build Slack client")),
        None => {
            tracing::warn!("SLACK_WEBHOOK_URL not set, alerts are logged only");
            Arc::new(LogAlertSink)
        }
    };

    let state = AppState::new(
        &config,
        Arc::new(PgCheckoutStore::new(pool.clone())),
        Some(Arc::new(PgWebhookEventStore::new(pool.clone()))),
        Arc::new(provider),
        alerts,
    );

    let background = Background::start(&state);
    // A membership checkout event makes up to three provider calls.
    let app = pay_sync::adapters::router(state, config.provider_timeout * 4);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("failed to bind listener");
    tracing::info!("listening on {}", config.bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    background.stop(Duration::from_secs(30)).await;
    pool.close().await;
    tracing::info!("shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl+c, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
