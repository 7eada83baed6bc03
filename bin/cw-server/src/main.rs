//! Changewatch Subscription Server
//!
//! Onboards the configured resources at startup, then keeps their change-notification
//! subscriptions alive with a periodic renewal sweep.
//!
//! ## Development Mode
//!
//! Without Graph credentials (or with `CHANGEWATCH_DEV_MODE=true`) subscriptions are held
//! by an in-process service instead of a real notification endpoint.

mod api;

use std::sync::Arc;

use anyhow::Result;
use cw_config::{AppConfig, GraphConfig};
use cw_subscriptions::{
    ClientCredentialsTokenProvider, GraphSubscriptionClient, InMemoryNotificationService, LifecycleConfig,
    NotificationServiceClient, SchedulerConfig, StaticTokenProvider, SubscriptionLifecycleManager,
    SubscriptionRegistry, SubscriptionScheduler, TokenProvider,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::api::{create_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for local development)
    let _ = dotenvy::dotenv();

    cw_common::logging::init_logging("cw-server");

    info!("Starting Changewatch Subscription Server");

    let config = AppConfig::load()?;
    info!(
        resources = config.subscriptions.resources.len(),
        expiration_minutes = config.subscriptions.expiration_minutes,
        renew_interval_minutes = config.subscriptions.renew_interval_minutes,
        "Subscription configuration loaded"
    );

    let client = build_client(&config)?;
    let lifecycle_config = lifecycle_config(&config);
    lifecycle_config.validate()?;

    let registry = Arc::new(SubscriptionRegistry::new());
    let manager = Arc::new(SubscriptionLifecycleManager::new(lifecycle_config, client, registry));

    onboard_configured_resources(&manager, &config.subscriptions.resources).await;

    let scheduler_config = SchedulerConfig {
        enabled: config.subscriptions.enabled,
    };
    let scheduler = Arc::new(SubscriptionScheduler::new(scheduler_config, manager.clone())?);
    scheduler.start();

    let app = create_router(AppState {
        manager: manager.clone(),
        scheduler: scheduler.clone(),
        scheduler_enabled: config.subscriptions.enabled,
    })
    .layer(TraceLayer::new_for_http());

    info!(host = %config.http.host, port = config.http.port, "HTTP server starting");

    let listener = TcpListener::bind((config.http.host.as_str(), config.http.port)).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(scheduler))
        .await?;

    info!(tracked = manager.registry().len(), "Subscription server stopped");
    Ok(())
}

fn lifecycle_config(config: &AppConfig) -> LifecycleConfig {
    let subs = &config.subscriptions;

    let client_state = if subs.client_state.is_empty() {
        warn!("No client_state configured, generating one for this process");
        uuid::Uuid::new_v4().to_string()
    } else {
        subs.client_state.clone()
    };

    let mut lifecycle = LifecycleConfig::new(subs.notification_url.clone())
        .with_client_state(client_state)
        .with_expiration_period(subs.expiration_period())
        .with_renew_interval(subs.renew_interval())
        .with_encryption_certificate(subs.encryption_certificate.clone(), subs.encryption_certificate_id.clone())
        .with_retry_failed_creations(subs.retry_failed_creations);
    lifecycle.include_resource_data = subs.include_resource_data;
    lifecycle
}

fn build_client(config: &AppConfig) -> Result<Arc<dyn NotificationServiceClient>> {
    if config.dev_mode || !config.graph.is_configured() {
        warn!(
            dev_mode = config.dev_mode,
            "DEV MODE: using in-memory notification service, no real subscriptions are created"
        );
        return Ok(Arc::new(InMemoryNotificationService::new()));
    }

    let token_provider = token_provider(&config.graph)?;
    let client = GraphSubscriptionClient::new(
        config.graph.base_url.clone(),
        token_provider,
        config.graph.request_timeout(),
    )?;

    info!(base_url = %config.graph.base_url, "Using Graph notification service");
    Ok(Arc::new(client))
}

fn token_provider(graph: &GraphConfig) -> Result<Arc<dyn TokenProvider>> {
    if graph.has_static_token() {
        info!("Authenticating with pre-issued access token");
        return Ok(Arc::new(StaticTokenProvider::new(graph.access_token.clone())));
    }

    info!(tenant_id = %graph.tenant_id, client_id = %graph.client_id, "Authenticating with client credentials");
    let provider = ClientCredentialsTokenProvider::new(
        &graph.authority_url,
        &graph.tenant_id,
        graph.client_id.clone(),
        graph.client_secret.clone(),
        &graph.base_url,
        graph.request_timeout(),
    )?;
    Ok(Arc::new(provider))
}

/// Failures are logged and do not stop startup; the API can onboard a resource later.
async fn onboard_configured_resources(manager: &SubscriptionLifecycleManager, resources: &[String]) {
    let mut established = 0usize;

    for resource in resources {
        match manager.ensure_subscription(resource).await {
            Ok(Some(subscription)) => {
                established += 1;
                info!(
                    resource = %resource,
                    subscription_id = %subscription.id,
                    expiration = %subscription.expiration_date_time,
                    "Resource onboarded"
                );
            }
            Ok(None) => warn!(resource = %resource, "Resource could not be onboarded at startup"),
            Err(e) => error!(resource = %resource, error = %e, "Invalid resource in configuration"),
        }
    }

    info!(established, configured = resources.len(), "Startup onboarding complete");
}

async fn shutdown_signal(scheduler: Arc<SubscriptionScheduler>) {
    cw_common::wait_for_shutdown_signal().await;
    scheduler.stop().await;
}
