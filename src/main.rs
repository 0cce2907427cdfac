use std::sync::Arc;

use tracing::{debug, info, warn};
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use authgate_lib::{load_config, AuthClient, LoginCredentials, TracingNavigator, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    let env_file_path = dotenvy::dotenv().ok();

    // Initialize the tracing subscriber for structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if cfg!(debug_assertions) {
                // More verbose in debug mode
                "authgate=debug,authgate_lib=debug,warn".into()
            } else {
                "authgate=info,authgate_lib=info,warn".into()
            }
        }))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    info!(version = VERSION, "authgate starting");

    // Log environment loading after logger is initialized
    match env_file_path {
        Some(path) => info!("Loaded environment variables from {}", path.display()),
        None => debug!("No .env file found. Using existing environment variables."),
    };

    let config = load_config(None).await?;
    info!(api = %config.api_base_url, "Using backend");

    let landing_path = config.landing_path.clone();
    let mut client = AuthClient::new(config, Arc::new(TracingNavigator))?;
    client.start().await;
    info!(
        path = %landing_path,
        decision = ?client.check_route(&landing_path),
        "Guard verdict after bootstrap"
    );

    if let (Ok(email), Ok(password)) = (
        std::env::var("AUTHGATE_EMAIL"),
        std::env::var("AUTHGATE_PASSWORD"),
    ) {
        match client
            .session()
            .login(LoginCredentials::new(email, password))
            .await
        {
            Ok(user) => info!(user_id = %user.id, name = %user.name, "Logged in"),
            Err(e) => warn!(error = %e, "Login failed"),
        }
        info!(
            path = %landing_path,
            decision = ?client.check_route(&landing_path),
            "Guard verdict after login"
        );
    }

    info!("Press Ctrl+C to sign out and exit");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, signing out...");

    if client.session().is_authenticated() {
        client.session().logout().await;
    }

    info!("Shutdown complete");
    Ok(())
}
