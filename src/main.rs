use longshot::ansible::AnsibleRunner;
use longshot::api;
use longshot::config::load_config;
use longshot::dispatch::EventDispatcher;
use longshot::listener::ListenerRegistry;
use longshot::logging::setup_logging;
use longshot::notify::SlackNotifier;
use longshot::pipeline::ExecutionPipeline;
use longshot::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATH: &str = "longshot.toml";

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let config_path =
        std::env::var("LONGSHOT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let config = match load_config(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let log_dir = std::env::var("LONGSHOT_LOG_DIR").ok().map(PathBuf::from);
    let _log_guard = match setup_logging(config.default.verbose, log_dir) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Logging setup failed: {}", e);
            std::process::exit(1);
        }
    };

    let registry = match ListenerRegistry::from_entries(&config.listeners) {
        Ok(registry) => registry,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    if registry.is_empty() {
        warn!("No listeners configured; every event will be ignored");
    }
    for listener in registry.iter() {
        info!(
            "Listener '{}' on '{}' runs [{}]",
            listener.name, listener.pattern, listener.spec.playbook_name
        );
    }

    let bind_address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| config.server.bind_address());
    let webhook_path = config.server.webhook_path();

    let config = Arc::new(config);
    let runner = Arc::new(AnsibleRunner::new(config.ansible.command()));
    let notifier = match SlackNotifier::new(&config.slack) {
        Ok(notifier) => Arc::new(notifier),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    let pipeline = ExecutionPipeline::new(config.clone(), runner, notifier);
    let state = Arc::new(AppState::new(
        config,
        EventDispatcher::new(registry, pipeline),
    ));

    let app = api::router(state, &webhook_path);

    info!("Listening on {}", bind_address);
    info!("Webhook endpoint at {}", webhook_path);
    info!("Using config at {:?}", config_path);
    let listener = match tokio::net::TcpListener::bind(&bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", bind_address, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
