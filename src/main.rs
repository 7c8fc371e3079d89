use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use prelude_gateway::adapters::{gateway_router, GatewayState, InMemoryHub, RedisHub};
use prelude_gateway::application::Router;
use prelude_gateway::config::{AppConfig, ServerConfig};
use prelude_gateway::gateway::Manager;
use prelude_gateway::ports::Hub;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = AppConfig::load()?;
    init_tracing(&config.server);
    config.validate()?;

    let hub: Arc<dyn Hub> = match config.redis.url() {
        Some(url) => {
            tracing::info!("using redis hub");
            Arc::new(RedisHub::connect(url, config.redis.hub_config()).await?)
        }
        None => {
            tracing::info!("no broker configured, using in-memory hub");
            Arc::new(InMemoryHub::with_capacity(config.redis.subscription_capacity))
        }
    };

    // The hub only keeps a weak reference, so the router must outlive serving.
    let router = Router::new(config.gateway.router_name.clone(), hub.clone());
    let manager = Manager::new(hub, config.gateway.manager_config());
    manager.start();

    let state = GatewayState::new(manager.clone(), config.session.session_config());
    let app = gateway_router(state);

    let addr = config.server.socket_addr()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, hostname = manager.hostname(), router = router.name(), "gateway listening");

    let shutdown_timeout = config.server.shutdown_timeout();
    let shutdown_manager = manager.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        tracing::info!("shutdown requested, draining manager");
        if let Err(error) = shutdown_manager.shutdown(shutdown_timeout).await {
            tracing::warn!(%error, "manager did not drain cleanly");
        }
    })
    .await?;

    tracing::info!("gateway stopped");
    Ok(())
}

fn init_tracing(server: &ServerConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(server.log_level.as_str()));

    if server.json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .ok();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
