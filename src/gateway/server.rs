//! Standalone gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, info, warn};

use super::auth::AdminAuth;
use super::resilience::{ResilienceState, RouteTable};
use super::router::{AppState, create_router};
use crate::breaker::{BreakerRegistry, CircuitState};
use crate::config::Config;
use crate::{Error, Result};

/// Fusebox server: breaker registry plus the HTTP surface around it.
pub struct Server {
    /// Configuration
    config: Config,
    /// Breaker registry
    registry: Arc<BreakerRegistry>,
    /// Graceful shutdown trigger
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

impl Server {
    /// Create a new server, registering the configured breakers.
    ///
    /// # Errors
    ///
    /// Returns an error if any configured breaker settings are out of
    /// range.
    pub fn new(config: Config) -> Result<Self> {
        let registry = Arc::new(BreakerRegistry::from_config(&config)?);
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        Ok(Self {
            config,
            registry,
            shutdown_tx,
        })
    }

    /// Shared breaker registry, for wiring breakers into application
    /// code next to the server.
    #[must_use]
    pub fn registry(&self) -> Arc<BreakerRegistry> {
        Arc::clone(&self.registry)
    }

    /// Sender that triggers a graceful shutdown when signalled.
    #[must_use]
    pub fn shutdown_handle(&self) -> tokio::sync::broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Run the server until Ctrl+C, SIGTERM, or the shutdown handle
    /// fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured host does not parse, the
    /// listener cannot bind, or the server fails while running.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let shutdown_tx = self.shutdown_tx.clone();

        let admin = Arc::new(AdminAuth::from_config(&self.config.admin));
        let admin_enabled = admin.enabled();
        let routes = Arc::new(RouteTable::from_config(&self.config.routes));
        let state = AppState {
            registry: Arc::clone(&self.registry),
            admin,
        };
        let resilience = ResilienceState {
            registry: Arc::clone(&self.registry),
            routes,
        };

        // Create router
        let app = create_router(state, resilience, axum::Router::new());

        // Bind listener
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("FUSEBOX v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(breakers = self.registry.len(), "Breakers registered");

        if admin_enabled {
            info!("ADMIN API enabled:");
            info!(
                "  POST http://{}:{}/breakers/reset",
                self.config.server.host, self.config.server.port
            );
        } else {
            warn!("ADMIN API disabled - set admin.token to enable resets");
        }

        info!("Breaker status:");
        let mut names = self.registry.names();
        names.sort_unstable();
        for name in names {
            info!("  /breakers/{name}");
        }
        info!("============================================================");

        // Periodic status log task
        let interval_period = self.config.server.status_log_interval;
        if !interval_period.is_zero() {
            let registry = Arc::clone(&self.registry);
            let mut shutdown_rx = shutdown_tx.subscribe();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(interval_period);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            let mut open: Vec<String> = registry
                                .get_all_status()
                                .into_values()
                                .filter(|status| status.state == CircuitState::Open)
                                .map(|status| status.name)
                                .collect();
                            if open.is_empty() {
                                debug!(breakers = registry.len(), "All circuits closed");
                            } else {
                                open.sort_unstable();
                                warn!(open = ?open, "Circuits open");
                            }
                        }
                        _ = shutdown_rx.recv() => {
                            break;
                        }
                    }
                }
            });
        }

        // Run server with graceful shutdown
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Server stopped");

        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let mut external = shutdown_tx.subscribe();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
        _ = external.recv() => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
