//! Fusebox - circuit breaker gateway
//!
//! Guards flaky downstream dependencies behind named circuit breakers
//! with an HTTP enforcement and operations surface.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use fusebox::{
    cli::{Cli, Command},
    config::Config,
    gateway::Server,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    // Handle subcommands
    match cli.command {
        Some(Command::Check) => run_check(&cli),
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// Validate the configuration and print the effective breaker table
fn run_check(cli: &Cli) -> ExitCode {
    let source = cli.config.as_deref().map_or_else(
        || "built-in defaults".to_string(),
        |p| p.display().to_string(),
    );

    match Config::load(cli.config.as_deref()) {
        Ok(config) => {
            println!("✅ Configuration valid ({source})");
            println!();
            println!("Server: {}:{}", config.server.host, config.server.port);
            println!(
                "Admin API: {}",
                if config.admin.token.is_some() {
                    "enabled"
                } else {
                    "disabled (no token)"
                }
            );
            println!(
                "Defaults: failures={} successes={} timeout={:?} rate={} min_requests={}",
                config.defaults.failure_threshold,
                config.defaults.success_threshold,
                config.defaults.timeout,
                config.defaults.failure_rate_threshold,
                config.defaults.min_requests
            );

            if config.breakers.is_empty() {
                println!("\nNo breakers declared; all are provisioned on demand.");
            } else {
                println!("\nDeclared breakers:");
                let mut names: Vec<_> = config.breakers.keys().collect();
                names.sort();
                for name in names {
                    let settings = &config.breakers[name];
                    println!(
                        "  {} - failures={} successes={} timeout={:?}",
                        name,
                        settings.failure_threshold,
                        settings.success_threshold,
                        settings.timeout
                    );
                }
            }

            println!("\nRoutes:");
            println!("  {}/{{name}} -> agent_<name>", config.routes.agent_prefix);
            for rule in &config.routes.rules {
                println!("  {} -> {}", rule.prefix, rule.breaker);
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Configuration invalid: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the gateway server
async fn run_server(cli: Cli) -> ExitCode {
    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        breakers = config.breakers.len(),
        "Starting fusebox"
    );

    // Create and run server
    let server = match Server::new(config) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create server: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Run with graceful shutdown
    if let Err(e) = server.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}
