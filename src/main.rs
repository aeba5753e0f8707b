use std::{path::Path, sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use switchyard::{
    adapters::{ConnectionDispatcher, FileConfigProvider, ProxyServer},
    config::{ServerConfig, ServerConfigValidator, load_config},
    core::{GatewayService, RouteEvent},
    ports::ConfigProvider,
    tracing_setup,
    utils::{ConnectionTracker, GracefulShutdown},
};
use tokio::sync::mpsc;
use tracing::Instrument;

const DEFAULT_CONFIG_PATH: &str = "switchyard.yaml";

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Configuration file (YAML, JSON or TOML); defaults and
    /// SWITCHYARD__* environment variables apply without one.
    #[clap(short, long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the proxy (default)
    Serve,
    /// Load and validate the configuration, then exit
    Validate,
    /// Write a starter configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    match args.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(args.config).await,
        Commands::Validate => validate_config_command(args.config.as_deref()).await,
        Commands::Init => {
            init_config_command(args.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH)).await
        }
    }
}

async fn serve(config_path: Option<String>) -> Result<()> {
    let config = load_config(config_path.as_deref())
        .await
        .context("Failed to load initial configuration")?;

    tracing_setup::init_tracing(&config.logging)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

    match &config_path {
        Some(path) => tracing::info!("Loaded configuration from {path}"),
        None => tracing::info!("No config file given, using defaults and environment"),
    }
    if let Ok(dump) = serde_json::to_string(&config) {
        tracing::debug!(config = %dump, "effective configuration");
    }

    ServerConfigValidator::validate(&config).context("Invalid configuration")?;
    log_reserved_settings(&config);

    // Duplicate keys abort here, before any port is bound.
    let gateway = Arc::new(GatewayService::new(&config).context("Failed to build route table")?);

    let (route_tx, route_rx) = mpsc::channel::<RouteEvent>(64);
    tokio::spawn(
        gateway
            .clone()
            .run_route_events(route_rx)
            .instrument(tracing_setup::configure_component_tracing("route_events")),
    );

    if let Some(path) = &config_path {
        let provider: Arc<dyn ConfigProvider> = Arc::new(
            FileConfigProvider::new(path).context("Failed to create config provider")?,
        );
        spawn_config_watcher(provider, config.clone(), route_tx.clone());
    }

    let graceful_shutdown = Arc::new(GracefulShutdown::with_timeout(Duration::from_secs(
        config.shutdown_timeout_secs,
    )));
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler_shutdown.run_signal_handler().await {
            tracing::error!("Signal handler error: {}", e);
        }
    });

    let connection_tracker = Arc::new(ConnectionTracker::new());
    let dispatcher = Arc::new(ConnectionDispatcher::new(gateway.clone()));
    let server = ProxyServer::bind(&config, dispatcher, connection_tracker.clone())
        .await
        .context("Failed to bind listeners")?;

    {
        let routes = gateway.routes();
        tracing::info!(
            addresses = ?server.local_addrs(),
            http_routes = routes.http_len(),
            grpc_routes = routes.grpc_len(),
            health_uri = %config.http.health_uri,
            "Switchyard proxy started"
        );
    }

    let token = graceful_shutdown.shutdown_token();
    tokio::select! {
        _ = server.run(token) => {
            tracing::warn!("Listeners stopped without a shutdown signal");
        }
        shutdown_reason = graceful_shutdown.wait_for_shutdown_signal() => {
            tracing::info!("Shutdown signal received: {:?}", shutdown_reason);
        }
    }

    let drain_timeout = graceful_shutdown.drain_timeout();
    tracing::info!(
        active_connections = connection_tracker.active_connection_count(),
        "Draining connections for up to {:?}",
        drain_timeout
    );
    if connection_tracker.wait_for_drain(drain_timeout).await {
        tracing::info!("Graceful shutdown completed");
    } else {
        let stats = connection_tracker.get_stats();
        tracing::warn!(
            remaining = stats.total_connections,
            oldest_age = ?stats.oldest_connection_age,
            "Forcing shutdown with connections still open"
        );
    }

    drop(route_tx);
    Ok(())
}

/// Settings that are parsed and carried but do not change relaying.
fn log_reserved_settings(config: &ServerConfig) {
    if config.grpc.keep_connection {
        tracing::info!("grpc.keep_connection is set; it has no effect on relaying");
    }
    for route in &config.http.route_maps {
        if !route.plugins.is_empty() || route.cors.is_some() {
            tracing::info!(
                override_path = %route.override_path,
                plugins = ?route.plugins,
                cors = route.cors.is_some(),
                "route carries plugins/cors settings that are not executed"
            );
        }
    }
    for method in &config.grpc.method_maps {
        if !method.plugins.is_empty() {
            tracing::info!(
                service = %method.proto_service,
                plugins = ?method.plugins,
                "grpc service carries plugins that are not executed"
            );
        }
    }
}

/// Reload the file on change and push its routes as one `Replace` event.
fn spawn_config_watcher(
    provider: Arc<dyn ConfigProvider>,
    initial: ServerConfig,
    route_tx: mpsc::Sender<RouteEvent>,
) {
    let Some(mut notify_rx) = provider.watch() else {
        tracing::warn!("Config provider is already being watched");
        return;
    };
    let debounce_duration = Duration::from_secs(2);

    tokio::spawn(async move {
        tracing::info!("Config watcher task started.");
        let mut last_reload_attempt_time = tokio::time::Instant::now();
        last_reload_attempt_time = last_reload_attempt_time
            .checked_sub(debounce_duration)
            .unwrap_or(last_reload_attempt_time);

        while notify_rx.recv().await.is_some() {
            if last_reload_attempt_time.elapsed() < debounce_duration {
                tracing::info!("Debouncing config reload event. Still within cooldown period.");
                while notify_rx.try_recv().is_ok() {}
                continue;
            }
            last_reload_attempt_time = tokio::time::Instant::now();

            match provider.load_config().await {
                Ok(new_config) => {
                    if let Err(e) = ServerConfigValidator::validate(&new_config) {
                        tracing::error!(
                            "Reloaded configuration is invalid: {}. Keeping current routes.",
                            e
                        );
                        continue;
                    }
                    warn_on_restart_only_changes(&initial, &new_config);

                    let event = RouteEvent::Replace {
                        http: new_config.http.route_maps,
                        grpc: new_config.grpc.method_maps,
                    };
                    if route_tx.send(event).await.is_err() {
                        tracing::warn!("Route event consumer is gone, stopping config watcher");
                        break;
                    }
                    tracing::info!("Configuration reloaded, route update queued.");
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to reload configuration: {:#}. Keeping current routes.",
                        e
                    );
                }
            }

            while notify_rx.try_recv().is_ok() {}
        }
        tracing::info!("Config watcher task is shutting down.");
    });
}

fn warn_on_restart_only_changes(old: &ServerConfig, new: &ServerConfig) {
    if old.listen_host != new.listen_host
        || old.http.port != new.http.port
        || old.grpc.port != new.grpc.port
    {
        tracing::warn!("Listener address changes require a restart; ignoring them");
    }
    if old.http.timeout != new.http.timeout
        || old.grpc.timeout != new.grpc.timeout
        || old.http.health_uri != new.http.health_uri
        || old.ip_forwarded_header != new.ip_forwarded_header
    {
        tracing::warn!("Timeout, health URI and forwarded-header changes require a restart");
    }
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: Option<&str>) -> Result<()> {
    let source = config_path.unwrap_or("built-in defaults");
    println!("🔍 Validating configuration: {source}");

    if let Some(path) = config_path {
        if !Path::new(path).exists() {
            eprintln!("❌ Error: Configuration file '{path}' not found");
            std::process::exit(1);
        }
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    let validated = ServerConfigValidator::validate(&config)
        .map_err(|e| eyre!(e))
        .and_then(|()| GatewayService::new(&config).map_err(|e| eyre!(e)));

    match validated {
        Ok(_) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Host: {}", config.listen_host);
            println!("   • HTTP Port: {}", config.http.port);
            println!(
                "   • gRPC Port: {}{}",
                config.grpc.port,
                if config.shares_port() { " (shared)" } else { "" }
            );
            println!("   • Health URI: {}", config.http.health_uri);
            println!("   • HTTP Routes: {}", config.http.route_maps.len());
            println!("   • gRPC Services: {}", config.grpc.method_maps.len());
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Upstream hosts must be 'host:port' without a scheme");
            println!("   • Override, upstream and health paths must start with '/'");
            println!("   • Each override path and proto service may appear only once");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let starter_config = r#"# Switchyard proxy configuration

listen_host: "0.0.0.0"
# Take the client IP from this header (HTTP/1.x only) when behind another proxy.
ip_forwarded_header: ""
shutdown_timeout_secs: 30

logging:
  level: "info"
  format: "json"   # or "pretty"

http:
  port: 8080
  timeout: 30
  health_uri: "/healthz"
  route_maps:
    - name: "users"
      host: "127.0.0.1:3000"
      override_path: "/users"
      upstream_path: "/v1/users"
      ip_restriction: []

grpc:
  port: 8080        # same as http.port: one listener serves both
  timeout: 30
  method_maps:
    - name: "greeter"
      host: "127.0.0.1:50051"
      proto_service: "helloworld.Greeter"
      allow: []
      disallow: []
"#;

    tokio::fs::write(path, starter_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'switchyard --config {config_path} serve' to start the proxy");
    Ok(())
}
