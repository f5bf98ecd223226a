//! # switchboard
//!
//! Tool broker binary: loads settings, registers the built-in adapters and
//! serves sessions over WebSocket.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use switchboard_engine::{Broker, DispatchConfig, ToolRegistry};
use switchboard_server::ServerConfig;
use switchboard_settings::BrokerSettings;
use switchboard_telemetry::TelemetryConfig;

/// Tool orchestration broker.
#[derive(Parser, Debug)]
#[command(name = "switchboard", version, about = "Tool orchestration broker")]
struct Cli {
    /// Settings file (defaults to ~/.switchboard/settings.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the WebSocket server (default).
    Serve {
        /// Host to bind (overrides settings).
        #[arg(long)]
        host: Option<String>,

        /// Port to bind, 0 for auto-assign (overrides settings).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the tools the broker would register, then exit.
    Tools,
}

fn load(cli: &Cli) -> Result<BrokerSettings> {
    match &cli.config {
        Some(path) => switchboard_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => switchboard_settings::load_settings().context("Failed to load settings"),
    }
}

fn dispatch_config(settings: &BrokerSettings) -> DispatchConfig {
    let d = &settings.dispatch;
    DispatchConfig {
        outbound_buffer: d.outbound_buffer,
        ..DispatchConfig::default()
    }
    .with_max_concurrent_calls(d.max_concurrent_calls)
    .with_queue_bound(d.queue_bound)
    .with_call_timeout(Duration::from_millis(d.call_timeout_ms))
    .with_record_grace(Duration::from_millis(d.record_grace_ms))
}

fn server_config(settings: &BrokerSettings, host: Option<String>, port: Option<u16>) -> ServerConfig {
    let s = &settings.server;
    ServerConfig {
        host: host.unwrap_or_else(|| s.host.clone()),
        port: port.unwrap_or(s.port),
        max_send_queue: s.max_send_queue,
        heartbeat_interval: Duration::from_millis(s.heartbeat_interval_ms),
        client_timeout: Duration::from_millis(s.client_timeout_ms),
    }
}

fn build_registry(settings: &BrokerSettings) -> Result<Arc<ToolRegistry>> {
    let registry = Arc::new(ToolRegistry::new());
    switchboard_adapters::register_defaults(&registry, &settings.adapters)
        .context("Failed to register built-in tools")?;
    Ok(registry)
}

fn print_tools(registry: &ToolRegistry) {
    for tool in registry.list() {
        let kind = match tool.output_kind {
            switchboard_core::tools::OutputKind::SingleResult => "call",
            switchboard_core::tools::OutputKind::Stream => "stream",
        };
        println!("{:<16} {:<7} {}", tool.name, kind, tool.description);
    }
}

async fn serve(settings: BrokerSettings, host: Option<String>, port: Option<u16>) -> Result<()> {
    let registry = build_registry(&settings)?;
    let broker = Arc::new(Broker::new(registry, dispatch_config(&settings)));

    let config = server_config(&settings, host, port);
    let handle = switchboard_server::start(config, Arc::clone(&broker))
        .await
        .context("Failed to start server")?;
    tracing::info!(
        addr = %handle.addr,
        tools = broker.registry().count(),
        "switchboard ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    broker.shutdown().await;
    handle.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let settings = load(&cli)?;

    match cli.command {
        Some(Command::Tools) => {
            let registry = build_registry(&settings)?;
            print_tools(&registry);
            Ok(())
        }
        Some(Command::Serve { host, port }) => {
            init_logging(&settings)?;
            serve(settings, host, port).await
        }
        None => {
            init_logging(&settings)?;
            serve(settings, None, None).await
        }
    }
}

fn init_logging(settings: &BrokerSettings) -> Result<()> {
    let config = TelemetryConfig::from_level_name(&settings.logging.level, settings.logging.json);
    switchboard_telemetry::init_telemetry(&config).context("Failed to initialize logging")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_serve_overrides() {
        let cli = Cli::parse_from(["switchboard", "serve", "--port", "0", "--host", "0.0.0.0"]);
        match cli.command {
            Some(Command::Serve { host, port }) => {
                assert_eq!(host.as_deref(), Some("0.0.0.0"));
                assert_eq!(port, Some(0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cli_global_config_flag() {
        let cli = Cli::parse_from(["switchboard", "tools", "--config", "/tmp/s.json"]);
        assert!(matches!(cli.command, Some(Command::Tools)));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/s.json")));
    }

    #[test]
    fn dispatch_settings_carry_over() {
        let mut settings = BrokerSettings::default();
        settings.dispatch.max_concurrent_calls = 2;
        settings.dispatch.call_timeout_ms = 1500;
        let config = dispatch_config(&settings);
        assert_eq!(config.max_concurrent_calls, 2);
        assert_eq!(config.queue_bound, 16);
        assert_eq!(config.call_timeout, Duration::from_millis(1500));
        assert_eq!(config.outbound_buffer, 256);
    }

    #[test]
    fn cli_overrides_win_over_settings() {
        let settings = BrokerSettings::default();
        let config = server_config(&settings, None, Some(9999));
        assert_eq!(config.port, 9999);
        assert_eq!(config.host, settings.server.host);
        assert_eq!(config.client_timeout, Duration::from_secs(90));
    }

    #[test]
    fn default_registry_has_builtin_tools() {
        let registry = build_registry(&BrokerSettings::default()).unwrap();
        assert!(registry.contains("help"));
        assert!(registry.contains("camera_stream"));
    }
}
