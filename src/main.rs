// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! berth main entry point - CLI and commands.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{info, warn};

use berth::config::{self, CliOptions, ResolvedConfig};
use berth::instance::{InstanceInfo, InstanceManager};
use berth::rpc::RpcClient;
use berth::telemetry::{init_telemetry, TelemetryConfig};

/// berth version string.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// berth - run and supervise agent instances.
#[derive(Parser)]
#[command(name = "berth")]
#[command(author, version, about = "Run and supervise agent instances", long_about = None)]
struct Cli {
    /// Workspace directory to load configuration from
    #[arg(short = 'C', long, global = true)]
    workspace: Option<PathBuf>,

    /// Maximum number of live instances
    #[arg(long, global = true)]
    max_instances: Option<usize>,

    /// First port handed out to instances
    #[arg(long, global = true)]
    base_port: Option<u16>,

    /// Last port handed out to instances
    #[arg(long, global = true)]
    max_port: Option<u16>,

    /// Default agent command line
    #[arg(long = "agent-command", global = true, env = "BERTH_AGENT_COMMAND")]
    agent_command: Option<String>,

    /// Host instance listeners bind to
    #[arg(long, global = true)]
    listen_host: Option<String>,

    /// Show verbose output
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Show debug output
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Subcommands for berth.
#[derive(Subcommand)]
enum Commands {
    /// Create the configured instances and keep them running until Ctrl-C
    Run,

    /// Send one RPC request to the parent endpoint and print the reply
    Call {
        /// Action name
        action: String,

        /// JSON payload
        #[arg(short, long, default_value = "{}")]
        payload: String,

        /// RPC endpoint URL
        #[arg(long, env = "BERTH_RPC_URL")]
        url: Option<String>,

        /// Request timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Show configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Initialize a new configuration file
    Init,

    /// Show version information
    Version,
}

/// Config subcommand actions.
#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let workspace_root = match &cli.workspace {
        Some(dir) => dir.clone(),
        None => {
            let cwd = std::env::current_dir()?;
            config::find_workspace_root(&cwd).unwrap_or(cwd)
        }
    };

    match &cli.command {
        Commands::Version => {
            println!("berth {}", VERSION);
            Ok(())
        }
        Commands::Init => {
            let path = config::init_config(&workspace_root, None)?;
            println!("Created config file: {}", path.display());
            Ok(())
        }
        Commands::Config { action } => match action {
            Some(ConfigAction::Show) | None => {
                let config = config::load_config(&workspace_root, cli_options(&cli, None))?;
                println!("{}", serde_json::to_string_pretty(&config)?);
                Ok(())
            }
        },
        Commands::Run => {
            let config = config::load_config(&workspace_root, cli_options(&cli, None))?;
            init_logging(&cli, &config);
            run(&config).await
        }
        Commands::Call {
            action,
            payload,
            url,
            timeout_ms,
        } => {
            let config = config::load_config(&workspace_root, cli_options(&cli, url.clone()))?;
            init_logging(&cli, &config);
            call(&config, action, payload, *timeout_ms).await
        }
    }
}

fn cli_options(cli: &Cli, rpc_url: Option<String>) -> CliOptions {
    CliOptions {
        max_instances: cli.max_instances,
        base_port: cli.base_port,
        max_port: cli.max_port,
        default_command: cli.agent_command.clone(),
        listen_host: cli.listen_host.clone(),
        rpc_url,
        log_level: None,
    }
}

fn init_logging(cli: &Cli, config: &ResolvedConfig) {
    let telemetry = if cli.debug {
        TelemetryConfig::development()
    } else if cli.verbose {
        TelemetryConfig::from_log_level("debug")
    } else {
        TelemetryConfig::from_log_level(&config.log_level)
    };

    if let Err(e) = init_telemetry(&telemetry) {
        eprintln!("{} {}", "warning:".yellow(), e);
    }
}

async fn run(config: &ResolvedConfig) -> anyhow::Result<()> {
    let manager = InstanceManager::from_config(config.manager.clone())?;

    for template in &config.instances {
        let label = template.id.as_deref().unwrap_or("(generated)");
        match manager.create(template.to_request()).await {
            Ok(created) => {
                println!("{} {} on port {}", "✓".green(), created.id.bold(), created.port)
            }
            Err(e) => eprintln!("{} {}: {}", "✗".red(), label, e),
        }
    }

    let instances = manager.list().await;
    if instances.is_empty() {
        println!("{}", "No instances running.".dimmed());
    } else {
        print_instances(&instances);
    }

    println!("{}", "Press Ctrl-C to stop.".dimmed());
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    info!("Shutting down");
    if let Err(e) = manager.shutdown_all().await {
        warn!("Shutdown finished with errors: {}", e);
    }
    Ok(())
}

fn print_instances(instances: &[InstanceInfo]) {
    println!(
        "\n{}",
        format!("{:<24} {:>6}  {:<8} {:<5} {}", "ID", "PORT", "STATUS", "PROTO", "COMMAND").bold()
    );
    for info in instances {
        let command = std::iter::once(info.command.as_str())
            .chain(info.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        println!(
            "{:<24} {:>6}  {:<8} {:<5} {}",
            info.id,
            info.port,
            info.status.to_string().green(),
            info.protocol,
            command.dimmed()
        );
    }
    println!();
}

async fn call(
    config: &ResolvedConfig,
    action: &str,
    payload: &str,
    timeout_ms: Option<u64>,
) -> anyhow::Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("payload is not valid JSON")?;

    let mut rpc = config.rpc.clone();
    if let Some(ms) = timeout_ms {
        rpc.request_timeout_ms = ms;
    }

    let client = RpcClient::new(rpc);
    client.connect().await?;
    let result = client
        .request_payload::<serde_json::Value, _>(action, &payload)
        .await;
    client.close().await;

    let reply = result?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}
