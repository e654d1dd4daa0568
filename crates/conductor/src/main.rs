//! Conductor CLI
//!
//! Lists plugins and runs plugin operations as cancellable jobs.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use conductor::config::ConductorConfig;
use conductor::orchestrator::TaskReport;
use conductor::plugin_runtime::plugin_types::PluginArg;
use conductor::Conductor;

/// Plugin task runner
#[derive(Parser, Debug)]
#[command(name = "conductor")]
#[command(about = "Run plugin tasks", long_about = None)]
struct Args {
    /// Path to the config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Plugin directory (overrides config)
    #[arg(short, long)]
    plugins: Option<PathBuf>,

    /// Host address plugins call back into (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Host port plugins call back into (overrides config)
    #[arg(long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List loaded plugins
    List,

    /// List every plugin operation
    Tasks,

    /// Run a plugin operation
    Run {
        /// Plugin ID
        plugin: String,

        /// Operation name
        operation: String,

        /// Argument as key=value; the value is read as JSON when it parses
        #[arg(short, long = "arg", value_parser = parse_arg)]
        args: Vec<PluginArg>,
    },

    /// Keep plugins loaded, reloading on manifest changes, until Ctrl-C
    Watch,
}

fn parse_arg(pair: &str) -> Result<PluginArg, String> {
    PluginArg::parse(pair).ok_or_else(|| format!("expected key=value, got '{}'", pair))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ConductorConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(plugins) = args.plugins {
        config.plugins_dir = plugins;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting conductor v{}", env!("CARGO_PKG_VERSION"));

    let conductor = Conductor::new(config);
    conductor
        .load_plugins()
        .await
        .with_context(|| format!("Failed to load plugins from {}", conductor.config().plugins_dir.display()))?;

    match args.command {
        Command::List => list_plugins(&conductor),
        Command::Tasks => list_tasks(&conductor),
        Command::Run {
            plugin,
            operation,
            args,
        } => run_task(&conductor, &plugin, &operation, &args).await?,
        Command::Watch => watch(&conductor).await?,
    }

    Ok(())
}

fn list_plugins(conductor: &Conductor) {
    let plugins = conductor.cache().list();
    if plugins.is_empty() {
        println!("No plugins found");
        return;
    }

    for plugin in plugins {
        let version = plugin.version.as_deref().unwrap_or("-");
        println!("{:<24} {:<32} {:<10} {}", plugin.id, plugin.name, version, plugin.interface());
        if let Some(description) = &plugin.description {
            println!("    {}", description);
        }
    }
}

fn list_tasks(conductor: &Conductor) {
    for (plugin_id, operation) in conductor.cache().list_operations() {
        println!(
            "{:<24} {:<24} {}",
            plugin_id,
            operation.name,
            operation.description.as_deref().unwrap_or("")
        );
    }
}

async fn run_task(conductor: &Conductor, plugin: &str, operation: &str, args: &[PluginArg]) -> Result<()> {
    let (job_id, report) = conductor.submit_plugin_task(plugin, operation, args)?;
    let jobs = conductor.jobs().clone();

    // Ctrl-C cancels the job
    let canceller = {
        let jobs = jobs.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, cancelling job");
                if let Err(e) = jobs.cancel(job_id) {
                    warn!("Failed to cancel job: {}", e);
                }
            }
        })
    };

    let printer = jobs.progress(job_id).map(|mut progress| {
        tokio::spawn(async move {
            while progress.changed().await.is_ok() {
                if let Some(percent) = *progress.borrow_and_update() {
                    eprintln!("progress: {:>5.1}%", percent * 100.0);
                }
            }
        })
    });

    let report = report.await.context("Job ended without a report")?;
    canceller.abort();
    if let Some(printer) = printer {
        printer.abort();
    }

    match report {
        TaskReport::Completed(Some(output)) => {
            if let Some(value) = &output.output {
                println!("{}", serde_json::to_string_pretty(value)?);
            }
            if let Some(message) = output.error {
                bail!("Plugin returned error: {}", message);
            }
        }
        TaskReport::Completed(None) => println!("Plugin returned no result"),
        TaskReport::Cancelled => {
            warn!("Plugin task cancelled");
        }
        TaskReport::Failed(e) => {
            error!("Plugin task failed to start");
            return Err(e.into());
        }
    }

    Ok(())
}

async fn watch(conductor: &Conductor) -> Result<()> {
    let watcher = conductor.watch_plugins().context("Failed to start plugin watcher")?;
    let handle = tokio::spawn(watcher.run());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    handle.abort();
    Ok(())
}
