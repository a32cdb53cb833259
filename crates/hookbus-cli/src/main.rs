mod trigger;
mod watch;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;

use hookbus_config::{ConfigStore, ENV_CONFIG};
use hookbus_manager::{HookManager, default_resolver};
use hookbus_types::EventType;

#[derive(Parser)]
#[command(name = "hookbus", about = "Hook/event dispatch engine CLI")]
struct Cli {
    /// Config file (defaults to ~/.hookbus/hooks.json5)
    #[arg(long, global = true, env = ENV_CONFIG)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List discovered hooks
    List,
    /// Show one hook in detail
    Info { name: String },
    /// Show manager status
    Status,
    /// Show execution statistics
    Stats,
    /// Run a health check
    Health,
    /// Show the effective configuration
    Config,
    /// Enable a hook
    Enable { name: String },
    /// Disable a hook without removing it
    Disable { name: String },
    /// Override a hook's priority
    Priority {
        name: String,
        #[arg(allow_negative_numbers = true)]
        priority: i32,
    },
    /// Trigger an event and print the hook results
    Trigger {
        /// Event type (command, session, agent, gateway, message, error,
        /// lifecycle, security)
        event_type: EventType,

        /// Event action, e.g. "new"
        action: String,

        /// Session key attached to the event
        #[arg(long, default_value = "cli")]
        session_key: String,

        /// Event data as key=value; values are parsed as JSON when possible
        #[arg(short, long = "data", value_name = "KEY=VALUE")]
        data: Vec<String>,
    },
    /// Watch hook directories and reload on change until Ctrl-C
    Watch,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut store = match cli.config {
        Some(path) => ConfigStore::new(path),
        None => ConfigStore::open_default()?,
    };
    let default_level = if store.load_config(false).debug {
        "debug"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli.command, store))
}

async fn run(command: Commands, store: ConfigStore) -> anyhow::Result<()> {
    let manager = Arc::new(HookManager::new(store, default_resolver()));

    match command {
        Commands::List => {
            manager.initialize().await;
            print_json(&manager.list_hooks().await)?;
        }
        Commands::Info { name } => {
            manager.initialize().await;
            let hook = manager
                .get_hook(&name)
                .await
                .ok_or_else(|| anyhow::anyhow!("hook '{name}' not found"))?;
            print_json(&hook)?;
        }
        Commands::Status => {
            manager.initialize().await;
            print_json(&manager.get_status().await)?;
        }
        Commands::Stats => {
            manager.initialize().await;
            print_json(&manager.get_statistics().await)?;
        }
        Commands::Health => {
            manager.initialize().await;
            let report = manager.health_check().await;
            print_json(&report)?;
            if !report.healthy {
                anyhow::bail!("hooks are unhealthy");
            }
        }
        Commands::Config => {
            print_json(&manager.get_config_summary().await)?;
        }
        Commands::Enable { name } => {
            manager.initialize().await;
            if !manager.enable_hook(&name).await? {
                eprintln!("note: hook '{name}' is not currently loaded");
            }
            println!("enabled {name}");
        }
        Commands::Disable { name } => {
            manager.initialize().await;
            if !manager.disable_hook(&name).await? {
                eprintln!("note: hook '{name}' is not currently loaded");
            }
            println!("disabled {name}");
        }
        Commands::Priority { name, priority } => {
            manager.initialize().await;
            let updated = manager.set_hook_priority(&name, priority).await?;
            println!("priority of {name} set to {priority} ({updated} registrations updated)");
        }
        Commands::Trigger {
            event_type,
            action,
            session_key,
            data,
        } => {
            let results =
                trigger::run_trigger(&manager, event_type, &action, &session_key, &data).await?;
            print_json(&results)?;
        }
        Commands::Watch => {
            watch::run_watch(manager).await?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
