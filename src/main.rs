use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod db;

use commands::{BackupCommand, ConfigCommand, MenuCommand, OrderCommand, WatchCommand};
use config::Config;
use db::{init_db, SqliteStore};
use lunchbox_core::{Controller, ControllerError, StoreError};

#[derive(Parser)]
#[command(name = "lunchbox")]
#[command(version)]
#[command(about = "A team lunch ordering application", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Browse and manage the menu
    Menu(MenuCommand),

    /// Place and manage orders
    Order(OrderCommand),

    /// Export, import, and report on data
    Backup(BackupCommand),

    /// Follow live changes
    Watch(WatchCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", render_error(e.as_ref()));
        std::process::exit(1);
    }
}

/// Store failures carry recovery guidance for the user; everything else
/// displays as-is.
fn render_error(err: &(dyn std::error::Error + 'static)) -> String {
    if let Some(store) = err.downcast_ref::<StoreError>() {
        return store.user_message();
    }
    if let Some(ControllerError::Store(store)) = err.downcast_ref::<ControllerError>() {
        return store.user_message();
    }
    err.to_string()
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lunchbox=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Menu(cmd)) => {
            let controller = open_controller(&config).await?;
            cmd.run(&controller, &config).await?;
        }
        Some(Commands::Order(cmd)) => {
            let controller = open_controller(&config).await?;
            cmd.run(&controller, &config).await?;
        }
        Some(Commands::Backup(cmd)) => {
            let controller = open_controller(&config).await?;
            cmd.run(&controller).await?;
        }
        Some(Commands::Watch(cmd)) => {
            let controller = open_controller(&config).await?;
            cmd.run(&controller).await?;
        }
        Some(Commands::Config(cmd)) => {
            cmd.run(&config)?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}

/// Opens the local store and a controller with its state already loaded.
async fn open_controller(config: &Config) -> Result<Controller<SqliteStore>, Box<dyn std::error::Error>> {
    let pool = init_db(&config.database_path.value).await?;
    let store = SqliteStore::open(pool).await?;
    let controller = Controller::new(Arc::new(store));
    controller.load_all().await?;
    Ok(controller)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_error_uses_store_guidance() {
        let err: Box<dyn std::error::Error> = Box::new(StoreError::Connection("offline".into()));
        let msg = render_error(err.as_ref());
        assert!(msg.contains("offline"));
        assert!(msg.contains("network"));

        let err: Box<dyn std::error::Error> =
            Box::new(ControllerError::Store(StoreError::QuotaExceeded(
                "write limit".into(),
            )));
        assert!(render_error(err.as_ref()).contains("quota"));
    }

    #[test]
    fn test_render_error_passes_other_errors_through() {
        let err: Box<dyn std::error::Error> =
            Box::new(ControllerError::Invalid("customer name is required".into()));
        assert_eq!(
            render_error(err.as_ref()),
            "invalid request: customer name is required"
        );
    }
}
