use clap::{Args, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;

use lunchbox_core::{Backup, Controller};

use crate::db::SqliteStore;

#[derive(Args)]
pub struct BackupCommand {
    #[command(subcommand)]
    pub command: BackupSubcommand,
}

#[derive(Subcommand)]
pub enum BackupSubcommand {
    /// Export the menu and all orders to a JSON backup file
    Export {
        /// Output path (defaults to lunchbox-backup-<date>.json)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Restore menu and orders from a JSON backup file
    Import {
        /// Backup file to restore
        file: PathBuf,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },

    /// Write all orders as a CSV report
    Csv {
        /// Output path (defaults to lunchbox-orders.csv)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

impl BackupCommand {
    pub async fn run(
        &self,
        controller: &Controller<SqliteStore>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            BackupSubcommand::Export { output } => {
                let backup = controller.export_backup();
                let path = output
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(backup.file_name()));
                std::fs::write(&path, backup.to_json()?)?;
                println!(
                    "Exported {} menu item(s) and {} order(s) to {}",
                    backup.menu_items.len(),
                    backup.orders.len(),
                    path.display()
                );
                Ok(())
            }

            BackupSubcommand::Import { file, force } => {
                let contents = std::fs::read_to_string(file)?;
                let backup = Backup::from_json(&contents)?;
                let (menu_count, order_count) = (backup.menu_items.len(), backup.orders.len());

                // Importing replaces the current menu and orders wholesale.
                if !force {
                    print!(
                        "Replace the current menu and orders with {menu_count} menu item(s) and {order_count} order(s)? [y/N] "
                    );
                    io::stdout().flush()?;

                    let mut input = String::new();
                    io::stdin().read_line(&mut input)?;

                    if !input.trim().eq_ignore_ascii_case("y") {
                        println!("Import cancelled.");
                        return Ok(());
                    }
                }

                controller.import_backup(backup).await?;
                println!("Restored {menu_count} menu item(s) and {order_count} order(s)");
                Ok(())
            }

            BackupSubcommand::Csv { output } => {
                let csv = controller.export_orders_csv();
                let path = output
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("lunchbox-orders.csv"));
                std::fs::write(&path, csv)?;
                println!("Wrote order report to {}", path.display());
                Ok(())
            }
        }
    }
}
