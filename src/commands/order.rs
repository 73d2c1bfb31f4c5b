use clap::{Args, Subcommand, ValueEnum};

use lunchbox_core::Controller;

use crate::config::Config;
use crate::db::SqliteStore;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Args)]
pub struct OrderCommand {
    #[command(subcommand)]
    pub command: OrderSubcommand,
}

#[derive(Subcommand)]
pub enum OrderSubcommand {
    /// Place an order from menu item ids
    Place {
        /// Menu item id (can be repeated)
        #[arg(long = "item", value_name = "ID", required = true)]
        items: Vec<i64>,

        /// Customer name (defaults to the configured one)
        #[arg(long)]
        name: Option<String>,
    },

    /// List orders, newest first
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Find orders by customer name
    Find {
        /// Name or part of a name, case-insensitive
        query: String,
    },

    /// Remove an order
    Remove {
        /// Order id
        id: i64,
    },
}

impl OrderCommand {
    pub async fn run(
        &self,
        controller: &Controller<SqliteStore>,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            OrderSubcommand::Place { items, name } => {
                let customer = name
                    .clone()
                    .unwrap_or_else(|| config.customer_name.value.clone());
                let order = controller.place_order(&customer, items).await?;
                println!("Placed order {}:", order.id);
                println!("{order}");
                Ok(())
            }

            OrderSubcommand::List { format } => {
                let orders = controller.snapshot().orders.checkpoint();
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&orders)?);
                    }
                    OutputFormat::Text => {
                        if orders.is_empty() {
                            println!("No orders found");
                            return Ok(());
                        }
                        for order in &orders {
                            println!("{order}");
                        }
                        println!("\n{} order(s)", orders.len());
                    }
                }
                Ok(())
            }

            OrderSubcommand::Find { query } => {
                let orders = controller.snapshot().find_orders(query);
                if orders.is_empty() {
                    println!("No orders match '{query}'");
                    return Ok(());
                }
                for order in &orders {
                    println!("{order}");
                }
                Ok(())
            }

            OrderSubcommand::Remove { id } => {
                controller.delete_order(*id).await?;
                println!("Removed order {id}");
                Ok(())
            }
        }
    }
}
