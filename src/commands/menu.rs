use clap::{Args, Subcommand, ValueEnum};

use lunchbox_core::{Controller, MenuItem};

use crate::config::Config;
use crate::db::SqliteStore;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Args)]
pub struct MenuCommand {
    #[command(subcommand)]
    pub command: MenuSubcommand,
}

#[derive(Subcommand)]
pub enum MenuSubcommand {
    /// List menu items
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Filter by restaurant
        #[arg(long)]
        restaurant: Option<String>,

        /// Include items from hidden restaurants
        #[arg(long)]
        all: bool,
    },

    /// Add a menu item (admin)
    Add {
        /// Item name
        name: String,

        /// Restaurant serving the item
        #[arg(long)]
        restaurant: String,

        /// Menu category
        #[arg(long, default_value = "Main Course")]
        category: String,

        /// Short subtitle shown under the name
        #[arg(long)]
        subtitle: Option<String>,

        /// Longer description
        #[arg(long)]
        description: Option<String>,

        /// Display price, e.g. "$8.50"
        #[arg(long)]
        price: Option<String>,

        /// Image URL
        #[arg(long)]
        image: Option<String>,

        /// Admin passphrase
        #[arg(long, short)]
        passphrase: String,
    },

    /// Update an existing menu item (admin)
    Update {
        /// Item id
        id: i64,

        /// New name
        #[arg(long)]
        name: Option<String>,

        /// New restaurant
        #[arg(long)]
        restaurant: Option<String>,

        /// New category
        #[arg(long)]
        category: Option<String>,

        /// New subtitle
        #[arg(long)]
        subtitle: Option<String>,

        /// New description
        #[arg(long)]
        description: Option<String>,

        /// New display price
        #[arg(long)]
        price: Option<String>,

        /// New image URL
        #[arg(long)]
        image: Option<String>,

        /// Admin passphrase
        #[arg(long, short)]
        passphrase: String,
    },

    /// Remove a menu item (admin)
    Remove {
        /// Item id
        id: i64,

        /// Admin passphrase
        #[arg(long, short)]
        passphrase: String,
    },

    /// Hide a restaurant's items from the menu (admin)
    Hide {
        /// Restaurant name
        restaurant: String,

        /// Admin passphrase
        #[arg(long, short)]
        passphrase: String,
    },

    /// Put a hidden restaurant back on the menu (admin)
    Unhide {
        /// Restaurant name
        restaurant: String,

        /// Admin passphrase
        #[arg(long, short)]
        passphrase: String,
    },
}

fn require_admin(config: &Config, passphrase: &str) -> Result<(), Box<dyn std::error::Error>> {
    if config.admin_gate().verify(passphrase) {
        Ok(())
    } else {
        Err("Admin passphrase rejected".into())
    }
}

impl MenuCommand {
    pub async fn run(
        &self,
        controller: &Controller<SqliteStore>,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            MenuSubcommand::List {
                format,
                restaurant,
                all,
            } => {
                let state = controller.snapshot();
                let mut items = if *all {
                    state.menu_items.items().to_vec()
                } else {
                    state.visible_menu_items()
                };
                if let Some(restaurant) = restaurant {
                    items.retain(|item| item.tag.eq_ignore_ascii_case(restaurant));
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&items)?);
                    }
                    OutputFormat::Text => {
                        if items.is_empty() {
                            println!("No menu items found");
                            return Ok(());
                        }
                        for item in &items {
                            println!("{:>4}  {}", item.id, item);
                        }
                        println!("\n{} item(s)", items.len());
                    }
                }
                Ok(())
            }

            MenuSubcommand::Add {
                name,
                restaurant,
                category,
                subtitle,
                description,
                price,
                image,
                passphrase,
            } => {
                require_admin(config, passphrase)?;

                let mut item = MenuItem::new(0, category, name.trim(), restaurant);
                if let Some(subtitle) = subtitle {
                    item = item.with_subtitle(subtitle);
                }
                if let Some(description) = description {
                    item = item.with_description(description);
                }
                if let Some(price) = price {
                    item = item.with_price(price);
                }
                if let Some(image) = image {
                    item = item.with_image(image);
                }

                let added = controller.add_menu_item(item).await?;
                println!("Added menu item:");
                println!("{:>4}  {}", added.id, added);
                Ok(())
            }

            MenuSubcommand::Update {
                id,
                name,
                restaurant,
                category,
                subtitle,
                description,
                price,
                image,
                passphrase,
            } => {
                require_admin(config, passphrase)?;

                let mut item = controller
                    .snapshot()
                    .menu_items
                    .items()
                    .iter()
                    .find(|i| i.id == *id)
                    .cloned()
                    .ok_or_else(|| format!("No menu item with id {id}"))?;

                if let Some(name) = name {
                    item.name = name.clone();
                }
                if let Some(restaurant) = restaurant {
                    item.tag = restaurant.clone();
                }
                if let Some(category) = category {
                    item.category = category.clone();
                }
                if let Some(subtitle) = subtitle {
                    item.subtitle = subtitle.clone();
                }
                if let Some(description) = description {
                    item.description = description.clone();
                }
                if let Some(price) = price {
                    item.price = price.clone();
                }
                if let Some(image) = image {
                    item.image = image.clone();
                }

                controller.update_menu_item(item.clone()).await?;
                println!("Updated menu item:");
                println!("{:>4}  {}", item.id, item);
                Ok(())
            }

            MenuSubcommand::Remove { id, passphrase } => {
                require_admin(config, passphrase)?;
                controller.delete_menu_item(*id).await?;
                println!("Removed menu item {id}");
                Ok(())
            }

            MenuSubcommand::Hide {
                restaurant,
                passphrase,
            } => {
                require_admin(config, passphrase)?;
                controller.hide_restaurant(restaurant).await?;
                println!("Hid restaurant '{restaurant}'");
                Ok(())
            }

            MenuSubcommand::Unhide {
                restaurant,
                passphrase,
            } => {
                require_admin(config, passphrase)?;
                controller.unhide_restaurant(restaurant).await?;
                println!("Restored restaurant '{restaurant}'");
                Ok(())
            }
        }
    }
}
