use clap::Args;

use lunchbox_core::Controller;

use crate::db::SqliteStore;

/// Follow live changes to the menu and orders until interrupted.
#[derive(Args)]
pub struct WatchCommand {}

impl WatchCommand {
    pub async fn run(
        &self,
        controller: &Controller<SqliteStore>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let mut changes = controller.subscribe_changes();
        controller.start_listening();
        println!("Watching for changes (ctrl-c to stop)...");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = controller.snapshot();
                    println!(
                        "{} menu item(s), {} order(s), {} hidden restaurant(s)",
                        state.menu_items.items().len(),
                        state.orders.items().len(),
                        state.hidden_restaurants.tags.len(),
                    );
                }
            }
        }

        controller.stop_listening();
        println!("Stopped watching");
        Ok(())
    }
}
