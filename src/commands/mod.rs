mod backup;
mod config_cmd;
mod menu;
mod order;
mod watch;

pub use backup::BackupCommand;
pub use config_cmd::ConfigCommand;
pub use menu::MenuCommand;
pub use order::OrderCommand;
pub use watch::WatchCommand;
