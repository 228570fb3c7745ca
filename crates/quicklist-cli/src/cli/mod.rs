pub mod app;
pub mod commands;
pub mod config;

pub use app::App;
pub use commands::{run_command, CliCommand, SettingsAction};
pub use config::CliConfig;
