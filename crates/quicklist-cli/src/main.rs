use std::path::PathBuf;

use clap::{Parser, Subcommand};
use quicklist_cli::cli::{run_command, App, CliCommand, CliConfig, SettingsAction};
use quicklist_core::Preset;

#[derive(Parser)]
#[command(name = "quicklist")]
#[command(about = "Add and remove people from your private lists without leaving the terminal")]
struct Cli {
    /// Pretty-print JSON output
    #[arg(long, short)]
    pretty: bool,

    /// Path to JSON config file (contains cookie, dataDir, host)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Use the built-in sample graph instead of the network
    #[arg(long)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or change throttling settings
    Settings {
        #[command(subcommand)]
        action: Option<SettingsCommand>,
    },

    /// Forget cached memberships and list recency
    ClearCache,

    /// List your private lists, most recently used first
    Lists,

    /// Resolve a handle to its user id
    Resolve { handle: String },

    /// Show sign-in state, cache size and remaining lookups
    Status,

    /// Change which of your lists a user is on
    Manage {
        /// Handle of the user, with or without @
        handle: String,
        /// List id to add the user to (repeatable)
        #[arg(long)]
        add: Vec<String>,
        /// List id to remove the user from (repeatable)
        #[arg(long)]
        remove: Vec<String>,
        /// Skip the membership check and start from an empty selection
        #[arg(long)]
        quick: bool,
    },

    /// Delete one of your lists (needs deleteListQueryId in the config)
    DeleteList { id: String },
}

#[derive(Subcommand)]
enum SettingsCommand {
    Show,
    /// conservative, balanced or aggressive
    Preset { name: Preset },
    /// Turn quick mode on or off
    SkipCheck {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
}

#[tokio::main]
async fn main() {
    quicklist_core::tracing_setup::init_tracing_with_service("quicklist-cli");
    let cli = Cli::parse();

    let mut config = load_config(&cli);
    config.offline |= cli.offline;

    let app = match App::from_config(&config) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    let command = match cli.command {
        Commands::Settings { action } => CliCommand::Settings(match action {
            None | Some(SettingsCommand::Show) => SettingsAction::Show,
            Some(SettingsCommand::Preset { name }) => SettingsAction::Preset(name),
            Some(SettingsCommand::SkipCheck { enabled }) => SettingsAction::SkipCheck(enabled),
        }),
        Commands::ClearCache => CliCommand::ClearCache,
        Commands::Lists => CliCommand::Lists,
        Commands::Resolve { handle } => CliCommand::Resolve { handle },
        Commands::Status => CliCommand::Status,
        Commands::Manage {
            handle,
            add,
            remove,
            quick,
        } => CliCommand::Manage {
            handle,
            add,
            remove,
            quick,
        },
        Commands::DeleteList { id } => CliCommand::DeleteList { id },
    };

    match run_command(&app, command).await {
        Ok(output) => {
            let rendered = if cli.pretty {
                serde_json::to_string_pretty(&output)
            } else {
                serde_json::to_string(&output)
            };
            match rendered {
                Ok(text) => println!("{}", text),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Load configuration from `--config`, or defaults when none is given
fn load_config(cli: &Cli) -> CliConfig {
    let Some(ref path) = cli.config else {
        return CliConfig::default();
    };
    match CliConfig::load(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
