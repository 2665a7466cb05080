mod cmd;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "drydock",
    about = "drydock control plane — create apps, scale units, deploy",
    version,
    propagate_version = true
)]
struct Cli {
    /// Data directory holding drydock.yaml and the record store
    #[arg(long, global = true, env = "DRYDOCK_ROOT", default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a user (the owner records apps are charged against)
    UserCreate { email: String },

    /// Create an application
    Create {
        name: String,
        framework: String,

        /// Email of the owning user
        #[arg(long)]
        owner: String,

        /// Team granted repository access, as name=member1,member2
        #[arg(long = "team", value_parser = cmd::parse_team)]
        teams: Vec<drydock_core::user::Team>,
    },

    /// Add compute units to an application
    AddUnits { app: String, count: u32 },

    /// Deploy a version of an application
    Deploy { app: String, version: String },

    /// Show an application record as JSON
    Info { app: String },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::UserCreate { email } => cmd::user_create(&cli.root, &email),
        Commands::Create {
            name,
            framework,
            owner,
            teams,
        } => cmd::create(&cli.root, &name, &framework, &owner, teams),
        Commands::AddUnits { app, count } => cmd::add_units(&cli.root, &app, count),
        Commands::Deploy { app, version } => cmd::deploy(&cli.root, &app, &version),
        Commands::Info { app } => cmd::info(&cli.root, &app),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
