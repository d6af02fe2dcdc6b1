mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "conduit",
    version,
    about = "Resolve, publish and run linear data streams"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a stream description and print its stage descriptors as JSON
    Resolve {
        /// Stream description, e.g. "sequence --count=5 | log"
        stream: String,
        /// Group name (generated when omitted)
        #[arg(short, long)]
        group: Option<String>,
    },
    /// Print the deployment requests for a stream, one per line
    Encode {
        stream: String,
        #[arg(short, long)]
        group: Option<String>,
        /// Emit undeploy requests instead of deploy requests
        #[arg(long)]
        undeploy: bool,
    },
    /// Deploy a stream on local agents, run it, then undeploy it
    Run {
        stream: String,
        #[arg(short, long)]
        group: Option<String>,
        /// Runtime YAML file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// How long to run before undeploying
        #[arg(long, default_value_t = 5)]
        duration_secs: u64,
    },
    /// List the built-in module kinds
    Modules,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Resolve { stream, group } => commands::resolve::execute(&stream, group.as_deref()),
        Commands::Encode {
            stream,
            group,
            undeploy,
        } => commands::encode::execute(&stream, group.as_deref(), undeploy),
        Commands::Run {
            stream,
            group,
            config,
            duration_secs,
        } => {
            commands::run::execute(&stream, group.as_deref(), config.as_deref(), duration_secs)
                .await
        }
        Commands::Modules => commands::modules::execute(),
    }
}
