use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{error, info};

use remote_session_store::config::{AppConfig, DEFAULT_CONFIG_FILE};
use remote_session_store::logging;
use remote_session_store::store::SESSION_MDC_KEY;
use remote_session_store::{SessionStore, StoreError};

#[derive(Parser, Debug)]
#[command(about = "Back up and restore session archives in an object store")]
struct Cli {
    /// YAML configuration file
    #[arg(long, short, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Check whether an archive is stored for a session")]
    Exists { session: String },
    #[command(about = "Upload <SESSION>.zip, replacing the stored archive")]
    Save {
        session: String,
        /// Archive to upload instead of <SESSION>.zip
        #[arg(long)]
        archive: Option<PathBuf>,
    },
    #[command(about = "Download a session archive to a local file")]
    Extract { session: String, target: PathBuf },
    #[command(about = "Delete the stored archive of a session")]
    Delete { session: String },
    #[command(about = "Print the remote key a session is stored under")]
    Key { session: String },
}

impl Commands {
    fn session(&self) -> &str {
        match self {
            Commands::Exists { session }
            | Commands::Save { session, .. }
            | Commands::Extract { session, .. }
            | Commands::Delete { session }
            | Commands::Key { session } => session,
        }
    }
}

async fn run(cli: Cli) -> Result<(), StoreError> {
    let (config, source) = AppConfig::read(&cli.config)?;
    logging::init(&config.logging, config.store.debug);
    source.log();

    // current_thread runtime, so the MDC stays with this command
    log_mdc::insert(SESSION_MDC_KEY, cli.command.session());

    let store = config.build_store()?;
    info!("Using {:?}", store);

    match cli.command {
        Commands::Exists { session } => {
            println!("{}", store.session_exists(&session).await);
        }
        Commands::Save { session, archive: Some(path) } => {
            store.save_from(&session, &path).await?;
        }
        Commands::Save { session, archive: None } => {
            store.save(&session).await?;
        }
        Commands::Extract { session, target } => {
            store.extract(&session, &target).await?;
        }
        Commands::Delete { session } => {
            store.delete(&session).await;
        }
        Commands::Key { session } => {
            println!("{}", store.remote_key(&session));
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("session-store: {}", e);
            ExitCode::FAILURE
        }
    }
}
