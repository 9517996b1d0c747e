//! # docqa CLI
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./config/docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa init` | Create the SQLite database and run schema migrations |
//! | `docqa ingest <path>...` | Extract, chunk, embed and store files or directories |
//! | `docqa docs list` | List ingested documents |
//! | `docqa docs remove <id>` | Remove a document and its chunks |
//! | `docqa ask "<question>"` | Answer a question from the ingested documents |
//! | `docqa models list` | Show the model catalog |
//! | `docqa models download <name>` | Download a catalog model and load it |
//! | `docqa models use <name>` | Select a downloaded model |
//! | `docqa models unload` | Go back to the remote API |
//! | `docqa credentials set <kind> <value>` | Store `api-key` or `hf-token` |
//! | `docqa credentials show` | Show stored credentials, masked |

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use docqa::progress::ProgressMode;
use docqa::{ask, config, credentials_cmd, docs, ingest, logging, migrate, models_cmd};

/// docqa: question answering over your own documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docqa.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docqa",
    about = "Ask questions about your own documents with a local or remote language model",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docqa.toml")]
    config: PathBuf,

    /// Debug logging on stderr (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Ingest files or directories.
    ///
    /// Directories are walked recursively; `.txt`, `.md`, `.pdf` and `.docx`
    /// files are picked up. Re-ingesting a file replaces its chunks.
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Manage ingested documents.
    Docs {
        #[command(subcommand)]
        action: DocsAction,
    },

    /// Answer a question from the ingested documents.
    Ask {
        question: String,

        /// Number of chunks to retrieve (defaults to `[retrieval] top_n`).
        #[arg(long)]
        top_n: Option<usize>,

        /// Print the answer snapshot as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Manage local models.
    Models {
        #[command(subcommand)]
        action: ModelsAction,
    },

    /// Manage stored credentials.
    Credentials {
        #[command(subcommand)]
        action: CredentialsAction,
    },
}

#[derive(Subcommand)]
enum DocsAction {
    List,
    /// Remove a document by id or file name.
    Remove { target: String },
}

#[derive(Subcommand)]
enum ModelsAction {
    List {
        #[arg(long)]
        json: bool,
    },
    /// Download a catalog model and load it.
    Download {
        name: String,

        /// Progress output on stderr (default: human when stderr is a TTY).
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },
    /// Select a downloaded model for `ask`.
    Use { name: String },
    /// Forget the selected local model.
    Unload,
}

#[derive(Subcommand)]
enum CredentialsAction {
    /// Store a credential. Kind is `api-key` or `hf-token`.
    Set { kind: String, value: String },
    Show,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { paths } => {
            ingest::run_ingest(&cfg, &paths).await?;
        }
        Commands::Docs { action } => match action {
            DocsAction::List => docs::run_docs_list(&cfg).await?,
            DocsAction::Remove { target } => docs::run_docs_remove(&cfg, &target).await?,
        },
        Commands::Ask {
            question,
            top_n,
            json,
        } => {
            ask::run_ask(&cfg, &question, top_n, json).await?;
        }
        Commands::Models { action } => match action {
            ModelsAction::List { json } => models_cmd::run_models_list(&cfg, json).await?,
            ModelsAction::Download { name, progress } => {
                let mode = progress
                    .map(ProgressMode::from)
                    .unwrap_or_else(ProgressMode::default_for_tty);
                models_cmd::run_models_download(&cfg, &name, mode).await?;
            }
            ModelsAction::Use { name } => models_cmd::run_models_use(&cfg, &name).await?,
            ModelsAction::Unload => models_cmd::run_models_unload(&cfg).await?,
        },
        Commands::Credentials { action } => match action {
            CredentialsAction::Set { kind, value } => {
                credentials_cmd::run_credentials_set(&cfg, &kind, &value).await?
            }
            CredentialsAction::Show => credentials_cmd::run_credentials_show(&cfg).await?,
        },
    }

    Ok(())
}
