//! # CSV Vault CLI (`vault`)
//!
//! Upload CSV files into a deduplicating store, query and export the
//! stored rows, keep an address book, and mail rows as CSV attachments.
//!
//! ## Usage
//!
//! ```bash
//! vault --config ./config/vault.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vault init` | Create the SQLite database and schema |
//! | `vault upload <file>` | Parse and store a CSV file |
//! | `vault records` | List stored rows |
//! | `vault search <term>` | Search stored rows |
//! | `vault stats` | File and row totals |
//! | `vault export` | Write stored rows as CSV |
//! | `vault contacts ...` | Manage mail recipients |
//! | `vault mail ...` | Send rows by mail, show history |
//! | `vault serve` | Start the HTTP API |
//!
//! Logs go to stderr; set `RUST_LOG` (e.g. `RUST_LOG=csv_vault=debug`)
//! to change verbosity.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use csv_vault::config;
use csv_vault::contacts;
use csv_vault::export;
use csv_vault::ingest;
use csv_vault::mail::{self, SendArgs, DEFAULT_HISTORY_LIMIT};
use csv_vault::migrate;
use csv_vault::models::NewContact;
use csv_vault::query::{self, RecordQuery};
use csv_vault::server;

/// CSV Vault: a deduplicating CSV store with search, export, and mail.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/vault.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "vault",
    about = "CSV Vault: upload, deduplicate, search, export, and mail CSV data",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/vault.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Parse a CSV file and store its rows, skipping content already stored.
    Upload {
        /// Path to a `.csv` file.
        file: PathBuf,
    },

    /// List stored rows, newest first.
    Records {
        /// Only rows uploaded under this filename.
        #[arg(long)]
        file: Option<String>,
    },

    /// Case-insensitive search over stored rows.
    Search {
        /// Substring, or a regex when `--field` is given.
        term: String,

        /// Restrict the match to one column (`all` searches every column).
        #[arg(long)]
        field: Option<String>,
    },

    /// Show file and row totals.
    Stats,

    /// Write stored rows as CSV.
    Export {
        #[command(flatten)]
        filter: RowFilter,

        /// Output file path. Writes to stdout if omitted.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Manage mail recipients.
    Contacts {
        #[command(subcommand)]
        action: ContactsAction,
    },

    /// Send stored rows by mail and inspect the send log.
    Mail {
        #[command(subcommand)]
        action: MailAction,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

/// Row selection shared by `export` and `mail send`.
#[derive(Args, Clone, Default)]
struct RowFilter {
    /// Only rows matching this search term.
    #[arg(long)]
    search: Option<String>,

    /// Column the search term applies to.
    #[arg(long, requires = "search")]
    field: Option<String>,

    /// Only rows uploaded under this filename.
    #[arg(long)]
    file: Option<String>,
}

impl RowFilter {
    fn into_query(self) -> RecordQuery {
        RecordQuery {
            stats: false,
            search: self.search,
            field: self.field,
            filename: self.file,
        }
    }
}

#[derive(Subcommand)]
enum ContactsAction {
    /// List contacts sorted by name.
    List,
    /// Add a contact.
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Remove a contact by id.
    Remove { id: String },
    /// Insert a handful of sample contacts.
    Seed,
}

#[derive(Subcommand)]
enum MailAction {
    /// Compose and send a message.
    Send {
        /// Recipient address. Repeatable.
        #[arg(long)]
        to: Vec<String>,

        /// Contact id whose email is added to the recipients. Repeatable.
        #[arg(long = "contact")]
        contacts: Vec<String>,

        #[arg(long)]
        subject: String,

        #[arg(long)]
        message: String,

        /// Attach every stored row as CSV.
        #[arg(long, conflicts_with_all = ["attach_search", "attach_file"])]
        attach_all: bool,

        /// Attach rows matching this search term.
        #[arg(long)]
        attach_search: Option<String>,

        /// Column for `--attach-search`.
        #[arg(long, requires = "attach_search")]
        attach_field: Option<String>,

        /// Attach rows uploaded under this filename.
        #[arg(long)]
        attach_file: Option<String>,
    },
    /// Show recent send attempts, newest first.
    History {
        #[arg(long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: i64,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Upload { file } => {
            ingest::run_upload(&cfg, &file).await?;
        }
        Commands::Records { file } => {
            let q = RecordQuery {
                filename: file,
                ..Default::default()
            };
            query::run_records(&cfg, &q).await?;
        }
        Commands::Search { term, field } => {
            let q = RecordQuery {
                search: Some(term),
                field,
                ..Default::default()
            };
            query::run_records(&cfg, &q).await?;
        }
        Commands::Stats => {
            query::run_stats(&cfg).await?;
        }
        Commands::Export { filter, output } => {
            export::run_export(&cfg, &filter.into_query(), output.as_deref()).await?;
        }
        Commands::Contacts { action } => match action {
            ContactsAction::List => contacts::run_list(&cfg).await?,
            ContactsAction::Add {
                name,
                email,
                description,
            } => {
                let input = NewContact {
                    name: Some(name),
                    email: Some(email),
                    description,
                };
                contacts::run_add(&cfg, &input).await?;
            }
            ContactsAction::Remove { id } => contacts::run_remove(&cfg, &id).await?,
            ContactsAction::Seed => contacts::run_seed(&cfg).await?,
        },
        Commands::Mail { action } => match action {
            MailAction::Send {
                to,
                contacts,
                subject,
                message,
                attach_all,
                attach_search,
                attach_field,
                attach_file,
            } => {
                let attach = if attach_all {
                    Some(RecordQuery::default())
                } else if attach_search.is_some() || attach_file.is_some() {
                    Some(
                        RowFilter {
                            search: attach_search,
                            field: attach_field,
                            file: attach_file,
                        }
                        .into_query(),
                    )
                } else {
                    None
                };
                let args = SendArgs {
                    to,
                    contact_ids: contacts,
                    subject,
                    message,
                    attach,
                };
                mail::run_send(&cfg, &args).await?;
            }
            MailAction::History { limit } => mail::run_history(&cfg, limit).await?,
        },
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
