//! Per-user database backup and deletion tool.
//!
//! This binary finds every row a user owns across a set of databases,
//! writes them to one (optionally encrypted) JSON artifact, reads such
//! artifacts back, and deletes the same rows.
//!
//! # Security Guarantees
//! - Backups only issue `SELECT` statements
//! - Deletes are scoped by resolved, bound `IN (...)` filters
//! - Passwords and keys are read from the environment or the terminal,
//!   never from arguments
//! - Connection credentials are redacted in logs

mod credentials;
mod output;

use clap::{Args, Parser, Subcommand};
use credentials::{PromptMode, SecretSource};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use userbackup_core::config::{DEFAULT_CHUNK_SIZE, DEFAULT_DELETE_BATCH_SIZE, DEFAULT_PAGE_SIZE};
use userbackup_core::logging::init_logging;
use userbackup_core::storage::{is_encrypted_path, load_backup};
use userbackup_core::{
    BackupConfig, ConnectionSpec, DeletionEngine, Result, StaticCatalog, UserBackupError,
    UserBackupService, UserIdentity,
};

#[derive(Parser)]
#[command(name = "userbackup")]
#[command(about = "Per-user database backup and deletion tool")]
#[command(version)]
#[command(long_about = "
userbackup - export and erase everything one user owns

Every table of every connection is inspected. A table is included when it
has a column identifying the user (user_id, account_id, active_id, or a
configured override such as users.id).

SECRETS:
  USERBACKUP_KEY       base64 32-byte AES key (takes precedence)
  USERBACKUP_PASSWORD  password for Argon2id key derivation
  Without either, the password is prompted for on the terminal.

EXAMPLES:
  userbackup backup -c main=sqlite://app.db --user-id 42 --account-ids 7,8
  userbackup restore backups/42/2026-01-02/03-04-05.json.enc
  userbackup delete -c main=mysql://user:pass@db/app --user-id 42 --dry-run
")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Export a user's rows to a backup artifact
    Backup(BackupArgs),
    /// Decode a backup artifact back to JSON
    Restore(RestoreArgs),
    /// Delete a user's rows
    Delete(DeleteArgs),
}

/// Databases to sweep and the tables to leave alone.
#[derive(Args)]
pub struct SourceArgs {
    /// Named connections
    #[arg(
        short,
        long = "connection",
        value_name = "NAME=URL",
        env = "USERBACKUP_CONNECTIONS",
        value_delimiter = ',',
        required = true,
        help = "Database connection as name=url (repeatable, credentials are redacted in logs)"
    )]
    pub connections: Vec<ConnectionSpec>,

    /// Tenant namespace for textual user ids
    #[arg(long, env = "USERBACKUP_NAMESPACE", help = "Prefix applied to textual user_id values")]
    pub namespace: Option<String>,

    /// Tables never read or deleted
    #[arg(
        long = "ignore-table",
        value_name = "TABLE",
        env = "USERBACKUP_IGNORE_TABLES",
        value_delimiter = ',',
        help = "Table to skip on every connection (repeatable)"
    )]
    pub ignore_tables: Vec<String>,
}

impl SourceArgs {
    fn apply(&self, config: BackupConfig) -> BackupConfig {
        let config = config.with_ignored_tables(self.ignore_tables.clone());
        match &self.namespace {
            Some(namespace) => config.with_namespace(namespace.clone()),
            None => config,
        }
    }

    async fn connect(&self) -> Result<Arc<StaticCatalog>> {
        info!("Connecting to {} database(s)", self.connections.len());
        let catalog = StaticCatalog::connect(&self.connections).await.map_err(|e| {
            error!("Failed to connect: {}", e);
            e
        })?;
        Ok(Arc::new(catalog))
    }
}

#[derive(Args)]
pub struct IdentityArgs {
    #[arg(short, long, help = "Numeric user id")]
    pub user_id: i64,

    #[arg(long, value_delimiter = ',', help = "Account ids owned by the user")]
    pub account_ids: Vec<i64>,

    #[arg(long, value_delimiter = ',', help = "Active ids owned by the user")]
    pub active_ids: Vec<i64>,
}

impl IdentityArgs {
    fn identity(&self) -> UserIdentity {
        UserIdentity::new(self.user_id)
            .with_accounts(self.account_ids.clone())
            .with_actives(self.active_ids.clone())
    }
}

#[derive(Args)]
pub struct BackupArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub identity: IdentityArgs,

    #[arg(
        short,
        long,
        env = "USERBACKUP_OUTPUT_DIR",
        default_value = "backups",
        help = "Base directory for artifacts"
    )]
    pub output_dir: PathBuf,

    #[arg(long, help = "Write plain JSON instead of an encrypted artifact")]
    pub no_encrypt: bool,

    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE, help = "Rows fetched per query")]
    pub page_size: usize,

    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, help = "Plaintext bytes per encrypted chunk")]
    pub chunk_size: usize,
}

#[derive(Args)]
pub struct RestoreArgs {
    #[arg(help = "Backup artifact (.json or .json.enc)")]
    pub input: PathBuf,

    #[arg(short, long, help = "Write decoded JSON here instead of stdout")]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub identity: IdentityArgs,

    #[arg(long, default_value_t = DEFAULT_DELETE_BATCH_SIZE, help = "Values per DELETE statement")]
    pub batch_size: usize,

    #[arg(long, help = "Show affected tables without deleting")]
    pub dry_run: bool,

    #[arg(long, help = "Confirm the deletion")]
    pub yes: bool,
}

#[derive(Args)]
pub struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv)"
    )]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true, help = "Suppress all output except errors")]
    pub quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.global.verbose, cli.global.quiet)?;

    match &cli.command {
        Command::Backup(args) => run_backup(args).await,
        Command::Restore(args) => run_restore(args).await,
        Command::Delete(args) => run_delete(args).await,
    }
}

async fn run_backup(args: &BackupArgs) -> Result<()> {
    let config = args
        .source
        .apply(BackupConfig::new(&args.output_dir))
        .with_encryption(!args.no_encrypt)
        .with_page_size(args.page_size)
        .with_chunk_size(args.chunk_size);
    config.validate()?;

    // ask for the password before any database work
    let encryptor = if config.encrypt {
        Some(credentials::encryptor(
            SecretSource::from_env(),
            PromptMode::Create,
            config.chunk_size,
        )?)
    } else {
        None
    };

    let catalog = args.source.connect().await?;
    let mut service = UserBackupService::new(catalog, config)?;
    let summary = service
        .save_backup_to_file(&args.identity.identity(), encryptor.as_ref())
        .await
        .map_err(|e| {
            error!("Backup failed: {}", e);
            e
        })?;

    print!("{}", output::render_backup_summary(&summary));
    Ok(())
}

async fn run_restore(args: &RestoreArgs) -> Result<()> {
    let encryptor = if is_encrypted_path(&args.input) {
        Some(credentials::encryptor(
            SecretSource::from_env(),
            PromptMode::Unlock,
            DEFAULT_CHUNK_SIZE,
        )?)
    } else {
        None
    };

    info!("Reading backup from {}", args.input.display());
    let document = load_backup(&args.input, encryptor.as_ref())
        .await
        .map_err(|e| {
            error!("Failed to read backup: {}", e);
            e
        })?;

    output::write_document(&document, args.output.as_deref()).await
}

async fn run_delete(args: &DeleteArgs) -> Result<()> {
    if !args.dry_run && !args.yes {
        return Err(UserBackupError::configuration(
            "Refusing to delete without --yes (use --dry-run to preview)",
        ));
    }

    let config = args
        .source
        .apply(BackupConfig::default())
        .with_delete_batch_size(args.batch_size);
    let identity = args.identity.identity();
    let catalog = args.source.connect().await?;

    if args.dry_run {
        let mut service = UserBackupService::new(catalog, config.with_encryption(false))?;
        let (_, report) = service.fetch_all_user_data(&identity).await?;
        print!("{}", output::render_deletion_plan(&report));
        return Ok(());
    }

    let engine = DeletionEngine::new(catalog, &config)?;
    let report = engine
        .delete_user_data(&identity, &[])
        .await
        .map_err(|e| {
            error!("Deletion failed: {}", e);
            e
        })?;

    print!("{}", output::render_deletion_report(&report));
    Ok(())
}
