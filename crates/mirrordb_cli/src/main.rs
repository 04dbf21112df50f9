//! mirrordb CLI
//!
//! Command-line tools for setting up and running mirrordb replication.
//!
//! # Commands
//!
//! - `init` - Create demo tables and publish them under an address
//! - `insert` - Write one row
//! - `dump` - Show tables, rows, replication settings and peers
//! - `bootstrap` - Create a secondary that follows a primary
//! - `exchange` - Run one exchange round with a peer
//! - `snapshot` - Copy a peer's table into the local database
//! - `replicate` - Run the periodic replication loop
//! - `promote` - Turn a secondary into a new primary after failover
//! - `backup` - Whole-file copy of a database

mod commands;

use clap::{Parser, Subcommand};
use mirrordb_core::{Config, Database, Environment, Locator, OpenMode};
use mirrordb_storage::EncryptionKey;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Salt for keys derived from `--key`.
const KEY_SALT: &[u8] = b"mirrordb-cli";

/// mirrordb replication tools.
#[derive(Parser)]
#[command(name = "mirrordb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Passphrase for encrypted databases
    #[arg(global = true, short, long)]
    key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create tables and publish them under an address
    Init {
        /// Database locator (path, file:<path> or memory:<name>)
        locator: Locator,

        /// Replication address
        #[arg(short, long, default_value = "1")]
        address: u32,

        /// Comma-separated tables to create
        #[arg(short, long, value_delimiter = ',', default_value = "t1,t2")]
        tables: Vec<String>,
    },

    /// Write one row
    Insert {
        /// Database locator
        locator: Locator,
        /// Table name
        table: String,
        /// Row id
        id: i64,
        /// Row data
        data: String,
    },

    /// Show tables, rows, replication settings and peers
    Dump {
        /// Database locator
        locator: Locator,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Create a secondary that follows a primary
    Bootstrap {
        /// Primary locator
        primary: Locator,
        /// Secondary locator; must not exist
        secondary: Locator,

        /// Address for the secondary
        #[arg(long, default_value = "2")]
        secondary_address: u32,

        /// Peer name for the primary
        #[arg(long, default_value = "main")]
        peer: String,
    },

    /// Run one exchange round with a peer
    Exchange {
        /// Local database locator
        locator: Locator,
        /// Peer name
        peer: String,
    },

    /// Copy a peer's table into the local database
    Snapshot {
        /// Local database locator
        locator: Locator,
        /// Peer name
        peer: String,
        /// Table name
        table: String,
    },

    /// Run the periodic replication loop
    Replicate {
        /// Local database locator
        locator: Locator,
        /// Peer name
        peer: String,

        /// Wait between rounds
        #[arg(short, long, default_value = "1000")]
        interval_ms: u64,

        /// Stop after this long; runs until killed if omitted
        #[arg(short, long)]
        duration_ms: Option<u64>,
    },

    /// Turn a secondary into a new primary after failover
    Promote {
        /// Secondary locator
        secondary: Locator,
        /// Locator for the new primary; must not exist
        new_primary: Locator,

        /// Peer name of the lost primary
        #[arg(long, default_value = "main")]
        peer: String,
    },

    /// Whole-file copy of a database
    Backup {
        /// Source locator
        source: Locator,
        /// Destination locator
        destination: Locator,

        /// Give the copy a fresh replication identity
        #[arg(short, long)]
        reset: bool,

        /// Replace an existing destination
        #[arg(short, long)]
        overwrite: bool,
    },

    /// Show version information
    Version,
}

/// State shared by all commands of one invocation.
pub struct Context {
    /// Databases opened by this invocation.
    pub env: Environment,
    /// Key for every database touched.
    pub key: Option<EncryptionKey>,
}

impl Context {
    /// Opens an existing database.
    pub fn open(&self, locator: &Locator) -> Result<Arc<Database>, Box<dyn std::error::Error>> {
        let config = Config::new()
            .open_mode(OpenMode::OpenExisting)
            .with_optional_key(self.key.clone());
        Ok(self.env.open(locator, config)?)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let key = cli
        .key
        .as_deref()
        .map(|pass| EncryptionKey::derive_from_passphrase(pass.as_bytes(), KEY_SALT))
        .transpose()?;
    let ctx = Context {
        env: Environment::new(),
        key,
    };

    match cli.command {
        Commands::Init {
            locator,
            address,
            tables,
        } => commands::init::run(&ctx, &locator, address, &tables)?,
        Commands::Insert {
            locator,
            table,
            id,
            data,
        } => commands::insert::run(&ctx, &locator, &table, id, &data)?,
        Commands::Dump { locator, format } => commands::dump::run(&ctx, &locator, &format)?,
        Commands::Bootstrap {
            primary,
            secondary,
            secondary_address,
            peer,
        } => commands::bootstrap::run(&ctx, &primary, &secondary, secondary_address, &peer)?,
        Commands::Exchange { locator, peer } => commands::exchange::run(&ctx, &locator, &peer)?,
        Commands::Snapshot {
            locator,
            peer,
            table,
        } => commands::snapshot::run(&ctx, &locator, &peer, &table)?,
        Commands::Replicate {
            locator,
            peer,
            interval_ms,
            duration_ms,
        } => commands::replicate::run(&ctx, &locator, &peer, interval_ms, duration_ms)?,
        Commands::Promote {
            secondary,
            new_primary,
            peer,
        } => commands::promote::run(&ctx, &secondary, &new_primary, &peer)?,
        Commands::Backup {
            source,
            destination,
            reset,
            overwrite,
        } => commands::backup::run(&ctx, &source, &destination, reset, overwrite)?,
        Commands::Version => {
            println!("mirrordb CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
