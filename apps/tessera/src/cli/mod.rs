//! # Tessera CLI Module
//!
//! This module implements the CLI interface for Tessera.
//!
//! ## Available Commands
//!
//! - `init` - Initialize a data directory
//! - `status` - Show allocation watermarks and schema size
//! - `mutate` - Apply a mutation file (JSON or N-Quads)
//! - `query` - Run a read-only query
//! - `create-namespace` - Allocate a new namespace
//! - `drop-all` - Drop every namespace's data and schema
//! - `drop-data` - Drop one namespace's data, keep its schema
//! - `schema` - Show or alter a namespace's schema
//! - `load` - Bulk load a schema file and data files
//! - `lease` - Reserve a contiguous UID range

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tessera_core::{Config, TesseraError};

use crate::settings::{FileSettings, resolve};

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Tessera - embedded graph engine
///
/// Every invocation opens the data directory, runs one command and closes it.
#[derive(Parser, Debug)]
#[command(name = "tessera")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Data directory (overrides the settings file)
    #[arg(short = 'D', long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// TOML settings file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Namespace the command runs in
    #[arg(short, long, global = true, default_value = "0")]
    pub namespace: u64,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a data directory
    Init {
        /// Drop all existing data if the directory is already initialized
        #[arg(short, long)]
        force: bool,
    },

    /// Show allocation watermarks and schema size
    Status,

    /// Apply a mutation file
    Mutate {
        /// JSON mutation(s) or N-Quad text
        #[arg(short, long)]
        file: PathBuf,

        /// Treat N-Quad text as deletions
        #[arg(long)]
        delete: bool,
    },

    /// Run a read-only query
    Query {
        /// Query text
        #[arg(short, long, conflicts_with = "file")]
        query: Option<String>,

        /// File holding the query text
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Query variable, `name=value` (repeatable)
        #[arg(long = "var", value_name = "NAME=VALUE")]
        vars: Vec<String>,

        /// Read at an earlier timestamp
        #[arg(long)]
        at: Option<u64>,
    },

    /// Allocate a new namespace
    CreateNamespace,

    /// Drop the data and schema of every namespace
    DropAll,

    /// Drop the data of the selected namespace
    DropData,

    /// Show the schema, or alter it from a file
    Schema {
        /// Schema document to apply
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Apply a schema file, then load a data file or directory
    Load {
        /// Schema document applied before the data
        #[arg(short, long)]
        schema: Option<PathBuf>,

        /// Data file, or directory of .rdf/.nq/.json files
        #[arg(short, long)]
        data: PathBuf,
    },

    /// Reserve a contiguous range of UIDs
    Lease {
        /// Number of UIDs
        #[arg(short, long)]
        count: u64,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

impl Cli {
    /// Engine configuration from the settings file and flags.
    pub fn engine_config(&self) -> Result<Config, TesseraError> {
        let file = self
            .config
            .as_deref()
            .map(FileSettings::load)
            .transpose()?;
        Ok(resolve(self.data_dir.as_deref(), file.as_ref()))
    }
}

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), TesseraError> {
    let config = cli.engine_config()?;
    let json_mode = cli.json_mode;
    let ns = cli.namespace;

    match cli.command {
        Some(Commands::Init { force }) => cmd_init(config, force, json_mode).map(drop),
        Some(Commands::Status) => cmd_status(config, json_mode).map(drop),
        Some(Commands::Mutate { file, delete }) => {
            cmd_mutate(config, ns, &file, delete, json_mode).map(drop)
        }
        Some(Commands::Query {
            query,
            file,
            vars,
            at,
        }) => {
            let text = match (query, file) {
                (Some(text), _) => text,
                (None, Some(path)) => read_input(&path)?,
                (None, None) => {
                    return Err(TesseraError::InvalidArgument(
                        "query needs --query or --file".to_string(),
                    ));
                }
            };
            let vars = parse_vars(&vars)?;
            cmd_query(config, ns, &text, &vars, at, json_mode).map(drop)
        }
        Some(Commands::CreateNamespace) => cmd_create_namespace(config, json_mode).map(drop),
        Some(Commands::DropAll) => cmd_drop_all(config),
        Some(Commands::DropData) => cmd_drop_data(config, ns),
        Some(Commands::Schema { file }) => {
            cmd_schema(config, ns, file.as_deref(), json_mode).map(drop)
        }
        Some(Commands::Load { schema, data }) => {
            cmd_load(config, ns, schema.as_deref(), &data, json_mode).map(drop)
        }
        Some(Commands::Lease { count }) => cmd_lease(config, count, json_mode).map(drop),
        None => {
            // No subcommand - show status by default
            cmd_status(config, json_mode).map(drop)
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
