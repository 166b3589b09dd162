//! # Tessera - Embedded Graph Engine
//!
//! The command line front end for a Tessera data directory.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │            apps/tessera (THE BINARY)         │
//! │                                              │
//! │   ┌─────────────┐      ┌─────────────────┐   │
//! │   │   CLI       │      │   Settings      │   │
//! │   │  (clap)     │      │   (toml)        │   │
//! │   └──────┬──────┘      └────────┬────────┘   │
//! │          └───────────┬──────────┘            │
//! │                      ▼                       │
//! │              ┌───────────────┐               │
//! │              │ tessera-core  │               │
//! │              │ (THE ENGINE)  │               │
//! │              └───────────────┘               │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! tessera --data-dir ./data init
//! tessera --data-dir ./data mutate -f people.rdf
//! tessera --data-dir ./data query -q '{ q(func: has(name)) { uid name } }'
//! tessera --data-dir ./data -n 1 schema -f schema.txt
//! ```

use clap::Parser;
use tessera::cli;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    // TESSERA_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("TESSERA_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if cli.verbose {
        "tessera=debug,tessera_core=debug"
    } else {
        "tessera=info,tessera_core=info"
    };
    let filter = EnvFilter::try_from_env("TESSERA_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
