//! # txnpath - Transaction-Path Model Driver
//!
//! ## Usage
//!
//! ```bash
//! # Learn one graph per procedure and write binary snapshots
//! txnpath build -c catalog.json -w traces.json -o models/ -t binary --validate
//!
//! # Summarize a snapshot
//! txnpath inspect -i models/neworder.txnp
//!
//! # Audit the graphs a workload produces without writing anything
//! txnpath validate -c catalog.json -w traces.json
//! ```
//!
//! Logging is controlled by `RUST_LOG`; `TXNPATH_LOG_FORMAT=json` switches to
//! machine-parseable output.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use txnpath::cli;

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let log_format = std::env::var("TXNPATH_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "txnpath=info,txnpath_core=info".into());

    // Logs go to stderr so stdout stays clean for --json-mode
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

    let cli = cli::Cli::parse();

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
