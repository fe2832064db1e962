//! Command-line interface
//!
//! One subcommand per document operation: import, export (document or
//! table), listing, statistics, deletion and role management. Logging goes
//! to stderr, filtered by `RUST_LOG`; command output goes to stdout.

mod args;
mod commands;
mod errors;

pub use args::{Cli, Command};
pub use commands::{import, run_command};
pub use errors::{CliError, CliResult};

pub fn run() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    run_command(Cli::parse_args())
}
