//! CLI argument definitions using clap

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::document::ExportMode;
use crate::iterator::Strategy;

/// annotok - schema-driven XML corpus tokenization and annotation
#[derive(Parser, Debug)]
#[command(name = "annotok")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the annotation store database
    #[arg(long, default_value = "./annotok.db")]
    pub db: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Import an XML document under a schema descriptor
    Import {
        /// XML document to import
        file: PathBuf,

        /// Schema descriptor file
        #[arg(long)]
        schema: PathBuf,

        /// Document display name; defaults to the file name
        #[arg(long)]
        name: Option<String>,

        /// User granted the owner role on the new document
        #[arg(long)]
        user: String,

        /// Directory receiving the stored document copy
        #[arg(long, default_value = ".")]
        save_dir: PathBuf,

        /// Pin an iterator strategy instead of negotiating one
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,

        /// Stop after this many tokens
        #[arg(long)]
        limit: Option<usize>,

        /// Skip tokens with unresolvable properties instead of failing
        #[arg(long)]
        skip_broken: bool,
    },

    /// Reconstruct a document with its annotations applied
    Export {
        document_id: i64,

        #[arg(long, value_enum, default_value_t = ModeArg::Replace)]
        mode: ModeArg,

        /// Output file; stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,

        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,
    },

    /// Export flattened token records as CSV or JSON
    ExportTable {
        document_id: i64,

        #[arg(long, value_enum, default_value_t = FormatArg::Csv)]
        format: FormatArg,

        /// Carry original values and full edit histories
        #[arg(long)]
        audit: bool,

        /// Output file; stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// List a page of token records
    List {
        document_id: i64,

        /// User whose access scopes the listing
        #[arg(long)]
        user: String,

        /// Current-value filter as name=pattern (SQL LIKE, case-insensitive)
        #[arg(long = "filter")]
        filters: Vec<String>,

        /// Sort key; prefix with '-' for descending
        #[arg(long = "sort")]
        sorting: Vec<String>,

        #[arg(long)]
        token_id: Option<i64>,

        #[arg(long)]
        page_size: Option<i64>,

        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// Current-value frequency counts for one property
    Stats {
        document_id: i64,
        property: String,

        #[arg(long)]
        user: String,

        /// Current-value filter as name=pattern
        #[arg(long = "filter")]
        filters: Vec<String>,
    },

    /// Delete a document, its annotations and its stored copy
    Delete { document_id: i64 },

    /// Grant or revoke a user's role on a document
    SetRole {
        document_id: i64,
        user: String,

        /// owner, editor, viewer or none
        role: String,
    },

    /// List users with access to a document
    Users { document_id: i64 },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum StrategyArg {
    Stream,
    Tree,
    Store,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Strategy {
        match arg {
            StrategyArg::Stream => Strategy::Stream,
            StrategyArg::Tree => Strategy::Tree,
            StrategyArg::Store => Strategy::Store,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum ModeArg {
    Replace,
    Enrich,
}

impl From<ModeArg> for ExportMode {
    fn from(arg: ModeArg) -> ExportMode {
        match arg {
            ModeArg::Replace => ExportMode::Replace,
            ModeArg::Enrich => ExportMode::Enrich,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum FormatArg {
    Csv,
    Json,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
