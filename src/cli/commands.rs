//! CLI command implementations
//!
//! Thin wrappers around the library: each command opens the store, runs one
//! operation and prints a JSON summary (or the exported document) to stdout.
//! Import is the one command that owns a transaction: the document, schema
//! projection and token rows either all land or none do.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::rc::Rc;

use serde_json::json;

use crate::collection::TokenCollection;
use crate::document::{Document, ImportOptions, ImportReport};
use crate::export::{CsvSink, JsonSink};
use crate::store::StoreSession;
use crate::users::{self, Role};

use super::args::{Cli, Command, FormatArg};
use super::errors::{CliError, CliResult};

pub fn run_command(cli: Cli) -> CliResult<()> {
    let store = Rc::new(StoreSession::open(&cli.db)?);
    match cli.command {
        Command::Import {
            file,
            schema,
            name,
            user,
            save_dir,
            strategy,
            limit,
            skip_broken,
        } => {
            let name = name.unwrap_or_else(|| {
                file.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "document".to_string())
            });
            let opts = ImportOptions {
                limit,
                skip_broken,
                strategy: strategy.map(Into::into),
            };
            let report = import(store, &file, &schema, &name, &user, &save_dir, &opts)?;
            println!(
                "{}",
                json!({
                    "documentId": report.document_id,
                    "processed": report.processed,
                    "skipped": report.skipped,
                })
            );
            Ok(())
        }

        Command::Export {
            document_id,
            mode,
            output,
            strategy,
        } => {
            let mut doc = Document::load(store, document_id)?;
            doc.set_strategy(strategy.map(Into::into));
            if let Some(text) = doc.export(mode.into(), output.as_deref())? {
                print!("{text}");
            }
            Ok(())
        }

        Command::ExportTable {
            document_id,
            format,
            audit,
            output,
        } => {
            let doc = Document::load(store, document_id)?;
            let out = open_output(output.as_deref())?;
            match format {
                FormatArg::Csv => doc.export_table(&mut CsvSink::new(out), audit)?,
                FormatArg::Json => doc.export_table(&mut JsonSink::new(out), audit)?,
            }
            Ok(())
        }

        Command::List {
            document_id,
            user,
            filters,
            sorting,
            token_id,
            page_size,
            offset,
        } => {
            let mut collection = TokenCollection::new(store, document_id, &user)?;
            apply_filters(&mut collection, &filters)?;
            collection.set_sorting(sorting);
            collection.set_token_id_filter(token_id);
            let page = collection.page(page_size, offset)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "total": page.total,
                    "rows": page.rows,
                }))?
            );
            Ok(())
        }

        Command::Stats {
            document_id,
            property,
            user,
            filters,
        } => {
            let mut collection = TokenCollection::new(store, document_id, &user)?;
            apply_filters(&mut collection, &filters)?;
            let stats: Vec<_> = collection
                .stats(&property)?
                .into_iter()
                .map(|s| json!({"value": s.value, "count": s.count}))
                .collect();
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }

        Command::Delete { document_id } => {
            Document::delete(&store, document_id)?;
            Ok(())
        }

        Command::SetRole {
            document_id,
            user,
            role,
        } => {
            users::set_role(&store, document_id, &user, Role::parse(&role)?)?;
            Ok(())
        }

        Command::Users { document_id } => {
            let listed: Vec<_> = users::list(&store, document_id)?
                .into_iter()
                .map(|u| json!({"userId": u.user_id, "role": u.role.as_str(), "name": u.name}))
                .collect();
            println!("{}", serde_json::to_string_pretty(&listed)?);
            Ok(())
        }
    }
}

/// Transactional import: rolls the store back when decomposition fails
/// part-way through.
pub fn import(
    store: Rc<StoreSession>,
    file: &Path,
    schema: &Path,
    name: &str,
    user: &str,
    save_dir: &Path,
    opts: &ImportOptions,
) -> CliResult<ImportReport> {
    store.begin()?;
    match Document::import(store.clone(), file, schema, name, user, save_dir, opts) {
        Ok((_, report)) => {
            store.commit()?;
            Ok(report)
        }
        Err(e) => {
            store.rollback()?;
            Err(e.into())
        }
    }
}

fn apply_filters(collection: &mut TokenCollection, filters: &[String]) -> CliResult<()> {
    for filter in filters {
        let (name, pattern) = filter
            .split_once('=')
            .ok_or_else(|| CliError::InvalidFilter(filter.clone()))?;
        collection.add_filter(name, pattern);
    }
    Ok(())
}

fn open_output(path: Option<&Path>) -> CliResult<Box<dyn Write>> {
    Ok(match path {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(std::io::stdout()),
    })
}
