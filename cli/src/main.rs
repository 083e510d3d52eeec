//! Lineage CLI.
//!
//! ```text
//! lineage check [schema]              validate a schema, list activities and entities
//! lineage hash <path> [--index name]  identity of a file or file collection
//! lineage graph <log> [--pretty]      reassemble a provenance log into a PROV graph
//! ```
//!
//! Diagnostics go to stderr (or `--log-file`), results to stdout.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write, stdout};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use lineage_config::{EntityKind, EntitySpec, Schema, default_schema_path};
use lineage_core::{EntityIdentity, ProvenanceGraph};
use lineage_types::Value;

#[derive(Parser)]
#[command(name = "lineage")]
#[command(about = "Schema-driven provenance capture tools")]
struct Cli {
    /// Append diagnostics to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a schema (default: $LINEAGE_SCHEMA or the config dir)
    Check {
        schema: Option<PathBuf>,
    },
    /// Print the content identity of a file or directory
    Hash {
        path: String,
        /// Index file hashed in place of a directory
        #[arg(long)]
        index: Option<String>,
    },
    /// Reassemble a provenance log into PROV-style JSON
    Graph {
        log: PathBuf,
        #[arg(long)]
        pretty: bool,
    },
}

fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("warn"))
        .context("invalid log filter")?;

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .with(env_filter)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(env_filter)
                .init();
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref())?;

    match cli.command {
        Commands::Check { schema } => check(schema),
        Commands::Hash { path, index } => hash(&path, index),
        Commands::Graph { log, pretty } => graph(&log, pretty),
    }
}

fn check(path: Option<PathBuf>) -> Result<()> {
    let path = path
        .or_else(default_schema_path)
        .context("no schema given and no default schema found")?;
    let schema =
        Schema::load(&path).with_context(|| format!("invalid schema {}", path.display()))?;

    let mut out = stdout().lock();
    writeln!(out, "{}: ok", path.display())?;
    writeln!(out, "activities:")?;
    for activity in schema.activities() {
        writeln!(
            out,
            "  {} ({} parameters, {} usage, {} generation)",
            activity.name,
            activity.parameters.len(),
            activity.usage.len(),
            activity.generation.len()
        )?;
    }
    writeln!(out, "entities:")?;
    for entity in schema.entities() {
        writeln!(out, "  {} [{}]", entity.name, entity.kind.as_str())?;
    }
    Ok(())
}

fn hash(path: &str, index: Option<String>) -> Result<()> {
    let kind = if index.is_some() {
        EntityKind::FileCollection
    } else {
        EntityKind::File
    };
    let entity = EntitySpec {
        kind,
        index,
        ..EntitySpec::generic(kind.as_str())
    };
    let id = EntityIdentity::new()
        .compute(&Value::from(path), Some(&entity))
        .with_context(|| format!("failed to hash {path}"))?;
    writeln!(stdout().lock(), "{id}")?;
    Ok(())
}

fn graph(log: &Path, pretty: bool) -> Result<()> {
    let file = File::open(log).with_context(|| format!("failed to open {}", log.display()))?;
    let graph = ProvenanceGraph::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to read {}", log.display()))?;
    let doc = graph.to_json();
    let text = if pretty {
        serde_json::to_string_pretty(&doc)?
    } else {
        serde_json::to_string(&doc)?
    };
    writeln!(stdout().lock(), "{text}")?;
    Ok(())
}
