//! # Context Store CLI (`ctxs`)
//!
//! Commands for inserting context records, searching them, and managing
//! stories in a local data directory.
//!
//! ## Usage
//!
//! ```bash
//! ctxs --config ./config/ctxs.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ctxs insert <partition>` | Insert one context record |
//! | `ctxs import <partition> <file>` | Split a requirements document into sections and insert them |
//! | `ctxs image <partition> <path>` | Insert an image caption record |
//! | `ctxs list <partition>` | Print a partition's records as JSON |
//! | `ctxs search "<query>"` | Similarity search across all partitions |
//! | `ctxs reindex` | Re-embed every record with the configured provider |
//! | `ctxs story add/list/update/publish` | Manage stories |
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`
//! (default `warn`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use context_store::config::{self, Config};
use context_store::logging::init_tracing;
use context_store::Workspace;
use context_store_core::ingest::{section_records, split_sections};
use context_store_core::models::{ContextKind, NewContext, NewStory};
use serde_json::{Map, Value};

/// Context Store CLI: partitioned context records with embedding-based
/// retrieval and a story ledger.
#[derive(Parser)]
#[command(
    name = "ctxs",
    about = "Context Store: partitioned context records with embedding-based retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/ctxs.toml`. A missing file at the default
    /// location falls back to built-in defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

const DEFAULT_CONFIG: &str = "./config/ctxs.toml";

#[derive(Subcommand)]
enum Commands {
    /// Insert one context record.
    Insert {
        /// Partition (project) key.
        partition: String,
        #[arg(long)]
        summary: String,
        #[arg(long, default_value = "")]
        body: String,
        /// `text`, `jira_issue`, `confluence_page`, or `image`.
        #[arg(long, default_value = "text")]
        kind: ContextKind,
        /// Metadata as `key=value` pairs.
        #[arg(long = "meta", value_parser = parse_key_val)]
        meta: Vec<(String, String)>,
    },

    /// Split a plain-text requirements document into sections and insert
    /// one record per section.
    Import {
        partition: String,
        file: PathBuf,
    },

    /// Insert an image caption record.
    Image {
        partition: String,
        path: String,
        #[arg(long)]
        description: String,
    },

    /// Print a partition's records as JSON.
    List { partition: String },

    /// Similarity search across all partitions.
    Search {
        query: String,
        /// Maximum number of results (default from `[retrieval].top_k`).
        #[arg(long)]
        top_k: Option<i64>,
        /// Minimum cosine similarity in [0, 1] (default from config).
        #[arg(long)]
        threshold: Option<f32>,
        /// Print hits as JSON instead of one line per hit.
        #[arg(long)]
        json: bool,
    },

    /// Re-embed every record with the configured provider.
    ///
    /// Use after changing the embedding model.
    Reindex,

    /// Manage stories.
    Story {
        #[command(subcommand)]
        action: StoryAction,
    },
}

#[derive(Subcommand)]
enum StoryAction {
    /// Add a story and print it.
    Add {
        partition: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Use this id instead of a generated UUID.
        #[arg(long)]
        id: Option<String>,
    },
    /// Print a partition's stories as JSON.
    List { partition: String },
    /// Merge fields into a story. Values are parsed as JSON, falling back
    /// to plain strings.
    ///
    /// `title` and `description` must be strings and `published` a
    /// boolean, otherwise the whole update is rejected: `--set title=7`
    /// fails, `--set 'title="7"'` works. Other keys are stored as given.
    Update {
        partition: String,
        id: String,
        #[arg(long = "set", value_parser = parse_key_val, required = true)]
        fields: Vec<(String, String)>,
    },
    /// Mark a story as published.
    Publish { partition: String, id: String },
}

/// Parse a `key=value` pair.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn parse_field_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn load(path: &Path) -> Result<Config> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG) {
        tracing::debug!("no config file at default location, using defaults");
        return Ok(Config::default());
    }
    config::load_config(path)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let cfg = load(&cli.config)?;
    let ws = Workspace::from_config(&cfg)?;

    match cli.command {
        Commands::Insert {
            partition,
            summary,
            body,
            kind,
            meta,
        } => {
            let new = NewContext {
                partition_key: partition,
                summary,
                body,
                kind,
                metadata: meta.into_iter().collect::<BTreeMap<_, _>>(),
            };
            let record = ws.insert_context(new)?;
            print_json(&record)?;
        }
        Commands::Import { partition, file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let sections = split_sections(&text);
            let inserted = ws.insert_contexts(section_records(&partition, &sections))?;
            println!(
                "Imported {} sections into '{}'.",
                inserted.len(),
                partition
            );
            for section in &sections {
                println!("  {}", section.title);
            }
        }
        Commands::Image {
            partition,
            path,
            description,
        } => {
            let record = ws.insert_image_context(&partition, &path, &description)?;
            print_json(&record)?;
        }
        Commands::List { partition } => {
            print_json(&ws.get_contexts(&partition))?;
        }
        Commands::Search {
            query,
            top_k,
            threshold,
            json,
        } => {
            let top_k = top_k.unwrap_or(cfg.retrieval.top_k);
            let threshold = threshold.unwrap_or(cfg.retrieval.similarity_threshold);
            let hits = ws.search_context(&query, top_k, threshold)?;

            if json {
                print_json(&hits)?;
            } else if hits.is_empty() {
                println!("No results.");
            } else {
                for hit in &hits {
                    println!(
                        "{:.4}  [{}] {}",
                        hit.score, hit.record.partition_key, hit.record.summary
                    );
                }
            }
        }
        Commands::Reindex => {
            let n = ws.reindex()?;
            println!(
                "Re-embedded {} records with {}.",
                n,
                ws.provider().model_name()
            );
        }
        Commands::Story { action } => match action {
            StoryAction::Add {
                partition,
                title,
                description,
                id,
            } => {
                let story = ws.add_story(
                    &partition,
                    NewStory {
                        id,
                        ..NewStory::titled(title).with_description(description)
                    },
                )?;
                print_json(&story)?;
            }
            StoryAction::List { partition } => {
                print_json(&ws.list_stories(&partition))?;
            }
            StoryAction::Update {
                partition,
                id,
                fields,
            } => {
                let patch: Map<String, Value> = fields
                    .into_iter()
                    .map(|(k, v)| (k, parse_field_value(&v)))
                    .collect();
                if ws.update_story(&partition, &id, &patch)? {
                    println!("Updated story {}.", id);
                } else {
                    println!("No story {} in '{}'.", id, partition);
                }
            }
            StoryAction::Publish { partition, id } => {
                if ws.mark_published(&partition, &id)? {
                    println!("Published story {}.", id);
                } else {
                    println!("No story {} in '{}'.", id, partition);
                }
            }
        },
    }

    Ok(())
}
