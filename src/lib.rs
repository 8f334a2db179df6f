//! # Context Store
//!
//! A partitioned store of context records with embedding-based retrieval,
//! plus a ledger of generated stories.
//!
//! Producers insert records (free text, Jira issues, Confluence pages,
//! image captions, requirement-document sections) under a partition key.
//! Every insert re-embeds the corpus and persists a snapshot before it
//! returns. Consumers run similarity search across all partitions.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Producers  │──▶│  Workspace   │──▶│  Snapshots   │
//! │ CLI / libs  │   │ index+ledger │   │ JSON files   │
//! └─────────────┘   └──────┬───────┘   └──────────────┘
//!                          │
//!                          ▼
//!                 ┌──────────────────┐
//!                 │ EmbeddingProvider│
//!                 │ OpenAI / local   │
//!                 └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ctxs insert AUTH --summary "Login" --body "Users sign in with SSO"
//! ctxs import AUTH ./brd.txt
//! ctxs search "single sign-on" --top-k 5
//! ctxs story add AUTH --title "Support SSO login"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`embedding`] | OpenAI and local embedding providers |
//! | [`snapshot`] | Snapshot files in the data directory |
//! | [`workspace`] | The store facade used by the CLI |
//! | [`logging`] | Tracing subscriber setup |

pub mod config;
pub mod embedding;
pub mod logging;
pub mod snapshot;
pub mod workspace;

pub use workspace::Workspace;
