//! Command-line interface definitions.

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "otosync", version, about = "Idempotent rhythm-game play-data sync")]
pub struct Args {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value = "pretty")]
    pub tracing: TracingFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TracingFormat {
    Pretty,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Exchange a one-time authorization code for an access/refresh token
    /// pair and persist it. Run once, before the first sync.
    Auth {
        #[arg(long)]
        code: String,
    },
    /// Exchange the stored refresh token for a fresh token pair.
    Refresh,
    /// Ingest the configured sources into the store.
    Sync {
        /// Sources to sync; defaults to all of them.
        #[arg(long = "source", value_enum)]
        sources: Vec<SourceName>,
        /// Run against an in-memory store instead of PostgreSQL.
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceName {
    Osu,
    Otogame,
    Dx,
}

impl SourceName {
    pub fn all() -> &'static [SourceName] {
        &[SourceName::Osu, SourceName::Otogame, SourceName::Dx]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceName::Osu => "osu",
            SourceName::Otogame => "otogame",
            SourceName::Dx => "dx",
        }
    }
}
