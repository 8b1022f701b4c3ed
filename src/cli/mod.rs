//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "recollect",
    version,
    about = "Hybrid semantic + lexical retrieval engine for personal notes",
    long_about = "Recollect chunks and embeds a folder of notes into vector and lexical \
                  indexes, keeps them fresh incrementally, and answers questions by fusing \
                  both search channels, with optional LLM query expansion and reranking."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/recollect/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index a notes directory, re-processing only changed notes
    Index {
        /// Directory containing markdown/text notes
        notes_dir: PathBuf,

        /// User the notes belong to
        #[arg(short, long, default_value = "default")]
        user: String,
    },

    /// Query indexed notes using hybrid search
    Query {
        /// Question or search query text
        query: String,

        /// User whose notes to search
        #[arg(short, long, default_value = "default")]
        user: String,

        /// Maximum number of results to return
        #[arg(short, long)]
        limit: Option<usize>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Attach feedback to a past query
    Feedback {
        /// Query log id printed by `query`
        log_id: String,

        /// Rating from 1 (useless) to 5 (exactly right)
        rating: i32,

        /// Optional free-form comment
        #[arg(short = 'm', long)]
        comment: Option<String>,
    },

    /// Show index statistics
    Status,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
