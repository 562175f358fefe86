//! hybrid-retrieval: index and query a hybrid BM25 + vector corpus

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use hybrid_retrieval::config::{Config, DistanceMetric, FusionMethod, LogFormat, LoggingConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hybrid-retrieval")]
#[command(about = "Hybrid BM25 + vector retrieval with rank fusion")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "hybrid-retrieval.toml")]
    config: PathBuf,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Which sources answer a search
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SearchMode {
    Hybrid,
    Bm25,
    Vector,
}

#[derive(Subcommand)]
enum Commands {
    /// Index chunks from a JSONL file (one {"chunk_id", "content", ...} per line)
    Index {
        /// Path to the JSONL file
        path: PathBuf,

        /// Chunks embedded and written per batch
        #[arg(short, long, default_value = "64")]
        batch_size: usize,
    },

    /// Search the index
    Search {
        /// Search query
        query: String,

        /// Number of results
        #[arg(short, long, default_value = "5")]
        top_k: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Retrieval sources to use
        #[arg(short, long, value_enum, default_value = "hybrid")]
        mode: SearchMode,

        /// Minimum vector similarity (omit to disable)
        #[arg(long)]
        threshold: Option<f32>,

        /// Override the configured fusion method (rrf, weighted)
        #[arg(long)]
        fusion: Option<FusionMethod>,
    },

    /// Show index and cache statistics
    Stats,

    /// Check that the vector collection is reachable
    Health,

    /// Write a default configuration file
    Init {
        /// Output directory
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Vector distance metric (cosine, euclid, dot)
        #[arg(long, default_value = "cosine")]
        distance: DistanceMetric,
    },
}

fn init_logging(logging: &LoggingConfig, verbose: u8) -> Result<()> {
    let level = logging.level.more_verbose(verbose);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(logging.filter_directive(level)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Text => builder.try_init(),
    }
    .map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {}", e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        Config::default()
    };

    init_logging(&config.logging, cli.verbose)?;

    match cli.command {
        Commands::Index { path, batch_size } => commands::index_file(config, path, batch_size).await,
        Commands::Search {
            query,
            top_k,
            format,
            mode,
            threshold,
            fusion,
        } => {
            let mut config = config;
            if let Some(method) = fusion {
                config.hybrid.fusion_method = method;
            }
            commands::search(config, query, top_k, format, mode, threshold).await
        }
        Commands::Stats => commands::show_stats(config).await,
        Commands::Health => commands::health(config).await,
        Commands::Init { path, distance } => commands::init_config(path, distance),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_fusion_flag() {
        let cli = Cli::try_parse_from(["hybrid-retrieval", "search", "违约金", "--fusion", "Weighted"]).unwrap();
        match cli.command {
            Commands::Search { fusion, .. } => assert_eq!(fusion, Some(FusionMethod::Weighted)),
            _ => panic!("expected search"),
        }
        assert!(Cli::try_parse_from(["hybrid-retrieval", "search", "q", "--fusion", "borda"]).is_err());
    }

    #[test]
    fn test_init_distance_flag() {
        let cli = Cli::try_parse_from(["hybrid-retrieval", "init", "--distance", "euclid"]).unwrap();
        match cli.command {
            Commands::Init { distance, .. } => assert_eq!(distance, DistanceMetric::Euclid),
            _ => panic!("expected init"),
        }
        assert!(Cli::try_parse_from(["hybrid-retrieval", "init", "--distance", "manhattan"]).is_err());
    }
}
