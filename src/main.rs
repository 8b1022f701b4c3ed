use recollect::cli::{Cli, Commands, ConfigAction};
use recollect::config::{Config, ConfigValidator};
use recollect::embedding::{EmbeddingCache, EmbeddingProvider, FastEmbedProvider};
use recollect::error::{RecollectError, Result};
use recollect::indexing::{IndexingOrchestrator, JobTracker};
use recollect::lexical::{LexicalBackend, TantivyLexicalIndex};
use recollect::notes::FsNoteSource;
use recollect::retrieval::RetrievalEngine;
use recollect::storage::Database;
use recollect::vector::{ExactVectorBackend, HnswBackend, VectorBackend, VectorStoreFacade};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Index { notes_dir, user } => {
            cmd_index(cli.config, notes_dir, &user).await?;
        }
        Commands::Query {
            query,
            user,
            limit,
            json,
        } => {
            cmd_query(cli.config, &query, &user, limit, json).await?;
        }
        Commands::Feedback {
            log_id,
            rating,
            comment,
        } => {
            cmd_feedback(cli.config, &log_id, rating, comment.as_deref())?;
        }
        Commands::Status => {
            cmd_status(cli.config)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "recollect=debug" } else { "recollect=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

/// Load the config file, falling back to defaults when none exists yet
fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let path = match path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if path.exists() {
        Config::load(&path)
    } else {
        tracing::debug!("No config at {:?}, using defaults", path);
        let mut config = Config::default();
        config.storage.data_dir = Config::default_data_dir()?;
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        Ok(config)
    }
}

fn expand_data_dir(config: &Config) -> Result<PathBuf> {
    let dir = &config.storage.data_dir;
    if let Ok(rest) = dir.strip_prefix("~") {
        let home = dirs::home_dir()
            .ok_or_else(|| RecollectError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(rest))
    } else {
        Ok(dir.clone())
    }
}

/// Everything the indexing and query commands share
struct EngineParts {
    database: Arc<Database>,
    vector_store: Arc<VectorStoreFacade>,
    lexical: Arc<dyn LexicalBackend>,
    cache: Arc<EmbeddingCache>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
}

fn build_engine_parts(config: &Config, data_dir: &Path) -> Result<EngineParts> {
    let database = Arc::new(Database::new(&data_dir.join("recollect.db"))?);

    let embedding_provider: Arc<dyn EmbeddingProvider> = Arc::new(
        FastEmbedProvider::new(&config.embedding.model)
            .map_err(|e| RecollectError::Embedding(e.to_string()))?,
    );

    let exact = Arc::new(
        ExactVectorBackend::new(Arc::clone(&database))
            .map_err(|e| RecollectError::VectorStore(e.to_string()))?,
    );
    let hnsw = Arc::new(HnswBackend::new(
        embedding_provider.dimensions(),
        config.indexing.hnsw_ef_construction,
        config.indexing.hnsw_m,
        config.indexing.hnsw_ef_search,
    ));
    // Store of record first: staleness reads prefer the exact backend
    let backends: Vec<Arc<dyn VectorBackend>> = vec![exact, hnsw];
    let vector_store = Arc::new(VectorStoreFacade::new(
        backends,
        Duration::from_millis(config.retrieval.query_timeout_ms / 2),
    ));

    let lexical: Arc<dyn LexicalBackend> = Arc::new(
        TantivyLexicalIndex::new(data_dir.join("lexical"))
            .map_err(|e| RecollectError::Lexical(e.to_string()))?,
    );

    let cache = Arc::new(EmbeddingCache::new(config.embedding.cache_max_bytes));

    Ok(EngineParts {
        database,
        vector_store,
        lexical,
        cache,
        embedding_provider,
    })
}

async fn cmd_index(config_path: Option<PathBuf>, notes_dir: PathBuf, user: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let data_dir = expand_data_dir(&config)?;
    let parts = build_engine_parts(&config, &data_dir)?;

    let orchestrator = Arc::new(IndexingOrchestrator::new(
        Arc::new(FsNoteSource::new(notes_dir)),
        parts.database,
        parts.vector_store,
        parts.lexical,
        parts.cache,
        parts.embedding_provider,
        Arc::new(JobTracker::new()),
        config.chunking.clone(),
        config.indexing.max_concurrent_notes,
    ));

    let job_id = orchestrator.run_to_completion(user).await?;
    let job = orchestrator.tracker().get(&job_id)?;

    println!("Indexing {:?}", job.status);
    println!(
        "  notes: {}/{}  chunks: {}",
        job.processed_notes, job.total_notes, job.processed_chunks
    );
    if !job.errors.is_empty() {
        println!("  {} notes failed:", job.errors.len());
        for error in &job.errors {
            println!("    {}", error);
        }
    }

    Ok(())
}

async fn cmd_query(
    config_path: Option<PathBuf>,
    query: &str,
    user: &str,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(limit) = limit {
        config.retrieval.top_k = limit;
    }
    if config.llm.enabled {
        // Vendor completion providers are registered by embedding hosts;
        // the CLI ships without one
        tracing::warn!("llm.enabled is set but no completion provider is available in the CLI");
    }

    let data_dir = expand_data_dir(&config)?;
    let parts = build_engine_parts(&config, &data_dir)?;

    let engine = RetrievalEngine::new(
        parts.database,
        parts.vector_store,
        parts.lexical,
        parts.cache,
        parts.embedding_provider,
        None,
        config.retrieval.clone(),
    );

    let response = engine.retrieve(user, query).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response).map_err(|e| {
            RecollectError::Json {
                source: e,
                context: "query results".to_string(),
            }
        })?);
        return Ok(());
    }

    if response.chunks.is_empty() {
        println!("No results.");
    }
    for (i, chunk) in response.chunks.iter().enumerate() {
        let channels = match (chunk.sources.vector, chunk.sources.lexical) {
            (true, true) => "vector+lexical",
            (true, false) => "vector",
            (false, true) => "lexical",
            (false, false) => "-",
        };
        println!(
            "{}. [{:.4}] {} ({})",
            i + 1,
            chunk.score,
            chunk.note_id,
            channels
        );
        for line in chunk.content.lines().take(3) {
            println!("   {}", line);
        }
        println!();
    }
    println!("log id: {}", response.log_id);

    Ok(())
}

fn cmd_feedback(
    config_path: Option<PathBuf>,
    log_id: &str,
    rating: i32,
    comment: Option<&str>,
) -> Result<()> {
    if !(1..=5).contains(&rating) {
        return Err(RecollectError::Config(
            "rating must be between 1 and 5".to_string(),
        ));
    }

    let config = load_config(config_path)?;
    let data_dir = expand_data_dir(&config)?;
    let database = Database::new(&data_dir.join("recollect.db"))?;

    if database.attach_query_feedback(log_id, rating, comment)? {
        println!("Feedback recorded for {}", log_id);
    } else {
        println!("Query {} not found or already has feedback", log_id);
    }

    Ok(())
}

fn cmd_status(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let data_dir = expand_data_dir(&config)?;
    let database = Database::new(&data_dir.join("recollect.db"))?;
    let stats = database.stats()?;

    println!("Data directory: {:?}", data_dir);
    println!("  users:   {}", stats.user_count);
    println!("  notes:   {}", stats.note_count);
    println!("  chunks:  {}", stats.chunk_count);
    println!("  queries: {}", stats.query_count);

    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            let content = toml::to_string_pretty(&config)?;
            println!("{}", content);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            match Config::load(&path) {
                Ok(_) => println!("Configuration valid: {:?}", path),
                Err(e) => {
                    println!("Configuration invalid: {}", e);
                    return Err(e);
                }
            }
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };
            if path.exists() && !force {
                return Err(RecollectError::Config(format!(
                    "Config already exists at {:?} (use --force to overwrite)",
                    path
                )));
            }
            let mut config = Config::default();
            config.storage.data_dir = Config::default_data_dir()?;
            config.save(&path)?;
            println!("Wrote default configuration to {:?}", path);
        }
    }

    Ok(())
}
