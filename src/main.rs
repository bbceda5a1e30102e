//! `ipr` — the IP Retrieve command-line interface.
//!
//! Three subcommands mirror §6's CLI surface: `load` validates a corpus and
//! reports its fingerprint, `query` runs one end-to-end `process_query` and
//! prints the answer envelope as JSON, `serve` starts the HTTP server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use ip_retrieve::bm25::Bm25Index;
use ip_retrieve::cache::ResultCache;
use ip_retrieve::chunk_store::ChunkStore;
use ip_retrieve::composer::{Composer, HttpComposer, NullComposer};
use ip_retrieve::config::{self, Config};
use ip_retrieve::dense::{DenseIndex, Filters};
use ip_retrieve::encoders::{CrossEncoder, HttpCrossEncoder, HttpQueryEncoder, NullEncoder, NullReranker, QueryEncoder};
use ip_retrieve::orchestrator::{QueryOrchestrator, QueryRequest};
use ip_retrieve::retriever::HybridRetriever;
use ip_retrieve::types::AuthorityTier;

#[derive(Parser)]
#[command(name = "ipr", about = "IP Retrieve — hybrid retrieval engine for interventional-pulmonology literature", version)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/ipr.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the in-memory indices from a corpus and report the index fingerprint
    Load {
        /// Overrides `[corpus].path` from the config file
        #[arg(long)]
        chunks: Option<PathBuf>,

        /// Overrides `[corpus].embeddings_path`
        #[arg(long)]
        embeddings: Option<PathBuf>,
    },

    /// Run one query end-to-end and print the answer envelope as JSON
    Query {
        /// The query text
        query: String,

        /// Overrides `[retrieval].top_k`
        #[arg(long)]
        top_k: Option<usize>,

        /// Disables the cross-encoder reranker for this query
        #[arg(long)]
        no_reranker: bool,

        /// Repeatable `key=value` metadata filter, e.g. `--filter has_table=true`
        #[arg(long = "filter")]
        filters: Vec<String>,
    },

    /// Start the HTTP server
    Serve {
        /// Overrides `[server].host:port`, e.g. `0.0.0.0:8080`
        #[arg(long)]
        bind: Option<String>,
    },
}

/// Parses `--filter key=value` pairs into a [`Filters`] struct. Unknown keys
/// are rejected; malformed `bool` values fail fast with a descriptive error.
fn parse_filters(pairs: &[String]) -> anyhow::Result<Filters> {
    let mut filters = Filters::default();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("malformed --filter '{pair}', expected key=value"))?;
        match key {
            "authority_tier" => filters.authority_tier = Some(value.parse::<AuthorityTier>().unwrap()),
            "has_table" => filters.has_table = Some(value.parse()?),
            "has_contraindication" => filters.has_contraindication = Some(value.parse()?),
            "has_dose_setting" => filters.has_dose_setting = Some(value.parse()?),
            other => anyhow::bail!("unknown filter key '{other}'"),
        }
    }
    Ok(filters)
}

fn load_store(config: &Config, chunks_override: Option<&PathBuf>) -> anyhow::Result<ChunkStore> {
    let path = chunks_override.unwrap_or(&config.corpus.path);
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read corpus file {path:?}: {e}"))?;
    Ok(ChunkStore::load(&raw)?)
}

/// Parses a whitespace/newline-delimited JSONL file of flat `f32` arrays
/// into the row-major matrix [`DenseIndex::from_rows`] expects.
fn load_embeddings(path: &PathBuf, dims: usize) -> anyhow::Result<Vec<f32>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read embeddings file {path:?}: {e}"))?;
    let mut out = Vec::new();
    for (line_no, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let row: Vec<f32> = serde_json::from_str(line)
            .map_err(|e| anyhow::anyhow!("malformed embedding row on line {}: {e}", line_no + 1))?;
        if row.len() != dims {
            anyhow::bail!("embedding row {} has {} dims, expected {dims}", line_no + 1, row.len());
        }
        out.extend(row);
    }
    Ok(out)
}

fn build_encoder(config: &Config) -> Arc<dyn QueryEncoder> {
    match (&config.encoder.enabled, &config.encoder.endpoint) {
        (true, Some(endpoint)) => Arc::new(HttpQueryEncoder::new(
            endpoint.clone(),
            config.encoder.dims,
            Duration::from_secs(10),
            config.encoder.max_retries,
        )),
        _ => Arc::new(NullEncoder::new(config.encoder.dims)),
    }
}

fn build_reranker(config: &Config) -> Arc<dyn CrossEncoder> {
    match (&config.reranker.enabled, &config.reranker.endpoint) {
        (true, Some(endpoint)) => {
            Arc::new(HttpCrossEncoder::new(endpoint.clone(), Duration::from_secs(10), 3))
        }
        _ => Arc::new(NullReranker),
    }
}

fn build_composer(config: &Config) -> Arc<dyn Composer> {
    match (&config.composer.enabled, &config.composer.endpoint) {
        (true, Some(endpoint)) => {
            Arc::new(HttpComposer::new(endpoint.clone(), Duration::from_secs(30)))
        }
        _ => Arc::new(NullComposer),
    }
}

/// Builds the full engine (store, retriever, orchestrator) from a loaded
/// configuration, sharing the composition root across `query` and `serve`.
fn build_engine(
    config: Arc<Config>,
    chunks_override: Option<&PathBuf>,
    embeddings_override: Option<&PathBuf>,
) -> anyhow::Result<(Arc<ChunkStore>, Arc<QueryOrchestrator>)> {
    let store = Arc::new(load_store(&config, chunks_override)?);
    let bm25 = Arc::new(Bm25Index::build(&store, config.retrieval.bm25_k1, config.retrieval.bm25_b));

    let embeddings_path = embeddings_override.or(config.corpus.embeddings_path.as_ref());
    let dense = match (embeddings_path, config.corpus.embedding_dims) {
        (Some(path), Some(dims)) => {
            let rows = load_embeddings(path, dims)?;
            let index = DenseIndex::from_rows(rows, dims)?;
            index.validate_against(&store)?;
            Some(Arc::new(index))
        }
        _ => {
            tracing::warn!("no embeddings configured; dense retrieval will be skipped");
            None
        }
    };

    let encoder = build_encoder(&config);
    let reranker = build_reranker(&config);
    let composer = build_composer(&config);

    let retriever = Arc::new(HybridRetriever::new(
        store.clone(),
        bm25,
        dense,
        encoder,
        reranker,
        config.reranker.max_concurrency,
    ));

    let cache = Arc::new(ResultCache::new(config.cache.capacity, Duration::from_secs(config.cache.ttl_secs)));

    let orchestrator =
        Arc::new(QueryOrchestrator::new(store.clone(), retriever, composer, cache, config));

    Ok((store, orchestrator))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let config = match config::load_config(&cli.config) {
        Ok(config) => config,
        Err(ip_retrieve::errors::IpRetrieveError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = ?cli.config, "no config file found; using defaults");
            Config::default()
        }
        Err(e) => return Err(e.into()),
    };
    let config = Arc::new(config);

    match cli.command {
        Commands::Load { chunks, embeddings } => {
            let (store, _orchestrator) = build_engine(config, chunks.as_ref(), embeddings.as_ref())?;
            println!("loaded {} chunks", store.len());
            println!("index_fingerprint: {}", store.index_fingerprint());
        }
        Commands::Query { query, top_k, no_reranker, filters } => {
            let (_store, orchestrator) = build_engine(config.clone(), None, None)?;
            let request = QueryRequest {
                query,
                top_k,
                use_reranker: if no_reranker { Some(false) } else { None },
                filters: parse_filters(&filters)?,
                model_hint: None,
            };
            let envelope = orchestrator.process_query(request).await;
            println!("{}", serde_json::to_string_pretty(&envelope)?);
        }
        Commands::Serve { bind } => {
            let mut config = (*config).clone();
            if let Some(bind) = bind {
                let (host, port) = bind
                    .rsplit_once(':')
                    .ok_or_else(|| anyhow::anyhow!("--bind must be host:port"))?;
                config.server.host = host.to_string();
                config.server.port = port.parse()?;
            }
            let config = Arc::new(config);
            let (store, orchestrator) = build_engine(config.clone(), None, None)?;
            ip_retrieve::server::run_server(&config, orchestrator, store).await?;
        }
    }

    Ok(())
}
