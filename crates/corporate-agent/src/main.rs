mod annotate;
mod api;
mod cache;
mod checklist;
mod config;
mod docx;
mod error;
mod extract;
mod knowledge;
mod locate;
mod model;
mod pipeline;
mod rag;
mod report;
mod server;

use std::sync::Arc;

use rmcp::{ServiceExt, transport::stdio};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use agent_common::embedding::Embedder;
use agent_common::openai::{OpenAiClient, OpenAiClientConfig};
use agent_common::redis::RedisCache;
use agent_common::vectordb::VectorDb;
use cache::ReviewCache;
use config::Config;
use knowledge::KnowledgeIndexer;
use pipeline::{PipelineSettings, ReviewPipeline};
use rag::{RagReviewer, ReviewSettings};
use server::CorporateAgentServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing to stderr (stdout is reserved for MCP JSON-RPC)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    info!("starting corporate-agent MCP server");

    // 1. Load config from environment
    let config = Config::from_env()?;
    info!(
        lancedb_path = %config.lancedb_path,
        knowledge_base = %config.knowledge_base_dir.display(),
        output_dir = %config.output_dir.display(),
        model = %config.model,
        concurrency = config.concurrency,
        redis = config.redis_url.is_some(),
        "configuration loaded"
    );

    let checklists = match &config.checklist_path {
        Some(path) => checklist::load_checklists(path)?,
        None => checklist::default_checklists(),
    };

    // 2. Connect to Redis (optional, graceful degradation if unavailable)
    let redis_cache = RedisCache::new(config.redis_url.as_deref());
    if redis_cache.is_available().await {
        info!("redis connected");
    } else {
        info!("redis unavailable, running without review cache");
    }
    let cache = Arc::new(ReviewCache::new(redis_cache));

    // 3. Initialize embedding model
    info!("initializing embedding model (may download on first run)");
    let embedder = Arc::new(Embedder::new().await?);
    info!("embedding model ready");

    // 4. Connect to LanceDB
    let vectordb = Arc::new(VectorDb::connect(&config.lancedb_path).await?);
    info!("lancedb connected");

    // 5. Build the regulation index on first run
    let indexer = Arc::new(KnowledgeIndexer::new(
        config.knowledge_base_dir.clone(),
        Arc::clone(&embedder),
        Arc::clone(&vectordb),
        Arc::clone(&cache),
    ));
    match indexer.ensure_index().await {
        Ok(Some(summary)) => info!(
            sources = summary.sources,
            chunks = summary.chunks,
            "regulation index built"
        ),
        Ok(None) => {}
        Err(e) => warn!(
            error = %e,
            "regulation index not built; use rebuild_knowledge_base once sources are in place"
        ),
    }

    // 6. Wire the reviewer and pipeline
    let llm = Arc::new(OpenAiClient::new(OpenAiClientConfig::from_env())?);
    let reviewer = RagReviewer::new(
        embedder,
        vectordb,
        llm,
        cache,
        ReviewSettings {
            model: config.model.clone(),
            temperature: config.temperature,
            top_k: config.top_k,
        },
    );
    let pipeline = Arc::new(ReviewPipeline::new(
        Arc::new(reviewer),
        checklists,
        PipelineSettings {
            concurrency: config.concurrency,
            review_timeout: config.review_timeout,
            output_dir: config.output_dir.clone(),
        },
    ));

    // 7. Build MCP server and serve on stdio
    let server = CorporateAgentServer::new(pipeline, indexer);

    info!("MCP server ready, serving on stdio");
    let service = server.serve(stdio()).await.inspect_err(|e| {
        tracing::error!(error = %e, "MCP server error");
    })?;

    service.waiting().await?;
    info!("MCP server shut down");
    Ok(())
}
