use tracing_subscriber::EnvFilter;

use nemo_rag::api;
use nemo_rag::config::Config;
use nemo_rag::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!(
        "Embeddings: {} via {} ({})",
        config.embedding.model,
        config.embedding.provider,
        config.embedding.base_url
    );
    tracing::info!("Chat model: {} ({})", config.chat.model, config.chat.base_url);

    let state = AppState::new(config.clone())?;
    {
        let sources = state.sources.read();
        tracing::info!(
            "Loaded {} sources, {} BM25 documents, {} vectors",
            sources.len(),
            state.bm25.doc_count(),
            state.vectors.entry_count()
        );
    }

    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
