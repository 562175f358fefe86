use anyhow::{bail, Result};
use hybrid_retrieval::{config::Config, RetrievalStack};

pub async fn health(config: Config) -> Result<()> {
    let stack = RetrievalStack::open(&config).await?;
    let collection = stack.pipeline.collection().to_string();

    if stack.pipeline.health_check().await {
        println!("OK: collection '{}' on {} is reachable", collection, stack.vector_index.name());
        Ok(())
    } else {
        bail!("collection '{}' on {} is missing or unreachable", collection, stack.vector_index.name())
    }
}
