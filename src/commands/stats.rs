use anyhow::Result;
use hybrid_retrieval::{config::Config, RetrievalStack};
use tracing::info;

pub async fn show_stats(config: Config) -> Result<()> {
    info!("Loading index statistics...");

    let stack = RetrievalStack::open(&config).await?;
    let bm25 = stack.bm25.stats();
    let cache = stack.pipeline.cache_stats();
    let hybrid = stack.retriever.stats();

    println!("\nHybrid Retrieval Statistics:");
    println!("============================");
    println!("Store: {}", stack.store.name());
    println!("BM25 status: {}", bm25.status);
    println!("BM25 documents: {}", bm25.document_count);
    println!("BM25 vocabulary: {}", bm25.vocabulary_size);
    println!("Average document length: {:.1}", bm25.average_document_length);
    println!("Vector index: {} (collection '{}')", stack.vector_index.name(), stack.pipeline.collection());
    println!("Embedding model: {} ({} dims)", stack.cache.provider().model_name(), stack.cache.dimension());
    println!("Embedding cache: {} entries, {:.1}% hit rate", cache.size, cache.hit_rate * 100.0);
    println!(
        "Fusion: {} (vector {:.2}, bm25 {:.2}, rrf_k {})",
        hybrid.fusion_method.as_str(),
        hybrid.vector_weight,
        hybrid.bm25_weight,
        hybrid.rrf_k
    );
    println!("Reranker: {}", hybrid.reranker.as_deref().unwrap_or("disabled"));

    Ok(())
}
