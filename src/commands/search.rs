use crate::SearchMode;
use anyhow::Result;
use hybrid_retrieval::{
    config::Config,
    types::{RetrievalConfig, RetrievalMethod, RetrievedChunk},
    util::truncate_str,
    RetrievalStack,
};
use tracing::info;

pub async fn search(
    config: Config,
    query: String,
    top_k: usize,
    format: String,
    mode: SearchMode,
    threshold: Option<f32>,
) -> Result<()> {
    info!("Searching ({:?}) for: {}", mode, query);

    let stack = RetrievalStack::open(&config).await?;
    let retrieval_config = RetrievalConfig::new(top_k).with_score_threshold(threshold);

    let results = match mode {
        SearchMode::Hybrid => stack.retriever.retrieve(&query, &retrieval_config).await?,
        SearchMode::Vector => stack.pipeline.retrieve(&query, &retrieval_config).await?,
        SearchMode::Bm25 => stack
            .bm25
            .search(&query, top_k)
            .into_iter()
            .map(|hit| {
                let mut chunk = RetrievedChunk::new(hit.id.clone(), hit.id, hit.content, hit.score)
                    .with_metadata(hit.metadata);
                if let Some(serde_json::Value::String(doc)) = chunk.metadata.get("document_id") {
                    chunk.document_id = doc.clone();
                }
                chunk.matched_by = vec![RetrievalMethod::Bm25];
                chunk
            })
            .collect(),
    };

    output_results(&results, &format);
    Ok(())
}

fn output_results(results: &[RetrievedChunk], format: &str) {
    match format {
        "json" | "json-pretty" => match serde_json::to_string_pretty(results) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to serialize results: {}", e),
        },
        _ => {
            println!("\nSearch Results ({}):\n", results.len());
            for (i, chunk) in results.iter().enumerate() {
                match chunk.rerank_score {
                    Some(rerank) => println!(
                        "{}. [Score: {:.4}, Rerank: {:.4}] {}",
                        i + 1,
                        chunk.score,
                        rerank,
                        chunk.chunk_id
                    ),
                    None => println!("{}. [Score: {:.4}] {}", i + 1, chunk.score, chunk.chunk_id),
                }
                println!("   Document: {}", chunk.document_id);
                println!("   {}", truncate_str(&chunk.content, 200));
                if !chunk.matched_by.is_empty() {
                    let methods: Vec<String> = chunk.matched_by.iter().map(|m| m.to_string()).collect();
                    println!("   Matched by: {}", methods.join(", "));
                }
                println!();
            }
        }
    }
}
