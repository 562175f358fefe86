use anyhow::{Context, Result};
use hybrid_retrieval::{config::Config, types::ChunkRecord, RetrievalError, RetrievalStack};
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use tracing::{info, warn};

pub async fn index_file(config: Config, path: PathBuf, batch_size: usize) -> Result<()> {
    info!("Indexing chunks from {}", path.display());

    let file = std::fs::File::open(&path).with_context(|| format!("Failed to open '{}'", path.display()))?;
    let mut chunks = Vec::new();
    let mut skipped = 0usize;
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read '{}'", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ChunkRecord>(&line) {
            Ok(chunk) if !chunk.content.trim().is_empty() => chunks.push(chunk),
            Ok(chunk) => {
                warn!("Line {}: chunk '{}' has no content, skipping", line_no + 1, chunk.chunk_id);
                skipped += 1;
            }
            Err(e) => {
                warn!("Line {}: invalid chunk record: {}", line_no + 1, e);
                skipped += 1;
            }
        }
    }

    let stack = RetrievalStack::open(&config).await?;

    let mut indexed = 0usize;
    let mut unpersisted = 0usize;
    for batch in chunks.chunks(batch_size.max(1)) {
        match stack.index_chunks(batch).await {
            Ok(count) => indexed += count,
            Err(e) if e.downcast_ref::<RetrievalError>().is_some_and(RetrievalError::is_transient) => {
                warn!("{:#}", e);
                indexed += batch.len();
                unpersisted += batch.len();
            }
            Err(e) => return Err(e),
        }
        info!("Indexed {}/{} chunks", indexed, chunks.len());
    }

    println!("Indexed {} chunks ({} skipped)", indexed, skipped);
    if unpersisted > 0 {
        println!("Warning: {} chunks were not persisted to the store", unpersisted);
    }
    println!("BM25 documents: {}", stack.bm25.len());
    Ok(())
}
