//! Hybrid search with optional reranking and a score cut-off

use crate::config::RetrievalConfig;
use crate::error::Result;
use crate::providers::{Reranker, SearchMode, VectorStore};
use crate::types::RetrievalDocument;

/// Documents relevant to `question`, best first
///
/// Fetches `top_k` hybrid candidates, reranks them when a reranker is given
/// and enabled, keeps the best `top_r` and drops those scoring below
/// `score_threshold`.
pub async fn search_only(
    store: &dyn VectorStore,
    reranker: Option<&dyn Reranker>,
    question: &str,
    config: &RetrievalConfig,
) -> Result<Vec<RetrievalDocument>> {
    let hits = store.search(question, SearchMode::Hybrid, config.top_k).await?;
    tracing::debug!("{} returned {} candidates", store.name(), hits.len());

    let ranked: Vec<(RetrievalDocument, f32)> = match reranker.filter(|_| config.use_reranker) {
        Some(reranker) => {
            let candidates: Vec<RetrievalDocument> = hits.into_iter().map(|hit| hit.document).collect();
            let scores = reranker.rerank(question, &candidates).await?;
            let mut documents: Vec<Option<RetrievalDocument>> = candidates.into_iter().map(Some).collect();

            scores
                .into_iter()
                .filter_map(|(index, score)| match documents.get_mut(index).and_then(Option::take) {
                    Some(document) => Some((document, score)),
                    None => {
                        tracing::warn!("{} returned unknown candidate {}", reranker.name(), index);
                        None
                    }
                })
                .take(config.top_r)
                .collect()
        }
        None => hits
            .into_iter()
            .take(config.top_r)
            .map(|hit| (hit.document, hit.score))
            .collect(),
    };

    tracing::debug!(
        "Ranked scores: {:?}, threshold {}",
        ranked.iter().map(|(_, score)| *score).collect::<Vec<_>>(),
        config.score_threshold
    );

    Ok(ranked
        .into_iter()
        .filter(|(_, score)| *score >= config.score_threshold)
        .map(|(document, _)| document)
        .collect())
}

/// Empty the store's index
pub async fn reset_store(store: &dyn VectorStore) -> Result<()> {
    store.reset().await?;
    tracing::info!("{} index reset", store.name());
    Ok(())
}
