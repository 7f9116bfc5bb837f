/// Embedding wrapper around fastembed.
///
/// `TextEmbedding` from fastembed is synchronous and CPU-bound, so every call is moved to
/// `tokio::task::spawn_blocking`. The model handle is shared through an `Arc`.
///
/// nomic-embed-text-v1.5 expects task-prefixed inputs:
/// - regulation passages being indexed: "search_document: {text}"
/// - documents under review used as retrieval queries: "search_query: {text}"
use std::sync::Arc;

use crate::error::CommonError;

/// Output width of nomic-embed-text-v1.5.
pub const EMBEDDING_DIM: usize = 768;

/// Upper bound on characters passed as a retrieval query. The model truncates to its
/// context window anyway; cutting here avoids tokenizing whole contracts.
const MAX_QUERY_CHARS: usize = 8_000;

pub struct Embedder {
    model: Arc<fastembed::TextEmbedding>,
}

impl Embedder {
    /// Initialize the embedding model. Downloads the weights on first run.
    pub async fn new() -> Result<Self, CommonError> {
        let model = tokio::task::spawn_blocking(|| {
            let options = fastembed::InitOptions::new(fastembed::EmbeddingModel::NomicEmbedTextV15)
                .with_show_download_progress(false);
            fastembed::TextEmbedding::try_new(options)
        })
        .await
        .map_err(|e| CommonError::Embedding(format!("spawn_blocking join error: {e}")))?
        .map_err(|e| CommonError::Embedding(format!("model initialization failed: {e}")))?;

        Ok(Self {
            model: Arc::new(model),
        })
    }

    /// Embed knowledge-base passages for indexing.
    ///
    /// Passages go through in small batches to bound peak memory during ONNX inference.
    pub async fn embed_passages(&self, passages: &[String]) -> Result<Vec<Vec<f32>>, CommonError> {
        let prefixed: Vec<String> = passages
            .iter()
            .map(|t| format!("search_document: {t}"))
            .collect();
        let model = Arc::clone(&self.model);
        tokio::task::spawn_blocking(move || model.embed(prefixed, Some(4)))
            .await
            .map_err(|e| CommonError::Embedding(format!("spawn_blocking join error: {e}")))?
            .map_err(|e| CommonError::Embedding(format!("passage embedding failed: {e}")))
    }

    /// Embed the text of a document under review as a retrieval query.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, CommonError> {
        let prefixed = vec![format!("search_query: {}", truncate_chars(text, MAX_QUERY_CHARS))];
        let model = Arc::clone(&self.model);
        let mut results = tokio::task::spawn_blocking(move || model.embed(prefixed, None))
            .await
            .map_err(|e| CommonError::Embedding(format!("spawn_blocking join error: {e}")))?
            .map_err(|e| CommonError::Embedding(format!("query embedding failed: {e}")))?;
        results
            .pop()
            .ok_or_else(|| CommonError::Embedding("empty embedding result".to_string()))
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::truncate_chars;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }
}
