/// Retrieval-augmented reviewer.
///
/// Embeds the document under review, pulls the closest regulation passages from LanceDB
/// and asks the chat model for a JSON list of issues grounded in those passages.
use std::sync::Arc;

use arrow_array::{Array, RecordBatch, StringArray};
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, info, warn};

use agent_common::embedding::Embedder;
use agent_common::openai::{ChatCompletionRequest, Message, OpenAiClient};
use agent_common::vectordb::VectorDb;

use crate::cache::{ReviewCache, ReviewKey};
use crate::error::AppError;
use crate::extract::ReviewProvider;

pub const REGULATIONS_TABLE: &str = "regulations";

const SYSTEM_PROMPT: &str = "\
You are an AI legal assistant specializing in Abu Dhabi Global Market (ADGM) regulations.

Instructions:
1. Use the provided ADGM legal context to keep your analysis accurate.
2. Identify legal red flags, missing clauses and non-compliance issues.
3. For each issue, quote the exact problematic text from the document.
4. Answer ONLY with a JSON list of objects. Do not add any text outside the JSON.

JSON format of each issue:
{
  \"section\": \"The clause or section number, e.g. 'Clause 3.1'\",
  \"offending_text\": \"The exact text from the document that contains the issue.\",
  \"issue\": \"A clear, one-sentence description of the issue.\",
  \"severity\": \"One of 'High', 'Medium' or 'Low'.\",
  \"suggestion\": \"A compliant alternative or an action to take.\",
  \"citation\": \"The specific ADGM rule that applies, based on the context.\"
}";

#[derive(Debug, Clone)]
pub struct ReviewSettings {
    pub model: String,
    pub temperature: f32,
    pub top_k: usize,
}

/// A regulation excerpt returned by retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub source: String,
    pub text: String,
}

pub struct RagReviewer {
    embedder: Arc<Embedder>,
    vectordb: Arc<VectorDb>,
    llm: Arc<OpenAiClient>,
    cache: Arc<ReviewCache>,
    settings: ReviewSettings,
}

impl RagReviewer {
    pub fn new(
        embedder: Arc<Embedder>,
        vectordb: Arc<VectorDb>,
        llm: Arc<OpenAiClient>,
        cache: Arc<ReviewCache>,
        settings: ReviewSettings,
    ) -> Self {
        Self {
            embedder,
            vectordb,
            llm,
            cache,
            settings,
        }
    }

    async fn retrieve(&self, document_text: &str) -> Result<Vec<Passage>, AppError> {
        let query = self.embedder.embed_query(document_text).await?;
        let batches = self
            .vectordb
            .search(REGULATIONS_TABLE, &query, self.settings.top_k)
            .await?;
        Ok(extract_passages(&batches))
    }

    async fn answer(&self, document_text: &str, document_name: &str) -> Result<String, AppError> {
        let key = ReviewKey {
            model: &self.settings.model,
            top_k: self.settings.top_k,
            document_name,
            document_text,
        };
        if let Some(cached) = self.cache.get_review(&key).await {
            info!(document = %document_name, "review cache hit");
            return Ok(cached);
        }

        let passages = self.retrieve(document_text).await?;
        debug!(document = %document_name, passages = passages.len(), "context retrieved");

        let request = ChatCompletionRequest {
            model: self.settings.model.clone(),
            messages: vec![
                Message::system(SYSTEM_PROMPT),
                Message::user(user_prompt(document_name, &passages, document_text)),
            ],
            temperature: Some(self.settings.temperature),
            max_tokens: None,
        };
        let answer = self.llm.complete(&request).await?;
        info!(document = %document_name, chars = answer.len(), "review answer received");

        if !self.cache.set_review(&key, &answer).await {
            warn!(document = %document_name, "answer is not an issue array, not cached");
        }
        Ok(answer)
    }
}

impl ReviewProvider for RagReviewer {
    fn review<'a>(
        &'a self,
        document_text: &'a str,
        document_name: &'a str,
    ) -> BoxFuture<'a, Result<String, AppError>> {
        self.answer(document_text, document_name).boxed()
    }
}

fn user_prompt(document_name: &str, passages: &[Passage], document_text: &str) -> String {
    let context = if passages.is_empty() {
        "(no matching ADGM passages were found)".to_string()
    } else {
        passages
            .iter()
            .map(|p| format!("[{}]\n{}", p.source, p.text))
            .collect::<Vec<_>>()
            .join("\n\n")
    };
    format!(
        "Review the legal document named '{document_name}'.\n\n\
         ---\nProvided ADGM legal context:\n{context}\n---\n\
         Document text for analysis:\n{document_text}\n---\n\n\
         Now, provide your analysis as a single JSON list."
    )
}

/// Read `source` and `text` columns out of LanceDB result batches.
fn extract_passages(batches: &[RecordBatch]) -> Vec<Passage> {
    let mut passages = Vec::new();
    for batch in batches {
        let (Some(source), Some(text)) = (
            string_column(batch, "source"),
            string_column(batch, "text"),
        ) else {
            warn!("search result batch missing expected columns");
            continue;
        };
        for row in 0..batch.num_rows() {
            passages.push(Passage {
                source: source.value(row).to_string(),
                text: text.value(row).to_string(),
            });
        }
    }
    passages
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Option<&'a StringArray> {
    let idx = batch.schema().index_of(name).ok()?;
    batch.column(idx).as_any().downcast_ref::<StringArray>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::ArrayRef;
    use arrow_schema::{DataType, Field, Schema};

    #[test]
    fn passages_are_read_from_result_batches() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("source", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["companies.pdf", "courts.docx"])) as ArrayRef,
                Arc::new(StringArray::from(vec!["Every company shall...", "The ADGM Courts..."])),
            ],
        )
        .expect("batch");

        let passages = extract_passages(&[batch]);
        assert_eq!(passages.len(), 2);
        assert_eq!(passages[1].source, "courts.docx");
        assert_eq!(passages[0].text, "Every company shall...");
    }

    #[test]
    fn batches_without_text_column_are_skipped() {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Utf8, false)]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(StringArray::from(vec!["x"])) as ArrayRef],
        )
        .expect("batch");
        assert!(extract_passages(&[batch]).is_empty());
    }

    #[test]
    fn prompt_carries_name_context_and_text() {
        let prompt = user_prompt(
            "AoA.docx",
            &[Passage {
                source: "companies.pdf".to_string(),
                text: "Article 12".to_string(),
            }],
            "Clause 1",
        );
        assert!(prompt.contains("'AoA.docx'"));
        assert!(prompt.contains("[companies.pdf]\nArticle 12"));
        assert!(prompt.contains("Document text for analysis:\nClause 1"));
    }
}
