use agent_common::error::CommonError;
use agent_common::openai::OpenAiClientError;

use crate::docx::DocxError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Common(#[from] CommonError),

    #[error("config error: {0}")]
    Config(String),

    #[error("document error: {0}")]
    Document(#[from] DocxError),

    #[error("language model error: {0}")]
    Llm(#[from] OpenAiClientError),

    #[error("knowledge base error: {0}")]
    KnowledgeBase(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pipeline integrity violation: {0}")]
    Integrity(String),
}
