use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::model::ComplianceReport;

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ReviewDocumentsParams {
    /// Paths of the .docx files to review, readable by the server.
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CheckChecklistParams {
    /// File names of the documents the user intends to submit.
    pub filenames: Vec<String>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ReviewDocumentsResponse {
    /// Human-readable checklist summary.
    pub notification: String,
    pub report: ComplianceReport,
    /// Paths of the reviewed copies with highlights and comments.
    pub reviewed_documents: Vec<String>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct CheckChecklistResponse {
    pub process: String,
    pub documents_uploaded: usize,
    pub required_documents: usize,
    #[serde(rename = "missing_document(s)")]
    pub missing_documents: Vec<String>,
    pub notification: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct RebuildKnowledgeBaseResponse {
    /// Files that contributed text.
    pub sources: usize,
    /// Passages written to the index.
    pub chunks: usize,
}
