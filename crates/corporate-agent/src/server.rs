/// MCP server implementation for the corporate document review agent.
///
/// Exposes three tools:
/// - `review_documents`: Checklist verdict, issue report and reviewed copies for a batch
/// - `check_checklist`: Checklist verdict only, from file names
/// - `rebuild_knowledge_base`: Re-index the ADGM reference material
use std::path::Path;
use std::sync::Arc;

use rmcp::{
    Json, ServerHandler,
    handler::server::router::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::*,
    tool, tool_handler, tool_router,
};
use tokio::sync::RwLock;
use tracing::info;

use crate::api::{
    CheckChecklistParams, CheckChecklistResponse, RebuildKnowledgeBaseResponse,
    ReviewDocumentsParams, ReviewDocumentsResponse,
};
use crate::checklist::{self, EMPTY_UPLOAD_NOTICE};
use crate::knowledge::KnowledgeIndexer;
use crate::model::UploadedFile;
use crate::pipeline::ReviewPipeline;

#[derive(Clone)]
pub struct CorporateAgentServer {
    pipeline: Arc<ReviewPipeline>,
    indexer: Arc<KnowledgeIndexer>,
    /// Reviews read the regulation index; a rebuild replaces it. Held shared by reviews and
    /// exclusively by rebuilds.
    index_gate: Arc<RwLock<()>>,
    tool_router: ToolRouter<CorporateAgentServer>,
}

impl CorporateAgentServer {
    pub fn new(pipeline: Arc<ReviewPipeline>, indexer: Arc<KnowledgeIndexer>) -> Self {
        Self {
            pipeline,
            indexer,
            index_gate: Arc::new(RwLock::new(())),
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl CorporateAgentServer {
    #[tool(description = "Review a batch of .docx legal documents against ADGM regulations. Returns the document checklist verdict, a report of compliance issues per document, and paths of reviewed copies with the offending text highlighted and commented.")]
    async fn review_documents(
        &self,
        Parameters(params): Parameters<ReviewDocumentsParams>,
    ) -> Result<Json<ReviewDocumentsResponse>, String> {
        let paths: Vec<&str> = params
            .paths
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect();
        info!(documents = paths.len(), "review_documents tool invoked");

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            files.push(UploadedFile::from_path(Path::new(path)).await);
        }

        let _reading = self.index_gate.read().await;
        let outcome = self
            .pipeline
            .review_batch(files)
            .await
            .map_err(|e| format!("review failed: {e}"))?;

        Ok(Json(ReviewDocumentsResponse {
            notification: outcome.notification,
            report: outcome.report,
            reviewed_documents: outcome
                .reviewed_files
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
        }))
    }

    #[tool(description = "Check which required documents of the detected corporate process (e.g. Company Incorporation) are present, based only on file names.")]
    async fn check_checklist(
        &self,
        Parameters(params): Parameters<CheckChecklistParams>,
    ) -> Result<Json<CheckChecklistResponse>, String> {
        let result = self
            .pipeline
            .check(&params.filenames)
            .map_err(|e| format!("checklist failed: {e}"))?;
        let notification = if params.filenames.is_empty() {
            EMPTY_UPLOAD_NOTICE.to_string()
        } else {
            checklist::notification(&result)
        };

        Ok(Json(CheckChecklistResponse {
            process: result.process,
            documents_uploaded: result.found,
            required_documents: result.required,
            missing_documents: result.missing,
            notification,
        }))
    }

    #[tool(description = "Rebuild the ADGM regulation index from the knowledge base directory (.docx, .pdf, .txt, .md). Cached reviews are discarded.")]
    async fn rebuild_knowledge_base(&self) -> Result<Json<RebuildKnowledgeBaseResponse>, String> {
        info!("rebuild_knowledge_base tool invoked");

        let _writing = self.index_gate.write().await;
        let summary = self
            .indexer
            .rebuild()
            .await
            .map_err(|e| format!("rebuild failed: {e}"))?;

        Ok(Json(RebuildKnowledgeBaseResponse {
            sources: summary.sources,
            chunks: summary.chunks,
        }))
    }
}

#[tool_handler]
impl ServerHandler for CorporateAgentServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_06_18,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .build(),
            server_info: Implementation {
                name: "corporate-agent".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "ADGM corporate document review agent. Use review_documents with .docx paths \
                 to get a checklist verdict, an issue report and reviewed copies with \
                 highlights and comments. Use check_checklist to see which required \
                 documents are missing before review, and rebuild_knowledge_base after \
                 changing the reference material."
                    .to_string(),
            ),
        }
    }
}
