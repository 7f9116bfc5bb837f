/// Batch review: checklist verdict, per-document review and annotation, one report.
///
/// Documents are reviewed in parallel on a bounded pool. Results are slotted by upload
/// position, so the report follows upload order whatever order tasks finish in. Reviewed
/// copies are only written once the whole batch has been aggregated; dropping the future
/// aborts every in-flight task and leaves nothing on disk.
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::annotate::annotate;
use crate::checklist::{self, ChecklistDefinition, EMPTY_UPLOAD_NOTICE};
use crate::docx::{read_docx, write_docx};
use crate::error::AppError;
use crate::extract::{extract, ReviewProvider};
use crate::model::{
    AnnotatedDocument, ChecklistResult, ComplianceReport, DocumentReview, Issue, UploadedFile,
};
use crate::report::aggregate;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub concurrency: usize,
    pub review_timeout: Duration,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    pub notification: String,
    pub report: ComplianceReport,
    /// Paths of the reviewed copies written for this batch, in upload order.
    pub reviewed_files: Vec<PathBuf>,
}

pub struct ReviewPipeline {
    provider: Arc<dyn ReviewProvider>,
    checklists: Vec<ChecklistDefinition>,
    settings: PipelineSettings,
}

impl ReviewPipeline {
    pub fn new(
        provider: Arc<dyn ReviewProvider>,
        checklists: Vec<ChecklistDefinition>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            provider,
            checklists,
            settings,
        }
    }

    /// Checklist verdict for a set of filenames.
    pub fn check<S: AsRef<str>>(&self, filenames: &[S]) -> Result<ChecklistResult, AppError> {
        let checklist = checklist::identify_process(&self.checklists, filenames)
            .ok_or_else(|| AppError::Config("no checklist configured".to_string()))?;
        Ok(checklist::match_files(checklist, filenames))
    }

    pub async fn review_batch(&self, files: Vec<UploadedFile>) -> Result<ReviewOutcome, AppError> {
        let checklist_result = self.check(&checklist::filenames(&files))?;
        info!(
            files = files.len(),
            process = %checklist_result.process,
            found = checklist_result.found,
            required = checklist_result.required,
            "batch review started"
        );
        let notification = if files.is_empty() {
            EMPTY_UPLOAD_NOTICE.to_string()
        } else {
            checklist::notification(&checklist_result)
        };

        let names: Vec<String> = files.iter().map(|f| f.name.clone()).collect();
        let reviews = self.review_all(files).await;

        let mut issues = Vec::with_capacity(reviews.len());
        let mut planned = Vec::with_capacity(reviews.len());
        let mut pending_writes = Vec::new();
        let mut artifact_names = ReviewedNames::default();
        for (name, review) in names.iter().zip(reviews) {
            let review = review.unwrap_or_else(|| {
                warn!(document = %name, "review task did not complete");
                DocumentReview {
                    document: name.clone(),
                    issues: vec![Issue::critical(
                        "Failed to analyze document due to an internal error: review task aborted",
                    )
                    .tagged(name)],
                    annotated: None,
                }
            });

            let artifact = review.annotated.map(|bytes| {
                let path = self.settings.output_dir.join(artifact_names.claim(name));
                pending_writes.push((path.clone(), bytes));
                path
            });
            planned.push(AnnotatedDocument {
                document: review.document,
                artifact,
            });
            issues.push(review.issues);
        }

        let report = aggregate(&checklist_result, issues, planned)?;

        if !pending_writes.is_empty() {
            tokio::fs::create_dir_all(&self.settings.output_dir).await?;
        }
        let mut reviewed_files = Vec::with_capacity(pending_writes.len());
        for (path, bytes) in pending_writes {
            tokio::fs::write(&path, bytes).await?;
            info!(path = %path.display(), "reviewed copy written");
            reviewed_files.push(path);
        }

        info!(
            documents = names.len(),
            issues = report.issues_found.len(),
            reviewed = reviewed_files.len(),
            "batch review finished"
        );
        Ok(ReviewOutcome {
            notification,
            report,
            reviewed_files,
        })
    }

    /// One task per document, at most `concurrency` running. A slot stays `None` only if
    /// its task panicked.
    async fn review_all(&self, files: Vec<UploadedFile>) -> Vec<Option<DocumentReview>> {
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut slots: Vec<Option<DocumentReview>> = vec![None; files.len()];

        for (index, file) in files.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let provider = Arc::clone(&self.provider);
            let timeout = self.settings.review_timeout;
            tasks.spawn(async move {
                // never closed, so acquisition only fails if the pool is gone
                let _permit = semaphore.acquire_owned().await;
                (index, review_document(provider.as_ref(), file, timeout).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, review)) => slots[index] = Some(review),
                Err(e) => warn!(error = %e, "review task failed"),
            }
        }
        slots
    }
}

/// Read, review and annotate a single document.
async fn review_document(
    provider: &dyn ReviewProvider,
    file: UploadedFile,
    timeout: Duration,
) -> DocumentReview {
    let name = file.name;
    let parsed = file
        .content
        .and_then(|bytes| read_docx(&bytes).map_err(|e| e.to_string()));
    let doc = match parsed {
        Ok(doc) => doc,
        Err(e) => {
            warn!(document = %name, error = %e, "could not read document");
            return DocumentReview {
                issues: vec![
                    Issue::critical(format!("Could not read .docx file: {e}")).tagged(&name)
                ],
                document: name,
                annotated: None,
            };
        }
    };

    let issues = extract(provider, &doc.full_text(), &name, timeout).await;
    info!(document = %name, issues = issues.len(), "document reviewed");

    let annotated = match annotate(&doc, &issues) {
        Some(marked) => match write_docx(&marked) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(document = %name, error = %e, "could not serialize reviewed copy");
                None
            }
        },
        None => {
            info!(document = %name, "no reviewed copy for this document");
            None
        }
    };

    DocumentReview {
        issues: issues.into_iter().map(|i| i.tagged(&name)).collect(),
        document: name,
        annotated,
    }
}

/// `Reviewed_<base>.docx` for an uploaded file name.
pub fn reviewed_file_name(name: &str) -> String {
    let base = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    format!("Reviewed_{base}.docx")
}

/// Reviewed copy names handed out within one batch.
///
/// The first copy for a base name is `Reviewed_<base>.docx`; later uploads with the same
/// base get `Reviewed_<base>_2.docx`, `_3` and so on, skipping any name already taken.
#[derive(Debug, Default)]
struct ReviewedNames {
    taken: HashSet<String>,
}

impl ReviewedNames {
    fn claim(&mut self, name: &str) -> String {
        let first = reviewed_file_name(name);
        if self.taken.insert(first.clone()) {
            return first;
        }
        let stem = first.trim_end_matches(".docx");
        let mut n = 2usize;
        loop {
            let candidate = format!("{stem}_{n}.docx");
            if self.taken.insert(candidate.clone()) {
                warn!(document = %name, copy = %candidate, "duplicate upload name, copy renamed");
                return candidate;
            }
            n += 1;
        }
    }
}
