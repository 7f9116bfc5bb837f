use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Serialize, Serializer};

/// Marker written in place of a field the reviewer did not supply.
pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, JsonSchema)]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "Critical",
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown severity: {0}")]
pub struct UnknownSeverity(pub String);

impl FromStr for Severity {
    type Err = UnknownSeverity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(UnknownSeverity(s.to_string())),
        }
    }
}

/// One compliance finding.
///
/// Optional fields serialize as `"N/A"` so every issue in a report carries the same keys.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct Issue {
    /// Uploaded file the issue belongs to. Set by the pipeline, never by the reviewer.
    #[serde(serialize_with = "or_not_available")]
    #[schemars(with = "String")]
    pub document: Option<String>,
    #[serde(serialize_with = "or_not_available")]
    #[schemars(with = "String")]
    pub section: Option<String>,
    /// Verbatim text from the document. Empty when the reviewer could not quote it.
    pub offending_text: String,
    pub issue: String,
    pub severity: Severity,
    #[serde(serialize_with = "or_not_available")]
    #[schemars(with = "String")]
    pub suggestion: Option<String>,
    #[serde(serialize_with = "or_not_available")]
    #[schemars(with = "String")]
    pub citation: Option<String>,
}

impl Issue {
    /// A finding that stands in for a failed review: nothing to anchor, review unreliable.
    pub fn critical(message: impl Into<String>) -> Self {
        Self {
            document: None,
            section: None,
            offending_text: String::new(),
            issue: message.into(),
            severity: Severity::Critical,
            suggestion: None,
            citation: None,
        }
    }

    pub fn tagged(self, document: &str) -> Self {
        Self {
            document: Some(document.to_string()),
            ..self
        }
    }
}

fn or_not_available<S: Serializer>(
    value: &Option<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(value.as_deref().unwrap_or(NOT_AVAILABLE))
}

/// One file of a batch submission. A file that could not be read still takes part in
/// the batch and is reported as an input-read failure.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub content: Result<Vec<u8>, String>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content: Ok(bytes),
        }
    }

    pub async fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let content = tokio::fs::read(path).await.map_err(|e| e.to_string());
        Self { name, content }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct ChecklistResult {
    pub process: String,
    /// Distinct required labels matched by at least one upload.
    pub found: usize,
    pub required: usize,
    /// Labels not matched, in checklist order.
    pub missing: Vec<String>,
}

/// Outcome of one document's review, before aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentReview {
    pub document: String,
    pub issues: Vec<Issue>,
    /// Serialized annotated copy, when annotation passed the veto and marked something.
    pub annotated: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct AnnotatedDocument {
    pub document: String,
    /// Where the reviewed copy is written. `None` when no copy was produced.
    pub artifact: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct ComplianceReport {
    pub process: String,
    pub documents_uploaded: usize,
    pub required_documents: usize,
    #[serde(rename = "missing_document(s)")]
    pub missing_documents: Vec<String>,
    /// Every issue of the batch, grouped by document in upload order.
    pub issues_found: Vec<Issue>,
    #[serde(skip)]
    pub annotated: Vec<AnnotatedDocument>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_parses_case_insensitively() {
        assert_eq!("HIGH".parse::<Severity>(), Ok(Severity::High));
        assert_eq!(" low ".parse::<Severity>(), Ok(Severity::Low));
        assert!("severe".parse::<Severity>().is_err());
    }

    #[test]
    fn missing_fields_serialize_as_not_available() {
        let issue = Issue::critical("boom").tagged("a.docx");
        let json = serde_json::to_value(&issue).expect("serialize");
        assert_eq!(json["document"], "a.docx");
        assert_eq!(json["section"], NOT_AVAILABLE);
        assert_eq!(json["suggestion"], NOT_AVAILABLE);
        assert_eq!(json["citation"], NOT_AVAILABLE);
        assert_eq!(json["severity"], "Critical");
        assert_eq!(json["offending_text"], "");
    }

    #[test]
    fn report_uses_external_key_names() {
        let report = ComplianceReport {
            process: "Company Incorporation".to_string(),
            documents_uploaded: 1,
            required_documents: 5,
            missing_documents: vec!["UBO Declaration Form".to_string()],
            issues_found: vec![],
            annotated: vec![],
        };
        let json = serde_json::to_value(&report).expect("serialize");
        let mut keys: Vec<&str> = json
            .as_object()
            .expect("object")
            .keys()
            .map(String::as_str)
            .collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            [
                "documents_uploaded",
                "issues_found",
                "missing_document(s)",
                "process",
                "required_documents"
            ]
        );
    }
}
