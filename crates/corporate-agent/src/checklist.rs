/// Required-document checklists and the filename matcher.
///
/// Matching is a plain substring test of each lower-cased keyword against each lower-cased
/// filename. It over-matches when a keyword happens to be part of an unrelated name; that
/// is accepted.
use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::error::AppError;
use crate::model::{ChecklistResult, UploadedFile};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecklistDefinition {
    pub process: String,
    /// (lower-case keyword, canonical label), in checklist order.
    pub documents: Vec<(String, String)>,
}

impl ChecklistDefinition {
    pub fn new<K, L>(
        process: impl Into<String>,
        documents: impl IntoIterator<Item = (K, L)>,
    ) -> Self
    where
        K: AsRef<str>,
        L: Into<String>,
    {
        Self {
            process: process.into(),
            documents: documents
                .into_iter()
                .map(|(k, l)| (k.as_ref().to_lowercase(), l.into()))
                .collect(),
        }
    }

    /// Distinct labels in first-appearance order.
    pub fn labels(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.documents
            .iter()
            .map(|(_, label)| label.as_str())
            .filter(|label| seen.insert(*label))
            .collect()
    }

    pub fn required_count(&self) -> usize {
        self.labels().len()
    }
}

/// The ADGM company incorporation checklist used when no table is configured.
pub fn default_checklists() -> Vec<ChecklistDefinition> {
    vec![ChecklistDefinition::new(
        "Company Incorporation",
        [
            ("articles of association", "Articles of Association"),
            ("memorandum of association", "Memorandum of Association (MoA/MoU)"),
            ("incorporation application form", "Incorporation Application Form"),
            ("ubo declaration form", "UBO Declaration Form"),
            ("register of members and directors", "Register of Members and Directors"),
        ],
    )]
}

#[derive(Deserialize)]
struct ChecklistFile {
    process: String,
    documents: Vec<ChecklistEntry>,
}

#[derive(Deserialize)]
struct ChecklistEntry {
    keyword: String,
    label: String,
}

pub fn parse_checklists(json: &str) -> Result<Vec<ChecklistDefinition>, AppError> {
    let files: Vec<ChecklistFile> = serde_json::from_str(json)
        .map_err(|e| AppError::Config(format!("invalid checklist table: {e}")))?;
    if files.is_empty() {
        return Err(AppError::Config("checklist table is empty".to_string()));
    }

    files
        .into_iter()
        .map(|f| {
            if f.documents.iter().any(|d| d.keyword.trim().is_empty()) {
                return Err(AppError::Config(format!(
                    "checklist '{}' has an empty keyword",
                    f.process
                )));
            }
            Ok(ChecklistDefinition::new(
                f.process,
                f.documents.into_iter().map(|d| (d.keyword, d.label)),
            ))
        })
        .collect()
}

pub fn load_checklists(path: &Path) -> Result<Vec<ChecklistDefinition>, AppError> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    let table = parse_checklists(&json)?;
    info!(path = %path.display(), processes = table.len(), "checklist table loaded");
    Ok(table)
}

/// Match uploaded filenames against one checklist.
pub fn match_files<S: AsRef<str>>(
    checklist: &ChecklistDefinition,
    filenames: &[S],
) -> ChecklistResult {
    let lowered: Vec<String> = filenames.iter().map(|f| f.as_ref().to_lowercase()).collect();

    let mut found: HashSet<&str> = HashSet::new();
    for name in &lowered {
        for (keyword, label) in &checklist.documents {
            if name.contains(keyword.as_str()) {
                found.insert(label.as_str());
            }
        }
    }

    let labels = checklist.labels();
    let missing = labels
        .iter()
        .filter(|label| !found.contains(*label))
        .map(|label| label.to_string())
        .collect();

    ChecklistResult {
        process: checklist.process.clone(),
        found: found.len(),
        required: labels.len(),
        missing,
    }
}

/// Pick the checklist the upload most likely belongs to.
///
/// Most matched labels wins; ties (including no match at all) go to the earlier entry.
pub fn identify_process<'a, S: AsRef<str>>(
    table: &'a [ChecklistDefinition],
    filenames: &[S],
) -> Option<&'a ChecklistDefinition> {
    let mut best: Option<(&ChecklistDefinition, usize)> = None;
    for checklist in table {
        let found = match_files(checklist, filenames).found;
        if best.is_none_or(|(_, n)| found > n) {
            best = Some((checklist, found));
        }
    }
    best.map(|(checklist, _)| checklist)
}

pub fn filenames(files: &[UploadedFile]) -> Vec<&str> {
    files.iter().map(|f| f.name.as_str()).collect()
}

pub const EMPTY_UPLOAD_NOTICE: &str = "Please upload documents to begin.";

/// User-facing summary of a checklist result.
pub fn notification(result: &ChecklistResult) -> String {
    if result.missing.is_empty() {
        format!(
            "Document checklist passed for {}. All required documents seem to be present.",
            result.process
        )
    } else {
        format!(
            "It appears that you're trying to {}. Based on our reference list, you have \
             uploaded {} out of {} required documents. The missing document(s) appear to \
             be: '{}'.",
            result.process,
            result.found,
            result.required,
            result.missing.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn incorporation() -> ChecklistDefinition {
        default_checklists().remove(0)
    }

    #[test]
    fn missing_labels_follow_checklist_order_not_upload_order() {
        let result = match_files(
            &incorporation(),
            &["UBO Declaration Form.docx", "Articles of Association v2.docx"],
        );
        assert_eq!(result.found, 2);
        assert_eq!(result.required, 5);
        assert_eq!(
            result.missing,
            [
                "Memorandum of Association (MoA/MoU)",
                "Incorporation Application Form",
                "Register of Members and Directors",
            ]
        );
    }

    #[test]
    fn duplicate_matches_never_exceed_required_count() {
        let checklist = incorporation();
        let names = [
            "articles of association.docx",
            "ARTICLES OF ASSOCIATION (final).docx",
            "articles of association - copy.docx",
        ];
        let result = match_files(&checklist, &names);
        assert_eq!(result.found, 1);
        assert!(result.found <= result.required);
    }

    #[test]
    fn unrelated_substrings_do_not_match() {
        let result = match_files(
            &incorporation(),
            &["Articles of Association and shareholder minutes.docx"],
        );
        assert_eq!(result.found, 1);
        assert!(!result.missing.contains(&"Articles of Association".to_string()));
        assert!(result.missing.contains(&"Memorandum of Association (MoA/MoU)".to_string()));
    }

    #[test]
    fn empty_upload_reports_everything_missing() {
        let checklist = incorporation();
        let result = match_files::<&str>(&checklist, &[]);
        assert_eq!(result.found, 0);
        assert_eq!(result.missing.len(), 5);
    }

    #[test]
    fn shared_labels_count_once() {
        let checklist = ChecklistDefinition::new(
            "Licensing",
            [
                ("licence", "Licence Application"),
                ("license", "Licence Application"),
                ("plan", "Business Plan"),
            ],
        );
        assert_eq!(checklist.required_count(), 2);
        let result = match_files(&checklist, &["License.docx"]);
        assert_eq!(result.found, 1);
        assert_eq!(result.missing, ["Business Plan"]);
    }

    #[test]
    fn identify_process_prefers_most_matches_then_table_order() {
        let table = vec![
            incorporation(),
            ChecklistDefinition::new(
                "Employment",
                [("employment contract", "Employment Contract"), ("offer letter", "Offer Letter")],
            ),
        ];
        let chosen = identify_process(&table, &["employment contract.docx", "offer letter.docx"]);
        assert_eq!(chosen.map(|c| c.process.as_str()), Some("Employment"));

        let fallback = identify_process(&table, &["minutes.docx"]);
        assert_eq!(fallback.map(|c| c.process.as_str()), Some("Company Incorporation"));
        assert!(identify_process::<&str>(&[], &[]).is_none());
    }

    #[test]
    fn checklist_table_loads_from_json() {
        let table = parse_checklists(
            r#"[{"process": "Branch Registration", "documents": [
                {"keyword": "Parent Company Resolution", "label": "Board Resolution"}
            ]}]"#,
        )
        .expect("parse");
        assert_eq!(table[0].documents[0].0, "parent company resolution");
        assert!(parse_checklists("[]").is_err());
        let blank_keyword = r#"[{"process": "x", "documents": [{"keyword": " ", "label": "y"}]}]"#;
        assert!(parse_checklists(blank_keyword).is_err());
    }

    #[test]
    fn notification_text() {
        let result = match_files(&incorporation(), &["articles of association.docx"]);
        assert_eq!(
            notification(&result),
            "It appears that you're trying to Company Incorporation. Based on our reference \
             list, you have uploaded 1 out of 5 required documents. The missing document(s) \
             appear to be: 'Memorandum of Association (MoA/MoU), Incorporation Application \
             Form, UBO Declaration Form, Register of Members and Directors'."
        );

        let complete = ChecklistResult {
            process: "Company Incorporation".to_string(),
            found: 5,
            required: 5,
            missing: vec![],
        };
        assert_eq!(
            notification(&complete),
            concat!(
                "Document checklist passed for Company Incorporation. ",
                "All required documents seem to be present."
            )
        );
    }
}
