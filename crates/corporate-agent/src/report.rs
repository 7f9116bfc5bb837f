use crate::error::AppError;
use crate::model::{AnnotatedDocument, ChecklistResult, ComplianceReport, Issue};

/// Merge the checklist verdict and every document's results into one report.
///
/// `issues` holds one list per document in upload order, each issue already tagged with
/// its document name. An untagged issue means the pipeline lost track of where a finding
/// came from, and the whole batch is rejected. Only documents that produced an artifact
/// are listed in the report.
pub fn aggregate(
    checklist: &ChecklistResult,
    issues: Vec<Vec<Issue>>,
    artifacts: Vec<AnnotatedDocument>,
) -> Result<ComplianceReport, AppError> {
    let issues_found: Vec<Issue> = issues.into_iter().flatten().collect();

    if let Some((index, issue)) = issues_found
        .iter()
        .enumerate()
        .find(|(_, i)| i.document.as_deref().is_none_or(str::is_empty))
    {
        return Err(AppError::Integrity(format!(
            "issue #{index} ({:?}) has no document tag",
            issue.issue
        )));
    }
    if let Some(untagged) = artifacts.iter().find(|a| a.document.is_empty()) {
        return Err(AppError::Integrity(format!(
            "artifact {:?} has no document tag",
            untagged.artifact
        )));
    }

    Ok(ComplianceReport {
        process: checklist.process.clone(),
        documents_uploaded: checklist.found,
        required_documents: checklist.required,
        missing_documents: checklist.missing.clone(),
        issues_found,
        annotated: artifacts.into_iter().filter(|a| a.artifact.is_some()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Severity;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn checklist() -> ChecklistResult {
        ChecklistResult {
            process: "Company Incorporation".to_string(),
            found: 2,
            required: 5,
            missing: vec!["UBO Declaration Form".to_string()],
        }
    }

    #[test]
    fn flattens_issues_in_document_order() {
        let a = vec![
            Issue::critical("a1").tagged("a.docx"),
            Issue::critical("a2").tagged("a.docx"),
        ];
        let b = vec![Issue::critical("b1").tagged("b.docx")];
        let artifacts = vec![
            AnnotatedDocument { document: "a.docx".to_string(), artifact: None },
            AnnotatedDocument {
                document: "b.docx".to_string(),
                artifact: Some(PathBuf::from("out/Reviewed_b.docx")),
            },
        ];

        let report = aggregate(&checklist(), vec![a, vec![], b], artifacts).expect("report");
        let order: Vec<(&str, &str)> = report
            .issues_found
            .iter()
            .map(|i| (i.document.as_deref().unwrap_or_default(), i.issue.as_str()))
            .collect();
        assert_eq!(order, [("a.docx", "a1"), ("a.docx", "a2"), ("b.docx", "b1")]);
        assert_eq!(report.annotated.len(), 1);
        assert_eq!(report.annotated[0].document, "b.docx");
        assert_eq!(report.documents_uploaded, 2);
        assert_eq!(report.missing_documents, ["UBO Declaration Form"]);
    }

    #[test]
    fn untagged_issue_is_an_integrity_violation() {
        let mut issue = Issue::critical("lost");
        issue.severity = Severity::Low;
        let err = aggregate(&checklist(), vec![vec![issue]], vec![]).unwrap_err();
        assert!(matches!(err, AppError::Integrity(_)));

        let empty_tag = Issue::critical("blank").tagged("");
        assert!(aggregate(&checklist(), vec![vec![empty_tag]], vec![]).is_err());
    }
}
