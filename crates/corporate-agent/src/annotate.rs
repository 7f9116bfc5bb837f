/// Mark issues in a document: highlight the quoted text and attach a reviewer comment.
use tracing::debug;

use crate::docx::{Comment, ParsedDocument};
use crate::locate::locate;
use crate::model::{Issue, Severity, NOT_AVAILABLE};

pub const COMMENT_AUTHOR: &str = "Corporate Agent";
pub const COMMENT_INITIALS: &str = "CA";

/// Build an annotated copy of `doc`, or `None` when no copy should be produced.
///
/// No copy is produced when the issue list is empty, when any issue is `Critical` (the
/// review itself is not trustworthy enough to mark up), or when no issue could be
/// located. Each issue is marked at most once, at its first occurrence in document order.
/// The input document is not modified.
pub fn annotate(doc: &ParsedDocument, issues: &[Issue]) -> Option<ParsedDocument> {
    if issues.is_empty() {
        return None;
    }
    if issues.iter().any(|i| i.severity == Severity::Critical) {
        debug!(issues = issues.len(), "critical issue present, annotation vetoed");
        return None;
    }

    let mut annotated = doc.clone();
    let mut marked = 0usize;
    for issue in issues {
        if issue.offending_text.is_empty() {
            continue;
        }

        let hit = annotated
            .paragraphs
            .iter()
            .enumerate()
            .find_map(|(i, p)| locate(p, &issue.offending_text).map(|span| (i, span)));
        let Some((index, mut span)) = hit else {
            debug!(text = %issue.offending_text, "offending text not found, issue not marked");
            continue;
        };

        debug!(paragraph = index, text = span.matched_text(), "issue marked");
        let id = annotated.next_comment_id();
        span.matched.comment_ids.push(id);
        let replaced = span.replaced.clone();
        annotated.paragraphs[index] =
            annotated.paragraphs[index].with_spliced_runs(replaced, span.into_runs());
        annotated.comments.push(Comment {
            id,
            author: COMMENT_AUTHOR.to_string(),
            initials: COMMENT_INITIALS.to_string(),
            text: comment_text(issue),
        });
        marked += 1;
    }

    (marked > 0).then_some(annotated)
}

fn comment_text(issue: &Issue) -> String {
    format!(
        "Issue: {}\nSuggestion: {}",
        issue.issue,
        issue.suggestion.as_deref().unwrap_or(NOT_AVAILABLE)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::{package_with_body, read_docx, write_docx, Paragraph, Run, HIGHLIGHT_COLOR};
    use pretty_assertions::assert_eq;

    fn contract() -> ParsedDocument {
        ParsedDocument::from_paragraphs(vec![
            Paragraph::new(vec![Run::new("1. Jurisdiction")]),
            Paragraph::new(vec![Run::new("Disputes go to the UAE Federal Courts.")]),
            Paragraph::new(vec![Run::new("Appeals also go to the UAE Federal Courts.")]),
        ])
    }

    fn issue(text: &str, severity: Severity) -> Issue {
        Issue {
            document: None,
            section: Some("Jurisdiction".to_string()),
            offending_text: text.to_string(),
            issue: "Wrong jurisdiction".to_string(),
            severity,
            suggestion: Some("Refer to ADGM Courts".to_string()),
            citation: Some("ADGM Companies Regulations 2020".to_string()),
        }
    }

    #[test]
    fn marks_first_occurrence_and_attaches_comment() {
        let doc = contract();
        let annotated =
            annotate(&doc, &[issue("uae federal courts", Severity::High)]).expect("annotated");

        let runs = &annotated.paragraphs[1].runs;
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[1].text, "UAE Federal Courts");
        assert_eq!(runs[1].style.color.as_deref(), Some(HIGHLIGHT_COLOR));
        assert_eq!(runs[1].comment_ids, [0]);
        assert_eq!(annotated.paragraphs[2], doc.paragraphs[2]);
        assert_eq!(annotated.full_text(), doc.full_text());

        assert_eq!(annotated.comments.len(), 1);
        assert_eq!(annotated.comments[0].author, COMMENT_AUTHOR);
        assert_eq!(
            annotated.comments[0].text,
            "Issue: Wrong jurisdiction\nSuggestion: Refer to ADGM Courts"
        );
    }

    #[test]
    fn one_critical_issue_vetoes_the_copy() {
        let issues = [
            issue("Disputes", Severity::Low),
            issue("", Severity::Critical),
            issue("Appeals", Severity::Low),
        ];
        assert!(annotate(&contract(), &issues).is_none());
    }

    #[test]
    fn no_issues_or_nothing_locatable_means_no_copy() {
        assert!(annotate(&contract(), &[]).is_none());
        assert!(annotate(&contract(), &[issue("", Severity::Low)]).is_none());
        assert!(annotate(&contract(), &[issue("not in the text", Severity::Low)]).is_none());
    }

    #[test]
    fn unlocatable_issues_are_skipped_but_others_are_marked() {
        let issues = [issue("missing", Severity::Medium), issue("Appeals", Severity::Low)];
        let annotated = annotate(&contract(), &issues).expect("annotated");
        assert_eq!(annotated.comments.len(), 1);
        assert_eq!(annotated.paragraphs[2].runs[0].text, "Appeals");
    }

    #[test]
    fn repeated_calls_produce_identical_results() {
        let doc = contract();
        let issues = [issue("Disputes", Severity::Low), issue("Federal", Severity::Low)];
        let first = annotate(&doc, &issues);
        let second = annotate(&doc, &issues);
        assert_eq!(first, second);
        assert_eq!(doc, contract());
        assert_eq!(first.expect("annotated").comments.len(), 2);
    }

    #[test]
    fn issues_in_the_same_paragraph_get_distinct_comments() {
        let doc = contract();
        let issues = [issue("Disputes", Severity::Low), issue("Federal", Severity::Low)];
        let annotated = annotate(&doc, &issues).expect("annotated");

        let ids: Vec<Vec<u32>> = annotated.paragraphs[1]
            .runs
            .iter()
            .map(|r| r.comment_ids.clone())
            .filter(|ids| !ids.is_empty())
            .collect();
        assert_eq!(ids, [vec![0], vec![1]]);
        assert_eq!(annotated.full_text(), doc.full_text());
    }

    fn document_xml(bytes: &[u8]) -> String {
        use std::io::Read;
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).expect("zip");
        let mut xml = String::new();
        archive
            .by_name("word/document.xml")
            .expect("document part")
            .read_to_string(&mut xml)
            .expect("utf-8");
        xml
    }

    #[test]
    fn linked_and_inserted_text_survives_annotation() {
        let bytes = package_with_body(concat!(
            r#"<w:p><w:r><w:t xml:space="preserve">Disputes are void; see </w:t></w:r>"#,
            r#"<w:hyperlink r:id="rId1"><w:r><w:t>ADGM Courts Rules</w:t></w:r></w:hyperlink>"#,
            r#"<w:ins w:id="7" w:author="Counsel" w:date="2024-01-01T00:00:00Z">"#,
            r#"<w:r><w:t xml:space="preserve"> and the amended schedule</w:t></w:r></w:ins>"#,
            r#"<w:r><w:t>.</w:t></w:r></w:p>"#
        ));
        let doc = read_docx(&bytes).expect("read");
        let expected = "Disputes are void; see ADGM Courts Rules and the amended schedule.";
        assert_eq!(doc.full_text(), expected);

        let annotated = annotate(&doc, &[issue("void", Severity::Medium)]).expect("annotated");
        let written = write_docx(&annotated).expect("write");

        let reread = read_docx(&written).expect("reread");
        assert_eq!(reread.full_text(), expected);
        let xml = document_xml(&written);
        let at = |needle: &str| xml.find(needle).expect(needle);
        assert!(at(r#"<w:commentRangeStart w:id="0"/>"#) < at("void</w:t>"));
        let link = at(r#"<w:hyperlink r:id="rId1">"#);
        assert!(at("void</w:t>") < link);
        assert!(link < at("ADGM Courts Rules</w:t></w:r></w:hyperlink>"));
        assert!(at("</w:hyperlink>") < at(r#"<w:ins w:id="7" w:author="Counsel""#));
        assert!(at("amended schedule</w:t></w:r></w:ins>") < at(".</w:t>"));
    }
}
