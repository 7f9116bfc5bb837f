/// WordprocessingML (.docx) document model and codec.
///
/// Only what the review pipeline needs is modelled: body-level paragraphs, their runs,
/// run formatting (bold and color typed, everything else carried verbatim) and review
/// comments. Other inline markup is kept verbatim in place, and the rest of the package is
/// kept as raw bytes and written back as is.
mod reader;
mod writer;

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

pub use reader::read_docx;
pub use writer::write_docx;

pub(crate) const DOCUMENT_PART: &str = "word/document.xml";
pub(crate) const COMMENTS_PART: &str = "word/comments.xml";
pub(crate) const DOCUMENT_RELS_PART: &str = "word/_rels/document.xml.rels";
pub(crate) const CONTENT_TYPES_PART: &str = "[Content_Types].xml";

#[derive(Debug, thiserror::Error)]
pub enum DocxError {
    #[error("zip container error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed xml in {part}: {message}")]
    Xml { part: String, message: String },

    #[error("missing package part: {0}")]
    MissingPart(String),

    #[error("package part {0} is not valid UTF-8")]
    Encoding(String),

    #[error("package part {part} is larger than {limit} bytes")]
    TooLarge { part: String, limit: u64 },

    #[error("document structure changed: {0}")]
    Structure(String),
}

/// A document split into paragraphs and runs.
///
/// Values are never edited in place by the pipeline; annotation builds a new value that
/// shares the read-only source package.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedDocument {
    pub paragraphs: Vec<Paragraph>,
    /// Comments added since the document was read. Comments already in the source
    /// package are preserved by the writer and are not listed here.
    pub comments: Vec<Comment>,
    package: Option<Arc<Package>>,
}

impl ParsedDocument {
    /// Build a document in memory, without a source package.
    pub fn from_paragraphs(paragraphs: Vec<Paragraph>) -> Self {
        Self {
            paragraphs,
            comments: Vec::new(),
            package: None,
        }
    }

    /// Full plain text: paragraph texts joined by newlines.
    pub fn full_text(&self) -> String {
        self.paragraphs
            .iter()
            .map(Paragraph::text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The first comment id not used by the source package or by added comments.
    pub fn next_comment_id(&self) -> u32 {
        let from_package = self
            .package
            .as_ref()
            .and_then(|p| p.max_comment_id)
            .map_or(0, |id| id + 1);
        let from_added = self.comments.iter().map(|c| c.id + 1).max().unwrap_or(0);
        from_package.max(from_added)
    }

    pub(crate) fn package(&self) -> Option<&Package> {
        self.package.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Paragraph {
    /// Raw `<w:pPr>` element, if the paragraph had one.
    pub properties: Option<String>,
    /// Text runs in document order, including runs nested in hyperlinks, tracked
    /// insertions, smart tags and content controls.
    pub runs: Vec<Run>,
    /// Where each run sits among the paragraph's other inline markup.
    layout: Vec<Inline>,
    /// Original XML of an untouched paragraph. Cleared whenever the runs are replaced.
    source: Option<String>,
}

/// One item of a paragraph's inline content, in source order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Inline {
    /// Index into `Paragraph::runs`.
    Run(usize),
    /// Start tag of a container whose runs are modelled (`w:hyperlink`, `w:ins`, ...).
    Open(String),
    /// End tag matching the most recent unclosed `Open`.
    Close(String),
    /// Any other child (bookmarks, proofing marks, deletions, properties of a content
    /// control), kept verbatim.
    Markup(String),
}

impl Paragraph {
    pub fn new(runs: Vec<Run>) -> Self {
        Self {
            properties: None,
            layout: (0..runs.len()).map(Inline::Run).collect(),
            runs,
            source: None,
        }
    }

    /// Concatenated text of all runs.
    pub fn text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }

    /// Whether the runs in `range` all sit directly in the same container (the paragraph
    /// itself or one hyperlink, insertion, ...).
    pub fn same_container(&self, range: Range<usize>) -> bool {
        let mut stack: Vec<usize> = Vec::new();
        let mut opened = 0usize;
        let mut container = None;
        for item in &self.layout {
            match item {
                Inline::Open(_) => {
                    stack.push(opened);
                    opened += 1;
                }
                Inline::Close(_) => {
                    stack.pop();
                }
                Inline::Run(i) if range.contains(i) => {
                    let here = stack.last().copied();
                    match container {
                        None => container = Some(here),
                        Some(first) if first != here => return false,
                        Some(_) => {}
                    }
                }
                Inline::Run(_) | Inline::Markup(_) => {}
            }
        }
        true
    }

    /// Replace the runs in `replaced` so that the paragraph's runs become `runs`.
    ///
    /// `runs` must keep every run outside `replaced` unchanged and in place. The new pieces
    /// take the position of the first replaced run; markup that sat between replaced runs
    /// follows the new pieces. Everything else in the paragraph keeps its position.
    pub fn with_spliced_runs(&self, replaced: Range<usize>, runs: Vec<Run>) -> Self {
        let kept = self.runs.len().saturating_sub(replaced.len());
        let pieces = runs.len().saturating_sub(kept);

        let mut layout = Vec::with_capacity(self.layout.len() + pieces);
        let mut moved = Vec::new();
        let mut inside = false;
        for item in &self.layout {
            match item {
                Inline::Run(i) if *i < replaced.start => layout.push(Inline::Run(*i)),
                Inline::Run(i) if *i >= replaced.end => {
                    layout.push(Inline::Run(*i - replaced.len() + pieces));
                }
                Inline::Run(i) => {
                    if *i == replaced.start {
                        layout.extend((replaced.start..replaced.start + pieces).map(Inline::Run));
                        inside = true;
                    }
                    if *i + 1 == replaced.end {
                        layout.append(&mut moved);
                        inside = false;
                    }
                }
                other if inside => moved.push(other.clone()),
                other => layout.push(other.clone()),
            }
        }
        layout.append(&mut moved);

        Self {
            properties: self.properties.clone(),
            runs,
            layout,
            source: None,
        }
    }

    pub(crate) fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub(crate) fn layout(&self) -> &[Inline] {
        &self.layout
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Run {
    pub text: String,
    pub style: RunStyle,
    /// Non-text run content (drawings, field characters, note references) kept verbatim.
    pub embedded: Vec<String>,
    /// Ids of comments whose range covers this run.
    pub comment_ids: Vec<u32>,
}

impl Run {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn styled(text: impl Into<String>, style: RunStyle) -> Self {
        Self {
            text: text.into(),
            style,
            ..Self::default()
        }
    }
}

/// Run formatting. `None` means "inherit from the paragraph/character style".
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunStyle {
    pub bold: Option<bool>,
    /// Hex RGB such as `FF0000`, or `auto`.
    pub color: Option<String>,
    /// Every other `<w:rPr>` child, in source order.
    pub passthrough: Vec<RunProperty>,
    /// The `<w:color>` element as read, when it carries more than `w:val` (theme colors).
    /// Written back in place of `color` as long as `color` still holds the value read.
    pub(crate) color_source: Option<SourceColor>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SourceColor {
    pub(crate) val: Option<String>,
    pub(crate) xml: String,
}

pub const HIGHLIGHT_COLOR: &str = "FF0000";

impl RunStyle {
    /// This style with bold on and a red foreground; nothing else changes.
    pub fn highlighted(&self) -> Self {
        Self {
            bold: Some(true),
            color: Some(HIGHLIGHT_COLOR.to_string()),
            passthrough: self.passthrough.clone(),
            color_source: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunProperty {
    /// Qualified element name, e.g. `w:sz`.
    pub name: String,
    /// The element's XML exactly as read.
    pub xml: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub id: u32,
    pub author: String,
    pub initials: String,
    pub text: String,
}

/// The source .docx container, kept for writing an annotated copy.
#[derive(Clone, PartialEq)]
pub(crate) struct Package {
    /// Every file in the zip, in archive order.
    pub(crate) parts: Vec<(String, Vec<u8>)>,
    /// `word/document.xml` with body paragraphs cut out.
    pub(crate) template: Vec<Segment>,
    pub(crate) max_comment_id: Option<u32>,
}

impl fmt::Debug for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Package")
            .field("parts", &self.parts.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("segments", &self.template.len())
            .field("max_comment_id", &self.max_comment_id)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Segment {
    Raw(String),
    Paragraph(usize),
}

/// A .docx package whose body is exactly `body`.
#[cfg(test)]
pub(crate) fn package_with_body(body: &str) -> Vec<u8> {
    use std::io::{Cursor, Write};

    let content_types = concat!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
        r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
        r#"<Default Extension="xml" ContentType="application/xml"/></Types>"#
    );
    let rels = concat!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
        r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
        r#"<Relationship Id="rId1" "#,
        r#"Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" "#,
        r#"Target="https://www.adgm.com" TargetMode="External"/>"#,
        r#"</Relationships>"#
    );
    let document = format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main" "#,
            r#"xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">"#,
            "<w:body>{}</w:body></w:document>"
        ),
        body
    );

    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, xml) in [
        (CONTENT_TYPES_PART, content_types),
        (DOCUMENT_RELS_PART, rels),
        (DOCUMENT_PART, document.as_str()),
    ] {
        zip.start_file(name, options).expect("start part");
        zip.write_all(xml.as_bytes()).expect("write part");
    }
    zip.finish().expect("finish zip").into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_text_joins_paragraphs_with_newlines() {
        let doc = ParsedDocument::from_paragraphs(vec![
            Paragraph::new(vec![Run::new("Clause 1. "), Run::new("Shares")]),
            Paragraph::new(vec![]),
            Paragraph::new(vec![Run::new("Clause 2.")]),
        ]);
        assert_eq!(doc.full_text(), "Clause 1. Shares\n\nClause 2.");
    }

    #[test]
    fn highlight_overrides_only_visibility_attributes() {
        let style = RunStyle {
            bold: Some(false),
            color: Some("00FF00".to_string()),
            passthrough: vec![RunProperty {
                name: "w:i".to_string(),
                xml: "<w:i/>".to_string(),
            }],
            color_source: Some(SourceColor {
                val: Some("00FF00".to_string()),
                xml: r#"<w:color w:val="00FF00" w:themeColor="accent1"/>"#.to_string(),
            }),
        };
        let hl = style.highlighted();
        assert_eq!(hl.color_source, None);
        assert_eq!(hl.bold, Some(true));
        assert_eq!(hl.color.as_deref(), Some(HIGHLIGHT_COLOR));
        assert_eq!(hl.passthrough, style.passthrough);
    }

    fn linked() -> Paragraph {
        Paragraph {
            properties: None,
            runs: vec![
                Run::new("Disputes are void; see "),
                Run::new("ADGM Courts Rules"),
                Run::new("."),
            ],
            layout: vec![
                Inline::Run(0),
                Inline::Markup(r#"<w:proofErr w:type="gramStart"/>"#.to_string()),
                Inline::Open(r#"<w:hyperlink r:id="rId9">"#.to_string()),
                Inline::Run(1),
                Inline::Close("</w:hyperlink>".to_string()),
                Inline::Run(2),
            ],
            source: Some("<w:p/>".to_string()),
        }
    }

    #[test]
    fn runs_in_different_containers_are_told_apart() {
        let p = linked();
        assert!(p.same_container(0..1));
        assert!(p.same_container(1..2));
        assert!(!p.same_container(0..2));
        assert!(!p.same_container(0..3));
    }

    #[test]
    fn splicing_keeps_surrounding_markup_in_place() {
        let p = linked();
        let runs = vec![
            Run::new("Disputes are "),
            Run::new("void"),
            Run::new("; see "),
            p.runs[1].clone(),
            p.runs[2].clone(),
        ];
        let spliced = p.with_spliced_runs(0..1, runs);

        assert_eq!(spliced.text(), p.text());
        assert_eq!(spliced.source(), None);
        assert_eq!(
            spliced.layout(),
            [
                Inline::Run(0),
                Inline::Run(1),
                Inline::Run(2),
                p.layout[1].clone(),
                p.layout[2].clone(),
                Inline::Run(3),
                p.layout[4].clone(),
                Inline::Run(4),
            ]
        );
    }

    #[test]
    fn markup_between_merged_runs_follows_the_merged_run() {
        let p = Paragraph {
            layout: vec![
                Inline::Run(0),
                Inline::Markup(r#"<w:bookmarkStart w:id="1" w:name="x"/>"#.to_string()),
                Inline::Run(1),
            ],
            ..Paragraph::new(vec![Run::new("Gov"), Run::new("erned")])
        };
        let spliced = p.with_spliced_runs(0..2, vec![Run::new("Governed")]);
        assert_eq!(spliced.layout(), [Inline::Run(0), p.layout[1].clone()]);
    }

    #[test]
    fn next_comment_id_accounts_for_added_comments() {
        let mut doc = ParsedDocument::from_paragraphs(vec![]);
        assert_eq!(doc.next_comment_id(), 0);
        doc.comments.push(Comment {
            id: 4,
            author: "a".to_string(),
            initials: "A".to_string(),
            text: "t".to_string(),
        });
        assert_eq!(doc.next_comment_id(), 5);
    }
}
