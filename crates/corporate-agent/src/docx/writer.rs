use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::sync::LazyLock;

use quick_xml::escape::escape;
use regex::Regex;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::reader::part_text;
use super::{
    Comment, DocxError, Inline, Package, Paragraph, ParsedDocument, Run, RunStyle, Segment,
    COMMENTS_PART, CONTENT_TYPES_PART, DOCUMENT_PART, DOCUMENT_RELS_PART,
};

const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const COMMENTS_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/comments";
const COMMENTS_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.comments+xml";
const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;

/// Schema order of `<w:rPr>` children (CT_RPr). Word rejects out-of-order properties.
const RPR_ORDER: &[&str] = &[
    "w:rStyle", "w:rFonts", "w:b", "w:bCs", "w:i", "w:iCs", "w:caps", "w:smallCaps",
    "w:strike", "w:dstrike", "w:outline", "w:shadow", "w:emboss", "w:imprint", "w:noProof",
    "w:snapToGrid", "w:vanish", "w:webHidden", "w:color", "w:spacing", "w:w", "w:kern",
    "w:position", "w:sz", "w:szCs", "w:highlight", "w:u", "w:effect", "w:bdr", "w:shd",
    "w:fitText", "w:vertAlign", "w:rtl", "w:cs", "w:em", "w:lang", "w:eastAsianLayout",
    "w:specVanish", "w:oMath", "w:rPrChange",
];

static REL_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bId="rId(\d+)""#).expect("valid regex"));

/// Serialize a document to .docx bytes.
///
/// With a source package every part is copied through; only `document.xml` is re-rendered
/// and, when comments were added, the comments part, its relationship and content type
/// are merged in. A document built in memory is written as a minimal package.
pub fn write_docx(doc: &ParsedDocument) -> Result<Vec<u8>, DocxError> {
    let parts = match doc.package() {
        Some(package) => repackage(package, doc)?,
        None => minimal_package(doc),
    };

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, bytes) in &parts {
        writer.start_file(name.as_str(), options)?;
        writer.write_all(bytes)?;
    }
    Ok(writer.finish()?.into_inner())
}

fn repackage(package: &Package, doc: &ParsedDocument) -> Result<Vec<(String, Vec<u8>)>, DocxError> {
    let expected = package
        .template
        .iter()
        .filter(|s| matches!(s, Segment::Paragraph(_)))
        .count();
    if expected != doc.paragraphs.len() {
        return Err(DocxError::Structure(format!(
            "source has {expected} body paragraphs, document has {}",
            doc.paragraphs.len()
        )));
    }

    let has_comments = !doc.comments.is_empty();
    let mut parts = Vec::with_capacity(package.parts.len() + 1);
    for (name, bytes) in &package.parts {
        let rewritten = match name.as_str() {
            DOCUMENT_PART => Some(render_document_from_template(
                &package.template,
                &doc.paragraphs,
            )),
            COMMENTS_PART if has_comments => {
                let existing = text_of(package, COMMENTS_PART)?;
                Some(merge_comments(existing, &doc.comments))
            }
            DOCUMENT_RELS_PART if has_comments => {
                Some(ensure_comments_relationship(text_of(package, DOCUMENT_RELS_PART)?))
            }
            CONTENT_TYPES_PART if has_comments => {
                Some(ensure_comments_content_type(text_of(package, CONTENT_TYPES_PART)?))
            }
            _ => None,
        };
        parts.push((
            name.clone(),
            rewritten.map_or_else(|| bytes.clone(), String::into_bytes),
        ));
    }

    if has_comments {
        if !package.parts.iter().any(|(n, _)| n == COMMENTS_PART) {
            parts.push((COMMENTS_PART.to_string(), new_comments_part(&doc.comments).into_bytes()));
        }
        if !package.parts.iter().any(|(n, _)| n == DOCUMENT_RELS_PART) {
            parts.push((
                DOCUMENT_RELS_PART.to_string(),
                document_relationships(true).into_bytes(),
            ));
        }
    }
    Ok(parts)
}

fn text_of<'a>(package: &'a Package, name: &str) -> Result<&'a str, DocxError> {
    part_text(&package.parts, name)?.ok_or_else(|| DocxError::MissingPart(name.to_string()))
}

fn minimal_package(doc: &ParsedDocument) -> Vec<(String, Vec<u8>)> {
    let has_comments = !doc.comments.is_empty();
    let comments_override = if has_comments {
        format!(r#"<Override PartName="/{COMMENTS_PART}" ContentType="{COMMENTS_CONTENT_TYPE}"/>"#)
    } else {
        String::new()
    };
    let content_types = format!(
        concat!(
            "{decl}",
            r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
            r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#,
            r#"<Default Extension="xml" ContentType="application/xml"/>"#,
            r#"<Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>"#,
            "{comments}</Types>"
        ),
        decl = XML_DECL,
        comments = comments_override,
    );
    let root_rels = format!(
        concat!(
            "{decl}",
            r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
            r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/>"#,
            "</Relationships>"
        ),
        decl = XML_DECL,
    );

    let mut body = String::new();
    for paragraph in &doc.paragraphs {
        render_paragraph(paragraph, &mut body);
    }
    let document = format!(
        r#"{XML_DECL}<w:document xmlns:w="{W_NS}"><w:body>{body}</w:body></w:document>"#
    );

    let mut parts = vec![
        (CONTENT_TYPES_PART.to_string(), content_types.into_bytes()),
        ("_rels/.rels".to_string(), root_rels.into_bytes()),
        (DOCUMENT_PART.to_string(), document.into_bytes()),
        (
            DOCUMENT_RELS_PART.to_string(),
            document_relationships(has_comments).into_bytes(),
        ),
    ];
    if has_comments {
        parts.push((COMMENTS_PART.to_string(), new_comments_part(&doc.comments).into_bytes()));
    }
    parts
}

fn document_relationships(with_comments: bool) -> String {
    let comments = if with_comments {
        format!(r#"<Relationship Id="rId1" Type="{COMMENTS_REL_TYPE}" Target="comments.xml"/>"#)
    } else {
        String::new()
    };
    format!(
        r#"{XML_DECL}<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{comments}</Relationships>"#
    )
}

fn render_document_from_template(template: &[Segment], paragraphs: &[Paragraph]) -> String {
    let mut out = String::new();
    for segment in template {
        match segment {
            Segment::Raw(raw) => out.push_str(raw),
            Segment::Paragraph(i) => {
                if let Some(paragraph) = paragraphs.get(*i) {
                    render_paragraph(paragraph, &mut out);
                }
            }
        }
    }
    out
}

fn render_paragraph(paragraph: &Paragraph, out: &mut String) {
    if let Some(source) = paragraph.source() {
        out.push_str(source);
        return;
    }

    out.push_str("<w:p>");
    if let Some(props) = &paragraph.properties {
        out.push_str(props);
    }

    let mut rendered = vec![false; paragraph.runs.len()];
    for item in paragraph.layout() {
        match item {
            Inline::Run(i) => {
                if rendered.get(*i) == Some(&false) {
                    rendered[*i] = true;
                    render_anchored_run(&paragraph.runs, *i, out);
                }
            }
            Inline::Open(xml) | Inline::Close(xml) | Inline::Markup(xml) => out.push_str(xml),
        }
    }
    // runs added without a layout position go last
    for (i, done) in rendered.iter().enumerate() {
        if !done {
            render_anchored_run(&paragraph.runs, i, out);
        }
    }
    out.push_str("</w:p>");
}

/// Render `runs[i]`, opening and closing the comment ranges it starts or ends.
fn render_anchored_run(runs: &[Run], i: usize, out: &mut String) {
    let no_ids: &[u32] = &[];
    let run = &runs[i];
    let prev = match i.checked_sub(1) {
        Some(p) => runs[p].comment_ids.as_slice(),
        None => no_ids,
    };
    let next = runs.get(i + 1).map_or(no_ids, |r| r.comment_ids.as_slice());

    for id in run.comment_ids.iter().filter(|id| !prev.contains(id)) {
        out.push_str(&format!(r#"<w:commentRangeStart w:id="{id}"/>"#));
    }
    render_run(run, out);
    for id in run.comment_ids.iter().filter(|id| !next.contains(id)) {
        out.push_str(&format!(
            r#"<w:commentRangeEnd w:id="{id}"/><w:r><w:commentReference w:id="{id}"/></w:r>"#
        ));
    }
}

fn render_run(run: &Run, out: &mut String) {
    out.push_str("<w:r>");
    render_run_properties(&run.style, out);
    render_text(&run.text, out);
    for embedded in &run.embedded {
        out.push_str(embedded);
    }
    out.push_str("</w:r>");
}

fn render_run_properties(style: &RunStyle, out: &mut String) {
    let mut props: Vec<(&str, String)> = style
        .passthrough
        .iter()
        .map(|p| (p.name.as_str(), p.xml.clone()))
        .collect();
    match style.bold {
        Some(true) => props.push(("w:b", "<w:b/>".to_string())),
        Some(false) => props.push(("w:b", r#"<w:b w:val="0"/>"#.to_string())),
        None => {}
    }
    match (&style.color_source, &style.color) {
        (Some(source), color) if source.val == *color => {
            props.push(("w:color", source.xml.clone()));
        }
        (_, Some(color)) => {
            let xml = format!(r#"<w:color w:val="{}"/>"#, escape(color.as_str()));
            props.push(("w:color", xml));
        }
        _ => {}
    }
    if props.is_empty() {
        return;
    }
    props.sort_by_key(|(name, _)| rpr_rank(name));

    out.push_str("<w:rPr>");
    for (_, xml) in props {
        out.push_str(&xml);
    }
    out.push_str("</w:rPr>");
}

fn rpr_rank(name: &str) -> usize {
    RPR_ORDER
        .iter()
        .position(|n| *n == name)
        .unwrap_or(RPR_ORDER.len())
}

fn render_text(text: &str, out: &mut String) {
    let mut pending = String::new();
    let flush = |pending: &mut String, out: &mut String| {
        if !pending.is_empty() {
            out.push_str(r#"<w:t xml:space="preserve">"#);
            out.push_str(&escape(pending.as_str()));
            out.push_str("</w:t>");
            pending.clear();
        }
    };
    for ch in text.chars() {
        match ch {
            '\t' => {
                flush(&mut pending, out);
                out.push_str("<w:tab/>");
            }
            '\n' => {
                flush(&mut pending, out);
                out.push_str("<w:br/>");
            }
            c => pending.push(c),
        }
    }
    flush(&mut pending, out);
}

fn comment_xml(comment: &Comment) -> String {
    let mut out = format!(
        r#"<w:comment w:id="{}" w:author="{}" w:initials="{}">"#,
        comment.id,
        escape(comment.author.as_str()),
        escape(comment.initials.as_str())
    );
    for line in comment.text.lines() {
        out.push_str("<w:p><w:r>");
        render_text(line, &mut out);
        out.push_str("</w:r></w:p>");
    }
    out.push_str("</w:comment>");
    out
}

fn new_comments_part(comments: &[Comment]) -> String {
    let body: String = comments.iter().map(comment_xml).collect();
    format!(r#"{XML_DECL}<w:comments xmlns:w="{W_NS}">{body}</w:comments>"#)
}

fn merge_comments(existing: &str, comments: &[Comment]) -> String {
    let added: String = comments.iter().map(comment_xml).collect();
    if let Some(idx) = existing.rfind("</w:comments>") {
        let mut out = existing.to_string();
        out.insert_str(idx, &added);
        return out;
    }
    // self-closing <w:comments .../>
    let trimmed = existing.trim_end();
    match trimmed.strip_suffix("/>") {
        Some(head) => format!("{head}>{added}</w:comments>"),
        None => new_comments_part(comments),
    }
}

fn ensure_comments_relationship(rels: &str) -> String {
    if rels.contains(COMMENTS_REL_TYPE) {
        return rels.to_string();
    }
    let used: HashSet<u32> = REL_ID_RE
        .captures_iter(rels)
        .filter_map(|c| c[1].parse().ok())
        .collect();
    let next = used.iter().max().map_or(1, |m| m + 1);
    let rel = format!(
        r#"<Relationship Id="rId{next}" Type="{COMMENTS_REL_TYPE}" Target="comments.xml"/>"#
    );
    insert_before_close(rels, "</Relationships>", &rel)
}

fn ensure_comments_content_type(types: &str) -> String {
    let part_name = format!("/{COMMENTS_PART}");
    if types.contains(&format!(r#"PartName="{part_name}""#)) {
        return types.to_string();
    }
    let entry = format!(
        r#"<Override PartName="{part_name}" ContentType="{COMMENTS_CONTENT_TYPE}"/>"#
    );
    insert_before_close(types, "</Types>", &entry)
}

fn insert_before_close(xml: &str, close: &str, insert: &str) -> String {
    match xml.rfind(close) {
        Some(idx) => {
            let mut out = xml.to_string();
            out.insert_str(idx, insert);
            out
        }
        None => xml.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::{read_docx, RunProperty, SourceColor};
    use pretty_assertions::assert_eq;

    fn styled_doc() -> ParsedDocument {
        let style = RunStyle {
            passthrough: vec![RunProperty {
                name: "w:sz".to_string(),
                xml: r#"<w:sz w:val="28"/>"#.to_string(),
            }],
            ..RunStyle::default()
        };
        ParsedDocument::from_paragraphs(vec![
            Paragraph::new(vec![
                Run::styled("Directors & officers\t", style.clone()),
                Run::styled("must <sign>", style.highlighted()),
            ]),
            Paragraph::new(vec![Run::new("second line")]),
        ])
    }

    #[test]
    fn run_properties_follow_schema_order() {
        let mut out = String::new();
        let property = |name: &str, xml: &str| RunProperty {
            name: name.to_string(),
            xml: xml.to_string(),
        };
        let style = RunStyle {
            bold: Some(true),
            color: Some("FF0000".to_string()),
            passthrough: vec![
                property("w:sz", r#"<w:sz w:val="20"/>"#),
                property("w:rFonts", r#"<w:rFonts w:ascii="Arial"/>"#),
            ],
            ..RunStyle::default()
        };
        render_run_properties(&style, &mut out);
        assert_eq!(
            out,
            concat!(
                r#"<w:rPr><w:rFonts w:ascii="Arial"/><w:b/>"#,
                r#"<w:color w:val="FF0000"/><w:sz w:val="20"/></w:rPr>"#
            )
        );
    }

    #[test]
    fn theme_color_is_kept_until_the_run_is_highlighted() {
        let themed = r#"<w:color w:val="1F3864" w:themeColor="accent1" w:themeShade="BF"/>"#;
        let style = RunStyle {
            color: Some("1F3864".to_string()),
            color_source: Some(SourceColor {
                val: Some("1F3864".to_string()),
                xml: themed.to_string(),
            }),
            ..RunStyle::default()
        };

        let mut plain = String::new();
        render_run_properties(&style, &mut plain);
        assert_eq!(plain, format!("<w:rPr>{themed}</w:rPr>"));

        let mut marked = String::new();
        render_run_properties(&style.highlighted(), &mut marked);
        assert!(marked.contains(r#"<w:color w:val="FF0000"/>"#));
        assert!(!marked.contains("themeColor"));
    }

    #[test]
    fn comment_range_wraps_anchored_runs() {
        let mut anchored = Run::new("bad clause");
        anchored.comment_ids = vec![3];
        let paragraph = Paragraph::new(vec![Run::new("A "), anchored, Run::new(" end")]);
        let mut out = String::new();
        render_paragraph(&paragraph, &mut out);
        let start = out.find(r#"<w:commentRangeStart w:id="3"/>"#).expect("range start");
        let text = out.find("bad clause").expect("text");
        let end = out.find(r#"<w:commentRangeEnd w:id="3"/>"#).expect("range end");
        assert!(start < text && text < end);
        assert!(out.contains(r#"<w:commentReference w:id="3"/>"#));
    }

    #[test]
    fn in_memory_document_survives_write_and_read() {
        let doc = styled_doc();
        let bytes = write_docx(&doc).expect("write");
        let reread = read_docx(&bytes).expect("read");

        assert_eq!(reread.paragraphs.len(), 2);
        assert_eq!(reread.full_text(), doc.full_text());
        let original: Vec<(&str, &RunStyle)> = doc.paragraphs[0]
            .runs
            .iter()
            .map(|r| (r.text.as_str(), &r.style))
            .collect();
        let restored: Vec<(&str, &RunStyle)> = reread.paragraphs[0]
            .runs
            .iter()
            .map(|r| (r.text.as_str(), &r.style))
            .collect();
        assert_eq!(restored, original);
    }

    #[test]
    fn comments_are_added_to_package_with_relationship() {
        let mut doc = read_docx(&write_docx(&styled_doc()).expect("write")).expect("read");
        let mut runs = doc.paragraphs[1].runs.clone();
        runs[0].comment_ids = vec![doc.next_comment_id()];
        doc.paragraphs[1] = doc.paragraphs[1].with_spliced_runs(0..1, runs);
        doc.comments.push(Comment {
            id: 0,
            author: "Corporate Agent".to_string(),
            initials: "CA".to_string(),
            text: "Issue: x\nSuggestion: y".to_string(),
        });

        let bytes = write_docx(&doc).expect("write annotated");
        let reread = read_docx(&bytes).expect("read annotated");
        assert_eq!(reread.next_comment_id(), 1);
        assert_eq!(reread.full_text(), doc.full_text());

        let package = reread.package().expect("package");
        let rels = part_text(&package.parts, DOCUMENT_RELS_PART).unwrap().unwrap();
        assert!(rels.contains(COMMENTS_REL_TYPE));
        let types = part_text(&package.parts, CONTENT_TYPES_PART).unwrap().unwrap();
        assert!(types.contains(COMMENTS_CONTENT_TYPE));
        let comments = part_text(&package.parts, COMMENTS_PART).unwrap().unwrap();
        assert!(comments.contains("Suggestion: y"));
    }

    #[test]
    fn existing_comments_part_is_extended_not_replaced() {
        let existing = r#"<w:comments xmlns:w="x"><w:comment w:id="0" w:author="A"/></w:comments>"#;
        let merged = merge_comments(
            existing,
            &[Comment {
                id: 1,
                author: "B".to_string(),
                initials: "B".to_string(),
                text: "note".to_string(),
            }],
        );
        assert!(merged.contains(r#"w:id="0""#));
        assert!(merged.contains(r#"w:id="1""#));
        assert!(merged.ends_with("</w:comments>"));
    }

    #[test]
    fn relationship_id_does_not_collide() {
        let rels = concat!(
            r#"<Relationships><Relationship Id="rId1"/>"#,
            r#"<Relationship Id="rId7"/></Relationships>"#
        );
        let updated = ensure_comments_relationship(rels);
        assert!(updated.contains(r#"Id="rId8""#));
        assert_eq!(ensure_comments_relationship(&updated), updated);
    }

    #[test]
    fn changed_paragraph_count_is_rejected() {
        let mut doc = read_docx(&write_docx(&styled_doc()).expect("write")).expect("read");
        doc.paragraphs.pop();
        assert!(matches!(write_docx(&doc), Err(DocxError::Structure(_))));
    }
}
