use std::io::{Cursor, Read};
use std::sync::{Arc, LazyLock};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;

use super::{
    DocxError, Inline, Package, Paragraph, ParsedDocument, Run, RunProperty, RunStyle, Segment,
    SourceColor, COMMENTS_PART, DOCUMENT_PART,
};

/// Upper bound on the unpacked size of a single package part.
const MAX_PART_BYTES: u64 = 64 * 1024 * 1024;
/// Upper bound on the unpacked size of the whole package.
const MAX_PACKAGE_BYTES: u64 = 256 * 1024 * 1024;

/// Inline containers whose runs are part of the paragraph text. Their tags are kept in the
/// layout and their children are read like paragraph children.
const CONTAINERS: &[&[u8]] = &[
    b"w:hyperlink",
    b"w:ins",
    b"w:moveTo",
    b"w:smartTag",
    b"w:customXml",
    b"w:fldSimple",
    b"w:sdt",
    b"w:sdtContent",
    b"w:dir",
    b"w:bdo",
];

static COMMENT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<w:comment\b[^>]*?\bw:id="(\d+)""#).expect("valid regex"));

/// Parse a .docx file into paragraphs and runs.
///
/// Only paragraphs that are direct children of `w:body` are modelled. Table cells, text
/// boxes and headers stay in the raw template and are written back untouched.
pub fn read_docx(bytes: &[u8]) -> Result<ParsedDocument, DocxError> {
    let parts = read_parts(bytes, MAX_PART_BYTES, MAX_PACKAGE_BYTES)?;

    let document_xml = part_text(&parts, DOCUMENT_PART)?
        .ok_or_else(|| DocxError::MissingPart(DOCUMENT_PART.to_string()))?;
    let (template, paragraphs) = split_body(document_xml)?;

    let max_comment_id = part_text(&parts, COMMENTS_PART)?.and_then(|xml| {
        COMMENT_ID_RE
            .captures_iter(xml)
            .filter_map(|c| c[1].parse::<u32>().ok())
            .max()
    });

    Ok(ParsedDocument {
        paragraphs,
        comments: Vec::new(),
        package: Some(Arc::new(Package {
            parts,
            template,
            max_comment_id,
        })),
    })
}

/// Unpack every file of the zip.
///
/// Sizes declared in the archive are not trusted: each part is read through a cap and
/// the package is rejected once a part or the running total goes over its limit.
fn read_parts(
    bytes: &[u8],
    max_part: u64,
    max_total: u64,
) -> Result<Vec<(String, Vec<u8>)>, DocxError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut parts = Vec::new();
    let mut total = 0u64;
    for i in 0..archive.len() {
        let file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        let mut buf = Vec::new();
        file.take(max_part + 1).read_to_end(&mut buf)?;

        let size = buf.len() as u64;
        if size > max_part {
            return Err(DocxError::TooLarge { part: name, limit: max_part });
        }
        total += size;
        if total > max_total {
            return Err(DocxError::TooLarge {
                part: "package".to_string(),
                limit: max_total,
            });
        }
        parts.push((name, buf));
    }
    Ok(parts)
}

pub(super) fn part_text<'a>(
    parts: &'a [(String, Vec<u8>)],
    name: &str,
) -> Result<Option<&'a str>, DocxError> {
    parts
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, bytes)| {
            std::str::from_utf8(bytes).map_err(|_| DocxError::Encoding(name.to_string()))
        })
        .transpose()
}

fn xml_error(e: impl std::fmt::Display) -> DocxError {
    DocxError::Xml {
        part: DOCUMENT_PART.to_string(),
        message: e.to_string(),
    }
}

/// Cut body-level paragraphs out of `document.xml`.
///
/// Events from a non-trimming reader tile the input, so the byte ranges between
/// paragraphs can be copied verbatim into the template.
fn split_body(xml: &str) -> Result<(Vec<Segment>, Vec<Paragraph>), DocxError> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut template = Vec::new();
    let mut paragraphs = Vec::new();
    let mut raw_start = 0usize;

    loop {
        let start = reader.buffer_position() as usize;
        let in_body = stack.last().is_some_and(|t| t.as_slice() == b"w:body");
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) if in_body && e.name().as_ref() == b"w:p" => {
                let end = skip_element(&mut reader, b"w:p")?;
                cut_paragraph(xml, raw_start, start, end, &mut template, &mut paragraphs)?;
                raw_start = end;
            }
            Event::Empty(e) if in_body && e.name().as_ref() == b"w:p" => {
                let end = reader.buffer_position() as usize;
                cut_paragraph(xml, raw_start, start, end, &mut template, &mut paragraphs)?;
                raw_start = end;
            }
            Event::Start(e) => stack.push(e.name().as_ref().to_vec()),
            Event::End(_) => {
                stack.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if raw_start < xml.len() {
        template.push(Segment::Raw(xml[raw_start..].to_string()));
    }
    Ok((template, paragraphs))
}

fn cut_paragraph(
    xml: &str,
    raw_start: usize,
    start: usize,
    end: usize,
    template: &mut Vec<Segment>,
    paragraphs: &mut Vec<Paragraph>,
) -> Result<(), DocxError> {
    if raw_start < start {
        template.push(Segment::Raw(xml[raw_start..start].to_string()));
    }
    let source = &xml[start..end];
    let mut paragraph = parse_paragraph(source)?;
    paragraph.source = Some(source.to_string());
    template.push(Segment::Paragraph(paragraphs.len()));
    paragraphs.push(paragraph);
    Ok(())
}

/// Consume events up to and including the end tag matching an already-read start tag.
/// Returns the byte offset just past that end tag.
fn skip_element(reader: &mut Reader<&[u8]>, name: &[u8]) -> Result<usize, DocxError> {
    let mut depth = 1usize;
    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) if e.name().as_ref() == name => depth += 1,
            Event::End(e) if e.name().as_ref() == name => {
                depth -= 1;
                if depth == 0 {
                    return Ok(reader.buffer_position() as usize);
                }
            }
            Event::Eof => {
                return Err(xml_error(format!(
                    "unexpected end of input inside <{}>",
                    String::from_utf8_lossy(name)
                )))
            }
            _ => {}
        }
    }
}

fn parse_paragraph(src: &str) -> Result<Paragraph, DocxError> {
    let mut reader = Reader::from_str(src);
    let mut properties = None;
    let mut runs = Vec::new();
    let mut layout = Vec::new();

    match reader.read_event().map_err(xml_error)? {
        Event::Start(_) => {}
        _ => return Ok(Paragraph::default()),
    }

    let mut depth = 0usize;
    loop {
        let start = reader.buffer_position() as usize;
        let event = reader.read_event().map_err(xml_error)?;
        let here = reader.buffer_position() as usize;
        match event {
            Event::Start(e) if is_container(e.name().as_ref()) => {
                depth += 1;
                layout.push(Inline::Open(src[start..here].to_string()));
            }
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                let end = skip_element(&mut reader, &name)?;
                let xml = &src[start..end];
                match name.as_slice() {
                    b"w:pPr" if depth == 0 => properties = Some(xml.to_string()),
                    b"w:r" => {
                        layout.push(Inline::Run(runs.len()));
                        runs.push(parse_run(xml)?);
                    }
                    _ => layout.push(Inline::Markup(xml.to_string())),
                }
            }
            Event::Empty(e) if depth == 0 && e.name().as_ref() == b"w:pPr" => {
                properties = Some(src[start..here].to_string());
            }
            Event::End(_) if depth == 0 => break,
            Event::End(_) => {
                depth -= 1;
                layout.push(Inline::Close(src[start..here].to_string()));
            }
            Event::Eof => break,
            _ if here > start => layout.push(Inline::Markup(src[start..here].to_string())),
            _ => {}
        }
    }
    Ok(Paragraph {
        properties,
        runs,
        layout,
        source: None,
    })
}

fn is_container(name: &[u8]) -> bool {
    CONTAINERS.iter().any(|c| *c == name)
}

fn parse_run(src: &str) -> Result<Run, DocxError> {
    let mut reader = Reader::from_str(src);
    let mut run = Run::default();

    match reader.read_event().map_err(xml_error)? {
        Event::Start(_) => {}
        _ => return Ok(run),
    }

    loop {
        let start = reader.buffer_position() as usize;
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => match e.name().as_ref() {
                b"w:t" => read_text(&mut reader, &mut run.text)?,
                b"w:rPr" => {
                    let end = skip_element(&mut reader, b"w:rPr")?;
                    run.style = parse_run_properties(&src[start..end])?;
                }
                other => {
                    let other = other.to_vec();
                    let end = skip_element(&mut reader, &other)?;
                    run.embedded.push(src[start..end].to_string());
                }
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"w:tab" => run.text.push('\t'),
                b"w:cr" => run.text.push('\n'),
                b"w:br" if is_line_break(&e)? => run.text.push('\n'),
                b"w:t" | b"w:rPr" => {}
                _ => {
                    let end = reader.buffer_position() as usize;
                    run.embedded.push(src[start..end].to_string());
                }
            },
            Event::End(_) | Event::Eof => break,
            _ => {}
        }
    }
    Ok(run)
}

fn read_text(reader: &mut Reader<&[u8]>, out: &mut String) -> Result<(), DocxError> {
    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Text(t) => out.push_str(&t.unescape().map_err(xml_error)?),
            Event::CData(c) => out.push_str(&String::from_utf8_lossy(&c)),
            Event::End(_) | Event::Eof => return Ok(()),
            _ => {}
        }
    }
}

/// Page and column breaks are layout, not text; they stay as embedded markup.
fn is_line_break(e: &BytesStart<'_>) -> Result<bool, DocxError> {
    let kind = attribute(e, "w:type")?;
    Ok(matches!(kind.as_deref(), None | Some("textWrapping")))
}

fn attribute(e: &BytesStart<'_>, name: &str) -> Result<Option<String>, DocxError> {
    e.try_get_attribute(name)
        .map_err(xml_error)?
        .map(|a| a.unescape_value().map(|v| v.into_owned()).map_err(xml_error))
        .transpose()
}

fn parse_run_properties(src: &str) -> Result<RunStyle, DocxError> {
    let mut reader = Reader::from_str(src);
    let mut style = RunStyle::default();

    match reader.read_event().map_err(xml_error)? {
        Event::Start(_) => {}
        _ => return Ok(style),
    }

    loop {
        let start = reader.buffer_position() as usize;
        let (element, end) = match reader.read_event().map_err(xml_error)? {
            Event::Empty(e) => (e.into_owned(), reader.buffer_position() as usize),
            Event::Start(e) => {
                let e = e.into_owned();
                let end = skip_element(&mut reader, e.name().as_ref())?;
                (e, end)
            }
            Event::End(_) | Event::Eof => break,
            _ => continue,
        };

        match element.name().as_ref() {
            b"w:b" => style.bold = Some(is_on(attribute(&element, "w:val")?.as_deref())),
            b"w:color" => {
                style.color = attribute(&element, "w:val")?;
                if element.attributes().count() > 1 || style.color.is_none() {
                    style.color_source = Some(SourceColor {
                        val: style.color.clone(),
                        xml: src[start..end].to_string(),
                    });
                }
            }
            name => style.passthrough.push(RunProperty {
                name: String::from_utf8_lossy(name).into_owned(),
                xml: src[start..end].to_string(),
            }),
        }
    }
    Ok(style)
}

fn is_on(val: Option<&str>) -> bool {
    !matches!(val, Some("0" | "false" | "off"))
}
