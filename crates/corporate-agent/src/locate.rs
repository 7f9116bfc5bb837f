/// Locate a quoted span inside a paragraph and split its runs around it.
use std::ops::Range;

use tracing::debug;

use crate::docx::{Paragraph, Run};

/// A paragraph's runs re-split at the boundaries of a located span.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanMatch {
    /// Runs before the span. A run cut by the span start keeps its style.
    pub prefix: Vec<Run>,
    /// The span as a single highlighted run, in the paragraph's original case.
    pub matched: Run,
    /// Runs after the span. A run cut by the span end keeps its style.
    pub suffix: Vec<Run>,
    /// Indices of the paragraph runs the span overlaps.
    pub replaced: Range<usize>,
}

impl SpanMatch {
    pub fn matched_text(&self) -> &str {
        &self.matched.text
    }

    pub fn into_runs(self) -> Vec<Run> {
        let mut runs = self.prefix;
        runs.push(self.matched);
        runs.extend(self.suffix);
        runs
    }
}

/// Find the first case-insensitive occurrence of `needle` in the paragraph text.
///
/// Returns `None` for an empty needle, when there is no occurrence, or when the occurrence
/// crosses the boundary of a hyperlink, tracked insertion or similar container.
pub fn locate(paragraph: &Paragraph, needle: &str) -> Option<SpanMatch> {
    if needle.is_empty() {
        return None;
    }
    let text = paragraph.text();
    let (start, end) = find_case_insensitive(&text, needle)?;
    if start >= end {
        return None;
    }
    let span = split_runs(&paragraph.runs, start, end);
    if !paragraph.same_container(span.replaced.clone()) {
        debug!(needle, "match crosses a container boundary, not annotated");
        return None;
    }
    Some(span)
}

/// Byte range in `haystack` of the first case-insensitive match of `needle`.
fn find_case_insensitive(haystack: &str, needle: &str) -> Option<(usize, usize)> {
    // Lower-casing can change byte lengths, so keep a map from each folded byte back to
    // the byte offset of the original char that produced it.
    let mut folded = String::with_capacity(haystack.len());
    let mut origin = Vec::with_capacity(haystack.len());
    for (offset, ch) in haystack.char_indices() {
        for lower in ch.to_lowercase() {
            let before = folded.len();
            folded.push(lower);
            origin.extend(std::iter::repeat(offset).take(folded.len() - before));
        }
    }

    let folded_needle: String = needle.chars().flat_map(char::to_lowercase).collect();
    let at = folded.find(&folded_needle)?;
    let stop = at + folded_needle.len();
    let start = origin[at];
    let end = origin.get(stop).copied().unwrap_or(haystack.len());
    Some((start, end))
}

fn split_runs(runs: &[Run], start: usize, end: usize) -> SpanMatch {
    let mut prefix = Vec::new();
    let mut suffix = Vec::new();
    let mut matched = Run::default();
    let mut matched_style = None;
    let mut replaced: Option<Range<usize>> = None;

    let mut run_start = 0;
    for (index, run) in runs.iter().enumerate() {
        let run_end = run_start + run.text.len();

        if run_end <= start {
            prefix.push(run.clone());
        } else if run_start >= end {
            suffix.push(run.clone());
        } else {
            let cut_from = start.saturating_sub(run_start);
            let cut_to = end.min(run_end) - run_start;
            replaced.get_or_insert(index..index).end = index + 1;

            if cut_from > 0 {
                prefix.push(Run {
                    text: run.text[..cut_from].to_string(),
                    style: run.style.clone(),
                    embedded: Vec::new(),
                    comment_ids: run.comment_ids.clone(),
                });
            }

            matched.text.push_str(&run.text[cut_from..cut_to]);
            matched_style.get_or_insert_with(|| run.style.highlighted());
            for id in &run.comment_ids {
                if !matched.comment_ids.contains(id) {
                    matched.comment_ids.push(*id);
                }
            }

            if run_end > end {
                suffix.push(Run {
                    text: run.text[cut_to..].to_string(),
                    style: run.style.clone(),
                    embedded: run.embedded.clone(),
                    comment_ids: run.comment_ids.clone(),
                });
            } else {
                matched.embedded.extend(run.embedded.iter().cloned());
            }
        }
        run_start = run_end;
    }

    matched.style = matched_style.unwrap_or_default();
    SpanMatch {
        prefix,
        matched,
        suffix,
        replaced: replaced.unwrap_or_default(),
    }
}
