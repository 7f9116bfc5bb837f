/// Regulation knowledge base: load reference files, chunk, embed and index them.
///
/// Supports .docx, .pdf, .txt and .md files at the top level of the knowledge-base
/// directory. A rebuild replaces the whole `regulations` table and drops cached reviews.
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use arrow_array::{
    ArrayRef, FixedSizeListArray, Float32Array, RecordBatch, StringArray, UInt32Array,
};
use arrow_schema::{DataType, Field, Schema};
use regex::Regex;
use tracing::{info, warn};

use agent_common::embedding::{Embedder, EMBEDDING_DIM};
use agent_common::error::CommonError;
use agent_common::vectordb::VectorDb;

use crate::cache::ReviewCache;
use crate::docx::read_docx;
use crate::error::AppError;
use crate::rag::REGULATIONS_TABLE;

pub const CHUNK_SIZE: usize = 1000;
pub const CHUNK_OVERLAP: usize = 150;

/// Split points, coarsest first.
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " "];

static INLINE_SPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\S\n]+").expect("valid regex"));
static BLANK_LINES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n(?:[^\S\n]*\n)+").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildSummary {
    pub sources: usize,
    pub chunks: usize,
}

/// Text of one knowledge-base file.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeSource {
    pub name: String,
    pub text: String,
}

/// One indexed passage.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub source: String,
    pub index: u32,
    pub text: String,
}

pub struct KnowledgeIndexer {
    dir: PathBuf,
    embedder: Arc<Embedder>,
    vectordb: Arc<VectorDb>,
    cache: Arc<ReviewCache>,
}

impl KnowledgeIndexer {
    pub fn new(
        dir: PathBuf,
        embedder: Arc<Embedder>,
        vectordb: Arc<VectorDb>,
        cache: Arc<ReviewCache>,
    ) -> Self {
        Self {
            dir,
            embedder,
            vectordb,
            cache,
        }
    }

    /// Build the index at startup if it does not exist yet and there is something to build from.
    pub async fn ensure_index(&self) -> Result<Option<RebuildSummary>, AppError> {
        if self.vectordb.has_table(REGULATIONS_TABLE).await? {
            info!(table = REGULATIONS_TABLE, "regulation index present");
            return Ok(None);
        }
        if !self.dir.is_dir() {
            warn!(
                dir = %self.dir.display(),
                "regulation index missing and knowledge base directory not found; reviews will fail until it is built"
            );
            return Ok(None);
        }
        info!("regulation index missing, building");
        self.rebuild().await.map(Some)
    }

    /// Re-read the knowledge base directory and replace the regulation index.
    pub async fn rebuild(&self) -> Result<RebuildSummary, AppError> {
        let dir = self.dir.clone();
        let sources = tokio::task::spawn_blocking(move || load_sources(&dir))
            .await
            .map_err(|e| AppError::KnowledgeBase(format!("loader task failed: {e}")))??;

        let chunks: Vec<Chunk> = sources.iter().flat_map(chunk_source).collect();
        if chunks.is_empty() {
            return Err(AppError::KnowledgeBase(format!(
                "no indexable text in {}",
                self.dir.display()
            )));
        }
        info!(sources = sources.len(), chunks = chunks.len(), "knowledge base chunked");

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_passages(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(AppError::Common(CommonError::Embedding(format!(
                "embedding count mismatch: expected {}, got {}",
                chunks.len(),
                embeddings.len()
            ))));
        }

        let batch = build_record_batch(&chunks, &embeddings)?;
        let schema = batch.schema();
        self.vectordb
            .create_or_replace_table(REGULATIONS_TABLE, schema, vec![batch])
            .await?;

        self.cache.invalidate_all().await;

        let summary = RebuildSummary {
            sources: sources.len(),
            chunks: chunks.len(),
        };
        info!(sources = summary.sources, chunks = summary.chunks, "regulation index rebuilt");
        Ok(summary)
    }
}

/// Load every supported file in `dir`, in name order. Unreadable files are skipped.
pub fn load_sources(dir: &Path) -> Result<Vec<KnowledgeSource>, AppError> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        AppError::KnowledgeBase(format!("cannot read directory {}: {e}", dir.display()))
    })?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    paths.sort();

    if paths.is_empty() {
        return Err(AppError::KnowledgeBase(format!(
            "no files in {}",
            dir.display()
        )));
    }

    let mut sources = Vec::new();
    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match load_source(&path) {
            Ok(Some(text)) if !text.trim().is_empty() => {
                info!(file = %name, chars = text.len(), "loaded knowledge source");
                sources.push(KnowledgeSource { name, text });
            }
            Ok(Some(_)) => warn!(file = %name, "knowledge source has no text, skipped"),
            Ok(None) => info!(file = %name, "unsupported file type, skipped"),
            Err(e) => warn!(file = %name, error = %e, "failed to load knowledge source, skipped"),
        }
    }
    Ok(sources)
}

/// Plain text of a supported file, or `None` when the extension is not supported.
fn load_source(path: &Path) -> Result<Option<String>, AppError> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let text = match ext.as_str() {
        "docx" => read_docx(&std::fs::read(path)?)?.full_text(),
        "pdf" => pdf_extract::extract_text(path)
            .map_err(|e| AppError::KnowledgeBase(format!("pdf extraction failed: {e}")))?,
        "txt" | "md" => std::fs::read_to_string(path)?,
        _ => return Ok(None),
    };
    Ok(Some(text))
}

fn chunk_source(source: &KnowledgeSource) -> Vec<Chunk> {
    split_text(&source.text, CHUNK_SIZE, CHUNK_OVERLAP)
        .into_iter()
        .enumerate()
        .map(|(i, text)| Chunk {
            source: source.name.clone(),
            index: i as u32,
            text,
        })
        .collect()
}

/// Collapse runs of spaces and blank lines.
pub fn normalize_whitespace(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    let text = INLINE_SPACE_RE.replace_all(&text, " ");
    BLANK_LINES_RE.replace_all(&text, "\n\n").trim().to_string()
}

/// Split text into chunks of at most `size` chars, each starting with up to `overlap`
/// chars carried over from the end of the previous chunk.
///
/// Cuts at paragraph breaks where possible, then lines, sentences, words, and only as a
/// last resort in the middle of a word.
pub fn split_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let text = normalize_whitespace(text);
    if text.is_empty() {
        return Vec::new();
    }
    let pieces = split_recursive(&text, SEPARATORS, size);
    merge_pieces(pieces, size, overlap)
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Break `text` into pieces no longer than `size`, keeping separators attached.
fn split_recursive<'a>(text: &'a str, separators: &[&str], size: usize) -> Vec<&'a str> {
    if char_len(text) <= size {
        return vec![text];
    }
    let Some((sep, finer)) = separators.split_first() else {
        return hard_split(text, size);
    };
    if !text.contains(sep) {
        return split_recursive(text, finer, size);
    }

    let mut pieces = Vec::new();
    for part in text.split_inclusive(sep) {
        if char_len(part) <= size {
            pieces.push(part);
        } else {
            pieces.extend(split_recursive(part, finer, size));
        }
    }
    pieces
}

fn hard_split(text: &str, size: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let cut = rest
            .char_indices()
            .nth(size)
            .map_or(rest.len(), |(i, _)| i);
        let (head, tail) = rest.split_at(cut);
        pieces.push(head);
        rest = tail;
    }
    pieces
}

fn merge_pieces(pieces: Vec<&str>, size: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut window_len = 0usize;

    for piece in pieces {
        let piece_len = char_len(piece);
        if window_len + piece_len > size && !window.is_empty() {
            push_chunk(&window, &mut chunks);
            while window_len > overlap || (window_len + piece_len > size && !window.is_empty()) {
                if let Some(dropped) = window.pop_front() {
                    window_len -= char_len(dropped);
                }
            }
        }
        window.push_back(piece);
        window_len += piece_len;
    }
    if !window.is_empty() {
        push_chunk(&window, &mut chunks);
    }
    chunks
}

fn push_chunk(window: &VecDeque<&str>, chunks: &mut Vec<String>) {
    let chunk: String = window.iter().copied().collect();
    let chunk = chunk.trim();
    if !chunk.is_empty() {
        chunks.push(chunk.to_string());
    }
}

/// Arrow batch for the `regulations` table.
fn build_record_batch(chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<RecordBatch, AppError> {
    let dim = EMBEDDING_DIM as i32;
    let vector_error = |what: &str, e: arrow_schema::ArrowError| {
        AppError::Common(CommonError::VectorDb(format!("failed to build {what}: {e}")))
    };

    let ids: Vec<String> = chunks
        .iter()
        .map(|c| format!("{}#{}", c.source, c.index))
        .collect();
    let id_array: ArrayRef = Arc::new(StringArray::from(ids));
    let source_array: ArrayRef = Arc::new(StringArray::from(
        chunks.iter().map(|c| c.source.as_str()).collect::<Vec<_>>(),
    ));
    let chunk_array: ArrayRef = Arc::new(UInt32Array::from(
        chunks.iter().map(|c| c.index).collect::<Vec<_>>(),
    ));
    let text_array: ArrayRef = Arc::new(StringArray::from(
        chunks.iter().map(|c| c.text.as_str()).collect::<Vec<_>>(),
    ));

    let item = Arc::new(Field::new("item", DataType::Float32, true));
    let flat: Vec<f32> = embeddings.iter().flat_map(|e| e.iter().copied()).collect();
    let embedding_array: ArrayRef = Arc::new(
        FixedSizeListArray::try_new(
            Arc::clone(&item),
            dim,
            Arc::new(Float32Array::from(flat)),
            None,
        )
        .map_err(|e| vector_error("embedding array", e))?,
    );

    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("source", DataType::Utf8, false),
        Field::new("chunk", DataType::UInt32, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("embedding", DataType::FixedSizeList(item, dim), false),
    ]));

    RecordBatch::try_new(
        schema,
        vec![id_array, source_array, chunk_array, text_array, embedding_array],
    )
    .map_err(|e| vector_error("record batch", e))
}
