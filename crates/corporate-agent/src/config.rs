use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

/// Application configuration loaded explicitly from environment variables.
///
/// The vector store path has no default. Redis is optional; without it the server runs
/// without a review cache.
#[derive(Debug, Clone)]
pub struct Config {
    /// Redis connection URL (e.g. "redis://127.0.0.1:6379"). `None` disables caching.
    pub redis_url: Option<String>,
    /// Filesystem path to the LanceDB data directory.
    pub lancedb_path: String,
    /// Reference regulations and templates to index.
    pub knowledge_base_dir: PathBuf,
    /// Where reviewed copies are written.
    pub output_dir: PathBuf,
    /// JSON checklist table. `None` uses the built-in incorporation checklist.
    pub checklist_path: Option<PathBuf>,
    pub model: String,
    pub temperature: f32,
    /// Documents reviewed in parallel.
    pub concurrency: usize,
    /// Upper bound on one document's review, retrieval and model call included.
    pub review_timeout: Duration,
    /// Regulation passages retrieved per document.
    pub top_k: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `LANCEDB_PATH`: path to LanceDB data directory
    ///
    /// Optional:
    /// - `REDIS_URL`: Redis connection string (omit to disable caching)
    /// - `KNOWLEDGE_BASE_DIR` (default `./templates_for_db`)
    /// - `REVIEW_OUTPUT_DIR` (default `./temp_reviewed_docs`)
    /// - `CHECKLIST_PATH`
    /// - `REVIEW_MODEL` (default `gpt-4o-mini`), `REVIEW_TEMPERATURE` (default 0.2)
    /// - `REVIEW_CONCURRENCY` (default 4), `REVIEW_TIMEOUT_SECS` (default 120)
    /// - `RETRIEVAL_TOP_K` (default 4)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let var = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        let lancedb_path = var("LANCEDB_PATH").ok_or_else(|| {
            AppError::Config("LANCEDB_PATH environment variable is required".to_string())
        })?;

        let concurrency: usize = parse_or(var("REVIEW_CONCURRENCY"), "REVIEW_CONCURRENCY", 4)?;
        if concurrency == 0 {
            return Err(AppError::Config("REVIEW_CONCURRENCY must be at least 1".to_string()));
        }
        let timeout_secs: u64 = parse_or(var("REVIEW_TIMEOUT_SECS"), "REVIEW_TIMEOUT_SECS", 120)?;
        if timeout_secs == 0 {
            return Err(AppError::Config("REVIEW_TIMEOUT_SECS must be at least 1".to_string()));
        }
        let top_k: usize = parse_or(var("RETRIEVAL_TOP_K"), "RETRIEVAL_TOP_K", 4)?;
        if top_k == 0 {
            return Err(AppError::Config("RETRIEVAL_TOP_K must be at least 1".to_string()));
        }

        Ok(Self {
            redis_url: var("REDIS_URL"),
            lancedb_path,
            knowledge_base_dir: var("KNOWLEDGE_BASE_DIR")
                .map_or_else(|| PathBuf::from("./templates_for_db"), PathBuf::from),
            output_dir: var("REVIEW_OUTPUT_DIR")
                .map_or_else(|| PathBuf::from("./temp_reviewed_docs"), PathBuf::from),
            checklist_path: var("CHECKLIST_PATH").map(PathBuf::from),
            model: var("REVIEW_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            temperature: parse_or(var("REVIEW_TEMPERATURE"), "REVIEW_TEMPERATURE", 0.2)?,
            concurrency,
            review_timeout: Duration::from_secs(timeout_secs),
            top_k,
        })
    }
}

fn parse_or<T: FromStr>(value: Option<String>, name: &str, default: T) -> Result<T, AppError> {
    match value {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{name} has an invalid value: {v:?}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, AppError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_only_required_vars_are_set() {
        let config = load(&[("LANCEDB_PATH", "/tmp/lance")]).expect("config");
        assert_eq!(config.lancedb_path, "/tmp/lance");
        assert_eq!(config.redis_url, None);
        assert_eq!(config.output_dir, PathBuf::from("./temp_reviewed_docs"));
        assert_eq!(config.knowledge_base_dir, PathBuf::from("./templates_for_db"));
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.review_timeout, Duration::from_secs(120));
        assert_eq!(config.top_k, 4);
        assert!(config.checklist_path.is_none());
    }

    #[test]
    fn lancedb_path_is_required() {
        assert!(matches!(load(&[]), Err(AppError::Config(_))));
        assert!(load(&[("LANCEDB_PATH", "  ")]).is_err());
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        assert!(load(&[("LANCEDB_PATH", "x"), ("REVIEW_CONCURRENCY", "many")]).is_err());
        assert!(load(&[("LANCEDB_PATH", "x"), ("REVIEW_CONCURRENCY", "0")]).is_err());
        assert!(load(&[("LANCEDB_PATH", "x"), ("REVIEW_TEMPERATURE", "warm")]).is_err());
        assert!(load(&[("LANCEDB_PATH", "x"), ("RETRIEVAL_TOP_K", "-1")]).is_err());
    }

    #[test]
    fn overrides_are_read() {
        let config = load(&[
            ("LANCEDB_PATH", "x"),
            ("REDIS_URL", "redis://127.0.0.1:6379"),
            ("REVIEW_CONCURRENCY", "8"),
            ("REVIEW_TIMEOUT_SECS", "30"),
            ("REVIEW_MODEL", "gpt-4.1"),
            ("CHECKLIST_PATH", "checklists.json"),
        ])
        .expect("config");
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.review_timeout, Duration::from_secs(30));
        assert_eq!(config.model, "gpt-4.1");
        assert_eq!(config.redis_url.as_deref(), Some("redis://127.0.0.1:6379"));
        assert_eq!(config.checklist_path, Some(PathBuf::from("checklists.json")));
    }
}
