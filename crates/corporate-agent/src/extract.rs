/// Boundary to the external reviewer.
///
/// Whatever the reviewer does (fails, times out, returns prose or broken JSON), `extract`
/// turns it into a well-formed issue list. A failed review becomes a single `Critical`
/// issue describing the cause.
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::AppError;
use crate::model::{Issue, Severity, NOT_AVAILABLE};

/// Produces a free-form answer that is expected to embed a JSON array of issues.
///
/// Implementations are shared across concurrent document tasks.
pub trait ReviewProvider: Send + Sync {
    fn review<'a>(
        &'a self,
        document_text: &'a str,
        document_name: &'a str,
    ) -> BoxFuture<'a, Result<String, AppError>>;
}

pub const UNPARSABLE_RESPONSE: &str = "Could not parse LLM response.";
const UNPARSABLE_RESPONSE_PREFIX: &str = "Could not parse LLM response";

/// Ask the reviewer about one document and parse its answer.
pub async fn extract(
    provider: &dyn ReviewProvider,
    document_text: &str,
    document_name: &str,
    timeout: Duration,
) -> Vec<Issue> {
    let answer = tokio::time::timeout(timeout, provider.review(document_text, document_name)).await;
    match answer {
        Ok(Ok(raw)) => parse_issues(&raw),
        Ok(Err(e)) => {
            warn!(document = %document_name, error = %e, "review failed");
            vec![Issue::critical(format!(
                "Failed to analyze document due to an internal error: {e}"
            ))]
        }
        Err(_) => {
            warn!(document = %document_name, timeout_secs = timeout.as_secs(), "review timed out");
            vec![Issue::critical(format!(
                "Document analysis timed out after {}s",
                timeout.as_secs()
            ))]
        }
    }
}

/// The text from the first `[` to the last `]` of `raw`, when both exist in that order.
fn array_slice(raw: &str) -> Option<&str> {
    let (start, end) = (raw.find('[')?, raw.rfind(']')?);
    (start < end).then(|| &raw[start..=end])
}

/// Whether `parse_issues` would read `raw` as an issue array rather than report it as
/// unparsable.
pub fn is_issue_array(raw: &str) -> bool {
    array_slice(raw).is_some_and(|slice| serde_json::from_str::<Vec<Value>>(slice).is_ok())
}

/// Parse the JSON array found between the first `[` and the last `]` of `raw`.
pub fn parse_issues(raw: &str) -> Vec<Issue> {
    let Some(slice) = array_slice(raw) else {
        warn!("review answer contains no JSON array");
        return vec![Issue::critical(UNPARSABLE_RESPONSE)];
    };

    let items: Vec<Value> = match serde_json::from_str(slice) {
        Ok(items) => items,
        Err(e) => {
            warn!(error = %e, "review answer is not a valid JSON array");
            return vec![Issue::critical(format!("{UNPARSABLE_RESPONSE_PREFIX}: {e}"))];
        }
    };

    items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| match item {
            Value::Object(fields) => Some(issue_from_fields(&fields)),
            other => {
                warn!(index = i, kind = json_kind(&other), "skipping non-object issue entry");
                None
            }
        })
        .collect()
}

fn issue_from_fields(fields: &Map<String, Value>) -> Issue {
    let severity = match text_field(fields, "severity") {
        Some(s) => s.parse().unwrap_or_else(|e| {
            warn!(error = %e, "unrecognised severity, using Medium");
            Severity::Medium
        }),
        None => {
            warn!("issue has no severity, using Medium");
            Severity::Medium
        }
    };

    Issue {
        document: None,
        section: text_field(fields, "section"),
        offending_text: text_field(fields, "offending_text").unwrap_or_default(),
        issue: text_field(fields, "issue").unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        severity,
        suggestion: text_field(fields, "suggestion"),
        citation: text_field(fields, "citation"),
    }
}

/// Non-empty string value of a field; numbers are accepted as their JSON text.
fn text_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
