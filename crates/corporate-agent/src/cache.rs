/// Redis cache for raw reviewer answers.
///
/// Lookups return `Option` and writes are fire-and-forget, so an unreachable Redis only
/// costs a fresh model call.
///
/// Key schema:
/// - `cagent:v1:review:{sha256(model, top_k, document name, document text)}`: the raw
///   answer text (TTL: 24h, dropped on knowledge-base rebuild)
use sha2::{Digest, Sha256};
use tracing::info;

use agent_common::redis::RedisCache;

use crate::extract::is_issue_array;

const KEY_PREFIX: &str = "cagent:v1:";
const REVIEW_TTL_SECS: u64 = 24 * 3600;

pub struct ReviewCache {
    redis: RedisCache,
}

impl ReviewCache {
    pub fn new(redis: RedisCache) -> Self {
        Self { redis }
    }

    pub async fn get_review(&self, key: &ReviewKey<'_>) -> Option<String> {
        self.redis.get(&key.to_key()).await
    }

    /// Store `answer` unless it fails to parse as an issue array, so that a malformed
    /// answer is asked for again rather than replayed. Returns whether it was stored.
    pub async fn set_review(&self, key: &ReviewKey<'_>, answer: &str) -> bool {
        if !is_issue_array(answer) {
            return false;
        }
        self.redis
            .set_with_ttl(&key.to_key(), answer, REVIEW_TTL_SECS)
            .await;
        true
    }

    /// Drop every cached answer. Called after the regulation index changes, since the
    /// same document would now be reviewed against different passages.
    pub async fn invalidate_all(&self) {
        if self.redis.delete_by_prefix(KEY_PREFIX).await {
            info!("review cache invalidated");
        }
    }
}

/// Everything a cached answer depends on.
pub struct ReviewKey<'a> {
    pub model: &'a str,
    pub top_k: usize,
    pub document_name: &'a str,
    pub document_text: &'a str,
}

impl ReviewKey<'_> {
    fn to_key(&self) -> String {
        let top_k = self.top_k.to_string();
        let mut hasher = Sha256::new();
        for part in [
            self.model.as_bytes(),
            top_k.as_bytes(),
            self.document_name.as_bytes(),
            self.document_text.as_bytes(),
        ] {
            // length-prefix each part so ("ab", "c") and ("a", "bc") differ
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        format!("{KEY_PREFIX}review:{:x}", hasher.finalize())
    }
}
