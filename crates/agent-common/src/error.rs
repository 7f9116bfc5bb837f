/// Error types shared by the agent's infrastructure clients.
///
/// These cover the Redis cache, the passage vector store and the embedding model. The
/// server crate defines its own `AppError` and wraps `CommonError` via `#[from]`.

#[derive(Debug, thiserror::Error)]
pub enum CommonError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("vector db error: {0}")]
    VectorDb(String),

    #[error("embedding error: {0}")]
    Embedding(String),
}
