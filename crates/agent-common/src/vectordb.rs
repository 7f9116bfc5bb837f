/// LanceDB store for embedded reference passages.
///
/// Callers own the table schema; this module creates, lists and searches tables.
use std::sync::Arc;

use arrow_array::{RecordBatch, RecordBatchIterator};
use arrow_schema::Schema;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use tracing::{debug, info};

use crate::error::CommonError;

fn failed(context: &'static str) -> impl Fn(lancedb::Error) -> CommonError {
    move |e| CommonError::VectorDb(format!("{context}: {e}"))
}

pub struct VectorDb {
    conn: lancedb::Connection,
}

impl VectorDb {
    /// Open (or create) the database directory at `path`.
    pub async fn connect(path: &str) -> Result<Self, CommonError> {
        let conn = lancedb::connect(path)
            .execute()
            .await
            .map_err(failed("connection failed"))?;
        Ok(Self { conn })
    }

    pub async fn has_table(&self, name: &str) -> Result<bool, CommonError> {
        let names = self
            .conn
            .table_names()
            .execute()
            .await
            .map_err(failed("listing tables failed"))?;
        Ok(names.iter().any(|n| n == name))
    }

    /// Write `batches` as table `name`, replacing any previous table of that name.
    pub async fn create_or_replace_table(
        &self,
        name: &str,
        schema: Arc<Schema>,
        batches: Vec<RecordBatch>,
    ) -> Result<(), CommonError> {
        if let Err(e) = self.conn.drop_table(name).await {
            debug!(table = name, error = %e, "no previous table dropped");
        }

        let rows: usize = batches.iter().map(RecordBatch::num_rows).sum();
        let reader = RecordBatchIterator::new(batches.into_iter().map(Ok), schema);
        self.conn
            .create_table(name, Box::new(reader))
            .execute()
            .await
            .map_err(failed("create table failed"))?;

        info!(table = name, rows, "vector table written");
        Ok(())
    }

    /// Up to `limit` nearest rows to `embedding`, with the `_distance` column LanceDB adds.
    pub async fn search(
        &self,
        name: &str,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<RecordBatch>, CommonError> {
        let table = self
            .conn
            .open_table(name)
            .execute()
            .await
            .map_err(failed("open table failed"))?;

        let stream = table
            .vector_search(embedding)
            .map_err(failed("vector search setup failed"))?
            .limit(limit)
            .execute()
            .await
            .map_err(failed("vector search failed"))?;

        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(failed("collecting search results failed"))?;
        debug!(table = name, batches = batches.len(), "vector search done");
        Ok(batches)
    }
}
