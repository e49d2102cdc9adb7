use std::mem;
use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::{Row, RowStream, Schema};
use crate::error::Result;

/// A bounded group of rows delivered to the transport in one push.
#[derive(Debug, Clone)]
pub struct ResultBatch {
    schema: Arc<Schema>,
    rows: Vec<Row>,
    rows_affected: u64,
}

impl ResultBatch {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self::with_capacity(schema, 0)
    }

    pub fn with_capacity(schema: Arc<Schema>, capacity: usize) -> Self {
        Self {
            schema,
            rows: Vec::with_capacity(capacity),
            rows_affected: 0,
        }
    }

    /// A column-less acknowledgement.
    pub fn ack(rows_affected: u64) -> Self {
        Self {
            schema: Schema::empty(),
            rows: Vec::new(),
            rows_affected,
        }
    }

    pub fn push(&mut self, row: Row) {
        self.rows.push(row);
        self.rows_affected += 1;
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Push side of the transport: receives result batches in order.
#[async_trait]
pub trait ResultSink: Send {
    async fn deliver(&mut self, batch: ResultBatch) -> Result<()>;
}

/// What a streamed query pushed to its sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub batches: usize,
    pub rows: u64,
}

/// Drains `rows` into batches of at most `batch_size` rows and pushes each
/// full batch to `sink` as soon as it fills up.
///
/// The sink is always called at least once, so a query without rows still
/// acknowledges the command. A trailing empty batch is only skipped when a
/// full batch has already gone out. An error from the row stream stops
/// streaming; batches already pushed stay delivered.
pub async fn stream_rows(
    schema: Arc<Schema>,
    rows: &mut dyn RowStream,
    sink: &mut dyn ResultSink,
    batch_size: usize,
) -> Result<BatchStats> {
    let batch_size = batch_size.max(1);
    let mut stats = BatchStats::default();
    let mut batch = ResultBatch::with_capacity(schema.clone(), batch_size);

    loop {
        if batch.len() == batch_size {
            let full = mem::replace(
                &mut batch,
                ResultBatch::with_capacity(schema.clone(), batch_size),
            );
            stats.rows += full.len() as u64;
            sink.deliver(full).await?;
            stats.batches += 1;
            continue;
        }

        match rows.next_row().await? {
            Some(row) => batch.push(row),
            None => break,
        }
    }

    if batch.is_empty() && stats.batches > 0 {
        return Ok(stats);
    }

    stats.rows += batch.len() as u64;
    sink.deliver(batch).await?;
    stats.batches += 1;

    Ok(stats)
}
