use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use datafusion::arrow::array::{Array, ArrayRef};
use datafusion::arrow::datatypes::{DataType as ArrowDataType, Schema as ArrowSchema};
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::arrow::util::display::{ArrayFormatter, FormatOptions};
use datafusion::physical_plan::{RecordBatchStream, SendableRecordBatchStream};
use datafusion::prelude::*;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{GateError, Result};
use crate::query::QueryContext;
use super::{Column, ColumnKind, QueryEngine, Row, RowStream, Schema, Value};

/// [`QueryEngine`] backed by an in-process DataFusion session.
pub struct DataFusionEngine {
    ctx: SessionContext,
}

impl DataFusionEngine {
    pub fn new() -> Self {
        info!("Initializing DataFusion query engine");

        let config = SessionConfig::new().with_information_schema(true);

        Self {
            ctx: SessionContext::new_with_config(config),
        }
    }

    /// Registers every `*.csv` file in `data_dir` as a table named after the file stem.
    pub async fn register_csv_dir(&self, data_dir: impl AsRef<Path>) -> Result<usize> {
        let data_dir = data_dir.as_ref();
        info!("Registering CSV tables from: {}", data_dir.display());

        let mut registered = 0;
        for entry in std::fs::read_dir(data_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            let Some(table) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(location) = path.to_str() else {
                continue;
            };

            match self.ctx.register_csv(table, location, CsvReadOptions::new()).await {
                Ok(_) => {
                    debug!("Registered table: {}", table);
                    registered += 1;
                }
                Err(e) => warn!("Failed to register {}: {}", table, e),
            }
        }

        info!("Registered {} CSV tables", registered);
        Ok(registered)
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }
}

impl Default for DataFusionEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryEngine for DataFusionEngine {
    async fn query(
        &self,
        ctx: &QueryContext,
        sql: &str,
    ) -> Result<(Arc<Schema>, Box<dyn RowStream>)> {
        if ctx.is_cancelled() {
            return Err(GateError::QueryInterrupted);
        }

        debug!(query_id = %ctx.query_id, "Executing query via DataFusion: {}", sql.trim());

        let df = self.ctx.sql(sql).await
            .map_err(|e| GateError::EngineExecution(format!("DataFusion SQL error: {}", e)))?;

        let stream = df.execute_stream().await
            .map_err(|e| GateError::EngineExecution(format!("DataFusion execution error: {}", e)))?;

        let schema = Arc::new(convert_schema(&stream.schema()));
        let rows = RecordBatchRows::new(stream, ctx.token().clone());

        Ok((schema, Box::new(rows)))
    }
}

/// Pulls Arrow record batches on demand and hands them out row by row.
struct RecordBatchRows {
    stream: SendableRecordBatchStream,
    token: CancellationToken,
    current: Option<RecordBatch>,
    offset: usize,
}

impl RecordBatchRows {
    fn new(stream: SendableRecordBatchStream, token: CancellationToken) -> Self {
        Self {
            stream,
            token,
            current: None,
            offset: 0,
        }
    }
}

#[async_trait]
impl RowStream for RecordBatchRows {
    async fn next_row(&mut self) -> Result<Option<Row>> {
        loop {
            if self.token.is_cancelled() {
                return Err(GateError::QueryInterrupted);
            }

            if let Some(batch) = &self.current {
                if self.offset < batch.num_rows() {
                    let row = row_at(batch, self.offset)?;
                    self.offset += 1;
                    return Ok(Some(row));
                }
                self.current = None;
            }

            let next = tokio::select! {
                _ = self.token.cancelled() => return Err(GateError::QueryInterrupted),
                next = self.stream.next() => next,
            };

            match next {
                Some(Ok(batch)) => {
                    self.current = Some(batch);
                    self.offset = 0;
                }
                Some(Err(e)) => {
                    return Err(GateError::EngineExecution(format!(
                        "DataFusion execution error: {}",
                        e
                    )))
                }
                None => return Ok(None),
            }
        }
    }
}

fn row_at(batch: &RecordBatch, row_idx: usize) -> Result<Row> {
    let values = batch
        .columns()
        .iter()
        .map(|column| value_at(column, row_idx))
        .collect::<Result<Vec<_>>>()?;
    Ok(Row::new(values))
}

fn value_at(column: &ArrayRef, row_idx: usize) -> Result<Value> {
    if column.data_type() == &ArrowDataType::Null || column.is_null(row_idx) {
        return Ok(Value::Null);
    }

    let formatter = ArrayFormatter::try_new(column.as_ref(), &FormatOptions::default())
        .map_err(|e| GateError::EngineExecution(format!("Failed to render value: {}", e)))?;

    Ok(Value::Text(formatter.value(row_idx).to_string()))
}

fn convert_schema(schema: &ArrowSchema) -> Schema {
    Schema::new(
        schema
            .fields()
            .iter()
            .map(|field| Column::new(field.name().clone(), column_kind(field.data_type())))
            .collect(),
    )
}

fn column_kind(arrow_type: &ArrowDataType) -> ColumnKind {
    match arrow_type {
        ArrowDataType::Boolean => ColumnKind::Boolean,
        ArrowDataType::Int8 | ArrowDataType::UInt8 => ColumnKind::Int8,
        ArrowDataType::Int16 | ArrowDataType::UInt16 => ColumnKind::Int16,
        ArrowDataType::Int32 | ArrowDataType::UInt32 => ColumnKind::Int32,
        ArrowDataType::Int64 | ArrowDataType::UInt64 => ColumnKind::Int64,
        ArrowDataType::Float32 => ColumnKind::Float32,
        ArrowDataType::Float16 | ArrowDataType::Float64 => ColumnKind::Float64,
        ArrowDataType::Decimal128(_, _) | ArrowDataType::Decimal256(_, _) => ColumnKind::Decimal,
        ArrowDataType::Date32 => ColumnKind::Date,
        ArrowDataType::Date64 => ColumnKind::DateTime,
        ArrowDataType::Timestamp(_, _) => ColumnKind::Timestamp,
        ArrowDataType::Binary | ArrowDataType::LargeBinary => ColumnKind::Blob,
        ArrowDataType::Null => ColumnKind::Null,
        _ => ColumnKind::Text, // Default to string
    }
}
