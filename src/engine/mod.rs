//! Query engine seam.
//!
//! The frontend never plans or executes SQL itself. It hands the query text
//! and a cancellable [`QueryContext`] to a [`QueryEngine`] and gets back the
//! result [`Schema`] plus a lazy [`RowStream`], which the result batcher
//! drains into protocol-sized batches.

mod datafusion_engine;

pub use datafusion_engine::DataFusionEngine;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::query::QueryContext;

/// Semantic type of a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Decimal,
    Text,
    Date,
    DateTime,
    Timestamp,
    Blob,
    Null,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Ordered column descriptors of a query result. Fixed for the query's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    pub columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Schema of results that carry no columns (plain acknowledgements).
    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Text-protocol rendering; `None` encodes SQL NULL.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int(v) => write!(f, "{}", v),
            Value::UInt(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

/// One result row, positionally aligned with the query's [`Schema`].
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }
}

/// Lazy, finite, single-pass sequence of result rows.
///
/// `Ok(None)` marks the clean end of the sequence. Implementations are
/// expected to watch the query context and fail with
/// [`GateError::QueryInterrupted`](crate::error::GateError::QueryInterrupted)
/// once it is cancelled.
#[async_trait]
pub trait RowStream: Send {
    async fn next_row(&mut self) -> Result<Option<Row>>;
}

/// The SQL engine collaborator.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn query(
        &self,
        ctx: &QueryContext,
        sql: &str,
    ) -> Result<(Arc<Schema>, Box<dyn RowStream>)>;
}

/// Row stream over rows that are already materialized.
pub struct VecRowStream {
    rows: std::vec::IntoIter<Row>,
}

impl VecRowStream {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

#[async_trait]
impl RowStream for VecRowStream {
    async fn next_row(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.next())
    }
}
