//! Result chunks and the chunker contract
//!
//! A [`ResultChunker`] hands rows to the processor one [`Chunk`] at a time.
//! `Ok(None)` ends the stream. A chunk with no columns and no rows is a
//! boundary marker: the processor skips it without sending anything.

use async_trait::async_trait;
use std::fmt;

use crate::error::{Error, Result, ResultExt};

/// A single cell value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Boolean(bool),
    String(String),
    Bytes(Vec<u8>),
    /// Arrays, objects and anything else without a dedicated rendering
    Json(serde_json::Value),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => Ok(()),
            FieldValue::Integer(v) => write!(f, "{}", v),
            FieldValue::Unsigned(v) => write!(f, "{}", v),
            // Display for f64 is the shortest representation that round-trips
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Boolean(true) => write!(f, "true"),
            FieldValue::Boolean(false) => write!(f, "false"),
            FieldValue::String(v) => write!(f, "{}", v),
            FieldValue::Bytes(v) => write!(f, "{}", String::from_utf8_lossy(v)),
            FieldValue::Json(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::Unsigned(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        FieldValue::Bytes(v)
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value;
        match v {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Boolean(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    FieldValue::Integer(i)
                } else if let Some(u) = n.as_u64() {
                    FieldValue::Unsigned(u)
                } else {
                    FieldValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => FieldValue::String(s),
            other => FieldValue::Json(other),
        }
    }
}

/// One batch of rows under a column header
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chunk {
    /// Column names, unique and ordered
    pub columns: Vec<String>,
    /// Rows; each has exactly `columns.len()` values
    pub rows: Vec<Vec<FieldValue>>,
}

impl Chunk {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<FieldValue>>) -> Self {
        Self { columns, rows }
    }

    /// A boundary marker: never transmitted
    pub fn boundary() -> Self {
        Self::default()
    }

    pub fn is_boundary(&self) -> bool {
        self.columns.is_empty() && self.rows.is_empty()
    }

    /// Check that every row is as wide as the header
    pub fn validate(&self) -> Result<()> {
        for (i, row) in self.rows.iter().enumerate() {
            if row.len() != self.columns.len() {
                return Err(Error::execution(format!(
                    "row {} has {} values but the chunk has {} columns",
                    i,
                    row.len(),
                    self.columns.len()
                )));
            }
        }
        Ok(())
    }

    /// Encode as CSV: CRLF records, RFC 4180 quoting, header record first
    pub fn encode_csv(&self) -> Result<Vec<u8>> {
        self.validate()?;

        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::CRLF)
            .from_writer(Vec::new());

        writer
            .write_record(&self.columns)
            .map_err(Error::io)
            .context("encoding column header")?;

        let mut record: Vec<String> = Vec::with_capacity(self.columns.len());
        for row in &self.rows {
            record.clear();
            record.extend(row.iter().map(|v| v.to_string()));
            writer
                .write_record(&record)
                .map_err(Error::io)
                .context("encoding row")?;
        }

        writer
            .into_inner()
            .map_err(|e| Error::io(e.into_error()).context("flushing chunk"))
    }
}

/// Pull-based source of result chunks.
///
/// Owned by the execution that created it and closed exactly once.
#[async_trait]
pub trait ResultChunker: Send {
    /// Next chunk, `Ok(None)` once the results are exhausted
    async fn next_chunk(&mut self) -> Result<Option<Chunk>>;

    /// Release the underlying cursor. Safe to call when nothing was read.
    async fn close(&mut self);
}
