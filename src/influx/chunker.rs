//! Series to chunk adapter
//!
//! Each series piece of a response becomes one chunk with the columns
//! `_time`, `measurement`, the series' tag keys, then its fields minus the
//! native `time` column. A boundary chunk follows every statement result
//! that is complete.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::DateTime;
use serde_json::Value;

use crate::error::{Error, Result, ResultExt};
use crate::influx::client::{QueryResponse, ResponseCursor, Series};
use crate::protocol::{Chunk, FieldValue, ResultChunker};

const NANOS_PER_MILLI: i64 = 1_000_000;

/// Chunker over one InfluxDB query
#[derive(Debug)]
pub struct InfluxChunker {
    cursor: Option<ResponseCursor>,
    pending: VecDeque<Chunk>,
}

impl InfluxChunker {
    pub fn new(cursor: ResponseCursor) -> Self {
        Self {
            cursor: Some(cursor),
            pending: VecDeque::new(),
        }
    }

    fn enqueue(&mut self, response: QueryResponse) -> Result<()> {
        for result in response.results {
            for series in &result.series {
                if series.values.is_empty() {
                    continue;
                }
                let chunk = adapt_series(series).with_context(|| {
                    format!("retrieving next series of statement {}", result.statement_id)
                })?;
                self.pending.push_back(chunk);
            }
            if !result.partial {
                self.pending.push_back(Chunk::boundary());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ResultChunker for InfluxChunker {
    async fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Ok(Some(chunk));
            }

            let cursor = match self.cursor.as_mut() {
                Some(cursor) => cursor,
                None => return Ok(None),
            };

            match cursor.next_response().await.context("retrieving next set")? {
                Some(response) => self.enqueue(response)?,
                None => {
                    self.cursor = None;
                    return Ok(None);
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            cursor.close();
            tracing::debug!("query cursor closed");
        }
        self.pending.clear();
    }
}

/// Convert one series piece into a chunk
pub fn adapt_series(series: &Series) -> Result<Chunk> {
    let time_idx = series
        .columns
        .iter()
        .position(|c| c == "time")
        .ok_or_else(|| Error::execution(format!("series '{}' has no time column", series.name)))?;

    let mut columns = vec!["_time".to_string(), "measurement".to_string()];
    columns.extend(series.tags.keys().cloned());
    columns.extend(
        series
            .columns
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != time_idx)
            .map(|(_, c)| c.clone()),
    );

    let mut rows = Vec::with_capacity(series.values.len());
    for values in &series.values {
        let time = values.get(time_idx).ok_or_else(|| {
            Error::execution(format!("row of series '{}' has no time", series.name))
        })?;

        let mut row = Vec::with_capacity(columns.len());
        row.push(FieldValue::String(format_epoch_millis(parse_time(time)?)));
        row.push(FieldValue::String(series.name.clone()));
        row.extend(series.tags.values().map(|v| FieldValue::String(v.clone())));
        row.extend(
            values
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != time_idx)
                .map(|(_, v)| field_value(v)),
        );
        rows.push(row);
    }

    Ok(Chunk::new(columns, rows))
}

/// Point time in epoch nanoseconds; integers with `epoch=ns`, RFC 3339 otherwise
fn parse_time(value: &Value) -> Result<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| Error::execution(format!("invalid point time {}", n))),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .and_then(|t| t.timestamp_nanos_opt())
            .ok_or_else(|| Error::execution(format!("invalid point time {:?}", s))),
        other => Err(Error::execution(format!("invalid point time {}", other))),
    }
}

fn field_value(value: &Value) -> FieldValue {
    match value {
        Value::Null => FieldValue::Null,
        Value::Bool(b) => FieldValue::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                FieldValue::Integer(i)
            } else if let Some(u) = n.as_u64() {
                FieldValue::Unsigned(u)
            } else {
                FieldValue::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => FieldValue::String(s.clone()),
        other => FieldValue::Json(other.clone()),
    }
}

/// Epoch seconds with three decimals, rounded half-up to the millisecond
pub fn format_epoch_millis(nanos: i64) -> String {
    let mut millis = nanos.div_euclid(NANOS_PER_MILLI);
    if nanos.rem_euclid(NANOS_PER_MILLI) >= NANOS_PER_MILLI / 2 {
        millis += 1;
    }
    let sign = if millis < 0 { "-" } else { "" };
    let abs = millis.unsigned_abs();
    format!("{}{}.{:03}", sign, abs / 1000, abs % 1000)
}
