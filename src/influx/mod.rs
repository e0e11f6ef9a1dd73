//! InfluxDB backend
//!
//! - **client**: chunked `/query` requests over HTTP
//! - **chunker**: series to chunk adapter
//! - **realtime**: advancing-window re-query for unbounded searches
//! - **command**: the `influxql` search command tying them together

mod chunker;
mod client;
mod command;
mod realtime;

pub use chunker::{adapt_series, format_epoch_millis, InfluxChunker};
pub use client::{
    InfluxClient, QueryResponse, ResponseCursor, SelectRequest, Series, StatementResult,
};
pub use command::{CommandArgs, InfluxCommand};
pub use realtime::RealtimeChunker;
