//! Chunked search protocol
//!
//! The host talks to an external search command over stdin/stdout using
//! length-prefixed frames:
//!
//! - **frame**: header line + exact-length metadata + exact-length body
//! - **metadata**: inbound session metadata, outbound capability/finish/error maps
//! - **chunk**: result chunks, cell values and the [`ResultChunker`] contract
//! - **processor**: the session state machine driving a [`Command`]
//!
//! # Session
//!
//! ```text
//! host → command   chunked 1.0,<n>,0\n{"action":"getinfo",...}
//! command → host   chunked 1.0,<n>,0\n{"type":"reporting",...}
//! command → host   chunked 1.0,<n>,<m>\n{"partial":true,...}_time,measurement,...\r\n...
//! command → host   chunked 1.0,17,0\n{"finished":true}
//! ```

mod chunk;
mod frame;
mod metadata;
mod processor;

pub use chunk::{Chunk, FieldValue, ResultChunker};
pub use frame::{
    CodecConfig, Frame, FrameHeader, FrameReader, FrameWriter, DEFAULT_MAX_BODY_BYTES,
    DEFAULT_MAX_METADATA_BYTES, MAX_HEADER_LINE, PROTOCOL_TAG,
};
pub use metadata::{
    error_metadata, finished_metadata, Action, Capabilities, CommandType, SearchInfo,
    SessionMetadata,
};
pub use processor::{Command, Processor, SessionState, SessionStats};
