//! # tsbridge
//!
//! InfluxQL as an external search command. The host search engine spawns
//! `tsbridge` per search and talks to it over stdin/stdout with the chunked
//! external-command protocol; tsbridge rewrites the query to the search's
//! time window, runs it against InfluxDB and streams the series back as CSV
//! chunks.
//!
//! ## Modules
//!
//! - [`protocol`]: frame codec, session metadata and the processor state machine
//! - [`query`]: InfluxQL lexer and clause injection
//! - [`influx`]: InfluxDB client, series adapter and the `influxql` command
//! - [`config`]: TOML configuration with environment overrides
//! - [`error`]: error chain shared by every module
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tsbridge::config::Config;
//! use tsbridge::influx::InfluxCommand;
//! use tsbridge::protocol::Processor;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> tsbridge::Result<()> {
//!     let config = Config::load_default()?;
//!     let command = InfluxCommand::new(config.influxdb, config.realtime)?;
//!
//!     let input = tokio::io::BufReader::new(tokio::io::stdin());
//!     let output = tokio::io::stdout();
//!     let mut processor = Processor::new(command, input, output, config.protocol.codec());
//!     processor.run().await
//! }
//! ```

pub mod config;
pub mod error;
pub mod influx;
pub mod protocol;
pub mod query;

// Re-export top-level types for convenience
pub use config::{Config, ConfigError};
pub use error::{Error, ErrorKind, Result, ResultExt};
pub use influx::InfluxCommand;
pub use protocol::{Chunk, Command, FieldValue, Processor, ResultChunker};
pub use query::QueryRewriter;
