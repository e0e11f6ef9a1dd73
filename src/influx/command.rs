//! The `influxql` search command
//!
//! ```text
//! | influxql db=telegraf rp=autogen "SELECT mean(usage_idle) FROM cpu GROUP BY time(1m), host"
//! ```
//!
//! Leading `key=value` arguments are options; the first argument that is not
//! one is the query. The query is constrained to the search window and sorted
//! newest first before it is sent.

use async_trait::async_trait;

use crate::config::{InfluxDbConfig, RealtimeConfig};
use crate::error::{Error, Result};
use crate::influx::chunker::InfluxChunker;
use crate::influx::client::{InfluxClient, SelectRequest};
use crate::influx::realtime::RealtimeChunker;
use crate::protocol::{Capabilities, Command, CommandType, ResultChunker, SearchInfo};
use crate::query::QueryRewriter;

/// Options and query parsed from the search arguments
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandArgs {
    pub database: Option<String>,
    pub retention_policy: Option<String>,
    pub query: String,
}

impl CommandArgs {
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut parsed = CommandArgs::default();
        let mut rest = args;

        while let Some((arg, tail)) = rest.split_first() {
            let (key, value) = match arg.split_once('=') {
                Some((key, value)) if !key.contains(char::is_whitespace) => (key, value),
                _ => break,
            };
            match key {
                "db" => parsed.database = Some(value.to_string()),
                "rp" => parsed.retention_policy = Some(value.to_string()),
                other => {
                    return Err(Error::execution(format!("unsupported parameter '{}'", other)));
                }
            }
            rest = tail;
        }

        parsed.query = rest
            .first()
            .cloned()
            .ok_or_else(|| Error::execution("query string missing"))?;
        if rest.len() > 1 {
            tracing::debug!(ignored = rest.len() - 1, "extra arguments after query");
        }

        Ok(parsed)
    }
}

/// Generating command backed by InfluxDB
pub struct InfluxCommand {
    client: InfluxClient,
    influxdb: InfluxDbConfig,
    realtime: RealtimeConfig,
    rewriter: QueryRewriter,
}

impl InfluxCommand {
    pub fn new(influxdb: InfluxDbConfig, realtime: RealtimeConfig) -> Result<Self> {
        Ok(Self {
            client: InfluxClient::new(&influxdb)?,
            influxdb,
            realtime,
            rewriter: QueryRewriter::default(),
        })
    }

    /// The request the search asks for
    pub fn request(&self, search_info: &SearchInfo) -> Result<SelectRequest> {
        let args = CommandArgs::parse(&search_info.args)?;

        Ok(SelectRequest {
            query: self.rewriter.rewrite(&args.query),
            database: args.database.or_else(|| self.influxdb.database.clone()),
            retention_policy: args
                .retention_policy
                .or_else(|| self.influxdb.retention_policy.clone()),
            t_min: search_info.earliest_time,
            t_max: search_info.latest_time,
        })
    }
}

#[async_trait]
impl Command for InfluxCommand {
    fn getinfo(&self) -> Capabilities {
        Capabilities::new()
            .command_type(CommandType::Reporting)
            .generating(true)
            .generates_timeorder(true)
    }

    async fn execute(&mut self, search_info: &SearchInfo) -> Result<Box<dyn ResultChunker>> {
        let request = self.request(search_info)?;
        tracing::info!(query = %request.query, db = ?request.database, "executing query");

        if search_info.is_unbounded() {
            tracing::info!("no search bounds, running continuously");
            let chunker = RealtimeChunker::new(self.client.clone(), request, &self.realtime)?;
            return Ok(Box::new(chunker));
        }

        let cursor = self.client.select(&request).await?;
        Ok(Box::new(InfluxChunker::new(cursor)))
    }
}
