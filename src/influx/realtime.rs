//! Continuous search
//!
//! When the host asks for a search with no time bounds, the query is re-run
//! over an advancing window: each pass covers `[previous end + 1ns, now - lag]`
//! and passes are at least one poll interval apart. The stream never ends on
//! its own; the host stops it by closing the pipes.
//!
//! Points that arrive with a timestamp older than the current window start
//! are never returned. The configured minimum lag is the only mitigation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::RealtimeConfig;
use crate::error::{Error, Result};
use crate::influx::chunker::InfluxChunker;
use crate::influx::client::{InfluxClient, SelectRequest};
use crate::protocol::{Chunk, ResultChunker};

/// Chunker re-querying an advancing time window
#[derive(Debug)]
pub struct RealtimeChunker {
    client: InfluxClient,
    request: SelectRequest,
    min_lag: chrono::Duration,
    poll_interval: Duration,
    window_end: DateTime<Utc>,
    last_poll: Option<Instant>,
    current: Option<InfluxChunker>,
}

impl RealtimeChunker {
    /// The first window covers one poll interval ending `min_lag` ago
    pub fn new(
        client: InfluxClient,
        request: SelectRequest,
        config: &RealtimeConfig,
    ) -> Result<Self> {
        if config.poll_interval().is_zero() {
            return Err(Error::config("realtime poll interval must be non-zero"));
        }
        let min_lag = to_chrono(config.min_lag())?;
        let initial_span = to_chrono(config.poll_interval())?;

        Ok(Self {
            client,
            request,
            min_lag,
            poll_interval: config.poll_interval(),
            window_end: Utc::now() - min_lag - initial_span,
            last_poll: None,
            current: None,
        })
    }

    /// Next window ending at `now - min_lag`, if it is not empty
    fn next_window(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let start = self.window_end + chrono::Duration::nanoseconds(1);
        let end = now - self.min_lag;
        (end >= start).then_some((start, end))
    }

    async fn pace(&mut self) {
        if let Some(last) = self.last_poll {
            tokio::time::sleep_until(last + self.poll_interval).await;
        }
        self.last_poll = Some(Instant::now());
    }
}

fn to_chrono(duration: Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(duration)
        .map_err(|e| Error::config(format!("duration {:?} out of range: {}", duration, e)))
}

#[async_trait]
impl ResultChunker for RealtimeChunker {
    async fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        loop {
            if let Some(current) = self.current.as_mut() {
                match current.next_chunk().await {
                    Ok(Some(chunk)) => return Ok(Some(chunk)),
                    Ok(None) => {
                        current.close().await;
                        self.current = None;
                    }
                    Err(e) => {
                        current.close().await;
                        self.current = None;
                        return Err(e);
                    }
                }
            }

            self.pace().await;
            let (start, end) = match self.next_window(Utc::now()) {
                Some(window) => window,
                None => continue,
            };

            tracing::debug!(%start, %end, "querying window");
            let cursor = self.client.select(&self.request.with_window(start, end)).await?;
            self.window_end = end;
            self.current = Some(InfluxChunker::new(cursor));
        }
    }

    async fn close(&mut self) {
        if let Some(mut current) = self.current.take() {
            current.close().await;
        }
    }
}
