//! Protocol processor
//!
//! Drives one session over a byte stream:
//!
//! ```text
//! Start → HeaderRead → MetadataDecoded → Dispatched → Streaming → Finished
//!    \__________\_____________\_______________\___________\______→ Failed
//! ```
//!
//! The host sends exactly one request frame. A `getinfo` request is answered
//! with the command's capabilities and then executed in the same session; an
//! `execute` request is executed directly. Every chunk is encoded and flushed
//! before the next one is pulled from the chunker.

use async_trait::async_trait;
use serde_json::Map;
use tokio::io::{AsyncBufRead, AsyncWrite};

use crate::error::{Result, ResultExt};
use crate::protocol::chunk::ResultChunker;
use crate::protocol::frame::{CodecConfig, FrameReader, FrameWriter};
use crate::protocol::metadata::{
    error_metadata, finished_metadata, Action, Capabilities, SearchInfo, SessionMetadata,
};

/// A search command served over the protocol
#[async_trait]
pub trait Command: Send {
    /// Capabilities reported in response to getinfo
    fn getinfo(&self) -> Capabilities;

    /// Start executing the search and return the chunker that yields its results
    async fn execute(&mut self, search_info: &SearchInfo) -> Result<Box<dyn ResultChunker>>;
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Start,
    HeaderRead,
    MetadataDecoded,
    Dispatched,
    Streaming,
    Finished,
    Failed,
}

/// Counters for one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub chunks_sent: usize,
    pub rows_sent: usize,
    pub boundaries_skipped: usize,
}

/// Session state machine over a reader/writer pair
pub struct Processor<C, R, W> {
    command: C,
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
    state: SessionState,
    metadata: Option<SessionMetadata>,
    stats: SessionStats,
}

impl<C, R, W> Processor<C, R, W>
where
    C: Command,
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(command: C, input: R, output: W, codec: CodecConfig) -> Self {
        let writer = FrameWriter::new(output, &codec);
        Self {
            command,
            reader: FrameReader::new(input, codec),
            writer,
            state: SessionState::Start,
            metadata: None,
            stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Metadata of the request, once decoded
    pub fn metadata(&self) -> Option<&SessionMetadata> {
        self.metadata.as_ref()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn into_output(self) -> W {
        self.writer.into_inner()
    }

    /// Run the session to completion.
    ///
    /// On failure exactly one diagnostic frame carrying the rendered error
    /// chain is sent before the error is returned.
    pub async fn run(&mut self) -> Result<()> {
        let err = match self.run_session().await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        self.transition(SessionState::Failed);
        tracing::error!(kind = %err.kind(), error = %err, "session failed");

        if let Err(send_err) = self
            .writer
            .write_frame(error_metadata(&err.render_chain()), &[])
            .await
        {
            tracing::warn!(error = %send_err, "failed to send error frame");
        }

        Err(err)
    }

    async fn run_session(&mut self) -> Result<()> {
        let header = self.reader.read_header().await?;
        self.transition(SessionState::HeaderRead);

        let (metadata, body) = self.reader.read_body(&header).await?;
        let metadata = SessionMetadata::decode(&metadata)?;
        if !body.is_empty() {
            tracing::debug!(body_len = body.len(), "discarding request body");
        }
        tracing::info!(
            action = ?metadata.action,
            sid = %metadata.search_info.sid,
            preview = metadata.preview,
            "session request decoded"
        );
        let action = metadata.action;
        let search_info = metadata.search_info.clone();
        self.metadata = Some(metadata);
        self.transition(SessionState::MetadataDecoded);

        match action {
            Action::Getinfo => {
                self.transition(SessionState::Dispatched);
                self.getinfo().await?;
            }
            Action::Execute => self.transition(SessionState::Dispatched),
        }

        self.execute(&search_info).await
    }

    async fn getinfo(&mut self) -> Result<()> {
        let info = self
            .command
            .getinfo()
            .into_metadata()
            .context("encoding getinfo response")?;
        self.writer
            .write_frame(info, &[])
            .await
            .context("sending getinfo response")
    }

    async fn execute(&mut self, search_info: &SearchInfo) -> Result<()> {
        let mut chunker = self
            .command
            .execute(search_info)
            .await
            .context("executing command")?;
        self.transition(SessionState::Streaming);

        let streamed = self.stream(chunker.as_mut()).await;
        chunker.close().await;
        streamed?;

        self.writer
            .write_frame(finished_metadata(), &[])
            .await
            .context("sending finish")?;
        self.transition(SessionState::Finished);

        tracing::info!(
            chunks = self.stats.chunks_sent,
            rows = self.stats.rows_sent,
            "session finished"
        );
        Ok(())
    }

    async fn stream(&mut self, chunker: &mut dyn ResultChunker) -> Result<()> {
        while let Some(chunk) = chunker
            .next_chunk()
            .await
            .context("retrieving next chunk")?
        {
            if chunk.is_boundary() {
                self.stats.boundaries_skipped += 1;
                continue;
            }

            let body = chunk.encode_csv().context("encoding chunk")?;
            self.writer
                .write_frame(Map::new(), &body)
                .await
                .context("sending chunk")?;

            self.stats.chunks_sent += 1;
            self.stats.rows_sent += chunk.rows.len();
        }
        Ok(())
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }
}
