//! Frame codec
//!
//! Every message on the wire, in either direction, is one frame:
//!
//! ```text
//! <tag>,<metadata_len>,<body_len>\n
//! <metadata_len bytes of JSON metadata>
//! <body_len bytes of opaque body>
//! ```
//!
//! There is no other framing: no trailing newline after the body and no
//! padding. A frame is always read to completion before it is decoded.

use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result, ResultExt};

/// Protocol-version tag sent by the host
pub const PROTOCOL_TAG: &str = "chunked 1.0";

/// Upper bound on the header line, including the newline
pub const MAX_HEADER_LINE: usize = 1024;

/// Default cap on inbound metadata (8 MB)
pub const DEFAULT_MAX_METADATA_BYTES: usize = 8 * 1024 * 1024;

/// Default cap on inbound body (64 MB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Codec settings shared by reader and writer
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Expected (and emitted) protocol-version tag
    pub tag: String,
    /// Largest metadata section accepted from the host
    pub max_metadata_bytes: usize,
    /// Largest body section accepted from the host
    pub max_body_bytes: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            tag: PROTOCOL_TAG.to_string(),
            max_metadata_bytes: DEFAULT_MAX_METADATA_BYTES,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl CodecConfig {
    pub fn with_tag(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }
}

/// Decoded header line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub tag: String,
    pub metadata_len: usize,
    pub body_len: usize,
}

impl FrameHeader {
    /// Parse a header line (without its newline)
    pub fn parse(line: &str, config: &CodecConfig) -> Result<Self> {
        let fields: Vec<&str> = line.splitn(3, ',').collect();
        if fields.len() < 3 {
            return Err(Error::protocol(format!(
                "malformed header {:?}: expected 3 comma-separated fields, got {}",
                line,
                fields.len()
            )));
        }

        if fields[0] != config.tag {
            return Err(Error::protocol(format!(
                "unsupported transport encoding: {:?}",
                fields[0]
            )));
        }

        let metadata_len = parse_length(fields[1]).context("decoding metadata length")?;
        let body_len = parse_length(fields[2]).context("decoding body length")?;

        if metadata_len > config.max_metadata_bytes {
            return Err(Error::protocol(format!(
                "metadata length {} exceeds limit of {} bytes",
                metadata_len, config.max_metadata_bytes
            )));
        }
        if body_len > config.max_body_bytes {
            return Err(Error::protocol(format!(
                "body length {} exceeds limit of {} bytes",
                body_len, config.max_body_bytes
            )));
        }

        Ok(Self {
            tag: fields[0].to_string(),
            metadata_len,
            body_len,
        })
    }

    /// Encode as a header line, newline included
    pub fn encode(&self) -> String {
        format!("{},{},{}\n", self.tag, self.metadata_len, self.body_len)
    }
}

fn parse_length(field: &str) -> Result<usize> {
    field
        .parse::<usize>()
        .map_err(|e| Error::protocol(format!("invalid length {:?}: {}", field, e)))
}

/// One complete inbound frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub metadata: Vec<u8>,
    pub body: Vec<u8>,
}

/// Reads frames from a buffered byte stream
pub struct FrameReader<R> {
    input: R,
    config: CodecConfig,
}

impl<R: AsyncBufRead + Unpin> FrameReader<R> {
    pub fn new(input: R, config: CodecConfig) -> Self {
        Self { input, config }
    }

    /// Read and validate one header line
    pub async fn read_header(&mut self) -> Result<FrameHeader> {
        let mut line = Vec::with_capacity(64);
        let read = (&mut self.input)
            .take(MAX_HEADER_LINE as u64)
            .read_until(b'\n', &mut line)
            .await
            .context("reading header")?;

        if line.last() != Some(&b'\n') {
            if read >= MAX_HEADER_LINE {
                return Err(Error::protocol(format!(
                    "header line exceeds {} bytes",
                    MAX_HEADER_LINE
                )));
            }
            return Err(Error::io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stream ended before a complete header line",
            ))
            .context("reading header"));
        }

        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }

        let line = std::str::from_utf8(&line)
            .map_err(|e| Error::protocol(format!("header is not valid text: {}", e)))?;

        FrameHeader::parse(line, &self.config)
    }

    /// Read exactly the metadata and body sections announced by `header`
    pub async fn read_body(&mut self, header: &FrameHeader) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut metadata = vec![0u8; header.metadata_len];
        self.input
            .read_exact(&mut metadata)
            .await
            .context("reading metadata")?;

        let mut body = vec![0u8; header.body_len];
        self.input
            .read_exact(&mut body)
            .await
            .context("reading body")?;

        Ok((metadata, body))
    }

    pub async fn read_frame(&mut self) -> Result<Frame> {
        let header = self.read_header().await?;
        let (metadata, body) = self.read_body(&header).await?;
        tracing::debug!(
            metadata_len = header.metadata_len,
            body_len = header.body_len,
            "frame read"
        );
        Ok(Frame {
            header,
            metadata,
            body,
        })
    }
}

/// Writes frames to a byte stream, flushing after each one
pub struct FrameWriter<W> {
    output: W,
    tag: String,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(output: W, config: &CodecConfig) -> Self {
        Self {
            output,
            tag: config.tag.clone(),
        }
    }

    /// Write one frame.
    ///
    /// Metadata without `finished: true` is stamped `partial: true,
    /// finished: false`; a terminal frame never carries `partial`.
    pub async fn write_frame(
        &mut self,
        mut metadata: Map<String, Value>,
        body: &[u8],
    ) -> Result<()> {
        let finished = matches!(metadata.get("finished"), Some(Value::Bool(true)));
        if finished {
            metadata.remove("partial");
        } else {
            metadata.insert("partial".to_string(), Value::Bool(true));
            metadata.insert("finished".to_string(), Value::Bool(false));
        }

        let metadata = serde_json::to_vec(&metadata)
            .map_err(|e| Error::protocol(e).context("encoding metadata"))?;

        let header = FrameHeader {
            tag: self.tag.clone(),
            metadata_len: metadata.len(),
            body_len: body.len(),
        };

        self.output
            .write_all(header.encode().as_bytes())
            .await
            .context("writing header")?;
        self.output
            .write_all(&metadata)
            .await
            .context("writing metadata")?;
        self.output.write_all(body).await.context("writing body")?;
        self.output.flush().await.context("flushing frame")?;

        tracing::debug!(
            metadata_len = header.metadata_len,
            body_len = header.body_len,
            finished,
            "frame written"
        );
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn frame_reader<'a>(input: &'a [u8], tag: &str) -> FrameReader<&'a [u8]> {
        FrameReader::new(input, CodecConfig::with_tag(tag))
    }

    #[tokio::test]
    async fn test_read_exact_frame() {
        let input = b"v1,10,0\n{\"a\":true}";
        let mut reader = frame_reader(input, "v1");

        let frame = reader.read_frame().await.unwrap();
        assert_eq!(frame.header.tag, "v1");
        assert_eq!(frame.header.metadata_len, 10);
        assert_eq!(frame.header.body_len, 0);
        assert_eq!(frame.metadata, b"{\"a\":true}");
        assert!(frame.body.is_empty());
    }

    #[tokio::test]
    async fn test_short_metadata_is_io_error() {
        let input = b"v1,10,0\n{\"a\":tru";
        let mut reader = frame_reader(input, "v1");

        let err = reader.read_frame().await.unwrap_err();
        assert!(err.is(ErrorKind::Io));
        assert!(err.is_io_kind(std::io::ErrorKind::UnexpectedEof));
        assert!(err.to_string().starts_with("reading metadata"));
    }

    #[tokio::test]
    async fn test_short_body_is_io_error() {
        let input = b"v1,2,5\n{}abc";
        let mut reader = frame_reader(input, "v1");

        let err = reader.read_frame().await.unwrap_err();
        assert!(err.is(ErrorKind::Io));
        assert!(err.to_string().starts_with("reading body"));
    }

    #[tokio::test]
    async fn test_missing_header_is_io_error() {
        let mut reader = frame_reader(b"", "v1");
        let err = reader.read_header().await.unwrap_err();
        assert!(err.is(ErrorKind::Io));

        let mut reader = frame_reader(b"v1,2,0", "v1");
        let err = reader.read_header().await.unwrap_err();
        assert!(err.is(ErrorKind::Io));
    }

    #[tokio::test]
    async fn test_header_validation() {
        let cases: &[&[u8]] = &[
            b"v1,10\n",
            b"v2,10,0\n",
            b"v1,-1,0\n",
            b"v1,10,x\n",
            b"v1,10,0,3\n",
        ];
        for input in cases {
            let mut reader = frame_reader(input, "v1");
            let err = reader.read_header().await.unwrap_err();
            assert!(err.is(ErrorKind::Protocol), "input {:?}", input);
        }
    }

    #[tokio::test]
    async fn test_crlf_header_accepted() {
        let mut reader = frame_reader(b"chunked 1.0,2,0\r\n{}", PROTOCOL_TAG);
        let header = reader.read_header().await.unwrap();
        assert_eq!(header.metadata_len, 2);
    }

    #[tokio::test]
    async fn test_oversized_lengths_rejected() {
        let config = CodecConfig {
            max_metadata_bytes: 16,
            ..CodecConfig::with_tag("v1")
        };
        let mut reader = FrameReader::new(&b"v1,17,0\n"[..], config);
        let err = reader.read_header().await.unwrap_err();
        assert!(err.is(ErrorKind::Protocol));
        assert!(err.to_string().contains("exceeds limit"));
    }

    #[tokio::test]
    async fn test_unterminated_long_header_is_protocol_error() {
        let input = vec![b'x'; MAX_HEADER_LINE + 10];
        let mut reader = frame_reader(&input, "v1");
        let err = reader.read_header().await.unwrap_err();
        assert!(err.is(ErrorKind::Protocol));
    }

    #[tokio::test]
    async fn test_write_terminal_frame_exact_bytes() {
        let mut writer = FrameWriter::new(Vec::new(), &CodecConfig::default());
        let mut meta = Map::new();
        meta.insert("finished".to_string(), Value::Bool(true));
        writer.write_frame(meta, b"").await.unwrap();

        let out = writer.into_inner();
        assert_eq!(out, b"chunked 1.0,17,0\n{\"finished\":true}".to_vec());
    }

    #[tokio::test]
    async fn test_write_partial_frame_is_stamped_and_readable() {
        let mut writer = FrameWriter::new(Vec::new(), &CodecConfig::default());
        writer.write_frame(Map::new(), b"a,b\r\n1,2\r\n").await.unwrap();
        let out = writer.into_inner();

        let mut reader = FrameReader::new(&out[..], CodecConfig::default());
        let frame = reader.read_frame().await.unwrap();
        let meta: Value = serde_json::from_slice(&frame.metadata).unwrap();
        assert_eq!(meta["partial"], Value::Bool(true));
        assert_eq!(meta["finished"], Value::Bool(false));
        assert_eq!(frame.body, b"a,b\r\n1,2\r\n");
    }
}
