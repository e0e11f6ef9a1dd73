//! Session metadata
//!
//! Inbound: the JSON metadata of the host's single request frame.
//! Outbound: capability maps, the finish marker and the inspector error
//! message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result, ResultExt};

/// Requested action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Getinfo,
    Execute,
}

impl std::str::FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "getinfo" => Ok(Action::Getinfo),
            "execute" => Ok(Action::Execute),
            other => Err(Error::protocol(format!("unsupported action '{}'", other))),
        }
    }
}

/// The host's description of the current search
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchInfo {
    pub args: Vec<String>,
    pub raw_args: Vec<String>,
    pub dispatch_dir: String,
    pub sid: String,
    pub app: String,
    pub owner: String,
    pub username: String,
    pub session_key: String,
    pub splunkd_uri: String,
    pub splunkd_version: String,
    pub search: String,
    pub command: String,
    #[serde(rename = "maxresultrows")]
    pub max_result_rows: u64,
    /// Search window start, second precision
    #[serde(deserialize_with = "deserialize_epoch_seconds")]
    pub earliest_time: DateTime<Utc>,
    /// Search window end, second precision
    #[serde(deserialize_with = "deserialize_epoch_seconds")]
    pub latest_time: DateTime<Utc>,
}

impl SearchInfo {
    /// Both bounds zero: the host wants a continuous (real-time) search
    pub fn is_unbounded(&self) -> bool {
        self.earliest_time.timestamp() == 0 && self.latest_time.timestamp() == 0
    }
}

/// Epoch seconds arrive as numeric strings ("1500000000" or "1500000000.000").
/// Sub-second digits are not carried by the host and are dropped.
fn deserialize_epoch_seconds<'de, D>(
    deserializer: D,
) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;

    let raw = Value::deserialize(deserializer)?;
    let secs = match &raw {
        Value::Null => 0,
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .ok_or_else(|| D::Error::custom(format!("invalid epoch time {}", n)))?,
        Value::String(s) if s.trim().is_empty() => 0,
        Value::String(s) => parse_epoch_seconds(s.trim())
            .ok_or_else(|| D::Error::custom(format!("invalid epoch time {:?}", s)))?,
        other => return Err(D::Error::custom(format!("invalid epoch time {}", other))),
    };

    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| D::Error::custom(format!("epoch time {} out of range", secs)))
}

fn parse_epoch_seconds(s: &str) -> Option<i64> {
    if let Ok(secs) = s.parse::<i64>() {
        return Some(secs);
    }
    s.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(|f| f.trunc() as i64)
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    action: String,
    #[serde(default)]
    preview: bool,
    #[serde(default)]
    streaming_command_will_restart: bool,
    #[serde(default)]
    searchinfo: SearchInfo,
}

/// Decoded request metadata
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMetadata {
    pub action: Action,
    pub preview: bool,
    pub streaming_will_restart: bool,
    pub search_info: SearchInfo,
}

impl SessionMetadata {
    /// Decode the metadata section of the request frame
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let raw: RawMetadata = serde_json::from_slice(bytes)
            .map_err(Error::protocol)
            .context("decoding metadata")?;

        Ok(Self {
            action: raw.action.parse()?,
            preview: raw.preview,
            streaming_will_restart: raw.streaming_command_will_restart,
            search_info: raw.searchinfo,
        })
    }
}

/// Command type advertised in the getinfo response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandType {
    Streaming,
    Reporting,
}

/// Capabilities a command declares in response to getinfo
#[derive(Debug, Clone, Default, Serialize)]
pub struct Capabilities {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub command_type: Option<CommandType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generating: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generates_timeorder: Option<bool>,
    /// Any further keys the host understands
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command_type(mut self, command_type: CommandType) -> Self {
        self.command_type = Some(command_type);
        self
    }

    pub fn generating(mut self, generating: bool) -> Self {
        self.generating = Some(generating);
        self
    }

    pub fn generates_timeorder(mut self, generates_timeorder: bool) -> Self {
        self.generates_timeorder = Some(generates_timeorder);
        self
    }

    /// Metadata for the getinfo frame; a missing type defaults to streaming
    pub fn into_metadata(mut self) -> Result<Map<String, Value>> {
        if self.command_type.is_none() && !self.extra.contains_key("type") {
            self.command_type = Some(CommandType::Streaming);
        }

        match serde_json::to_value(&self).map_err(Error::protocol)? {
            Value::Object(map) => Ok(map),
            other => Err(Error::protocol(format!(
                "capabilities encoded as {} instead of an object",
                other
            ))),
        }
    }
}

/// Metadata of the terminal frame
pub fn finished_metadata() -> Map<String, Value> {
    let mut meta = Map::new();
    meta.insert("finished".to_string(), Value::Bool(true));
    meta
}

/// Metadata of the diagnostic frame sent when a session fails
pub fn error_metadata(message: &str) -> Map<String, Value> {
    let mut meta = Map::new();
    meta.insert(
        "inspector".to_string(),
        serde_json::json!({ "messages": [["ERROR", message]] }),
    );
    meta
}
