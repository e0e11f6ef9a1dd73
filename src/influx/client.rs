//! InfluxDB HTTP client
//!
//! Issues chunked `GET /query` requests and reads the newline-delimited
//! JSON response incrementally, one response document at a time.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::config::InfluxDbConfig;
use crate::error::{Error, Result, ResultExt};

/// InfluxDB query client
#[derive(Debug, Clone)]
pub struct InfluxClient {
    client: Client,
    base_url: String,
    chunk_size: usize,
    /// Bounds connecting and waiting for the response head, never the body
    request_timeout: Duration,
}

/// One time-bounded SELECT
#[derive(Debug, Clone, PartialEq)]
pub struct SelectRequest {
    pub query: String,
    pub database: Option<String>,
    pub retention_policy: Option<String>,
    /// Bound to `$tMin`
    pub t_min: DateTime<Utc>,
    /// Bound to `$tMax`
    pub t_max: DateTime<Utc>,
}

impl SelectRequest {
    /// Copy of this request bound to another window
    pub fn with_window(&self, t_min: DateTime<Utc>, t_max: DateTime<Utc>) -> Self {
        Self {
            t_min,
            t_max,
            ..self.clone()
        }
    }

    /// JSON object for the `params` query argument, epoch nanoseconds
    fn bound_params(&self) -> Result<String> {
        let nanos = |t: DateTime<Utc>| {
            t.timestamp_nanos_opt()
                .ok_or_else(|| Error::execution(format!("time {} out of range", t)))
        };
        let params = serde_json::json!({
            "tMin": nanos(self.t_min)?,
            "tMax": nanos(self.t_max)?,
        });
        Ok(params.to_string())
    }
}

impl InfluxClient {
    /// Create a new client with the given configuration
    pub fn new(config: &InfluxDbConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.request_timeout())
            .build()
            .map_err(Error::config)
            .context("building http client")?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            chunk_size: config.chunk_size,
            request_timeout: config.request_timeout(),
        })
    }

    /// Start a chunked query and return a cursor over its responses
    pub async fn select(&self, request: &SelectRequest) -> Result<ResponseCursor> {
        self.send(request)
            .await
            .with_context(|| format!("performing query {:?}", request.query))
    }

    async fn send(&self, request: &SelectRequest) -> Result<ResponseCursor> {
        let url = format!("{}/query", self.base_url);

        let mut params = vec![
            ("q", request.query.clone()),
            ("params", request.bound_params()?),
            ("epoch", "ns".to_string()),
            ("chunked", "true".to_string()),
            ("chunk_size", self.chunk_size.to_string()),
        ];
        if let Some(db) = &request.database {
            params.push(("db", db.clone()));
        }
        if let Some(rp) = &request.retention_policy {
            params.push(("rp", rp.clone()));
        }

        tracing::debug!(
            query = %request.query,
            t_min = %request.t_min,
            t_max = %request.t_max,
            "sending query"
        );

        // a chunked result streams for as long as the host keeps reading
        let pending = self.client.get(&url).query(&params).send();
        let response = tokio::time::timeout(self.request_timeout, pending)
            .await
            .map_err(|_| {
                Error::execution(format!("no response within {:?}", self.request_timeout))
            })?
            .map_err(Error::execution)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::execution(api_error_message(status.as_u16(), &text)));
        }

        Ok(ResponseCursor {
            response: Some(response),
            buffer: Vec::new(),
            query: request.query.clone(),
        })
    }
}

/// InfluxDB reports failures as `{"error":"..."}`; fall back to the raw body
fn api_error_message(status: u16, body: &str) -> String {
    let message = serde_json::from_str::<QueryResponse>(body)
        .ok()
        .and_then(|r| r.error)
        .unwrap_or_else(|| body.trim().to_string());
    format!("influxdb returned {}: {}", status, message)
}

/// Incremental reader over a chunked query response
#[derive(Debug)]
pub struct ResponseCursor {
    response: Option<reqwest::Response>,
    buffer: Vec<u8>,
    query: String,
}

impl ResponseCursor {
    /// Next response document; `None` once the stream is exhausted.
    /// Query and statement errors reported by the server become errors here.
    pub async fn next_response(&mut self) -> Result<Option<QueryResponse>> {
        let query = self.query.clone();
        self.next_document()
            .await
            .and_then(|doc| match doc {
                Some(response) => response.into_result().map(Some),
                None => Ok(None),
            })
            .with_context(|| format!("performing query {:?}", query))
    }

    async fn next_document(&mut self) -> Result<Option<QueryResponse>> {
        loop {
            if let Some(line) = self.take_line() {
                if let Some(doc) = parse_document(&line)? {
                    return Ok(Some(doc));
                }
                continue;
            }

            let response = match self.response.as_mut() {
                Some(response) => response,
                None => {
                    let rest = std::mem::take(&mut self.buffer);
                    return parse_document(&rest);
                }
            };

            match response.chunk().await.map_err(Error::execution)? {
                Some(bytes) => self.buffer.extend_from_slice(&bytes),
                None => self.response = None,
            }
        }
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let newline = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
        line.pop();
        Some(line)
    }

    /// Drop the connection; later calls return `None`
    pub fn close(&mut self) {
        self.response = None;
        self.buffer.clear();
    }
}

fn parse_document(line: &[u8]) -> Result<Option<QueryResponse>> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(line)
        .map(Some)
        .map_err(Error::execution)
        .context("decoding response")
}

/// One response document of a chunked query
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub results: Vec<StatementResult>,
    #[serde(default)]
    pub error: Option<String>,
}

impl QueryResponse {
    fn into_result(self) -> Result<Self> {
        if let Some(error) = &self.error {
            return Err(Error::execution(error.clone()));
        }
        if let Some(error) = self.results.iter().find_map(|r| r.error.as_ref()) {
            return Err(Error::execution(error.clone()));
        }
        Ok(self)
    }
}

/// The (partial) result of one statement
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatementResult {
    #[serde(default)]
    pub statement_id: usize,
    #[serde(default)]
    pub series: Vec<Series>,
    #[serde(default)]
    pub error: Option<String>,
    /// More pieces of this statement follow
    #[serde(default)]
    pub partial: bool,
}

/// A uniquely tagged stream of points
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Series {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub values: Vec<Vec<Value>>,
    #[serde(default)]
    pub partial: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::influx::testing::{serve_in_pieces, serve_once};

    fn request(query: &str) -> SelectRequest {
        SelectRequest {
            query: query.to_string(),
            database: Some("telegraf".to_string()),
            retention_policy: None,
            t_min: DateTime::from_timestamp(1_500_000_000, 0).unwrap(),
            t_max: DateTime::from_timestamp(1_500_003_600, 0).unwrap(),
        }
    }

    fn client(url: &str) -> InfluxClient {
        InfluxClient::new(&InfluxDbConfig {
            url: url.to_string(),
            chunk_size: 500,
            ..InfluxDbConfig::default()
        })
        .unwrap()
    }

    fn client_with_timeout(url: &str, secs: u64) -> InfluxClient {
        InfluxClient::new(&InfluxDbConfig {
            url: url.to_string(),
            request_timeout_secs: secs,
            ..InfluxDbConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_bound_params_in_nanoseconds() {
        let params = request("SELECT 1").bound_params().unwrap();
        let params: Value = serde_json::from_str(&params).unwrap();
        assert_eq!(params["tMin"], 1_500_000_000_000_000_000i64);
        assert_eq!(params["tMax"], 1_500_003_600_000_000_000i64);
    }

    #[test]
    fn test_api_error_message() {
        assert_eq!(
            api_error_message(400, r#"{"error":"error parsing query: found EOF"}"#),
            "influxdb returned 400: error parsing query: found EOF"
        );
        assert_eq!(api_error_message(502, "bad gateway\n"), "influxdb returned 502: bad gateway");
    }

    #[tokio::test]
    async fn test_select_reads_each_document() {
        let body = concat!(
            r#"{"results":[{"statement_id":0,"series":[{"name":"cpu","columns":["time","v"],"values":[[1,2]]}],"partial":true}]}"#,
            "\n",
            r#"{"results":[{"statement_id":0,"series":[{"name":"cpu","columns":["time","v"],"values":[[3,4]]}]}]}"#,
            "\n",
        );
        let (url, request_line) = serve_once(200, body).await;

        let mut cursor = client(&url).select(&request("SELECT v FROM cpu")).await.unwrap();
        let first = cursor.next_response().await.unwrap().unwrap();
        assert!(first.results[0].partial);
        let second = cursor.next_response().await.unwrap().unwrap();
        assert!(!second.results[0].partial);
        assert_eq!(second.results[0].series[0].values[0][1], 4);
        assert!(cursor.next_response().await.unwrap().is_none());

        let line = request_line.await.unwrap();
        assert!(line.starts_with("GET /query?"));
        assert!(line.contains("db=telegraf"));
        assert!(line.contains("epoch=ns"));
        assert!(line.contains("chunked=true"));
        assert!(line.contains("chunk_size=500"));
        assert!(line.contains("1500000000000000000"));
    }

    #[tokio::test]
    async fn test_slow_stream_outlives_request_timeout() {
        let first = "{\"results\":[{\"statement_id\":0,\"partial\":true}]}\n".to_string();
        let second = "{\"results\":[{\"statement_id\":0}]}\n".to_string();
        let url = serve_in_pieces(vec![first, second], Duration::from_millis(1500)).await;

        let mut cursor = client_with_timeout(&url, 1)
            .select(&request("SELECT * FROM cpu"))
            .await
            .unwrap();
        assert!(cursor.next_response().await.unwrap().unwrap().results[0].partial);
        assert!(!cursor.next_response().await.unwrap().unwrap().results[0].partial);
        assert!(cursor.next_response().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let err = client_with_timeout(&url, 1)
            .select(&request("SELECT * FROM cpu"))
            .await
            .unwrap_err();
        assert!(err.is(ErrorKind::Execution));
        assert_eq!(
            err.to_string(),
            "performing query \"SELECT * FROM cpu\": no response within 1s"
        );
    }

    #[tokio::test]
    async fn test_http_error_is_execution_error() {
        let (url, _) = serve_once(400, r#"{"error":"error parsing query"}"#).await;

        let err = client(&url).select(&request("SELEC")).await.unwrap_err();
        assert!(err.is(ErrorKind::Execution));
        assert_eq!(
            err.to_string(),
            "performing query \"SELEC\": influxdb returned 400: error parsing query"
        );
    }

    #[tokio::test]
    async fn test_statement_error_is_execution_error() {
        let (url, _) = serve_once(
            200,
            "{\"results\":[{\"statement_id\":0,\"error\":\"database not found: nope\"}]}\n",
        )
        .await;

        let mut cursor = client(&url).select(&request("SELECT v FROM cpu")).await.unwrap();
        let err = cursor.next_response().await.unwrap_err();
        assert!(err.is(ErrorKind::Execution));
        assert_eq!(
            err.to_string(),
            "performing query \"SELECT v FROM cpu\": database not found: nope"
        );
    }

    #[tokio::test]
    async fn test_closed_cursor_is_exhausted() {
        let (url, _) = serve_once(200, "{\"results\":[]}\n").await;

        let mut cursor = client(&url).select(&request("SELECT v FROM cpu")).await.unwrap();
        cursor.close();
        cursor.close();
        assert!(cursor.next_response().await.unwrap().is_none());
    }
}
