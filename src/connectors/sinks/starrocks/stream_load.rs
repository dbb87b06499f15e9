// Copyright 2025
// Licensed under the Elastic License v2.0

//! StarRocks Stream Load HTTP Client
//!
//! One committed batch is one Stream Load request. StarRocks loads each
//! request atomically, so a failed request leaves nothing behind.
//!
//! ## Protocol Details
//!
//! 1. **FE (Frontend) Request**: Initial request goes to FE (typically port 8040)
//! 2. **307 Redirect**: FE returns a redirect to a BE (Backend) node
//! 3. **BE Request**: Actual data upload goes to BE
//!
//! FE nodes running next to their BE often redirect to `127.0.0.1`, which is
//! rewritten to the FE hostname. Every request carries a label so a retried
//! load that already went through is reported as such instead of loading twice.
//!
//! ## Why libcurl?
//!
//! libcurl handles `Expect: 100-continue` the way Stream Load requires it,
//! which the pure Rust clients do not.

use curl::easy::{Easy, List};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::core::SinkError;

/// Result of a successful Stream Load operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamLoadResult {
    /// Status from StarRocks (e.g., "Success", "Publish Timeout")
    pub status: String,
    pub loaded_rows: u64,
    /// Rows rejected for bad data
    pub filtered_rows: u64,
    /// Rows dropped by a load filter
    pub unselected_rows: u64,
    pub load_time: Duration,
    pub message: String,
}

/// Raw HTTP exchange of one request.
struct Response {
    code: u32,
    body: Vec<u8>,
    location: Option<String>,
}

/// HTTP client for StarRocks Stream Load API.
#[derive(Clone)]
pub struct StreamLoadClient {
    /// Base URL for FE (e.g., "http://starrocks:8040")
    base_url: String,
    /// Host used in place of `127.0.0.1` in redirects
    hostname: String,
    user: String,
    password: String,
    timeout: Duration,
}

impl StreamLoadClient {
    pub fn new(
        base_url: String,
        hostname: String,
        user: String,
        password: String,
        timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            hostname,
            user,
            password,
            timeout,
        }
    }

    pub fn load_url(&self, database: &str, table: &str) -> String {
        format!("{}/api/{}/{}/_stream_load", self.base_url, database, table)
    }

    /// Loads a JSON array of rows into `database.table`.
    pub async fn send(
        &self,
        database: &str,
        table: &str,
        label: &str,
        body: Arc<Vec<u8>>,
    ) -> Result<StreamLoadResult, SinkError> {
        let client = self.clone();
        let url = self.load_url(database, table);
        let label = label.to_string();

        // curl blocks, keep it off the runtime threads
        tokio::task::spawn_blocking(move || client.send_sync(&url, &label, body))
            .await
            .map_err(|e| SinkError::load(format!("Task join error: {}", e)))?
    }

    fn send_sync(
        &self,
        url: &str,
        label: &str,
        body: Arc<Vec<u8>>,
    ) -> Result<StreamLoadResult, SinkError> {
        let mut response = self.put(url, label, body.clone())?;

        if response.code == 307 {
            let location = response
                .location
                .take()
                .ok_or_else(|| SinkError::load("redirect without Location header"))?;
            let location = self.rewrite_redirect(&location);
            debug!("Stream Load redirected to {}", location);
            response = self.put(&location, label, body)?;
        }

        Self::parse_response(&response.body, response.code)
    }

    fn rewrite_redirect(&self, location: &str) -> String {
        if location.contains("127.0.0.1") {
            location.replace("127.0.0.1", &self.hostname)
        } else {
            location.to_string()
        }
    }

    fn put(&self, url: &str, label: &str, body: Arc<Vec<u8>>) -> Result<Response, SinkError> {
        self.perform(url, label, body)
            .map_err(|e| SinkError::load(format!("Stream Load request to {} failed: {}", url, e)))
    }

    fn perform(&self, url: &str, label: &str, body: Arc<Vec<u8>>) -> Result<Response, curl::Error> {
        let mut easy = Easy::new();

        // Redirects are followed by hand so the BE address can be rewritten
        easy.follow_location(false)?;
        easy.url(url)?;
        easy.put(true)?;
        easy.username(&self.user)?;
        easy.password(&self.password)?;
        easy.http_headers(Self::build_headers(label)?)?;

        easy.post_field_size(body.len() as u64)?;
        easy.upload(true)?;
        let mut offset: usize = 0;
        easy.read_function(move |buf| {
            let remaining = &body[offset..];
            let to_copy = remaining.len().min(buf.len());
            buf[..to_copy].copy_from_slice(&remaining[..to_copy]);
            offset += to_copy;
            Ok(to_copy)
        })?;
        easy.timeout(self.timeout)?;

        let mut response_body = Vec::new();
        let mut location = None;
        {
            let mut transfer = easy.transfer();
            transfer.header_function(|header| {
                let header = String::from_utf8_lossy(header);
                if let Some((name, value)) = header.split_once(':') {
                    if name.trim().eq_ignore_ascii_case("location") {
                        location = Some(value.trim().to_string());
                    }
                }
                true
            })?;
            transfer.write_function(|data| {
                response_body.extend_from_slice(data);
                Ok(data.len())
            })?;
            transfer.perform()?;
        }

        Ok(Response {
            code: easy.response_code()?,
            body: response_body,
            location,
        })
    }

    fn build_headers(label: &str) -> Result<List, curl::Error> {
        let mut headers = List::new();
        headers.append("Expect: 100-continue")?;
        headers.append("format: json")?;
        headers.append("strip_outer_array: true")?;
        headers.append("ignore_json_size: true")?;
        headers.append(&format!("label: {}", label))?;
        Ok(headers)
    }

    fn parse_response(response_body: &[u8], response_code: u32) -> Result<StreamLoadResult, SinkError> {
        let response_str = String::from_utf8_lossy(response_body).to_string();

        let resp_json: serde_json::Value = serde_json::from_str(&response_str).unwrap_or(
            serde_json::json!({
                "Status": "Unknown",
                "Message": response_str.clone()
            }),
        );

        let status = resp_json["Status"].as_str().unwrap_or("Unknown").to_string();
        let message = resp_json["Message"].as_str().unwrap_or("").to_string();

        if response_code >= 400 {
            return Err(SinkError::load(format!(
                "HTTP {}: {} - {}",
                response_code, status, message
            )));
        }

        match status.as_str() {
            // "Publish Timeout" is acceptable - data was written
            "Success" | "Publish Timeout" => {}
            // a retry of a request that already loaded
            "Label Already Exists"
                if resp_json["ExistingJobStatus"].as_str() == Some("FINISHED") => {}
            _ => {
                let detail = resp_json["ErrorURL"]
                    .as_str()
                    .map(|url| format!(" (see {})", url))
                    .unwrap_or_default();
                return Err(SinkError::load(format!(
                    "Stream Load failed: {} - {}{}",
                    status, message, detail
                )));
            }
        }

        Ok(StreamLoadResult {
            status,
            loaded_rows: resp_json["NumberLoadedRows"].as_u64().unwrap_or(0),
            filtered_rows: resp_json["NumberFilteredRows"].as_u64().unwrap_or(0),
            unselected_rows: resp_json["NumberUnselectedRows"].as_u64().unwrap_or(0),
            load_time: Duration::from_millis(resp_json["LoadTimeMs"].as_u64().unwrap_or(0)),
            message,
        })
    }
}
