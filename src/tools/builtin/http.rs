//! HTTP fetch tool: the default executor for scrape jobs.
//!
//! Performs a plain GET and returns status, content type and the body text
//! (truncated). No parsing happens here; interpreting the page is left to
//! whatever consumes the observation.

use std::time::Duration;

use async_trait::async_trait;

use crate::context::JobContext;
use crate::tools::tool::{Tool, ToolError, ToolOutput, require_str};

/// Maximum body size kept in the result (64KB).
const MAX_BODY_SIZE: usize = 64 * 1024;

/// Connection setup limit. The overall deadline is the job timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpTool {
    client: reqwest::Client,
}

impl HttpTool {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("agentic-api/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    async fn fetch(&self, url: &str) -> Result<serde_json::Value, ToolError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::ExecutionFailed(format!("HTTP error: {status}")));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_default();

        let body = response
            .text()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to read body: {e}")))?;

        let total_bytes = body.len();
        Ok(serde_json::json!({
            "url": url,
            "status": status.as_u16(),
            "content_type": content_type,
            "body": truncate(&body, MAX_BODY_SIZE),
            "bytes": total_bytes,
            "truncated": total_bytes > MAX_BODY_SIZE,
        }))
    }
}

impl Default for HttpTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for HttpTool {
    fn name(&self) -> &str {
        "http"
    }

    fn description(&self) -> &str {
        "Fetch a URL with HTTP GET and return the status, content type and body text. \
         Large bodies are truncated."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The http(s) URL to fetch"
                },
                "goal": {
                    "type": "string",
                    "description": "What the caller wants from the page (echoed back)"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &JobContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = std::time::Instant::now();
        let url = require_str(&params, "url")?;
        let parsed = url::Url::parse(url)
            .map_err(|e| ToolError::InvalidParameters(format!("invalid url '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ToolError::InvalidParameters(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }

        let mut result = tokio::select! {
            fetched = self.fetch(parsed.as_str()) => fetched?,
            _ = ctx.cancelled() => return Err(ToolError::Cancelled),
        };

        if let Some(goal) = params.get("goal").and_then(|v| v.as_str()) {
            result["goal"] = serde_json::Value::String(goal.to_string());
        }

        Ok(ToolOutput::success(result, start.elapsed()))
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_string()
    }
}
