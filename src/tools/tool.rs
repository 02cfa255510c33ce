//! Tool trait and execution output types.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::context::JobContext;

/// Error returned by a tool's own execution.
///
/// The scheduler wraps these into `crate::error::ToolError` together with the
/// tool name before recording them on the job.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{0}")]
    ExecutionFailed(String),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("cancelled")]
    Cancelled,
}

/// Output of a successful tool execution.
#[derive(Debug, Clone, Serialize)]
pub struct ToolOutput {
    /// Opaque result payload.
    pub result: serde_json::Value,
    /// Wall time spent inside the tool.
    pub duration: Duration,
}

impl ToolOutput {
    /// Structured JSON result.
    pub fn success(result: serde_json::Value, duration: Duration) -> Self {
        Self { result, duration }
    }

    /// Plain text result.
    pub fn text(text: impl Into<String>, duration: Duration) -> Self {
        Self {
            result: serde_json::Value::String(text.into()),
            duration,
        }
    }

    /// Whether the result carries anything worth remembering.
    pub fn has_content(&self) -> bool {
        match &self.result {
            serde_json::Value::Null => false,
            serde_json::Value::String(s) => !s.trim().is_empty(),
            serde_json::Value::Array(a) => !a.is_empty(),
            serde_json::Value::Object(o) => !o.is_empty(),
            _ => true,
        }
    }
}

/// An executable capability the scheduler can run as a job.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique registry key.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema describing the accepted input.
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &JobContext,
    ) -> Result<ToolOutput, ToolError>;

    /// Per-tool deadline; the configured job timeout applies when `None`.
    fn execution_timeout(&self) -> Option<Duration> {
        None
    }
}

/// Descriptor exposed to callers listing tools.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Read a required string parameter.
pub fn require_str<'a>(params: &'a serde_json::Value, key: &str) -> Result<&'a str, ToolError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidParameters(format!("missing string parameter '{key}'")))
}
