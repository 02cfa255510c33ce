//! Clock tool.

use async_trait::async_trait;
use chrono::Utc;

use crate::context::JobContext;
use crate::tools::tool::{Tool, ToolError, ToolOutput};

pub struct TimeTool;

#[async_trait]
impl Tool for TimeTool {
    fn name(&self) -> &str {
        "time"
    }

    fn description(&self) -> &str {
        "Get the current UTC time as RFC 3339 and unix seconds."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(
        &self,
        _params: serde_json::Value,
        _ctx: &JobContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = std::time::Instant::now();
        let now = Utc::now();
        let result = serde_json::json!({
            "iso": now.to_rfc3339(),
            "unix": now.timestamp(),
        });
        Ok(ToolOutput::success(result, start.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_current_time() {
        let out = TimeTool
            .execute(serde_json::Value::Null, &JobContext::default())
            .await
            .unwrap();
        assert!(out.result["unix"].as_i64().unwrap() > 0);
        assert!(out.result["iso"].as_str().is_some());
    }
}
