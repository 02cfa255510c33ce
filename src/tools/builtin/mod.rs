//! Built-in tools: echo, clock, and plain HTTP fetch.

pub mod echo;
pub mod http;
pub mod time;

use std::sync::Arc;

use crate::error::ToolError;
use crate::tools::ToolRegistry;

impl ToolRegistry {
    /// Register every built-in tool.
    pub fn register_builtin_tools(&mut self) -> Result<(), ToolError> {
        self.register(Arc::new(echo::EchoTool))?;
        self.register(Arc::new(time::TimeTool))?;
        self.register(Arc::new(http::HttpTool::new()))?;
        Ok(())
    }
}
