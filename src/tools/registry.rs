//! Tool registry for managing available tools.
//!
//! Tools are registered during startup while the registry is still owned
//! mutably; afterwards it is shared behind an `Arc` and only read.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ToolError;
use crate::tools::tool::{Tool, ToolDescriptor};

/// Registry of available tools, keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Names are unique.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            tracing::warn!(tool = %name, "Rejected duplicate tool registration");
            return Err(ToolError::Duplicate { name });
        }
        tracing::debug!("Registered tool: {}", name);
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Resolve a tool by name.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>, ToolError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::NotFound {
                name: name.to_string(),
            })
    }

    /// Check if a tool exists.
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Descriptors for every tool, sorted by name.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.tools
            .values()
            .map(|tool| ToolDescriptor {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.parameters_schema(),
            })
            .collect()
    }

    /// Get the number of registered tools.
    pub fn count(&self) -> usize {
        self.tools.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::JobContext;
    use crate::tools::tool::{ToolError as ExecError, ToolOutput};
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Debug)]
    struct MockTool {
        name: String,
    }

    #[async_trait]
    impl Tool for MockTool {
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "A mock tool for testing"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn execute(
            &self,
            _params: serde_json::Value,
            _ctx: &JobContext,
        ) -> Result<ToolOutput, ExecError> {
            Ok(ToolOutput::text("mock", Duration::from_millis(1)))
        }
    }

    fn mock(name: &str) -> Arc<dyn Tool> {
        Arc::new(MockTool {
            name: name.to_string(),
        })
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = ToolRegistry::new();
        registry.register(mock("test_tool")).unwrap();
        assert!(registry.has("test_tool"));
        assert!(!registry.has("nonexistent"));

        let resolved = registry.resolve("test_tool").unwrap();
        assert_eq!(resolved.name(), "test_tool");
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(mock("dup")).unwrap();
        let err = registry.register(mock("dup")).unwrap_err();
        assert!(matches!(err, ToolError::Duplicate { ref name } if name == "dup"));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        assert!(matches!(
            registry.resolve("missing"),
            Err(ToolError::NotFound { .. })
        ));
    }

    #[test]
    fn test_list_sorted_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(mock("b")).unwrap();
        registry.register(mock("a")).unwrap();

        let defs = registry.list();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, "a");
        assert_eq!(defs[1].name, "b");
        assert_eq!(defs[0].input_schema["type"], "object");
    }
}
