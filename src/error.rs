//! Error types for the agentic engine.

use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for an `InvalidRequest` error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Classify this error for callers that map it onto a wire status.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Config(_) => ErrorKind::Internal,
            Self::Database(_) => ErrorKind::Storage,
            Self::Tool(e) => e.kind(),
            Self::Job(e) => e.kind(),
            Self::Memory(e) => e.kind(),
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Caller-visible error classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    UnknownTool,
    NotFound,
    Execution,
    Timeout,
    Storage,
    Internal,
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistence backend errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Tool registration and execution errors.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool {name} not found")]
    NotFound { name: String },

    #[error("Tool {name} is already registered")]
    Duplicate { name: String },

    #[error("Tool {name} execution failed: {reason}")]
    ExecutionFailed { name: String, reason: String },

    #[error("Tool {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("Invalid parameters for tool {name}: {reason}")]
    InvalidParameters { name: String, reason: String },
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::UnknownTool,
            Self::Duplicate { .. } => ErrorKind::InvalidRequest,
            Self::ExecutionFailed { .. } => ErrorKind::Execution,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::InvalidParameters { .. } => ErrorKind::InvalidRequest,
        }
    }
}

/// Job-related errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {id} not found")]
    NotFound { id: Uuid },

    #[error("Job {id} already in state {state}, cannot transition to {target}")]
    InvalidTransition {
        id: Uuid,
        state: String,
        target: String,
    },

    #[error("Timed out waiting for {id} to finish")]
    WaitTimeout { id: Uuid },

    #[error("Scheduler is shut down")]
    ShutDown,
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::WaitTimeout { .. } => ErrorKind::Timeout,
            Self::InvalidTransition { .. } | Self::ShutDown => ErrorKind::Internal,
        }
    }
}

/// Memory store errors.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("Invalid observation: {0}")]
    InvalidObservation(String),

    #[error("Memory persistence failed: {0}")]
    Storage(#[from] DatabaseError),
}

impl MemoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidObservation(_) => ErrorKind::InvalidRequest,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(Error::invalid("x").kind(), ErrorKind::InvalidRequest);
        let unknown: Error = ToolError::NotFound { name: "nope".into() }.into();
        assert_eq!(unknown.kind(), ErrorKind::UnknownTool);
        let missing: Error = JobError::NotFound { id: Uuid::new_v4() }.into();
        assert_eq!(missing.kind(), ErrorKind::NotFound);
        let storage: Error = MemoryError::Storage(DatabaseError::Query("boom".into())).into();
        assert_eq!(storage.kind(), ErrorKind::Storage);
        let timeout: Error = ToolError::Timeout {
            name: "http".into(),
            timeout: Duration::from_secs(1),
        }
        .into();
        assert_eq!(timeout.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::UnknownTool).unwrap();
        assert_eq!(json, "\"unknown_tool\"");
    }
}
