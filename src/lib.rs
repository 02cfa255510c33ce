//! Agentic API: scrape job orchestration and agent memory.

pub mod cli;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod memory;
pub mod store;
pub mod tools;

pub use engine::Engine;
