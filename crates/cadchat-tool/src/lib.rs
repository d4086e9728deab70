//! cadchat-tool - the tool gateway
//!
//! This crate provides:
//! - The `Tool` trait and the `create_model` capability
//! - An explicit capability table (`ToolRegistry`) handed to the orchestrator
//! - `ToolGateway`, which resolves every call into exactly one result

pub mod error;
pub mod tool;
pub mod registry;
pub mod executor;
pub mod create_model;

pub use create_model::{CreateModelInput, CreateModelTool, DedupPolicy, CREATE_MODEL};
pub use error::{ToolError, Result};
pub use executor::{ToolExecutor, ToolGateway};
pub use registry::ToolRegistry;
pub use tool::Tool;

/// Re-export async_trait for implementers
pub use async_trait::async_trait;
