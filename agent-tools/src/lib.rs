//! Tool registration, compilation, and dependency analysis.
//!
//! [`registry`] holds the live callables agents dispatch to. [`compiler`]
//! defines how reviewed source becomes a callable, [`analysis`] derives the
//! call graph between tools, and [`sandbox`] implements both for a small
//! Rust-like scripting language evaluated over JSON values.

#![warn(missing_docs, clippy::pedantic)]

pub mod analysis;
pub mod compiler;
pub mod registry;
pub mod sandbox;

pub use analysis::{DependencyAnalyzer, dependency_map};
pub use compiler::{SyntaxError, ToolCompiler, ToolSignature};
pub use registry::{Tool, ToolError, ToolHandle, ToolMetadata, ToolOrigin, ToolRegistry, ToolResult};
pub use sandbox::{SandboxLimits, ScriptAnalyzer, ScriptCompiler};
