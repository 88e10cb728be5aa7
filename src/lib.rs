//! pipeweave - hierarchical configuration resolver and pipeline compiler
//!
//! Compiles a set of layered, context-selected YAML documents into a
//! fully-resolved, dependency-ordered pipeline definition.

pub mod cli;
pub mod core;

// Re-export commonly used types
pub use crate::core::{CompileError, Context, HierarchyConfig, Pipeline, PipelineCompiler, Result};
pub use crate::core::{CompiledStep, ConstructorRegistry, ResolvedValue, StepKindRegistry};
pub use crate::core::{DirectoryStore, InMemoryStore, LayerStore};
