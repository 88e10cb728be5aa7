//! Core compilation model
//!
//! The stages of a compilation, in order: hierarchy resolution into a merged
//! tree, expression resolution, descriptor instantiation, step graph
//! construction, pipeline assembly.

pub mod context;
pub mod descriptor;
pub mod error;
pub mod expr;
pub mod graph;
pub mod hierarchy;
pub mod pipeline;
pub mod step;

pub use context::Context;
pub use descriptor::{ConstructedObject, ConstructorRegistry, DescriptorResolver};
pub use error::{CompileError, Result};
pub use expr::{ExpressionResolver, ResolvedValue, StepPropertyRef};
pub use graph::StepGraph;
pub use hierarchy::{DirectoryStore, HierarchyConfig, InMemoryStore, LayerRef, LayerStore};
pub use pipeline::{Parameter, Pipeline, PipelineCompiler, PipelineSettings, PropertyFile};
pub use step::{CompiledStep, StepKindRegistry, StepKindSpec};
