//! Compilation error taxonomy
//!
//! Every error aborts the current compilation: there is no partial or
//! degraded pipeline output. Each variant carries enough context (key path,
//! step name, or cycle membership) to locate the faulting configuration
//! entry.

use thiserror::Error;

/// Errors raised while resolving configuration or compiling a pipeline
#[derive(Debug, Error)]
pub enum CompileError {
    /// A `%{var}` reference names a context variable that was not supplied
    #[error("undefined context variable '{name}'")]
    UndefinedContextVariable { name: String },

    /// A required hierarchy layer is missing from the backing store
    #[error("layer '{name}' not found in the layer store")]
    LayerNotFound { name: String },

    /// The hierarchy configuration file is structurally invalid
    #[error("invalid hierarchy configuration: {reason}")]
    InvalidHierarchyConfig { reason: String },

    /// A `${VAR}` interpolation names an unset or blank environment variable
    #[error("environment variable '{name}' is unset or blank")]
    UndefinedEnvironmentVariable { name: String },

    /// A chain of `lookup(...)` expressions references itself
    #[error("circular lookup: {}", cycle.join(" -> "))]
    CircularLookup { cycle: Vec<String> },

    /// A `lookup(...)` expression names a key absent from the merged tree
    #[error("lookup key '{path}' not found in the configuration tree")]
    LookupKeyNotFound { path: String },

    /// A descriptor names a constructor absent from the registry
    #[error("constructor '{path}' not found in the registry")]
    ConstructorNotFound { path: String },

    /// A `factory_enum` descriptor names a member absent from the enumeration
    #[error("enum '{enum_path}' has no member '{member}'")]
    UnknownEnumMember { enum_path: String, member: String },

    /// A step's field set matches zero or several registered kinds
    #[error("step '{step}' matches step kinds [{}], expected exactly one", matched.join(", "))]
    UnknownStepKind { step: String, matched: Vec<String> },

    /// A predecessor, branch target, or property reference names a missing step
    #[error("step '{step}' references unknown step '{reference}'")]
    UnknownStepReference { step: String, reference: String },

    /// The dependency graph contains a cycle
    #[error("cyclic step dependency: [{}]", cycle.join(", "))]
    CyclicStepDependency { cycle: Vec<String> },

    /// A step references a parameter missing from the parameters table
    #[error("step '{step}' references undeclared parameter '{parameter}'")]
    UndeclaredParameter { step: String, parameter: String },

    /// A step references a property file missing from the property-file table
    #[error("step '{step}' references undeclared property file '{name}'")]
    UndeclaredPropertyFile { step: String, name: String },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CompileError>;
