//! Descriptor resolver - declarative object construction
//!
//! A mapping carrying a `factory_function` key names a constructor and its
//! `kwargs`; one carrying `factory_enum` names an enumeration member
//! (`pkg:Enum:MEMBER`). Resolution is depth-first: every nested descriptor
//! inside `kwargs` is instantiated before the enclosing constructor runs.
//!
//! Constructors and enumerations are supplied through an injected
//! [`ConstructorRegistry`]; the resolver never performs open-ended symbol
//! lookup. Repeated descriptors (for example alias-duplicated YAML
//! substructure) instantiate independently each time.

use crate::core::error::{CompileError, Result};
use crate::core::expr::ResolvedValue;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

pub const FACTORY_FUNCTION: &str = "factory_function";
pub const FACTORY_ENUM: &str = "factory_enum";
pub const FACTORY_KWARGS: &str = "kwargs";

/// Keyword arguments passed to a constructor
pub type ConstructorArgs = IndexMap<String, ResolvedValue>;

/// A registered constructor closure
pub type ConstructorFn =
    Arc<dyn Fn(ConstructorArgs) -> Result<ResolvedValue> + Send + Sync>;

/// A generic instantiated object: the constructor path plus its resolved
/// arguments
///
/// Registries that do not need a richer representation (the CLI, tests)
/// build these; embedders may register constructors producing any
/// [`ResolvedValue`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConstructedObject {
    pub constructor: String,
    pub args: ConstructorArgs,
}

/// Injected mapping of dotted names to constructors and enumerations
#[derive(Clone, Default)]
pub struct ConstructorRegistry {
    constructors: HashMap<String, ConstructorFn>,
    enums: HashMap<String, IndexMap<String, ResolvedValue>>,
    /// When set, unknown constructor paths instantiate a generic
    /// [`ConstructedObject`] instead of failing
    object_fallback: bool,
}

impl std::fmt::Debug for ConstructorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstructorRegistry")
            .field("constructors", &self.constructors.keys())
            .field("enums", &self.enums.keys())
            .field("object_fallback", &self.object_fallback)
            .finish()
    }
}

impl ConstructorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that instantiates unknown constructor paths as generic
    /// objects. Used by the CLI, whose constructor set belongs to the
    /// execution backend and is not known at compile time.
    pub fn permissive() -> Self {
        Self {
            object_fallback: true,
            ..Self::default()
        }
    }

    /// Register a constructor closure under a dotted `pkg:Name` path
    pub fn register_constructor<F>(&mut self, path: &str, constructor: F) -> &mut Self
    where
        F: Fn(ConstructorArgs) -> Result<ResolvedValue> + Send + Sync + 'static,
    {
        self.constructors
            .insert(path.to_string(), Arc::new(constructor));
        self
    }

    /// Register a constructor that builds a generic [`ConstructedObject`]
    pub fn register_object(&mut self, path: &str) -> &mut Self {
        let owned = path.to_string();
        self.register_constructor(path, move |args| {
            Ok(ResolvedValue::Object(ConstructedObject {
                constructor: owned.clone(),
                args,
            }))
        })
    }

    /// Register an enumeration's members under a dotted `pkg:Enum` path
    pub fn register_enum(
        &mut self,
        path: &str,
        members: IndexMap<String, ResolvedValue>,
    ) -> &mut Self {
        self.enums.insert(path.to_string(), members);
        self
    }

    pub fn has_constructor(&self, path: &str) -> bool {
        self.object_fallback || self.constructors.contains_key(path)
    }

    /// Invoke the constructor registered under `path`
    pub fn construct(&self, path: &str, args: ConstructorArgs) -> Result<ResolvedValue> {
        match self.constructors.get(path) {
            Some(constructor) => constructor(args),
            None if self.object_fallback => Ok(ResolvedValue::Object(ConstructedObject {
                constructor: path.to_string(),
                args,
            })),
            None => Err(CompileError::ConstructorNotFound {
                path: path.to_string(),
            }),
        }
    }

    /// Resolve a `pkg:Enum:MEMBER` reference to the member's value
    pub fn enum_member(&self, reference: &str) -> Result<ResolvedValue> {
        let (enum_path, member) =
            reference
                .rsplit_once(':')
                .ok_or_else(|| CompileError::ConstructorNotFound {
                    path: reference.to_string(),
                })?;

        let members =
            self.enums
                .get(enum_path)
                .ok_or_else(|| CompileError::ConstructorNotFound {
                    path: enum_path.to_string(),
                })?;

        members
            .get(member)
            .cloned()
            .ok_or_else(|| CompileError::UnknownEnumMember {
                enum_path: enum_path.to_string(),
                member: member.to_string(),
            })
    }
}

/// Walks resolved values instantiating descriptor mappings bottom-up
pub struct DescriptorResolver<'a> {
    registry: &'a ConstructorRegistry,
}

impl<'a> DescriptorResolver<'a> {
    pub fn new(registry: &'a ConstructorRegistry) -> Self {
        Self { registry }
    }

    /// Recursively instantiate every descriptor in `value`
    pub fn resolve(&self, value: ResolvedValue) -> Result<ResolvedValue> {
        match value {
            ResolvedValue::Mapping(map) => {
                if map.contains_key(FACTORY_FUNCTION) {
                    self.instantiate(map)
                } else if let Some(reference) = map.get(FACTORY_ENUM) {
                    let reference = reference.as_str().ok_or_else(|| {
                        CompileError::ConstructorNotFound {
                            path: format!("{reference:?}"),
                        }
                    })?;
                    self.registry.enum_member(reference)
                } else {
                    let mut resolved = IndexMap::with_capacity(map.len());
                    for (key, v) in map {
                        resolved.insert(key, self.resolve(v)?);
                    }
                    Ok(ResolvedValue::Mapping(resolved))
                }
            }
            ResolvedValue::Sequence(seq) => seq
                .into_iter()
                .map(|v| self.resolve(v))
                .collect::<Result<Vec<_>>>()
                .map(ResolvedValue::Sequence),
            other => Ok(other),
        }
    }

    fn instantiate(&self, mut map: IndexMap<String, ResolvedValue>) -> Result<ResolvedValue> {
        let path = match map.shift_remove(FACTORY_FUNCTION) {
            Some(ResolvedValue::String(path)) => path,
            other => {
                return Err(CompileError::ConstructorNotFound {
                    path: format!("{other:?}"),
                })
            }
        };

        let kwargs = match map.shift_remove(FACTORY_KWARGS) {
            Some(ResolvedValue::Mapping(kwargs)) => kwargs,
            Some(other) => {
                return Err(CompileError::ConstructorNotFound {
                    path: format!("{path} (kwargs must be a mapping, found {other:?})"),
                })
            }
            None => IndexMap::new(),
        };

        // Arguments resolve depth-first before the constructor runs
        let mut resolved_kwargs = IndexMap::with_capacity(kwargs.len());
        for (key, v) in kwargs {
            resolved_kwargs.insert(key, self.resolve(v)?);
        }

        self.registry.construct(&path, resolved_kwargs)
    }
}
