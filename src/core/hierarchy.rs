//! Hierarchy resolver - layered configuration loading and merging
//!
//! A hierarchy file names an ordered list of layer templates (least to most
//! specific) with `%{var}` placeholders filled from the [`Context`]. Each
//! named layer is loaded from a [`LayerStore`] and deep-merged into a single
//! configuration tree: later layers strictly override earlier ones.

use crate::core::context::Context;
use crate::core::error::{CompileError, Result};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

static TEMPLATE_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%\{([^}]+)\}").expect("template variable pattern"));

/// One entry of the hierarchy list
///
/// Written either as a plain template string (absence tolerated) or as a
/// mapping with an explicit `required` flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LayerRef {
    Path(String),
    Detailed {
        path: String,
        #[serde(default)]
        required: bool,
    },
}

impl LayerRef {
    pub fn path(&self) -> &str {
        match self {
            LayerRef::Path(path) => path,
            LayerRef::Detailed { path, .. } => path,
        }
    }

    pub fn required(&self) -> bool {
        match self {
            LayerRef::Path(_) => false,
            LayerRef::Detailed { required, .. } => *required,
        }
    }
}

/// Hierarchy configuration loaded from YAML
///
/// Mirrors the on-disk format: `backends` names the layer sources, each
/// backend has its own settings section (`datadir` at minimum), `context`
/// lists the variables every compilation must supply, and `hierarchy` lists
/// the layer templates in merge order.
#[derive(Debug, Clone, Deserialize)]
pub struct HierarchyConfig {
    pub backends: Vec<String>,

    #[serde(default)]
    pub context: Vec<String>,

    pub hierarchy: Vec<LayerRef>,

    /// Per-backend settings sections, keyed by backend name
    #[serde(flatten)]
    backend_settings: IndexMap<String, Value>,
}

impl HierarchyConfig {
    /// Load a hierarchy configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a hierarchy configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: HierarchyConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the hierarchy configuration
    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            return Err(CompileError::InvalidHierarchyConfig {
                reason: "at least one backend must be listed".to_string(),
            });
        }
        if self.hierarchy.is_empty() {
            return Err(CompileError::InvalidHierarchyConfig {
                reason: "hierarchy must list at least one layer".to_string(),
            });
        }
        for backend in &self.backends {
            let settings = self.backend_settings.get(backend).ok_or_else(|| {
                CompileError::InvalidHierarchyConfig {
                    reason: format!("backend '{backend}' has no settings section"),
                }
            })?;
            let has_datadir = settings
                .as_mapping()
                .is_some_and(|m| m.contains_key("datadir"));
            if !has_datadir {
                return Err(CompileError::InvalidHierarchyConfig {
                    reason: format!("datadir not found in '{backend}' configuration"),
                });
            }
        }
        Ok(())
    }

    /// Data directory of the named backend
    pub fn datadir(&self, backend: &str) -> Result<PathBuf> {
        self.backend_settings
            .get(backend)
            .and_then(Value::as_mapping)
            .and_then(|m| m.get("datadir"))
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .ok_or_else(|| CompileError::InvalidHierarchyConfig {
                reason: format!("datadir not found in '{backend}' configuration"),
            })
    }

    /// The first listed backend
    pub fn primary_backend(&self) -> &str {
        &self.backends[0]
    }

    /// Resolve the hierarchy into a single merged configuration tree
    ///
    /// Pure with respect to its inputs: the same layers and context always
    /// produce an identical tree.
    pub fn resolve(&self, context: &Context, store: &dyn LayerStore) -> Result<Mapping> {
        for var in &self.context {
            if !context.contains(var) {
                return Err(CompileError::UndefinedContextVariable { name: var.clone() });
            }
        }

        let mut tree = Mapping::new();
        for layer in &self.hierarchy {
            let name = interpolate_template(layer.path(), context)?;
            match store.load(&name)? {
                Some(overlay) => {
                    debug!(layer = %name, "merging layer");
                    deep_merge(&mut tree, overlay);
                }
                None if layer.required() => {
                    return Err(CompileError::LayerNotFound { name });
                }
                None => {
                    debug!(layer = %name, "optional layer absent, treated as empty");
                }
            }
        }
        Ok(tree)
    }
}

/// Substitute every `%{var}` occurrence in a layer-name template
pub fn interpolate_template(template: &str, context: &Context) -> Result<String> {
    let mut result = String::with_capacity(template.len());
    let mut last = 0;
    for caps in TEMPLATE_VAR_RE.captures_iter(template) {
        let whole = caps.get(0).expect("capture group 0");
        let name = caps[1].trim();
        let value = context
            .get(name)
            .ok_or_else(|| CompileError::UndefinedContextVariable {
                name: name.to_string(),
            })?;
        result.push_str(&template[last..whole.start()]);
        result.push_str(value);
        last = whole.end();
    }
    result.push_str(&template[last..]);
    Ok(result)
}

/// Deep-merge `overlay` into `base`
///
/// Mapping keys are unioned and merged recursively; scalar and sequence
/// overlaps are replaced by the overlay value. Sequences are never
/// concatenated.
pub fn deep_merge(base: &mut Mapping, overlay: Mapping) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Mapping(existing)), Value::Mapping(incoming)) => {
                deep_merge(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Backing source of named configuration layers
///
/// Loading is the only I/O the compiler performs; it either succeeds,
/// fails with a named error, or reports the layer absent.
pub trait LayerStore {
    /// Load the named layer, or `None` if the backing source is absent
    fn load(&self, name: &str) -> Result<Option<Mapping>>;
}

/// Layer store over a directory of YAML documents (`<root>/<name>.yaml`)
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }
}

impl LayerStore for DirectoryStore {
    fn load(&self, name: &str) -> Result<Option<Mapping>> {
        let path = ["yaml", "yml"]
            .iter()
            .map(|ext| self.root.join(format!("{name}.{ext}")))
            .find(|p| p.is_file());

        let Some(path) = path else {
            return Ok(None);
        };

        let content = std::fs::read_to_string(&path)?;
        parse_layer(&content).map(Some)
    }
}

/// In-memory layer store, used by tests and embedders
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    layers: HashMap<String, Mapping>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a layer from a YAML document
    pub fn insert_yaml(&mut self, name: &str, yaml: &str) -> Result<()> {
        self.layers.insert(name.to_string(), parse_layer(yaml)?);
        Ok(())
    }
}

impl LayerStore for InMemoryStore {
    fn load(&self, name: &str) -> Result<Option<Mapping>> {
        Ok(self.layers.get(name).cloned())
    }
}

fn parse_layer(yaml: &str) -> Result<Mapping> {
    let value: Value = serde_yaml::from_str(yaml)?;
    match value {
        Value::Mapping(mapping) => Ok(mapping),
        // An empty document is a valid, empty layer
        Value::Null => Ok(Mapping::new()),
        other => Err(CompileError::InvalidHierarchyConfig {
            reason: format!("layer document must be a mapping, found: {other:?}"),
        }),
    }
}
