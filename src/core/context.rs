//! Compilation context - runtime variable bindings
//!
//! The context drives hierarchy layer selection and `%{var}` substitution.
//! It is assembled once by the caller and never mutated by the resolvers.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Immutable mapping of named runtime variables (environment, variant, team)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Context {
    vars: IndexMap<String, String>,
}

impl Context {
    /// Create an empty context
    pub fn new() -> Self {
        Self {
            vars: IndexMap::new(),
        }
    }

    /// Build a context from key/value pairs, later pairs overriding earlier
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Look up a variable
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Check whether a variable is bound
    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Iterate over bindings in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}
