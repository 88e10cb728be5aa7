//! Expression resolver - the embedded reference micro-language
//!
//! String leaves of the configuration tree may carry references:
//!
//! * `%{lookup('path.to.key')}` - self-lookup against the merged tree,
//!   resolved eagerly and recursively to a fixed point
//! * `%{var}` - context variable substitution
//! * `${VAR}` / `${VAR:-fallback}` - process environment interpolation
//! * `param:name` - parameter placeholder, kept as a typed handle
//! * `exec:NAME` - execution-variable reference, kept as a typed handle
//! * `propertyFile:Name` - property-file alias, kept as a typed handle
//! * `<step>.properties.<path>` - reference into another step's outputs,
//!   kept as a typed handle
//!
//! Handles are deliberately not reduced to literals: the execution backend
//! resolves them only at run time. Strings that merely look reference-like
//! but match none of the forms above pass through untouched.

use crate::core::context::Context;
use crate::core::descriptor::ConstructedObject;
use crate::core::error::{CompileError, Result};
use indexmap::IndexMap;
use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::sync::LazyLock;

pub const PARAMETER_PREFIX: &str = "param:";
pub const EXECUTION_VARIABLE_PREFIX: &str = "exec:";
pub const PROPERTY_FILE_PREFIX: &str = "propertyFile:";
pub const PROPERTIES_IDENTIFIER: &str = ".properties.";

static INTERP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%\{([^}]*)\}").expect("interpolation pattern"));

static LOOKUP_CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^lookup\('([^']*)'\)$").expect("lookup pattern"));

static WHOLE_LOOKUP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^%\{\s*lookup\('([^']*)'\)\s*\}$").expect("lookup pattern"));

static ENV_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("env pattern")
});

static STEP_PROPERTY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z0-9_-]+)\.properties\.(\S+)$").expect("step property pattern"));

/// A fully resolved configuration value
///
/// Literals mirror YAML; the handle variants preserve live references for
/// the pipeline definition; `Object` carries a descriptor-instantiated
/// value.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedValue {
    Null,
    Bool(bool),
    Number(serde_yaml::Number),
    String(String),
    Sequence(Vec<ResolvedValue>),
    Mapping(IndexMap<String, ResolvedValue>),
    /// `param:name` - resolved against the declared parameter table at assembly
    Parameter(String),
    /// `exec:NAME` - resolved by the execution backend at run time
    ExecutionVariable(String),
    /// `propertyFile:Name` - resolved against the declared property-file table
    PropertyFileRef(String),
    /// `<step>.properties.<path>` - accessor into another step's outputs
    StepProperty(StepPropertyRef),
    Object(ConstructedObject),
}

/// Deferred accessor into a previously compiled step's declared outputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepPropertyRef {
    pub step: String,
    pub path: String,
}

impl ResolvedValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ResolvedValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ResolvedValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ResolvedValue::Number(n) => n.as_u64(),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&IndexMap<String, ResolvedValue>> {
        match self {
            ResolvedValue::Mapping(map) => Some(map),
            _ => None,
        }
    }

    pub fn into_mapping(self) -> Option<IndexMap<String, ResolvedValue>> {
        match self {
            ResolvedValue::Mapping(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[ResolvedValue]> {
        match self {
            ResolvedValue::Sequence(seq) => Some(seq),
            _ => None,
        }
    }

    /// Render to the definition JSON consumed by the execution backend
    ///
    /// Handles become live `{"Get": ...}` / `{"Ref": ...}` references
    /// rather than snapshotted values.
    pub fn to_definition(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            ResolvedValue::Null => serde_json::Value::Null,
            ResolvedValue::Bool(b) => json!(b),
            ResolvedValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    json!(i)
                } else if let Some(u) = n.as_u64() {
                    json!(u)
                } else {
                    n.as_f64().map(|f| json!(f)).unwrap_or(serde_json::Value::Null)
                }
            }
            ResolvedValue::String(s) => json!(s),
            ResolvedValue::Sequence(seq) => {
                serde_json::Value::Array(seq.iter().map(Self::to_definition).collect())
            }
            ResolvedValue::Mapping(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_definition()))
                    .collect(),
            ),
            ResolvedValue::Parameter(name) => json!({ "Get": format!("Parameters.{name}") }),
            ResolvedValue::ExecutionVariable(name) => {
                json!({ "Get": format!("Execution.{name}") })
            }
            ResolvedValue::PropertyFileRef(name) => json!({ "Ref": name }),
            ResolvedValue::StepProperty(prop) => {
                json!({ "Get": format!("Steps.{}.{}", prop.step, prop.path) })
            }
            ResolvedValue::Object(obj) => json!({
                "Factory": obj.constructor,
                "Arguments": serde_json::Value::Object(
                    obj.args
                        .iter()
                        .map(|(k, v)| (k.clone(), v.to_definition()))
                        .collect(),
                ),
            }),
        }
    }
}

/// Walks the configuration tree rewriting reference strings
pub struct ExpressionResolver<'a> {
    tree: &'a Mapping,
    context: &'a Context,
}

impl<'a> ExpressionResolver<'a> {
    pub fn new(tree: &'a Mapping, context: &'a Context) -> Self {
        Self { tree, context }
    }

    /// Resolve an arbitrary subtree
    pub fn resolve(&self, value: &Value) -> Result<ResolvedValue> {
        self.resolve_value(value, &mut Vec::new())
    }

    /// Resolve the subtree under a dotted top-level key
    pub fn resolve_path(&self, path: &str) -> Result<ResolvedValue> {
        let mut stack = Vec::new();
        self.lookup(path, &mut stack)
    }

    fn resolve_value(&self, value: &Value, stack: &mut Vec<String>) -> Result<ResolvedValue> {
        match value {
            Value::Null => Ok(ResolvedValue::Null),
            Value::Bool(b) => Ok(ResolvedValue::Bool(*b)),
            Value::Number(n) => Ok(ResolvedValue::Number(n.clone())),
            Value::String(s) => self.resolve_string(s, stack),
            Value::Sequence(seq) => seq
                .iter()
                .map(|v| self.resolve_value(v, stack))
                .collect::<Result<Vec<_>>>()
                .map(ResolvedValue::Sequence),
            Value::Mapping(map) => {
                let mut resolved = IndexMap::with_capacity(map.len());
                for (key, v) in map {
                    resolved.insert(key_to_string(key), self.resolve_value(v, stack)?);
                }
                Ok(ResolvedValue::Mapping(resolved))
            }
            Value::Tagged(tagged) => self.resolve_value(&tagged.value, stack),
        }
    }

    fn resolve_string(&self, s: &str, stack: &mut Vec<String>) -> Result<ResolvedValue> {
        // A string that is exactly one lookup token substitutes the whole
        // subtree, preserving structure
        if let Some(caps) = WHOLE_LOOKUP_RE.captures(s) {
            return self.lookup(&caps[1], stack);
        }
        let interpolated = self.interpolate(s, stack)?;
        Ok(classify_reference(&interpolated))
    }

    /// Resolve a dotted path against the merged tree
    fn lookup(&self, path: &str, stack: &mut Vec<String>) -> Result<ResolvedValue> {
        if stack.iter().any(|seen| seen == path) {
            let mut cycle = stack.clone();
            cycle.push(path.to_string());
            return Err(CompileError::CircularLookup { cycle });
        }

        let value = self
            .navigate(path)
            .ok_or_else(|| CompileError::LookupKeyNotFound {
                path: path.to_string(),
            })?;

        stack.push(path.to_string());
        let resolved = self.resolve_value(value, stack);
        stack.pop();
        resolved
    }

    fn navigate(&self, path: &str) -> Option<&'a Value> {
        let mut segments = path.split('.');
        let mut current = self.tree.get(segments.next()?)?;
        for segment in segments {
            current = current.as_mapping()?.get(segment)?;
        }
        Some(current)
    }

    /// Rewrite `%{...}` and `${...}` tokens inside a string
    fn interpolate(&self, s: &str, stack: &mut Vec<String>) -> Result<String> {
        let mut result = String::with_capacity(s.len());
        let mut last = 0;
        for caps in INTERP_RE.captures_iter(s) {
            let whole = caps.get(0).expect("capture group 0");
            let inner = caps[1].trim();
            result.push_str(&s[last..whole.start()]);

            if let Some(lookup_caps) = LOOKUP_CALL_RE.captures(inner) {
                let resolved = self.lookup(&lookup_caps[1], stack)?;
                result.push_str(&render_inline(&resolved));
            } else {
                let value =
                    self.context
                        .get(inner)
                        .ok_or_else(|| CompileError::UndefinedContextVariable {
                            name: inner.to_string(),
                        })?;
                result.push_str(value);
            }
            last = whole.end();
        }
        result.push_str(&s[last..]);

        interpolate_env(&result)
    }
}

/// Rewrite `${VAR}` / `${VAR:-fallback}` tokens from the process environment
fn interpolate_env(s: &str) -> Result<String> {
    let mut result = String::with_capacity(s.len());
    let mut last = 0;
    for caps in ENV_RE.captures_iter(s) {
        let whole = caps.get(0).expect("capture group 0");
        let name = &caps[1];
        let value = match std::env::var(name) {
            Ok(v) if !v.is_empty() => v,
            _ => match caps.get(2) {
                Some(fallback) => fallback.as_str().to_string(),
                None => {
                    return Err(CompileError::UndefinedEnvironmentVariable {
                        name: name.to_string(),
                    })
                }
            },
        };
        result.push_str(&s[last..whole.start()]);
        result.push_str(&value);
        last = whole.end();
    }
    result.push_str(&s[last..]);
    Ok(result)
}

/// Classify a fully interpolated string as a typed handle or plain text
fn classify_reference(s: &str) -> ResolvedValue {
    if let Some(name) = s.strip_prefix(PARAMETER_PREFIX) {
        if !name.is_empty() {
            return ResolvedValue::Parameter(name.to_string());
        }
    }
    if let Some(name) = s.strip_prefix(EXECUTION_VARIABLE_PREFIX) {
        if !name.is_empty() {
            return ResolvedValue::ExecutionVariable(name.to_string());
        }
    }
    if let Some(name) = s.strip_prefix(PROPERTY_FILE_PREFIX) {
        if !name.is_empty() {
            return ResolvedValue::PropertyFileRef(name.to_string());
        }
    }
    if let Some(caps) = STEP_PROPERTY_RE.captures(s) {
        return ResolvedValue::StepProperty(StepPropertyRef {
            step: caps[1].to_string(),
            path: caps[2].to_string(),
        });
    }
    ResolvedValue::String(s.to_string())
}

/// Render a resolved value for embedding inside a larger string
fn render_inline(value: &ResolvedValue) -> String {
    match value {
        ResolvedValue::String(s) => s.clone(),
        ResolvedValue::Bool(b) => b.to_string(),
        ResolvedValue::Number(n) => n.to_string(),
        ResolvedValue::Null => String::new(),
        other => other.to_definition().to_string(),
    }
}

fn key_to_string(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(yaml: &str) -> Mapping {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn resolve_str(yaml: &str, ctx: &Context, input: &str) -> Result<ResolvedValue> {
        let tree = tree(yaml);
        let resolver = ExpressionResolver::new(&tree, ctx);
        resolver.resolve(&Value::String(input.to_string()))
    }

    #[test]
    fn test_lookup_fixed_point() {
        let yaml = r#"
a: "%{lookup('b')}-suffix"
b: "val"
"#;
        let ctx = Context::new();
        let resolved = resolve_str(yaml, &ctx, "%{lookup('a')}").unwrap();
        assert_eq!(resolved, ResolvedValue::String("val-suffix".to_string()));
    }

    #[test]
    fn test_lookup_cycle_detected() {
        let yaml = r#"
a: "%{lookup('b')}"
b: "%{lookup('a')}"
"#;
        let ctx = Context::new();
        let err = resolve_str(yaml, &ctx, "%{lookup('a')}").unwrap_err();
        match err {
            CompileError::CircularLookup { cycle } => {
                assert_eq!(cycle, vec!["a", "b", "a"]);
            }
            other => panic!("expected CircularLookup, got {other:?}"),
        }
    }

    #[test]
    fn test_lookup_missing_key() {
        let err = resolve_str("a: 1", &Context::new(), "%{lookup('b.c')}").unwrap_err();
        assert!(matches!(
            err,
            CompileError::LookupKeyNotFound { path } if path == "b.c"
        ));
    }

    #[test]
    fn test_lookup_dotted_path() {
        let yaml = r#"
defaults:
  image: "repo/image:latest"
"#;
        let resolved =
            resolve_str(yaml, &Context::new(), "%{lookup('defaults.image')}").unwrap();
        assert_eq!(
            resolved,
            ResolvedValue::String("repo/image:latest".to_string())
        );
    }

    #[test]
    fn test_whole_lookup_preserves_structure() {
        let yaml = r#"
defaults:
  instance:
    count: 2
    type: large
"#;
        let resolved =
            resolve_str(yaml, &Context::new(), "%{lookup('defaults.instance')}").unwrap();
        let map = resolved.as_mapping().unwrap();
        assert_eq!(map.get("count").and_then(ResolvedValue::as_u64), Some(2));
    }

    #[test]
    fn test_context_variable() {
        let ctx = Context::from_pairs([("environment", "dev")]);
        let resolved = resolve_str("{}", &ctx, "bucket-%{environment}").unwrap();
        assert_eq!(resolved, ResolvedValue::String("bucket-dev".to_string()));
    }

    #[test]
    fn test_undefined_context_variable() {
        let err = resolve_str("{}", &Context::new(), "bucket-%{environment}").unwrap_err();
        assert!(matches!(
            err,
            CompileError::UndefinedContextVariable { name } if name == "environment"
        ));
    }

    #[test]
    fn test_env_interpolation() {
        std::env::set_var("PIPEWEAVE_TEST_REGION", "us-west-2");
        let resolved = resolve_str("{}", &Context::new(), "region-${PIPEWEAVE_TEST_REGION}").unwrap();
        assert_eq!(
            resolved,
            ResolvedValue::String("region-us-west-2".to_string())
        );
    }

    #[test]
    fn test_env_missing_fails() {
        let err =
            resolve_str("{}", &Context::new(), "${PIPEWEAVE_TEST_UNSET_VAR}").unwrap_err();
        assert!(matches!(
            err,
            CompileError::UndefinedEnvironmentVariable { name }
                if name == "PIPEWEAVE_TEST_UNSET_VAR"
        ));
    }

    #[test]
    fn test_env_missing_with_fallback() {
        let resolved =
            resolve_str("{}", &Context::new(), "${PIPEWEAVE_TEST_UNSET_VAR:-fallback}").unwrap();
        assert_eq!(resolved, ResolvedValue::String("fallback".to_string()));
    }

    #[test]
    fn test_parameter_handle() {
        let resolved = resolve_str("{}", &Context::new(), "param:instance_count").unwrap();
        assert_eq!(
            resolved,
            ResolvedValue::Parameter("instance_count".to_string())
        );
    }

    #[test]
    fn test_execution_variable_handle() {
        let resolved = resolve_str("{}", &Context::new(), "exec:PIPELINE_EXECUTION_ID").unwrap();
        assert_eq!(
            resolved,
            ResolvedValue::ExecutionVariable("PIPELINE_EXECUTION_ID".to_string())
        );
    }

    #[test]
    fn test_property_file_handle() {
        let resolved = resolve_str("{}", &Context::new(), "propertyFile:EvalReport").unwrap();
        assert_eq!(
            resolved,
            ResolvedValue::PropertyFileRef("EvalReport".to_string())
        );
    }

    #[test]
    fn test_step_property_handle() {
        let resolved =
            resolve_str("{}", &Context::new(), "train.properties.ModelArtifacts.S3ModelArtifacts")
                .unwrap();
        assert_eq!(
            resolved,
            ResolvedValue::StepProperty(StepPropertyRef {
                step: "train".to_string(),
                path: "ModelArtifacts.S3ModelArtifacts".to_string(),
            })
        );
    }

    #[test]
    fn test_unknown_reference_passthrough() {
        // Reference-like but matching no known form: left untouched
        let resolved = resolve_str("{}", &Context::new(), "something:odd.but.literal").unwrap();
        assert_eq!(
            resolved,
            ResolvedValue::String("something:odd.but.literal".to_string())
        );
    }

    #[test]
    fn test_lookup_result_classified_as_handle() {
        let yaml = r#"
defaults:
  count: "param:instance_count"
"#;
        let resolved =
            resolve_str(yaml, &Context::new(), "%{lookup('defaults.count')}").unwrap();
        assert_eq!(
            resolved,
            ResolvedValue::Parameter("instance_count".to_string())
        );
    }

    #[test]
    fn test_handle_definition_rendering() {
        assert_eq!(
            ResolvedValue::Parameter("x".to_string()).to_definition(),
            serde_json::json!({"Get": "Parameters.x"})
        );
        assert_eq!(
            ResolvedValue::StepProperty(StepPropertyRef {
                step: "train".to_string(),
                path: "ModelArtifacts".to_string(),
            })
            .to_definition(),
            serde_json::json!({"Get": "Steps.train.ModelArtifacts"})
        );
        assert_eq!(
            ResolvedValue::PropertyFileRef("Report".to_string()).to_definition(),
            serde_json::json!({"Ref": "Report"})
        );
    }
}
