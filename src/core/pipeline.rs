//! Pipeline assembly
//!
//! The compiler front door: resolve the pipeline's subtree of the merged
//! configuration, instantiate descriptors, compile the step graph, and
//! combine it with the declared parameters, property files, tags, and
//! settings into an immutable [`Pipeline`] artifact.
//!
//! Reserved keys of a pipeline definition are consumed here; every other
//! top-level key is a step.

use crate::core::context::Context;
use crate::core::descriptor::{ConstructorRegistry, DescriptorResolver};
use crate::core::error::{CompileError, Result};
use crate::core::expr::{ExpressionResolver, ResolvedValue};
use crate::core::graph::StepGraph;
use crate::core::step::{CompiledStep, StepKindRegistry};
use indexmap::IndexMap;
use serde_yaml::Mapping;
use tracing::debug;

pub const NAME_KEY: &str = "name";
pub const PARAMETERS_KEY: &str = "parameters";
pub const PROPERTY_FILES_KEY: &str = "property_files";
pub const MAX_PARALLEL_KEY: &str = "max_parallel_execution_steps";
pub const JOB_PREFIX_KEY: &str = "use_custom_job_prefix";
pub const EXPERIMENT_CONFIG_KEY: &str = "pipeline_experiment_config";
/// Top-level tree key for global tags, outside any pipeline definition
pub const TAGS_KEY: &str = "tags";

/// A declared runtime parameter
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    /// Constructor path for the parameter's type, validated against the
    /// registry when present
    pub type_name: Option<String>,
    pub default_value: Option<ResolvedValue>,
}

/// A declared property file: a named accessor over a step's output
#[derive(Debug, Clone)]
pub struct PropertyFile {
    pub name: String,
    pub fields: IndexMap<String, ResolvedValue>,
}

/// Optional execution settings taken from reserved keys
#[derive(Debug, Clone, Default)]
pub struct PipelineSettings {
    pub max_parallel_execution_steps: Option<u64>,
    pub use_custom_job_prefix: Option<bool>,
    pub pipeline_experiment_config: Option<IndexMap<String, ResolvedValue>>,
}

/// The compiled pipeline artifact
#[derive(Debug)]
pub struct Pipeline {
    pub name: String,
    pub parameters: IndexMap<String, Parameter>,
    pub property_files: IndexMap<String, PropertyFile>,
    pub tags: Vec<ResolvedValue>,
    pub settings: PipelineSettings,
    graph: StepGraph,
}

impl Pipeline {
    /// Top-level steps in execution order
    pub fn steps(&self) -> impl Iterator<Item = &CompiledStep> {
        self.graph.ordered()
    }

    pub fn step(&self, name: &str) -> Option<&CompiledStep> {
        self.graph.get(name)
    }

    pub fn graph(&self) -> &StepGraph {
        &self.graph
    }

    /// Render the serialized definition consumed by the execution backend
    pub fn definition(&self) -> serde_json::Value {
        use serde_json::{json, Map, Value};

        let mut def = Map::new();
        def.insert("Name".to_string(), json!(self.name));

        if !self.parameters.is_empty() {
            let parameters: Vec<Value> = self
                .parameters
                .values()
                .map(|p| {
                    let mut entry = Map::new();
                    entry.insert("Name".to_string(), json!(p.name));
                    if let Some(type_name) = &p.type_name {
                        entry.insert("Type".to_string(), json!(type_name));
                    }
                    if let Some(default) = &p.default_value {
                        entry.insert("DefaultValue".to_string(), default.to_definition());
                    }
                    Value::Object(entry)
                })
                .collect();
            def.insert("Parameters".to_string(), Value::Array(parameters));
        }

        if !self.property_files.is_empty() {
            let files: Vec<Value> = self
                .property_files
                .values()
                .map(|f| {
                    let mut entry = Map::new();
                    entry.insert("Name".to_string(), json!(f.name));
                    for (key, value) in &f.fields {
                        entry.insert(key.clone(), value.to_definition());
                    }
                    Value::Object(entry)
                })
                .collect();
            def.insert("PropertyFiles".to_string(), Value::Array(files));
        }

        if !self.tags.is_empty() {
            def.insert(
                "Tags".to_string(),
                Value::Array(self.tags.iter().map(ResolvedValue::to_definition).collect()),
            );
        }

        if let Some(max) = self.settings.max_parallel_execution_steps {
            def.insert("MaxParallelExecutionSteps".to_string(), json!(max));
        }
        if let Some(prefix) = self.settings.use_custom_job_prefix {
            def.insert("UseCustomJobPrefix".to_string(), json!(prefix));
        }
        if let Some(config) = &self.settings.pipeline_experiment_config {
            def.insert(
                "PipelineExperimentConfig".to_string(),
                Value::Object(
                    config
                        .iter()
                        .map(|(k, v)| (k.clone(), v.to_definition()))
                        .collect(),
                ),
            );
        }

        def.insert(
            "Steps".to_string(),
            Value::Array(self.graph.ordered().map(step_definition).collect()),
        );
        Value::Object(def)
    }
}

fn step_definition(step: &CompiledStep) -> serde_json::Value {
    use serde_json::{json, Map, Value};

    let mut def = Map::new();
    def.insert("Name".to_string(), json!(step.name));
    def.insert("Type".to_string(), json!(step.type_name));
    if !step.depends_on.is_empty() {
        def.insert("DependsOn".to_string(), json!(step.depends_on));
    }
    def.insert(
        "Arguments".to_string(),
        Value::Object(
            step.arguments
                .iter()
                .map(|(k, v)| (k.clone(), v.to_definition()))
                .collect(),
        ),
    );
    if !step.if_members.is_empty() {
        def.insert(
            "IfSteps".to_string(),
            Value::Array(step.if_members.iter().map(step_definition).collect()),
        );
    }
    if !step.else_members.is_empty() {
        def.insert(
            "ElseSteps".to_string(),
            Value::Array(step.else_members.iter().map(step_definition).collect()),
        );
    }
    Value::Object(def)
}

/// Compiles one pipeline out of a merged configuration tree
pub struct PipelineCompiler<'a> {
    context: &'a Context,
    constructors: &'a ConstructorRegistry,
    kinds: &'a StepKindRegistry,
}

impl<'a> PipelineCompiler<'a> {
    pub fn new(
        context: &'a Context,
        constructors: &'a ConstructorRegistry,
        kinds: &'a StepKindRegistry,
    ) -> Self {
        Self {
            context,
            constructors,
            kinds,
        }
    }

    /// Compile the pipeline under the dotted key `pipeline_key`
    pub fn compile(&self, tree: &Mapping, pipeline_key: &str) -> Result<Pipeline> {
        let resolver = ExpressionResolver::new(tree, self.context);
        let resolved = resolver.resolve_path(pipeline_key)?;
        let resolved = DescriptorResolver::new(self.constructors).resolve(resolved)?;

        let mut fields =
            resolved
                .into_mapping()
                .ok_or_else(|| CompileError::InvalidHierarchyConfig {
                    reason: format!("'{pipeline_key}' is not a mapping"),
                })?;

        let name = match fields.shift_remove(NAME_KEY) {
            Some(ResolvedValue::String(name)) => name,
            _ => pipeline_key
                .rsplit('.')
                .next()
                .unwrap_or(pipeline_key)
                .to_string(),
        };

        let parameters = self.collect_parameters(fields.shift_remove(PARAMETERS_KEY))?;
        let property_files = collect_property_files(fields.shift_remove(PROPERTY_FILES_KEY));
        let settings = PipelineSettings {
            max_parallel_execution_steps: fields
                .shift_remove(MAX_PARALLEL_KEY)
                .and_then(|v| v.as_u64()),
            use_custom_job_prefix: fields.shift_remove(JOB_PREFIX_KEY).and_then(|v| v.as_bool()),
            pipeline_experiment_config: fields
                .shift_remove(EXPERIMENT_CONFIG_KEY)
                .and_then(ResolvedValue::into_mapping),
        };
        let tags = self.collect_tags(tree, &resolver)?;

        let mut steps = IndexMap::with_capacity(fields.len());
        for (step_name, definition) in fields {
            let step_fields =
                definition
                    .into_mapping()
                    .ok_or_else(|| CompileError::InvalidHierarchyConfig {
                        reason: format!("step '{step_name}' is not a mapping"),
                    })?;
            let step = CompiledStep::from_definition(&step_name, step_fields, self.kinds)?;
            steps.insert(step_name, step);
        }
        debug!(pipeline = %name, steps = steps.len(), "compiling step graph");

        let graph = StepGraph::build(steps)?;
        for step in graph.all_steps() {
            check_declared_references(step, &parameters, &property_files)?;
        }

        Ok(Pipeline {
            name,
            parameters,
            property_files,
            tags,
            settings,
            graph,
        })
    }

    fn collect_parameters(
        &self,
        declared: Option<ResolvedValue>,
    ) -> Result<IndexMap<String, Parameter>> {
        let Some(ResolvedValue::Mapping(table)) = declared else {
            return Ok(IndexMap::new());
        };

        let mut parameters = IndexMap::with_capacity(table.len());
        for (name, spec) in table {
            let mut spec = spec.into_mapping().unwrap_or_default();
            let type_name = match spec.shift_remove("type") {
                Some(ResolvedValue::String(t)) => Some(t),
                _ => None,
            };
            if let Some(type_name) = &type_name {
                if !self.constructors.has_constructor(type_name) {
                    return Err(CompileError::ConstructorNotFound {
                        path: type_name.clone(),
                    });
                }
            }
            let default_value = spec.shift_remove("default_value");
            parameters.insert(
                name.clone(),
                Parameter {
                    name,
                    type_name,
                    default_value,
                },
            );
        }
        Ok(parameters)
    }

    fn collect_tags(
        &self,
        tree: &Mapping,
        resolver: &ExpressionResolver<'_>,
    ) -> Result<Vec<ResolvedValue>> {
        let Some(tags) = tree.get(TAGS_KEY) else {
            return Ok(Vec::new());
        };
        let resolved = resolver.resolve(tags)?;
        let resolved = DescriptorResolver::new(self.constructors).resolve(resolved)?;
        Ok(match resolved {
            ResolvedValue::Sequence(tags) => tags,
            other => vec![other],
        })
    }
}

fn collect_property_files(declared: Option<ResolvedValue>) -> IndexMap<String, PropertyFile> {
    let Some(ResolvedValue::Mapping(table)) = declared else {
        return IndexMap::new();
    };
    table
        .into_iter()
        .map(|(name, fields)| {
            let fields = fields.into_mapping().unwrap_or_default();
            (name.clone(), PropertyFile { name, fields })
        })
        .collect()
}

/// Every `param:` / `propertyFile:` handle in a step must name a declared
/// entry; the first violation aborts
fn check_declared_references(
    step: &CompiledStep,
    parameters: &IndexMap<String, Parameter>,
    property_files: &IndexMap<String, PropertyFile>,
) -> Result<()> {
    fn scan(
        step: &str,
        value: &ResolvedValue,
        parameters: &IndexMap<String, Parameter>,
        property_files: &IndexMap<String, PropertyFile>,
    ) -> Result<()> {
        match value {
            ResolvedValue::Parameter(name) => {
                if !parameters.contains_key(name) {
                    return Err(CompileError::UndeclaredParameter {
                        step: step.to_string(),
                        parameter: name.clone(),
                    });
                }
            }
            ResolvedValue::PropertyFileRef(name) => {
                if !property_files.contains_key(name) {
                    return Err(CompileError::UndeclaredPropertyFile {
                        step: step.to_string(),
                        name: name.clone(),
                    });
                }
            }
            ResolvedValue::Sequence(seq) => {
                for v in seq {
                    scan(step, v, parameters, property_files)?;
                }
            }
            ResolvedValue::Mapping(map) => {
                for v in map.values() {
                    scan(step, v, parameters, property_files)?;
                }
            }
            ResolvedValue::Object(obj) => {
                for v in obj.args.values() {
                    scan(step, v, parameters, property_files)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    for value in step.arguments.values() {
        scan(&step.name, value, parameters, property_files)?;
    }
    Ok(())
}
