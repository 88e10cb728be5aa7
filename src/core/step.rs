//! Step model and kind dispatch
//!
//! Step kind is determined by which kind-specific field group is present in
//! the definition, dispatched through a [`StepKindRegistry`] supplied by the
//! surrounding application. The registry is data, not code: a kind is a
//! name, a rendered type name, and the discriminator field that identifies
//! it, with an optional refinement relation (tuning refines training, so a
//! definition carrying both discriminators is a tuning step).

use crate::core::error::{CompileError, Result};
use crate::core::expr::ResolvedValue;
use indexmap::IndexMap;

/// Step definition keys consumed by the compiler itself rather than the kind
pub const DEPENDS_ON: &str = "depends_on";
pub const IF_STEPS: &str = "if_steps";
pub const ELSE_STEPS: &str = "else_steps";

/// One registered step kind
#[derive(Debug, Clone)]
pub struct StepKindSpec {
    /// Kind name used in diagnostics and dispatch
    pub name: String,
    /// Type string emitted in the rendered definition
    pub type_name: String,
    /// Field whose presence selects this kind
    pub discriminator: String,
    /// Kind this one refines; both discriminators present selects this kind
    pub refines: Option<String>,
}

/// Registry of step kinds, supplied at startup
#[derive(Debug, Clone, Default)]
pub struct StepKindRegistry {
    kinds: Vec<StepKindSpec>,
}

impl StepKindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard kind set understood by the stock CLI
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for (name, type_name, discriminator, refines) in [
            ("processing", "Processing", "processor_kwargs", None),
            ("training", "Training", "estimator_kwargs", None),
            ("tuning", "Tuning", "tuner_kwargs", Some("training")),
            ("transform", "Transform", "transformer_kwargs", None),
            ("model", "Model", "model_kwargs", None),
            ("condition", "Condition", "conditions", None),
            ("fail", "Fail", "error_message", None),
            ("callback", "Callback", "sqs_queue_url", None),
            ("lambda", "Lambda", "lambda_func_kwargs", None),
            ("automl", "AutoML", "automl_kwargs", None),
            ("cluster-job", "EMR", "emr_step_config_kwargs", None),
            ("notebook", "NotebookJob", "notebook_job_kwargs", None),
            ("check", "Check", "check_job_config_kwargs", None),
        ] {
            registry.register(StepKindSpec {
                name: name.to_string(),
                type_name: type_name.to_string(),
                discriminator: discriminator.to_string(),
                refines: refines.map(str::to_string),
            });
        }
        registry
    }

    pub fn register(&mut self, spec: StepKindSpec) -> &mut Self {
        self.kinds.push(spec);
        self
    }

    /// Select the kind whose discriminator field the definition carries
    ///
    /// Exactly one discriminator must match, except when one matched kind
    /// refines the other; the refining kind wins.
    pub fn dispatch(
        &self,
        step: &str,
        fields: &IndexMap<String, ResolvedValue>,
    ) -> Result<&StepKindSpec> {
        let matched: Vec<&StepKindSpec> = self
            .kinds
            .iter()
            .filter(|kind| fields.contains_key(&kind.discriminator))
            .collect();

        match matched.as_slice() {
            [kind] => Ok(kind),
            [a, b] if a.refines.as_deref() == Some(b.name.as_str()) => Ok(a),
            [a, b] if b.refines.as_deref() == Some(a.name.as_str()) => Ok(b),
            _ => Err(CompileError::UnknownStepKind {
                step: step.to_string(),
                matched: matched.iter().map(|kind| kind.name.clone()).collect(),
            }),
        }
    }
}

/// A compiled pipeline step
///
/// Branch member lists start as names taken from `if_steps`/`else_steps`;
/// the graph compiler moves the named steps out of the top-level table and
/// into `if_members`/`else_members`.
#[derive(Debug, Clone)]
pub struct CompiledStep {
    pub name: String,
    pub kind: String,
    pub type_name: String,
    pub depends_on: Vec<String>,
    pub arguments: IndexMap<String, ResolvedValue>,
    pub if_steps: Vec<String>,
    pub else_steps: Vec<String>,
    pub if_members: Vec<CompiledStep>,
    pub else_members: Vec<CompiledStep>,
}

impl CompiledStep {
    /// Build a step from its resolved definition mapping
    pub fn from_definition(
        name: &str,
        mut fields: IndexMap<String, ResolvedValue>,
        registry: &StepKindRegistry,
    ) -> Result<Self> {
        let kind = registry.dispatch(name, &fields)?.clone();

        let depends_on = take_name_list(&mut fields, DEPENDS_ON);
        let if_steps = take_name_list(&mut fields, IF_STEPS);
        let else_steps = take_name_list(&mut fields, ELSE_STEPS);

        Ok(CompiledStep {
            name: name.to_string(),
            kind: kind.name,
            type_name: kind.type_name,
            depends_on,
            arguments: fields,
            if_steps,
            else_steps,
            if_members: Vec::new(),
            else_members: Vec::new(),
        })
    }

    /// Whether this step owns conditional branches
    pub fn has_branches(&self) -> bool {
        !self.if_steps.is_empty() || !self.else_steps.is_empty()
    }
}

fn take_name_list(fields: &mut IndexMap<String, ResolvedValue>, key: &str) -> Vec<String> {
    match fields.shift_remove(key) {
        Some(ResolvedValue::Sequence(seq)) => seq
            .into_iter()
            .filter_map(|v| match v {
                ResolvedValue::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        Some(ResolvedValue::String(s)) => vec![s],
        _ => Vec::new(),
    }
}
