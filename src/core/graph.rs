//! Step dependency graph
//!
//! Builds the execution ordering for a pipeline's steps. Edges come from
//! three places: explicit `depends_on` lists, condition steps owning their
//! branch members, and step-property references (a reference into step S's
//! outputs means S must run first). Branch members are removed from the top
//! level and attached to their owning condition step; edges that target a
//! member are routed to the owner.

use crate::core::error::{CompileError, Result};
use crate::core::expr::ResolvedValue;
use crate::core::step::CompiledStep;
use indexmap::{IndexMap, IndexSet};

/// Top-level steps with their dependency edges, topologically ordered
#[derive(Debug)]
pub struct StepGraph {
    steps: IndexMap<String, CompiledStep>,
    order: Vec<String>,
}

impl StepGraph {
    /// Build the graph from compiled steps in declaration order
    pub fn build(steps: IndexMap<String, CompiledStep>) -> Result<Self> {
        let top_level = attach_branch_members(steps)?;
        let owners = owner_table(&top_level);
        let successors = collect_edges(&top_level, &owners)?;
        detect_cycles(&top_level, &successors)?;
        let order = topological_order(&top_level, &successors);
        Ok(Self {
            steps: top_level,
            order,
        })
    }

    /// Steps in a stable execution order: dependencies first, declaration
    /// order breaking ties
    pub fn ordered(&self) -> impl Iterator<Item = &CompiledStep> {
        self.order.iter().map(|name| &self.steps[name])
    }

    pub fn get(&self, name: &str) -> Option<&CompiledStep> {
        self.steps.get(name)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Every step in the graph, branch members included
    pub fn all_steps(&self) -> impl Iterator<Item = &CompiledStep> {
        fn walk<'a>(step: &'a CompiledStep, out: &mut Vec<&'a CompiledStep>) {
            out.push(step);
            for member in step.if_members.iter().chain(&step.else_members) {
                walk(member, out);
            }
        }
        let mut all = Vec::new();
        for step in self.steps.values() {
            walk(step, &mut all);
        }
        all.into_iter()
    }
}

/// Move branch members out of the top-level table into their owning
/// condition step, recursively
///
/// Members may be declared anywhere relative to their owner, so ownership
/// is established in a first pass over every step's branch lists before any
/// step is moved.
fn attach_branch_members(
    mut pool: IndexMap<String, CompiledStep>,
) -> Result<IndexMap<String, CompiledStep>> {
    // Member name -> owning step; a second claim on the same name fails
    let mut owners: IndexMap<String, String> = IndexMap::new();
    for (name, step) in &pool {
        for member in step.if_steps.iter().chain(&step.else_steps) {
            if owners.insert(member.clone(), name.clone()).is_some() {
                return Err(CompileError::UnknownStepReference {
                    step: name.clone(),
                    reference: member.clone(),
                });
            }
        }
    }
    for (member, owner) in &owners {
        if !pool.contains_key(member) {
            return Err(CompileError::UnknownStepReference {
                step: owner.clone(),
                reference: member.clone(),
            });
        }
    }

    let (top_names, member_names): (Vec<String>, Vec<String>) = pool
        .keys()
        .cloned()
        .partition(|name| !owners.contains_key(name));

    let mut members: IndexMap<String, CompiledStep> = member_names
        .into_iter()
        .map(|name| {
            let step = pool.shift_remove(&name).expect("member present in pool");
            (name, step)
        })
        .collect();

    let mut top_level = IndexMap::with_capacity(pool.len());
    for name in top_names {
        let mut step = pool.shift_remove(&name).expect("top-level step present");
        claim_members(&mut step, &mut members)?;
        top_level.insert(name, step);
    }

    // Only condition steps claiming each other can strand members here
    if !members.is_empty() {
        return Err(CompileError::CyclicStepDependency {
            cycle: members.keys().cloned().collect(),
        });
    }
    Ok(top_level)
}

fn claim_members(step: &mut CompiledStep, pool: &mut IndexMap<String, CompiledStep>) -> Result<()> {
    for (names, members) in [
        (step.if_steps.clone(), &mut step.if_members),
        (step.else_steps.clone(), &mut step.else_members),
    ] {
        for member_name in names {
            let mut member =
                pool.shift_remove(&member_name)
                    .ok_or_else(|| CompileError::UnknownStepReference {
                        step: step.name.clone(),
                        reference: member_name.clone(),
                    })?;
            claim_members(&mut member, pool)?;
            members.push(member);
        }
    }
    Ok(())
}

/// Map every branch member (at any depth) to its top-level owner
fn owner_table(top_level: &IndexMap<String, CompiledStep>) -> IndexMap<String, String> {
    fn record(step: &CompiledStep, owner: &str, table: &mut IndexMap<String, String>) {
        for member in step.if_members.iter().chain(&step.else_members) {
            table.insert(member.name.clone(), owner.to_string());
            record(member, owner, table);
        }
    }
    let mut table = IndexMap::new();
    for (name, step) in top_level {
        record(step, name, &mut table);
    }
    table
}

/// Successor adjacency: edge A -> B means B runs after A
fn collect_edges(
    top_level: &IndexMap<String, CompiledStep>,
    owners: &IndexMap<String, String>,
) -> Result<IndexMap<String, IndexSet<String>>> {
    let mut successors: IndexMap<String, IndexSet<String>> = top_level
        .keys()
        .map(|name| (name.clone(), IndexSet::new()))
        .collect();

    // Resolve a referenced step name to its top-level representative
    let resolve = |referencer: &str, target: &str| -> Result<Option<String>> {
        let resolved = if top_level.contains_key(target) {
            target.to_string()
        } else if let Some(owner) = owners.get(target) {
            owner.clone()
        } else {
            return Err(CompileError::UnknownStepReference {
                step: referencer.to_string(),
                reference: target.to_string(),
            });
        };
        // A step referencing itself or its own members adds no edge
        Ok((resolved != referencer).then_some(resolved))
    };

    for (name, step) in top_level {
        for dep in explicit_dependencies(step) {
            if dep == *name {
                return Err(CompileError::CyclicStepDependency {
                    cycle: vec![name.clone()],
                });
            }
            if let Some(predecessor) = resolve(name, &dep)? {
                successors[&predecessor].insert(name.clone());
            }
        }
        for referenced in property_references(step) {
            if let Some(predecessor) = resolve(name, &referenced)? {
                successors[&predecessor].insert(name.clone());
            }
        }
    }
    Ok(successors)
}

/// `depends_on` entries of a step and of all its branch members
fn explicit_dependencies(step: &CompiledStep) -> Vec<String> {
    let mut deps = step.depends_on.clone();
    for member in step.if_members.iter().chain(&step.else_members) {
        deps.extend(explicit_dependencies(member));
    }
    deps
}

/// Step names referenced through `<step>.properties.<path>` handles anywhere
/// in the step's arguments, branch members included
fn property_references(step: &CompiledStep) -> IndexSet<String> {
    fn scan(value: &ResolvedValue, out: &mut IndexSet<String>) {
        match value {
            ResolvedValue::StepProperty(prop) => {
                out.insert(prop.step.clone());
            }
            ResolvedValue::Sequence(seq) => {
                for v in seq {
                    scan(v, out);
                }
            }
            ResolvedValue::Mapping(map) => {
                for v in map.values() {
                    scan(v, out);
                }
            }
            ResolvedValue::Object(obj) => {
                for v in obj.args.values() {
                    scan(v, out);
                }
            }
            _ => {}
        }
    }
    fn walk(step: &CompiledStep, out: &mut IndexSet<String>) {
        for value in step.arguments.values() {
            scan(value, out);
        }
        for member in step.if_members.iter().chain(&step.else_members) {
            walk(member, out);
        }
    }
    let mut refs = IndexSet::new();
    walk(step, &mut refs);
    refs
}

/// Depth-first search reporting the members of any dependency cycle
fn detect_cycles(
    top_level: &IndexMap<String, CompiledStep>,
    successors: &IndexMap<String, IndexSet<String>>,
) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    fn visit(
        name: &str,
        successors: &IndexMap<String, IndexSet<String>>,
        marks: &mut IndexMap<String, Mark>,
        path: &mut Vec<String>,
    ) -> Result<()> {
        match marks[name] {
            Mark::Done => return Ok(()),
            Mark::InProgress => {
                let start = path.iter().position(|p| p == name).unwrap_or(0);
                return Err(CompileError::CyclicStepDependency {
                    cycle: path[start..].to_vec(),
                });
            }
            Mark::Unvisited => {}
        }
        marks[name] = Mark::InProgress;
        path.push(name.to_string());
        for next in &successors[name] {
            visit(next, successors, marks, path)?;
        }
        path.pop();
        marks[name] = Mark::Done;
        Ok(())
    }

    let mut marks: IndexMap<String, Mark> = top_level
        .keys()
        .map(|name| (name.clone(), Mark::Unvisited))
        .collect();
    let mut path = Vec::new();
    for name in top_level.keys() {
        visit(name, successors, &mut marks, &mut path)?;
    }
    Ok(())
}

/// Kahn's algorithm, breaking ties by declaration order
fn topological_order(
    top_level: &IndexMap<String, CompiledStep>,
    successors: &IndexMap<String, IndexSet<String>>,
) -> Vec<String> {
    let mut indegree: IndexMap<&str, usize> =
        top_level.keys().map(|name| (name.as_str(), 0)).collect();
    for targets in successors.values() {
        for target in targets {
            *indegree.get_mut(target.as_str()).expect("known step") += 1;
        }
    }

    let mut order = Vec::with_capacity(top_level.len());
    let mut emitted: IndexSet<&str> = IndexSet::new();
    while order.len() < top_level.len() {
        // Earliest-declared ready step; cycle detection already ran, so one
        // always exists
        let next = top_level
            .keys()
            .map(String::as_str)
            .find(|name| indegree[name] == 0 && !emitted.contains(name))
            .expect("acyclic graph has a ready step");
        emitted.insert(next);
        order.push(next.to_string());
        for target in &successors[next] {
            *indegree.get_mut(target.as_str()).expect("known step") -= 1;
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::Context;
    use crate::core::expr::ExpressionResolver;
    use crate::core::step::StepKindRegistry;

    fn steps(yaml: &str) -> IndexMap<String, CompiledStep> {
        let tree: serde_yaml::Mapping = serde_yaml::from_str(yaml).unwrap();
        let ctx = Context::new();
        let resolver = ExpressionResolver::new(&tree, &ctx);
        let registry = StepKindRegistry::standard();
        let resolved = resolver
            .resolve(&serde_yaml::Value::Mapping(tree.clone()))
            .unwrap()
            .into_mapping()
            .unwrap();
        resolved
            .into_iter()
            .map(|(name, fields)| {
                let step =
                    CompiledStep::from_definition(&name, fields.into_mapping().unwrap(), &registry)
                        .unwrap();
                (name, step)
            })
            .collect()
    }

    fn order(graph: &StepGraph) -> Vec<&str> {
        graph.ordered().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn test_declaration_order_breaks_ties() {
        let graph = StepGraph::build(steps(
            r#"
a:
  processor_kwargs: {}
c:
  processor_kwargs: {}
b:
  processor_kwargs: {}
  depends_on: [a]
"#,
        ))
        .unwrap();
        assert_eq!(order(&graph), vec!["a", "c", "b"]);
    }

    #[test]
    fn test_property_reference_adds_edge() {
        let graph = StepGraph::build(steps(
            r#"
evaluate:
  processor_kwargs:
    model: "train.properties.ModelArtifacts.S3ModelArtifacts"
train:
  estimator_kwargs: {}
"#,
        ))
        .unwrap();
        assert_eq!(order(&graph), vec!["train", "evaluate"]);
    }

    #[test]
    fn test_branch_members_leave_top_level() {
        let graph = StepGraph::build(steps(
            r#"
gate:
  conditions: []
  if_steps: [register]
  else_steps: [fail_loud]
register:
  model_kwargs: {}
fail_loud:
  error_message: "quality gate failed"
"#,
        ))
        .unwrap();
        assert_eq!(order(&graph), vec!["gate"]);
        let gate = graph.get("gate").unwrap();
        assert_eq!(gate.if_members[0].name, "register");
        assert_eq!(gate.else_members[0].name, "fail_loud");
        assert_eq!(graph.all_steps().count(), 3);
    }

    #[test]
    fn test_members_declared_before_condition() {
        // Branch members listed ahead of the step that owns them
        let graph = StepGraph::build(steps(
            r#"
register:
  model_kwargs: {}
fail_loud:
  error_message: "quality gate failed"
gate:
  conditions: []
  if_steps: [register]
  else_steps: [fail_loud]
"#,
        ))
        .unwrap();
        assert_eq!(order(&graph), vec!["gate"]);
        let gate = graph.get("gate").unwrap();
        assert_eq!(gate.if_members[0].name, "register");
        assert_eq!(gate.else_members[0].name, "fail_loud");
    }

    #[test]
    fn test_nested_condition_members_in_any_order() {
        let graph = StepGraph::build(steps(
            r#"
register:
  model_kwargs: {}
inner_gate:
  conditions: []
  if_steps: [register]
outer_gate:
  conditions: []
  if_steps: [inner_gate]
"#,
        ))
        .unwrap();
        assert_eq!(order(&graph), vec!["outer_gate"]);
        let outer = graph.get("outer_gate").unwrap();
        assert_eq!(outer.if_members[0].name, "inner_gate");
        assert_eq!(outer.if_members[0].if_members[0].name, "register");
        assert_eq!(graph.all_steps().count(), 3);
    }

    #[test]
    fn test_reference_into_branch_routes_to_owner() {
        let graph = StepGraph::build(steps(
            r#"
notify:
  lambda_func_kwargs:
    model_package: "register.properties.ModelPackageArn"
gate:
  conditions: []
  if_steps: [register]
register:
  model_kwargs: {}
"#,
        ))
        .unwrap();
        assert_eq!(order(&graph), vec!["gate", "notify"]);
    }

    #[test]
    fn test_unknown_branch_member() {
        let err = StepGraph::build(steps(
            r#"
gate:
  conditions: []
  if_steps: [ghost]
"#,
        ))
        .unwrap_err();
        assert!(matches!(
            err,
            CompileError::UnknownStepReference { step, reference }
                if step == "gate" && reference == "ghost"
        ));
    }

    #[test]
    fn test_member_claimed_twice() {
        let err = StepGraph::build(steps(
            r#"
gate_a:
  conditions: []
  if_steps: [shared]
gate_b:
  conditions: []
  if_steps: [shared]
shared:
  processor_kwargs: {}
"#,
        ))
        .unwrap_err();
        assert!(matches!(
            err,
            CompileError::UnknownStepReference { step, reference }
                if step == "gate_b" && reference == "shared"
        ));
    }

    #[test]
    fn test_unknown_dependency() {
        let err = StepGraph::build(steps(
            r#"
a:
  processor_kwargs: {}
  depends_on: [missing]
"#,
        ))
        .unwrap_err();
        assert!(matches!(
            err,
            CompileError::UnknownStepReference { step, reference }
                if step == "a" && reference == "missing"
        ));
    }

    #[test]
    fn test_self_dependency() {
        let err = StepGraph::build(steps(
            r#"
a:
  processor_kwargs: {}
  depends_on: [a]
"#,
        ))
        .unwrap_err();
        assert!(matches!(
            err,
            CompileError::CyclicStepDependency { cycle } if cycle == vec!["a"]
        ));
    }

    #[test]
    fn test_cycle_names_members() {
        let err = StepGraph::build(steps(
            r#"
x:
  processor_kwargs: {}
  depends_on: [y]
y:
  processor_kwargs: {}
  depends_on: [x]
"#,
        ))
        .unwrap_err();
        match err {
            CompileError::CyclicStepDependency { cycle } => {
                assert_eq!(cycle.len(), 2);
                assert!(cycle.contains(&"x".to_string()));
                assert!(cycle.contains(&"y".to_string()));
            }
            other => panic!("expected CyclicStepDependency, got {other:?}"),
        }
    }

    #[test]
    fn test_diamond_ordering() {
        let graph = StepGraph::build(steps(
            r#"
load:
  processor_kwargs: {}
left:
  processor_kwargs: {}
  depends_on: [load]
right:
  processor_kwargs: {}
  depends_on: [load]
join:
  processor_kwargs: {}
  depends_on: [left, right]
"#,
        ))
        .unwrap();
        assert_eq!(order(&graph), vec!["load", "left", "right", "join"]);
    }
}
