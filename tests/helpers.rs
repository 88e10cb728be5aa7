//! Test utility functions for pipeweave

use pipeweave::core::{
    ConstructorRegistry, Context, HierarchyConfig, InMemoryStore, Pipeline, PipelineCompiler,
    Result, StepKindRegistry,
};

/// A hierarchy configuration plus in-memory layers, compiled on demand
pub struct TestProject {
    hierarchy: HierarchyConfig,
    store: InMemoryStore,
    constructors: ConstructorRegistry,
}

impl TestProject {
    pub fn new(hierarchy_yaml: &str) -> Self {
        Self {
            hierarchy: HierarchyConfig::from_yaml(hierarchy_yaml)
                .expect("hierarchy fixture should parse"),
            store: InMemoryStore::new(),
            constructors: ConstructorRegistry::permissive(),
        }
    }

    /// A single-layer project: one `common` layer, no context variables
    pub fn single_layer(layer_yaml: &str) -> Self {
        Self::new(
            r#"
backends:
  - yaml
yaml:
  datadir: config
hierarchy:
  - common
"#,
        )
        .with_layer("common", layer_yaml)
    }

    pub fn with_layer(mut self, name: &str, yaml: &str) -> Self {
        self.store
            .insert_yaml(name, yaml)
            .expect("layer fixture should parse");
        self
    }

    pub fn with_constructors(mut self, constructors: ConstructorRegistry) -> Self {
        self.constructors = constructors;
        self
    }

    pub fn compile(
        &self,
        pipeline_key: &str,
        context_pairs: &[(&str, &str)],
    ) -> Result<Pipeline> {
        let context = Context::from_pairs(context_pairs.iter().copied());
        let tree = self.hierarchy.resolve(&context, &self.store)?;
        let kinds = StepKindRegistry::standard();
        PipelineCompiler::new(&context, &self.constructors, &kinds).compile(&tree, pipeline_key)
    }
}

/// Top-level step names in execution order
pub fn step_order(pipeline: &Pipeline) -> Vec<String> {
    pipeline.steps().map(|s| s.name.clone()).collect()
}

/// Assert the pipeline's top-level steps run in the given order
pub fn assert_step_order(pipeline: &Pipeline, expected: &[&str]) {
    let actual = step_order(pipeline);
    assert_eq!(
        actual, expected,
        "Expected step order: {:?}\nActual: {:?}",
        expected, actual
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_layer_project_compiles() {
        let project = TestProject::single_layer(
            r#"
p:
  etl:
    processor_kwargs: {}
"#,
        );
        let pipeline = project.compile("p", &[]).unwrap();
        assert_step_order(&pipeline, &["etl"]);
    }
}
