mod cli;
mod core;

use anyhow::{Context as _, Result};
use cli::commands::{CompileCommand, ValidateCommand};
use cli::{Cli, Command};
use crate::core::{
    ConstructorRegistry, Context, DirectoryStore, HierarchyConfig, PipelineCompiler,
    StepKindRegistry,
};
use serde_yaml::Mapping;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const HIERARCHY_FILE_VAR: &str = "PIPEWEAVE_HIERARCHY_FILE";

fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Compile(cmd) => compile_pipeline(cmd)?,
        Command::Validate(cmd) => validate_hierarchy(cmd)?,
    }

    Ok(())
}

fn compile_pipeline(cmd: &CompileCommand) -> Result<()> {
    let (_, context, tree) = resolve_tree(cmd.hierarchy.as_deref(), &cmd.context)?;

    let constructors = ConstructorRegistry::permissive();
    let kinds = StepKindRegistry::standard();
    let pipeline = PipelineCompiler::new(&context, &constructors, &kinds)
        .compile(&tree, &cmd.pipeline)
        .with_context(|| format!("Failed to compile pipeline '{}'", cmd.pipeline))?;

    info!(
        pipeline = %pipeline.name,
        steps = pipeline.graph().len(),
        "pipeline compiled"
    );

    if cmd.dry_run {
        println!(
            "Compiled '{}': {} top-level steps, {} parameters, {} property files",
            pipeline.name,
            pipeline.graph().len(),
            pipeline.parameters.len(),
            pipeline.property_files.len(),
        );
        return Ok(());
    }

    let definition = pipeline.definition();
    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&definition)?);
    } else {
        print!("{}", serde_yaml::to_string(&definition)?);
    }

    Ok(())
}

fn validate_hierarchy(cmd: &ValidateCommand) -> Result<()> {
    let (config, _, tree) = resolve_tree(cmd.hierarchy.as_deref(), &cmd.context)?;

    println!("Hierarchy configuration is valid");
    println!("  Backend: {}", config.primary_backend());
    println!("  Layers: {}", config.hierarchy.len());
    println!("  Top-level keys in merged tree: {}", tree.len());

    Ok(())
}

/// Load the hierarchy file and resolve the merged configuration tree
fn resolve_tree(
    hierarchy: Option<&str>,
    context_pairs: &[(String, String)],
) -> Result<(HierarchyConfig, Context, Mapping)> {
    let path = hierarchy
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(HIERARCHY_FILE_VAR).map(PathBuf::from))
        .with_context(|| {
            format!("No hierarchy file given; pass --hierarchy or set {HIERARCHY_FILE_VAR}")
        })?;

    let config = HierarchyConfig::from_file(&path)
        .with_context(|| format!("Failed to load hierarchy file {}", path.display()))?;

    // A relative datadir is taken relative to the hierarchy file itself
    let datadir = config.datadir(config.primary_backend())?;
    let datadir = if datadir.is_relative() {
        path.parent().unwrap_or(Path::new(".")).join(datadir)
    } else {
        datadir
    };
    let store = DirectoryStore::new(datadir);

    let context = Context::from_pairs(context_pairs.iter().cloned());
    let tree = config
        .resolve(&context, &store)
        .context("Failed to resolve configuration hierarchy")?;

    Ok((config, context, tree))
}
