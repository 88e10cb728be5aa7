//! CLI command definitions

use clap::Args;

/// Compile a pipeline definition
#[derive(Debug, Args, Clone)]
pub struct CompileCommand {
    /// Path to the hierarchy configuration file
    /// (defaults to the PIPEWEAVE_HIERARCHY_FILE environment variable)
    #[arg(long)]
    pub hierarchy: Option<String>,

    /// Dotted key of the pipeline to compile
    #[arg(short, long)]
    pub pipeline: String,

    /// Context bindings (key=value)
    #[arg(long = "context", value_parser = parse_key_value)]
    pub context: Vec<(String, String)>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Compile without printing the definition
    #[arg(long)]
    pub dry_run: bool,
}

/// Validate a hierarchy configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to the hierarchy configuration file
    /// (defaults to the PIPEWEAVE_HIERARCHY_FILE environment variable)
    #[arg(long)]
    pub hierarchy: Option<String>,

    /// Context bindings (key=value)
    #[arg(long = "context", value_parser = parse_key_value)]
    pub context: Vec<(String, String)>,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 {
        return Err(format!("Invalid key=value pair: {}", s));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}
