//! Command-line interface

pub mod commands;

use clap::{Parser, Subcommand};
use commands::{CompileCommand, ValidateCommand};

/// Hierarchical configuration resolver and pipeline compiler
#[derive(Debug, Parser, Clone)]
#[command(name = "pipeweave")]
#[command(version = "0.1.0")]
#[command(about = "Compile layered YAML configuration into pipeline definitions", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Compile a pipeline definition
    Compile(CompileCommand),

    /// Validate a hierarchy configuration
    Validate(ValidateCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}

use std::ffi::OsString;
