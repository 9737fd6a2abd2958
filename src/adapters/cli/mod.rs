//! CLI Adapter
//!
//! Command-line interface for the lendwise pipeline.
//! Uses clap derive macros for argument parsing.

mod commands;

pub use commands::{
    build_manager, execute, init_logging, CliApp, Command, PlanCmd, ProfilesCmd, RecommendCmd,
    EXIT_CONFIG,
};
