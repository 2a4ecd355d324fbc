//! Project coordination on top of `taskmesh-dispatch`.
//!
//! Turns one natural-language project request into a validated graph of
//! subtasks, executes it against remote capability providers, and hands the
//! collected results to an integration oracle for the final answer.
//!
//! # Main types
//!
//! - [`ProjectCoordinator`] — Decompose → validate → execute → integrate.
//! - [`TaskGraphBuilder`] — Derives and validates dependency edges from output markers.
//! - [`TaskGraphExecutor`] — Runs a graph sequentially or with bounded parallelism.
//! - [`CoordinatorConfig`] — TOML-loadable coordinator settings.

/// TOML-backed coordinator configuration.
pub mod config;
/// Project coordinator and state machine driver.
pub mod engine;
/// Graph execution.
pub mod executor;
/// Task graph construction and validation.
pub mod graph;
/// Learning records emitted after a project completes.
pub mod learning;
/// Reasoning-oracle traits and their text formats.
pub mod oracle;
/// Output-marker scanning and substitution.
pub mod substitute;
/// Project state machine and outcome types.
pub mod types;

pub use config::CoordinatorConfig;
pub use engine::ProjectCoordinator;
pub use executor::TaskGraphExecutor;
pub use graph::{TaskGraph, TaskGraphBuilder};
pub use learning::{LearningRecord, LearningSink};
pub use oracle::{
    parse_subtasks, render_catalog, render_results, DecompositionOracle, IntegrationOracle,
};
pub use substitute::{output_marker, parameter_references, references_in, substitute};
pub use types::{ProjectOutcome, ProjectState, SessionContext, StateTransition};
