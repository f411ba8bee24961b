//! aidf - Autonomous task execution engine
//!
//! Drives an LLM code-assistant through iterative task loops with a
//! scope-guarded, validated executor state machine: each task is read from a
//! Markdown file under `.ai/tasks/`, executed against a pluggable provider
//! (CLI subprocess agent or HTTP tool-use API) across bounded iterations, and
//! written out as an `ExecutionReport`.
//!
//! # Core Concepts
//!
//! - **Scope guard**: file changes are checked against a task's allowed/
//!   forbidden/ask-before globs before being accepted.
//! - **Validation retry**: a completion signal paired with failing
//!   validation does not terminate the run, it retries with the failure
//!   embedded in the next prompt.
//! - **State in files**: task and plan progress persist as Markdown on disk,
//!   not in memory.
//!
//! # Modules
//!
//! - [`executor`] - the iteration-loop state machine
//! - [`provider`] - the CLI-subprocess and API-tool-use execution backends
//! - [`scope`] - file-change scope enforcement
//! - [`context`] - task/role/plan/skill Markdown parsing
//! - [`plan`] - implementation-plan DAG parsing and wave execution
//! - [`skills`] - skill discovery and prompt-injection scanning
//! - [`metrics`] / [`report_writer`] - run accounting and persistence
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod cli;
pub mod config;
pub mod context;
pub mod conversation;
pub mod domain;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod plan;
pub mod provider;
pub mod report_writer;
pub mod scope;
pub mod skills;
pub mod validator;
pub mod vcs;

pub use config::Config;
pub use domain::{ExecutionReport, LoadedContext, Skill, Task};
pub use error::EngineError;
pub use executor::{Executor, ExecutorOptions, ExecutorRun, Observer};
pub use provider::{ExecutionResult, Provider, ProviderOptions};
pub use report_writer::ReportWriter;
pub use vcs::{GitVersionControl, VersionControl};
