use std::collections::HashMap;
use std::path::PathBuf;

use crate::manifest::Shell;

/// The resolved source/destination of a `transfer` task, already validated
/// and `${VAR}`-expanded against the task's merged environment.
#[derive(Debug, Clone)]
pub struct TransferSpec {
    pub src: PathBuf,
    pub dest: String,
}

/// Planner output: one fully-materialized task, ready for dispatch to every
/// matching connector. Read-only; a single instance feeds N connectors.
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub shell: Shell,
    /// Ordered shell command strings. A transfer task has exactly one
    /// synthesized command (`tar -C <dest> -xvzf -`); an ordinary task has
    /// one command per the manifest's (currently single-line) `command`.
    pub commands: Vec<String>,
    pub environments: HashMap<String, String>,
    pub transfer: Option<TransferSpec>,
    pub sudo: bool,
    pub local: bool,
    pub prompt: Option<String>,
}

impl TaskDescriptor {
    pub fn is_transfer(&self) -> bool {
        self.transfer.is_some()
    }
}

/// An ordered sequence of `TaskDescriptor`, preserving CLI argument order;
/// duplicate occurrences are retained (no dedup).
pub type Plan = Vec<TaskDescriptor>;
