//! Data model for Opsfile manifests: servers, tasks, and the merged,
//! planner-ready `TaskDescriptor`. No I/O beyond manifest parsing lives here;
//! execution (connectors, transfer streaming, the executor) is the binary
//! crate's job.

mod error;
mod manifest;
mod plan;

pub use error::{ManifestError, ParseError};
pub use manifest::{Manifest, Server, Shell, Task};
pub use plan::{Plan, TaskDescriptor, TransferSpec};

use std::collections::HashMap;

/// Three-layer environment merge, leftmost wins *least*: `process < global <
/// task < cli`. `cli` entries always win; `task` beats `global`; `global`
/// beats the inherited `process` environment.
pub fn merge_environments(
    process: &HashMap<String, String>,
    global: &HashMap<String, String>,
    task: &HashMap<String, String>,
    cli: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut merged = process.clone();
    for (k, v) in global {
        merged.insert(k.clone(), v.clone());
    }
    for (k, v) in task {
        merged.insert(k.clone(), v.clone());
    }
    for (k, v) in cli {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

/// Validate and split a transfer directive of the form `"SRC -> DEST"`.
///
/// Exactly three whitespace-delimited fields, with `->` as the middle one.
pub fn parse_transfer(raw: &str) -> Result<(String, String), ManifestError> {
    let fields: Vec<&str> = raw.split_whitespace().collect();
    if fields.len() != 3 || fields[1] != "->" {
        return Err(ManifestError::InvalidTransfer(raw.to_string()));
    }
    Ok((fields[0].to_string(), fields[2].to_string()))
}
