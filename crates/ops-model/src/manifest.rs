use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::ManifestError;
use crate::parse_transfer;

fn default_true() -> bool {
    true
}

/// A task's shell. Deserialization never fails: any value other than `sh`
/// or `bash` is kept as `Unsupported` so the `command XOR transfer` /
/// transfer-grammar checks that run at manifest load time (§3) don't reject
/// a whole manifest over a task that's never selected for this invocation.
/// Per spec.md §7 ("Unsupported shell → RunError at run time"), rejecting an
/// `Unsupported` shell is the connector's job, checked in `run()` right
/// before it would otherwise start the command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shell {
    Sh,
    Bash,
    Unsupported(String),
}

impl Default for Shell {
    fn default() -> Self {
        Shell::Bash
    }
}

impl Shell {
    /// The `-c`-style flag this shell accepts, per the source system's
    /// `shellCommandArgs` table (only `sh` and `bash` are supported).
    pub fn flag(&self) -> &'static str {
        "-c"
    }

    pub fn program(&self) -> &str {
        match self {
            Shell::Sh => "sh",
            Shell::Bash => "bash",
            Shell::Unsupported(name) => name,
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, Shell::Sh | Shell::Bash)
    }
}

impl<'de> Deserialize<'de> for Shell {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "sh" => Shell::Sh,
            "bash" => Shell::Bash,
            _ => Shell::Unsupported(raw),
        })
    }
}

/// A named remote target. Immutable after manifest load.
#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_port() -> u16 {
    22
}

/// A task definition as it appears in the manifest, before planning.
#[derive(Debug, Clone, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub shell: Option<Shell>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub transfer: Option<String>,
    #[serde(default)]
    pub local: bool,
    #[serde(default)]
    pub sudo: bool,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub environments: HashMap<String, String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub shell: Shell,
    #[serde(rename = "fail-fast", default = "default_true")]
    pub fail_fast: bool,
    #[serde(default)]
    pub servers: HashMap<String, Server>,
    #[serde(default)]
    pub environments: HashMap<String, String>,
    #[serde(default)]
    pub tasks: HashMap<String, Task>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ManifestError> {
        let manifest: Manifest = serde_yaml::from_str(raw)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Checked once at load time, per spec: `command XOR transfer`, and any
    /// `transfer` directive must already match the grammar.
    fn validate(&self) -> Result<(), ManifestError> {
        for (name, task) in &self.tasks {
            match (&task.command, &task.transfer) {
                (Some(_), Some(_)) => {
                    return Err(ManifestError::BothCommandAndTransfer(name.clone()));
                }
                (None, None) => {
                    return Err(ManifestError::NeitherCommandNorTransfer(name.clone()));
                }
                (None, Some(raw)) => {
                    parse_transfer(raw)?;
                }
                (Some(_), None) => {}
            }
        }
        Ok(())
    }
}
