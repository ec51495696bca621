//! Local connector: spawns `shell -c <command>` with the task's merged
//! environment over the host process environment. Grounded on teacher's
//! `execute_once` (non-shebang branch) and the original source's
//! `localconnector.go`.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use ops_model::TaskDescriptor;

use super::{Connector, ControlSignal, RunOptions};
use crate::error::{ConnectError, RunError};

pub struct LocalConnector {
    id: String,
    prefix: String,
    user: String,
    child: Option<Child>,
}

impl LocalConnector {
    pub fn new() -> Self {
        Self {
            id: "local".to_string(),
            prefix: String::new(),
            user: String::new(),
            child: None,
        }
    }
}

impl Default for LocalConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for LocalConnector {
    fn id(&self) -> &str {
        &self.id
    }

    fn local(&self) -> bool {
        true
    }

    fn host(&self) -> &str {
        "local"
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn set_prefix(&mut self, prefix: String) {
        self.prefix = prefix;
    }

    async fn connect(&mut self) -> Result<(), ConnectError> {
        self.user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "local".to_string());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RunError> {
        Ok(())
    }

    async fn run(&mut self, task: &TaskDescriptor, opts: RunOptions) -> Result<(), RunError> {
        if self.child.is_some() {
            return Err(RunError::new(self.host(), "another session is using this connector"));
        }
        if !task.shell.is_supported() {
            warn!(task = %task.name, shell = %task.shell.program(), "unsupported shell");
            return Err(RunError::new(
                self.host(),
                format!(
                    "shell: [{}] is not supported, please use sh and bash instead",
                    task.shell.program()
                ),
            ));
        }
        debug!(task = %task.name, "running task locally");
        let mut commands = task.commands.clone();
        let last = commands
            .pop()
            .ok_or_else(|| RunError::new(self.host(), "task has no commands"))?;

        // Multiple commands run sequentially within one `run` invocation;
        // all but the last complete fully (inheriting stdio) before the
        // final command's streams are handed to the executor's copiers.
        for cmd in &commands {
            if opts.debug || opts.dry_run {
                println!("{}{} {} '{}'", self.prefix, task.shell.program(), task.shell.flag(), cmd);
            }
            if opts.dry_run {
                continue;
            }
            let status = Command::new(task.shell.program())
                .arg(task.shell.flag())
                .arg(cmd)
                .envs(&task.environments)
                .status()
                .await
                .map_err(|e| RunError::new(self.host(), e.to_string()))?;
            if !status.success() {
                return Err(RunError::new(self.host(), format!("command failed: {cmd}")));
            }
        }

        if opts.debug || opts.dry_run {
            println!("{}{} {} '{}'", self.prefix, task.shell.program(), task.shell.flag(), last);
        }
        if opts.dry_run {
            return Ok(());
        }

        let child = Command::new(task.shell.program())
            .arg(task.shell.flag())
            .arg(&last)
            .envs(&task.environments)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RunError::new(self.host(), e.to_string()))?;
        self.child = Some(child);
        Ok(())
    }

    async fn wait(&mut self) -> Result<(), RunError> {
        let mut child = self
            .child
            .take()
            .ok_or_else(|| RunError::new(self.host(), "wait on closed session is not allowed"))?;
        let status = child
            .wait()
            .await
            .map_err(|e| RunError::new(self.host(), e.to_string()))?;
        if !status.success() {
            return Err(RunError::new(self.host(), format!("exit status: {status}")));
        }
        Ok(())
    }

    async fn signal(&mut self, sig: ControlSignal) -> Result<(), RunError> {
        let Some(child) = &self.child else {
            return Ok(()); // relayed to an idle connector is a no-op
        };
        let Some(pid) = child.id() else {
            return Ok(());
        };
        match sig {
            ControlSignal::Interrupt => {
                #[cfg(unix)]
                {
                    use nix::sys::signal::{kill, Signal};
                    use nix::unistd::Pid;
                    debug!(pid, "sending SIGINT to local child");
                    kill(Pid::from_raw(pid as i32), Signal::SIGINT)
                        .map_err(|e| RunError::new(self.host(), e.to_string()))?;
                }
                Ok(())
            }
        }
    }

    fn io_streams(
        &mut self,
    ) -> (
        &mut (dyn AsyncRead + Unpin + Send),
        &mut (dyn AsyncRead + Unpin + Send),
        &mut (dyn AsyncWrite + Unpin + Send),
    ) {
        let child = self
            .child
            .as_mut()
            .expect("io streams valid only between run and wait");
        (
            child.stdout.as_mut().expect("stdout piped"),
            child.stderr.as_mut().expect("stderr piped"),
            child.stdin.as_mut().expect("stdin piped"),
        )
    }
}
