//! A uniform abstraction over one execution endpoint (local shell or SSH
//! session). Mirrors the source system's `connector.Connector` interface
//! (`examples/original_source/internal/connector/connector.go`), expressed
//! as an async trait object so the executor's copiers are written once
//! against the trait rather than duplicated per connector kind.

pub mod local;
pub mod ssh;

use async_trait::async_trait;
use ops_model::TaskDescriptor;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{ConnectError, RunError};

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub debug: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy)]
pub enum ControlSignal {
    Interrupt,
}

#[async_trait]
pub trait Connector: Send {
    fn id(&self) -> &str;
    fn local(&self) -> bool;
    fn host(&self) -> &str;
    fn prefix(&self) -> &str;
    fn set_prefix(&mut self, prefix: String);

    /// Establish the transport: resolve the local user, or SSH-dial with a
    /// timeout.
    async fn connect(&mut self) -> Result<(), ConnectError>;

    /// Release the transport and any open session.
    async fn close(&mut self) -> Result<(), RunError>;

    /// Start executing the task. Preconditions: connector idle; shell ∈
    /// {sh, bash}. On `opts.dry_run` the command is printed with the
    /// connector prefix but not started.
    async fn run(&mut self, task: &TaskDescriptor, opts: RunOptions) -> Result<(), RunError>;

    /// Block until the current command completes; transitions to idle.
    async fn wait(&mut self) -> Result<(), RunError>;

    /// Best-effort signal forward. Unsupported signals return an error
    /// rather than panicking.
    async fn signal(&mut self, sig: ControlSignal) -> Result<(), RunError>;

    /// Valid between `run` and `wait`. Returned together (rather than as
    /// three separate accessors) so callers can drive stdout, stderr, and
    /// stdin concurrently: a `transfer` task's remote `tar -xvzf -` blocks
    /// reading stdin until it gets data and won't close stdout until it
    /// exits, so stdin must be fed while stdout/stderr are being drained,
    /// not after.
    fn io_streams(
        &mut self,
    ) -> (
        &mut (dyn AsyncRead + Unpin + Send),
        &mut (dyn AsyncRead + Unpin + Send),
        &mut (dyn AsyncWrite + Unpin + Send),
    );
}
