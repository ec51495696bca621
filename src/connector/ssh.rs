//! SSH connector. Grounded on the original source's `sshconnector.go`
//! (Connect procedure, env double-injection, sudo marker interception,
//! PTY-on-interactive-only, close semantics) but implemented against
//! `russh` rather than the teacher's `openssh` crate: `openssh` wraps the
//! system `ssh` binary and cannot drive explicit per-key auth, a
//! protocol-level PTY request, or channel-level signal delivery, all of
//! which this module needs. The channel-driving pattern (one owning task
//! bridging `ChannelMsg` events to byte streams) follows
//! `AnalyseDeCircuit-oxideterm`'s `src/ssh/session.rs`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::{Channel, ChannelMsg, Sig};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ops_model::{Server, TaskDescriptor};

use super::{Connector, ControlSignal, RunOptions};
use crate::error::{ConnectError, RunError};

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const PRIVATE_KEY_NAMES: &[&str] = &[
    "id_rsa",
    "id_ecdsa",
    "id_ecdsa_sk",
    "id_ed25519",
    "id_ed25519_sk",
    "id_dsa",
];

struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    /// Spec Non-goal: "no host-key verification" — accept unconditionally.
    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

enum PumpControl {
    Interrupt,
}

struct RunningSession {
    stdout: DuplexStream,
    stderr: DuplexStream,
    stdin: DuplexStream,
    ctrl_tx: mpsc::Sender<PumpControl>,
    pump: JoinHandle<Result<u32, RunError>>,
}

pub struct SshConnector {
    id: String,
    prefix: String,
    server: Server,
    password: Option<String>,
    handle: Option<Handle<ClientHandler>>,
    session: Option<RunningSession>,
}

impl SshConnector {
    pub fn new(id: String, server: Server) -> Self {
        let password = server.password.clone();
        Self {
            id,
            prefix: String::new(),
            server,
            password,
            handle: None,
            session: None,
        }
    }

    fn collect_private_keys() -> Vec<PathBuf> {
        let Some(home) = dirs::home_dir() else {
            return Vec::new();
        };
        PRIVATE_KEY_NAMES
            .iter()
            .map(|name| home.join(".ssh").join(name))
            .filter(|p| p.exists())
            .collect()
    }
}

#[async_trait]
impl Connector for SshConnector {
    fn id(&self) -> &str {
        &self.id
    }

    fn local(&self) -> bool {
        false
    }

    fn host(&self) -> &str {
        &self.server.host
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn set_prefix(&mut self, prefix: String) {
        self.prefix = prefix;
    }

    async fn connect(&mut self) -> Result<(), ConnectError> {
        info!(host = %self.server.host, user = %self.server.user, "establishing SSH connection");
        let addr = format!("{}:{}", self.server.host, self.server.port);
        let config = Arc::new(client::Config::default());

        let mut handle = tokio::time::timeout(
            DIAL_TIMEOUT,
            client::connect(config, addr, ClientHandler),
        )
        .await
        .map_err(|_| ConnectError::new(&self.server.host, "dial timed out"))?
        .map_err(|e| ConnectError::new(&self.server.host, e.to_string()))?;

        let mut authenticated = false;
        for path in Self::collect_private_keys() {
            let Ok(key) = russh::keys::load_secret_key(&path, None) else {
                continue;
            };
            let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);
            if let Ok(result) = handle
                .authenticate_publickey(&self.server.user, key_with_hash)
                .await
            {
                if result.success() {
                    authenticated = true;
                    break;
                }
            }
        }

        if !authenticated {
            if let Some(password) = self.password.clone() {
                let result = handle
                    .authenticate_password(&self.server.user, &password)
                    .await
                    .map_err(|e| ConnectError::new(&self.server.host, e.to_string()))?;
                authenticated = result.success();
            }
        }

        if !authenticated {
            authenticated = self.prompt_and_authenticate(&mut handle).await?;
        }
        if !authenticated {
            // one re-prompt, per spec: "re-prompt for password once and retry"
            authenticated = self.prompt_and_authenticate(&mut handle).await?;
        }
        if !authenticated {
            warn!(host = %self.server.host, "authentication failed");
            return Err(ConnectError::new(&self.server.host, "authentication failed"));
        }

        info!(host = %self.server.host, "SSH connection established");
        self.handle = Some(handle);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RunError> {
        debug!(host = %self.server.host, "closing SSH connection");
        if let Some(session) = self.session.take() {
            session.pump.abort();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await;
        }
        Ok(())
    }

    async fn run(&mut self, task: &TaskDescriptor, opts: RunOptions) -> Result<(), RunError> {
        if self.session.is_some() {
            return Err(RunError::new(self.host(), "another session is using this connector"));
        }
        if !task.shell.is_supported() {
            return Err(RunError::new(
                self.host(),
                format!(
                    "shell: [{}] is not supported, please use sh and bash instead",
                    task.shell.program()
                ),
            ));
        }
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| RunError::new(self.host(), "not connected"))?;

        let sudo_marker = format!("[sudo via ops, id={}] password:", self.id);
        let mut joined = task.commands.join(" && ");
        if joined.contains("sudo") {
            joined = joined.replace("sudo", &format!("sudo -E -p \"{sudo_marker}\""));
        }
        let env_prefix: String = task
            .environments
            .iter()
            .map(|(k, v)| format!("{k}={v} "))
            .collect();
        let full_cmd = format!(
            "{}{} {} '{}'",
            env_prefix,
            task.shell.program(),
            task.shell.flag(),
            joined
        );

        if opts.debug || opts.dry_run {
            println!("{}{}", self.prefix, full_cmd);
        }
        if opts.dry_run {
            return Ok(());
        }
        debug!(host = %self.server.host, command = %full_cmd, "executing remote command");

        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(|e| RunError::new(self.host(), e.to_string()))?;

        // Belt-and-suspenders alongside the K=V command prefix above — many
        // sshd deployments reject `Setenv`, so both channels are used.
        for (k, v) in &task.environments {
            let _ = channel.set_env(false, k, v).await;
        }

        if !task.is_transfer() {
            let (cols, rows) = crossterm::terminal::size().unwrap_or((80, 24));
            channel
                .request_pty(
                    false,
                    &std::env::var("TERM").unwrap_or_else(|_| "xterm-256color".into()),
                    cols as u32,
                    rows as u32,
                    0,
                    0,
                    &[],
                )
                .await
                .map_err(|e| RunError::new(self.host(), e.to_string()))?;
        }

        channel
            .exec(true, full_cmd)
            .await
            .map_err(|e| RunError::new(self.host(), e.to_string()))?;

        let (stdout_pub, stdout_priv) = tokio::io::duplex(64 * 1024);
        let (stderr_pub, stderr_priv) = tokio::io::duplex(64 * 1024);
        let (stdin_pub, stdin_priv) = tokio::io::duplex(64 * 1024);
        let (ctrl_tx, ctrl_rx) = mpsc::channel(4);

        let pump = tokio::spawn(run_pump(
            channel,
            stdout_priv,
            stderr_priv,
            stdin_priv,
            ctrl_rx,
            sudo_marker,
            self.password.clone(),
            self.server.user.clone(),
            self.server.host.clone(),
        ));

        self.session = Some(RunningSession {
            stdout: stdout_pub,
            stderr: stderr_pub,
            stdin: stdin_pub,
            ctrl_tx,
            pump,
        });
        Ok(())
    }

    async fn wait(&mut self) -> Result<(), RunError> {
        let session = self
            .session
            .take()
            .ok_or_else(|| RunError::new(self.host(), "wait on closed session is not allowed"))?;
        let exit_status = session
            .pump
            .await
            .map_err(|e| RunError::new(self.host(), e.to_string()))??;
        if exit_status != 0 {
            return Err(RunError::new(self.host(), format!("exit status: {exit_status}")));
        }
        Ok(())
    }

    async fn signal(&mut self, sig: ControlSignal) -> Result<(), RunError> {
        let Some(session) = &self.session else {
            return Ok(());
        };
        match sig {
            ControlSignal::Interrupt => {
                debug!(host = %self.server.host, "sending interrupt to remote channel");
                let _ = session.ctrl_tx.send(PumpControl::Interrupt).await;
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
        let session = self
            .session
            .as_mut()
            .expect("io streams valid only between run and wait");
        (&mut session.stdout, &mut session.stderr, &mut session.stdin)
    }
}

impl SshConnector {
    async fn prompt_and_authenticate(
        &mut self,
        handle: &mut Handle<ClientHandler>,
    ) -> Result<bool, ConnectError> {
        let prompt = format!("{}@{}'s password: ", self.server.user, self.server.host);
        let password = tokio::task::spawn_blocking(move || rpassword::prompt_password(prompt))
            .await
            .map_err(|e| ConnectError::new(&self.server.host, e.to_string()))?
            .map_err(|e| ConnectError::new(&self.server.host, e.to_string()))?;
        let result = handle
            .authenticate_password(&self.server.user, &password)
            .await
            .map_err(|e| ConnectError::new(&self.server.host, e.to_string()))?;
        if result.success() {
            self.password = Some(password);
        }
        Ok(result.success())
    }
}

/// Owns the channel for the lifetime of one `run`; bridges `ChannelMsg`
/// events to the duplex halves handed to the caller, scans stdout for the
/// sudo password marker, and forwards stdin bytes / interrupt requests.
#[allow(clippy::too_many_arguments)]
async fn run_pump(
    mut channel: Channel<client::Msg>,
    mut stdout_priv: DuplexStream,
    mut stderr_priv: DuplexStream,
    mut stdin_priv: DuplexStream,
    mut ctrl_rx: mpsc::Receiver<PumpControl>,
    sudo_marker: String,
    mut password: Option<String>,
    user: String,
    host: String,
) -> Result<u32, RunError> {
    let mut stdin_open = true;
    let mut marker_window: Vec<u8> = Vec::new();
    let mut buf = [0u8; 8192];
    let mut exit_status = 0u32;

    loop {
        tokio::select! {
            ctrl = ctrl_rx.recv() => {
                if let Some(PumpControl::Interrupt) = ctrl {
                    let _ = channel.data(&b"\x03"[..]).await;
                    let _ = channel.signal(Sig::INT).await;
                }
            }
            read_result = stdin_priv.read(&mut buf), if stdin_open => {
                match read_result {
                    Ok(0) => {
                        stdin_open = false;
                        let _ = channel.eof().await;
                    }
                    Ok(n) => {
                        let _ = channel.data(&buf[..n]).await;
                    }
                    Err(_) => {
                        stdin_open = false;
                    }
                }
            }
            msg = channel.wait() => {
                match msg {
                    Some(ChannelMsg::Data { data }) => {
                        handle_sudo_marker(
                            &mut channel,
                            &data,
                            &sudo_marker,
                            &mut marker_window,
                            &mut password,
                            &user,
                            &host,
                        )
                        .await?;
                        let _ = stdout_priv.write_all(&data).await;
                    }
                    Some(ChannelMsg::ExtendedData { data, ext }) if ext == 1 => {
                        let _ = stderr_priv.write_all(&data).await;
                    }
                    Some(ChannelMsg::ExitStatus { exit_status: code }) => {
                        debug!(host = %host, exit_status = code, "remote command exited");
                        exit_status = code;
                    }
                    Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) => break,
                    None => break,
                    _ => {}
                }
            }
        }
    }
    let _ = stdout_priv.flush().await;
    let _ = stderr_priv.flush().await;
    Ok(exit_status)
}

/// Byte-at-a-time scan for the sudo marker substring; on match, writes the
/// (possibly freshly-prompted) password followed by a newline exactly once
/// per match, then clears the window so repeated marker bytes downstream
/// don't re-trigger (S6).
async fn handle_sudo_marker(
    channel: &mut Channel<client::Msg>,
    data: &[u8],
    marker: &str,
    window: &mut Vec<u8>,
    password: &mut Option<String>,
    user: &str,
    host: &str,
) -> Result<(), RunError> {
    let marker_bytes = marker.as_bytes();
    for &b in data {
        window.push(b);
        if window.len() > marker_bytes.len() {
            let excess = window.len() - marker_bytes.len();
            window.drain(0..excess);
        }
        if window.ends_with(marker_bytes) {
            window.clear();
            debug!(host = %host, "sudo password marker detected");
            let pass = match password.clone() {
                Some(p) => p,
                None => {
                    let prompt = format!("{user}@{host}'s password: ");
                    let p = tokio::task::spawn_blocking(move || rpassword::prompt_password(prompt))
                        .await
                        .map_err(|e| RunError::new(host, e.to_string()))?
                        .map_err(|e| RunError::new(host, e.to_string()))?;
                    *password = Some(p.clone());
                    p
                }
            };
            let mut payload = pass.into_bytes();
            payload.push(b'\n');
            channel
                .data(&payload[..])
                .await
                .map_err(|e| RunError::new(host, e.to_string()))?;
        }
    }
    Ok(())
}
