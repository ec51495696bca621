//! The `list`, `init`, and `ssh` convenience subcommands. None of these use
//! the execution engine (spec: "they do not use the execution engine").

use std::io::Write;
use std::path::Path;

use ops_model::Manifest;
use serde::Serialize;

use crate::connector::{Connector, ssh::SshConnector};
use crate::error::OpsError;

#[derive(Serialize)]
struct ListServer<'a> {
    name: &'a str,
    host: &'a str,
    port: u16,
    user: &'a str,
    tags: &'a [String],
}

#[derive(Serialize)]
struct ListTask<'a> {
    name: &'a str,
    desc: &'a str,
    local: bool,
    dependencies: &'a [String],
}

#[derive(Serialize)]
struct ListOutput<'a> {
    servers: Vec<ListServer<'a>>,
    tasks: Vec<ListTask<'a>>,
}

pub fn list(manifest: &Manifest, format: &str) -> Result<(), OpsError> {
    let servers: Vec<ListServer> = manifest
        .servers
        .iter()
        .map(|(name, s)| ListServer {
            name,
            host: &s.host,
            port: s.port,
            user: &s.user,
            tags: &s.tags,
        })
        .collect();
    let tasks: Vec<ListTask> = manifest
        .tasks
        .iter()
        .map(|(name, t)| ListTask {
            name,
            desc: t.desc.as_deref().unwrap_or(""),
            local: t.local,
            dependencies: &t.dependencies,
        })
        .collect();

    if format == "json" {
        let out = ListOutput { servers, tasks };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("SERVERS");
    for s in &servers {
        println!("  {:<16} {}@{}:{}  tags={:?}", s.name, s.user, s.host, s.port, s.tags);
    }
    println!("TASKS");
    for t in &tasks {
        println!("  {:<16} {}  deps={:?}", t.name, t.desc, t.dependencies);
    }
    Ok(())
}

pub fn init(path: &Path, force: bool) -> Result<(), OpsError> {
    if path.exists() && !force {
        return Err(OpsError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{} already exists, pass --force to overwrite", path.display()),
        )));
    }
    let stub = r#"version: "1"
shell: bash
fail-fast: true
servers:
  example:
    host: 203.0.113.10
    port: 22
    user: deploy
    tags: [prod]
environments:
  APP_ENV: production
tasks:
  hello:
    desc: "say hello"
    command: echo "hello from ops"
"#;
    let mut file = std::fs::File::create(path)?;
    file.write_all(stub.as_bytes())?;
    println!("wrote {}", path.display());
    Ok(())
}

pub async fn ssh(manifest: &Manifest, server_name: &str) -> Result<(), OpsError> {
    let server = manifest
        .servers
        .get(server_name)
        .ok_or_else(|| {
            OpsError::Connect(crate::error::ConnectError::new(
                server_name,
                "no such server in manifest",
            ))
        })?
        .clone();

    let mut connector = SshConnector::new(server_name.to_string(), server);
    connector
        .connect()
        .await
        .map_err(OpsError::Connect)?;

    // An interactive shell is not part of the core: it bypasses the
    // planner/executor entirely and just opens a PTY session directly.
    let descriptor = ops_model::TaskDescriptor {
        name: "ssh".to_string(),
        description: None,
        shell: ops_model::Shell::Bash,
        commands: vec!["exec $SHELL -l".to_string()],
        environments: Default::default(),
        transfer: None,
        sudo: false,
        local: false,
        prompt: None,
    };
    connector
        .run(&descriptor, crate::connector::RunOptions { debug: true, dry_run: false })
        .await
        .map_err(crate::error::OpsError::Run)?;
    connector.wait().await.map_err(OpsError::Run)?;
    connector.close().await.map_err(OpsError::Run)?;
    Ok(())
}
