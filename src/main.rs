mod cli;
mod connector;
mod error;
mod executor;
mod planner;
mod prefix;
mod selector;
mod transfer;

use std::collections::HashMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ops_model::Manifest;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::error::OpsError;
use crate::executor::{Executor, ExecutorOptions};
use crate::planner::Planner;

#[derive(Parser)]
#[command(name = "ops", version, about = "agentless SSH/local task runner")]
struct Cli {
    #[arg(short = 'f', long = "opsfile", global = true, default_value = "./Opsfile.yml")]
    opsfile: PathBuf,
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[arg(short = 'q', long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one or more tasks
    Run {
        tasks: Vec<String>,
        #[arg(short = 't', long)]
        tag: Option<String>,
        #[arg(short = 'd', long)]
        debug: bool,
        #[arg(long = "dry-run")]
        dry_run: bool,
        #[arg(short = 'y')]
        yes: bool,
        #[arg(short = 'e', long = "env", value_parser = parse_key_val)]
        env: Vec<(String, String)>,
    },
    /// Render tables of servers and tasks (not part of the core)
    List {
        #[arg(long = "format", default_value = "table")]
        format: String,
    },
    /// Interactive shell over SSH to the named server (not part of the core)
    Ssh { server: String },
    /// Write a stub manifest (not part of the core)
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Print the tool version
    Version,
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) => Ok((k.to_string(), v.to_string())),
        None => Err(format!("expected KEY=VAL, got {raw:?}")),
    }
}

fn setup_tracing(verbose: u8, quiet: bool) {
    let level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    setup_tracing(cli.verbose, cli.quiet);

    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{e}");
            1
        }
    };
    std::process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<(), OpsError> {
    match cli.command {
        Command::Version => {
            println!("ops {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Init { force } => cli::init(&cli.opsfile, force),
        Command::List { format } => {
            let manifest = Manifest::load(&cli.opsfile)?;
            cli::list(&manifest, &format)
        }
        Command::Ssh { server } => {
            let manifest = Manifest::load(&cli.opsfile)?;
            cli::ssh(&manifest, &server).await
        }
        Command::Run {
            tasks,
            tag,
            debug,
            dry_run,
            yes,
            env,
        } => {
            let manifest = Manifest::load(&cli.opsfile)?;
            let cli_env: HashMap<String, String> = env.into_iter().collect();

            let plan = Planner::new(&manifest, cli_env).plan(&tasks)?;
            let connectors = selector::select(&manifest, tag.as_deref());

            let opts = ExecutorOptions {
                debug,
                dry_run,
                always_confirm: yes,
                fail_fast: manifest.fail_fast,
            };
            Executor::new(connectors, opts)
                .execute(&plan)
                .await
                .map_err(OpsError::Run)
        }
    }
}
