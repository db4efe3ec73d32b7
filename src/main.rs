//! Binary entry point for the volsnap CLI.

mod cli;

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use volsnap::backend::{BackendError, Request, StorageBackend};
use volsnap::cloud::HttpControlPlane;
use volsnap::config::{ConfigError, VolsnapConfig};
use volsnap::device::SysfsBlockDevices;
use volsnap::ebs::{self, BACKEND_NAME, Collaborators};
use volsnap::host::{CommandMounter, ProcessCommandRunner};
use volsnap::registry::DriverRegistry;

use cli::{Cli, ExecCommand, Target};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("failed to write output: {0}")]
    Output(String),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .ok();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let config = VolsnapConfig::load_without_cli_args()?;
    init_tracing(&config.log_level);
    match cli {
        Cli::Info(target) => {
            let backend = open_backend(&config, &target).await?;
            show_info(io::stdout(), backend.as_ref())
        }
        Cli::Exec(command) => {
            let backend = open_backend(&config, &command.target).await?;
            exec(io::stdout(), backend, command).await
        }
    }
}

async fn open_backend(
    config: &VolsnapConfig,
    target: &Target,
) -> Result<Arc<dyn StorageBackend>, CliError> {
    let settings = config.http_settings()?;
    let root = target
        .root
        .as_deref()
        .map_or_else(|| config.root(), Utf8PathBuf::from);
    let collaborators = Collaborators {
        api: Arc::new(HttpControlPlane::new(settings)),
        devices: Arc::new(SysfsBlockDevices::new()),
        mounter: Arc::new(CommandMounter::new(ProcessCommandRunner)),
        poll: config.poll_policy(),
    };

    let mut registry = DriverRegistry::new();
    ebs::register(&mut registry, collaborators)?;
    Ok(registry
        .get_driver(BACKEND_NAME, &root, config.backend_config())
        .await?)
}

fn show_info(mut out: impl Write, backend: &dyn StorageBackend) -> Result<(), CliError> {
    for (key, value) in backend.info() {
        writeln!(out, "{key}={value}").map_err(|err| CliError::Output(err.to_string()))?;
    }
    Ok(())
}

async fn exec(
    mut out: impl Write,
    backend: Arc<dyn StorageBackend>,
    command: ExecCommand,
) -> Result<(), CliError> {
    let ExecCommand {
        hint,
        name,
        options,
        ..
    } = command;
    let mut executors = backend.executors(&[hint.as_str()])?;
    let executor = executors
        .remove(&hint)
        .ok_or_else(|| BackendError::NoExecutors {
            hints: vec![hint.clone()],
        })?;
    let request = options
        .into_iter()
        .fold(Request::new(name.unwrap_or_default()), |request, (key, value)| {
            request.option(key, value)
        });

    let response = executor.exec(&request).await?;
    let rendered = serde_json::to_string_pretty(&response.values)
        .map_err(|err| CliError::Output(err.to_string()))?;
    writeln!(out, "{rendered}").map_err(|err| CliError::Output(err.to_string()))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
