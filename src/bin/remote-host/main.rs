use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::{Result as EyreResult, WrapErr};
use remote_host::host::{HostServer, HostState};
use remote_host::{CommandExecutor, CredentialStore};
use tokio::select;
use tokio::signal::{self, unix::SignalKind};

mod cli;
mod commands;
mod logging;
mod systemd;

const BUILD_VERSION: &str = env!("REMOTE_HOST_BUILD_VERSION");
const GIT_DESCRIBE: &str = env!("REMOTE_HOST_GIT_DESCRIBE");

#[cfg(debug_assertions)]
fn install_eyre_hook() -> EyreResult<()> {
    color_eyre::config::HookBuilder::default()
        .display_env_section(true)
        .install()
}

#[cfg(not(debug_assertions))]
fn install_eyre_hook() -> EyreResult<()> {
    color_eyre::config::HookBuilder::default()
        .display_env_section(false)
        .install()
}

fn main() -> ExitCode {
    if let Err(e) = install_eyre_hook() {
        eprintln!("Failed to install error hook: {}", e);
        return ExitCode::FAILURE;
    }

    let mut args = cli::Args::parse();

    if let Some(ref command) = args.command {
        return commands::run_command(command);
    }

    let config = match cli::Config::from_opt(&mut args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run_server(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

// Each connection gets its own task; a multi-threaded runtime lets them run in parallel
#[tokio::main(flavor = "multi_thread")]
async fn run_server(config: cli::Config) -> EyreResult<()> {
    // LoggerHandle must be held until program termination so file logging takes place
    let _logger = logging::setup_logger(config.level_filter(), config.log_file.as_deref())?;
    log::info!(
        "Starting remote-host version {}; commit {}",
        BUILD_VERSION,
        GIT_DESCRIBE
    );
    log::debug!("Effective configuration: {}", serde_json::to_string(&config)?);

    let credentials = CredentialStore::from_specs(&config.users)?;
    if config.users.is_empty() {
        log::warn!("Using built-in default credentials: admin/admin123, user/user123");
    } else {
        log::info!("Loaded {} account(s)", credentials.len());
    }

    let state = Arc::new(
        HostState::new(credentials, CommandExecutor::new(config.shell.clone()))
            .with_command_timeout(Duration::from_secs(config.command_timeout))
            .with_version(BUILD_VERSION),
    );

    let server = match HostServer::bind((config.host.as_str(), config.port), state).await {
        Ok(server) => server,
        Err(e) => {
            log::error!("Failed to start server: {}", e);
            return Err(e).wrap_err_with(|| format!("binding {}:{}", config.host, config.port));
        }
    };
    let handle = server.handle();
    let mut server_task = tokio::spawn(server.run());

    log::info!("Waiting for connections...");
    systemd::notify_ready();
    systemd::notify_status("Accepting connections");

    let mut sigterm = signal::unix::signal(SignalKind::terminate())?;

    select! {
        _ = signal::ctrl_c() => log::info!("Received interrupt signal"),
        Some(_) = sigterm.recv() => log::info!("Received SIGTERM"),
        finished = &mut server_task => {
            finished??;
            return Ok(());
        }
    }

    systemd::notify_stopping();
    let info = handle.info().await;
    let authenticated = info.connections.iter().filter(|c| c.authenticated).count();
    log::debug!(
        "Shutting down with {} active connection(s), {} authenticated",
        info.active_connections,
        authenticated
    );
    for connection in &info.connections {
        log::debug!(
            "  {} connected since {}",
            connection.id,
            connection.connected_at.to_rfc3339()
        );
    }
    handle.shutdown().await;
    server_task.await??;

    Ok(())
}
