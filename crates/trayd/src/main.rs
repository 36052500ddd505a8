use anyhow::{Context, Result};
use clap::CommandFactory as _;
use client::DaemonLink;
use daemon_response::DaemonResponse;
use opts::{Action, ActionWithServer, Opt};
use paths::TraydPaths;
use std::time::Duration;

use crate::server::ForkResult;

mod app;
mod application_lifecycle;
mod client;
mod config;
mod daemon_response;
mod discovery;
mod error_handling_ctx;
mod ipc_server;
mod launcher;
mod opts;
mod paths;
mod server;
mod util;

/// How often a freshly started daemon is tried before giving up on it.
const STARTUP_ATTEMPTS: usize = 15;

fn main() {
    let opts = Opt::from_env();
    init_logging(opts.log_debug);

    if let Err(err) = run(opts) {
        error_handling_ctx::print_error(err);
        std::process::exit(1);
    }
}

fn init_logging(debug: bool) {
    if std::env::var("RUST_LOG").is_ok() {
        pretty_env_logger::init_timed();
        return;
    }
    let level = if debug { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    pretty_env_logger::formatted_timed_builder().filter(Some("trayd"), level).filter(Some("tray_engine"), level).init();
}

fn run(opts: Opt) -> Result<()> {
    let paths = match &opts.config_path {
        Some(dir) => TraydPaths::from_config_dir(dir),
        None => TraydPaths::default(),
    }
    .context("Failed to initialize trayd paths")?;
    let link = DaemonLink::new(paths.get_ipc_socket_file());

    let wants_restart = match &opts.action {
        Action::Daemon => true,
        Action::WithServer(action) => action.can_start_daemon(),
        _ => false,
    };
    if opts.restart && wants_restart {
        stop_daemon(&link)?;
    }

    let follow_logs = match opts.action {
        Action::ShellCompletions { shell } => {
            clap_complete::generate(shell, &mut opts::RawOpt::command(), "trayd", &mut std::io::stdout());
            false
        }
        Action::ClientOnly(action) => {
            client::handle_client_only_action(&paths, action)?;
            false
        }
        Action::Daemon if link.is_alive() => {
            eprintln!("trayd is already running.");
            true
        }
        Action::Daemon => spawn_daemon(&paths, &link, !opts.no_daemonize)? == ForkResult::Parent,
        Action::WithServer(ActionWithServer::KillServer) => {
            stop_daemon(&link)?;
            false
        }
        Action::WithServer(action) => {
            let attempts = if action == ActionWithServer::Ping { 1 } else { 5 };
            match link.call(&action, attempts) {
                Ok(response) => report(response)?,
                Err(err) if action.can_start_daemon() && !opts.no_daemonize => {
                    log::info!("{:#}, starting it", err);
                    if spawn_daemon(&paths, &link, true)? == ForkResult::Child {
                        // this is the daemon, which has run to completion by now
                        return Ok(());
                    }
                    report(link.call(&action, STARTUP_ATTEMPTS)?)?;
                }
                Err(err) => return Err(err),
            }
            true
        }
    };

    if follow_logs && opts.show_logs {
        client::handle_client_only_action(&paths, opts::ActionClientOnly::Logs)?;
    }
    Ok(())
}

/// Run the daemon. When daemonizing, the calling process comes back as [`ForkResult::Parent`]
/// right away, the daemon itself only once it shut down.
fn spawn_daemon(paths: &TraydPaths, link: &DaemonLink, daemonize: bool) -> Result<ForkResult> {
    log::info!("Initializing trayd daemon ({})", link.socket().display());
    // nobody answered on the socket, so whatever is left there is stale
    let _ = std::fs::remove_file(link.socket());
    if daemonize {
        println!("Run `trayd logs` to see what the tray is doing.");
    }
    server::initialize_server(paths.clone(), daemonize)
}

/// Ask a running daemon to shut down and wait for it to be gone. Not having a daemon is fine.
fn stop_daemon(link: &DaemonLink) -> Result<()> {
    if !link.is_alive() {
        log::debug!("No trayd daemon running at {}", link.socket().display());
        return Ok(());
    }
    report(link.call(&ActionWithServer::KillServer, 1)?)?;
    // applets get a grace period to exit before the daemon gives up on them
    if !link.wait_until_gone(Duration::from_secs(15)) {
        anyhow::bail!("The trayd daemon did not shut down in time");
    }
    Ok(())
}

fn report(response: Option<DaemonResponse>) -> Result<()> {
    match response {
        Some(DaemonResponse::Success(output)) if !output.is_empty() => println!("{}", output),
        Some(DaemonResponse::Failure(message)) => anyhow::bail!(message),
        _ => {}
    }
    Ok(())
}
