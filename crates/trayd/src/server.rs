use crate::{
    app::{self, App, DaemonCommand},
    config::ConfigStore,
    discovery::FileDiscovery,
    error_handling_ctx, ipc_server,
    launcher::ProcessLauncher,
    paths::TraydPaths,
};
use anyhow::{Context, Result};
use std::{os::unix::io::AsRawFd, path::Path};
use tokio::sync::mpsc::*;
use tray_engine::{AllowList, BusDomain, EngineEvent, LifecycleEngine, ServiceEvent};

pub fn initialize_server(paths: TraydPaths, should_daemonize: bool) -> Result<ForkResult> {
    std::env::set_current_dir(paths.get_config_dir())
        .with_context(|| format!("Failed to change working directory to {}", paths.get_config_dir().display()))?;

    log::info!("Loading paths: {}", &paths);

    if should_daemonize {
        let fork_result = do_detach(paths.get_log_file())?;

        if fork_result == ForkResult::Parent {
            return Ok(ForkResult::Parent);
        }
    }

    println!(
        r#"
┏━━━━━━━━━━━━━━━━━━━━━━━━━┓
┃Initializing trayd daemon┃
┗━━━━━━━━━━━━━━━━━━━━━━━━━┛
    "#
    );

    simple_signal::set_handler(&[simple_signal::Signal::Int, simple_signal::Signal::Term], move |_| {
        log::info!("Received shutdown signal");
        if let Err(e) = crate::application_lifecycle::send_exit() {
            log::error!("Failed to send application shutdown event to workers: {:?}", e);
            std::process::exit(1);
        }
    });

    // a single thread of control owns the engine; everything else talks to it through channels
    let rt = tokio::runtime::Builder::new_current_thread()
        .thread_name("trayd-main")
        .enable_all()
        .build()
        .context("Failed to initialize tokio runtime")?;
    let socket_file = paths.get_ipc_socket_file().to_path_buf();
    let result = rt.block_on(run_daemon(paths));
    let _ = std::fs::remove_file(socket_file);
    log::info!("main application thread finished");
    result.map(|()| ForkResult::Child)
}

async fn run_daemon(paths: TraydPaths) -> Result<()> {
    let (cmd_send, mut cmd_recv) = unbounded_channel();
    let (service_send, mut service_recv) = unbounded_channel::<ServiceEvent>();
    let (engine_send, mut engine_recv) = unbounded_channel::<EngineEvent>();

    let applets_dir = paths.get_applets_dir();
    let store = ConfigStore::load(paths.get_state_file(), applets_dir.clone())?;
    let discovery = FileDiscovery::scan(paths.get_plugin_dirs());
    let launcher = ProcessLauncher::new(discovery.launch_specs(), applets_dir, cmd_send.clone());
    let mut engine = LifecycleEngine::new(&discovery, launcher, store, engine_send);
    log::info!("Found {} tray plugins", engine.catalog().len());

    let allowed = initial_allow_list(&mut engine);

    init_async_part(&paths, cmd_send, service_send);

    engine.start(allowed);
    let mut app = App::new(engine, paths);

    loop {
        let deadline = app.shutdown_deadline;
        tokio::select! {
            Some(command) = cmd_recv.recv() => app.handle_command(command),
            Some(event) = service_recv.recv(), if !app.is_shutting_down() => app.engine.handle_service_event(event),
            Some(event) = engine_recv.recv() => app.handle_engine_event(event),
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(tokio::time::Instant::now)), if deadline.is_some() => {
                log::warn!("Some applets did not stop in time: {:?}", app);
                break;
            }
            else => break,
        }
        if app.shutdown_complete() {
            break;
        }
    }
    // anything the engine said last, like removals
    while let Ok(event) = engine_recv.try_recv() {
        app.handle_engine_event(event);
    }
    Ok(())
}

/// The persisted allow list, or the plugins enabled by default on the very first start.
fn initial_allow_list(engine: &mut app::Engine) -> AllowList {
    if let Some(allowed) = engine.store().allowed() {
        return allowed.clone();
    }
    let allowed: AllowList = engine.catalog().default_plugins().iter().cloned().collect();
    log::info!("No allow list stored yet, enabling {} default plugins", allowed.len());
    if let Err(err) = engine.store_mut().set_allowed(allowed.clone()) {
        error_handling_ctx::print_error(err);
    }
    allowed
}

fn init_async_part(paths: &TraydPaths, cmd_send: UnboundedSender<DaemonCommand>, service_send: UnboundedSender<ServiceEvent>) {
    {
        let cmd_send = cmd_send.clone();
        let socket_file = paths.get_ipc_socket_file().to_path_buf();
        tokio::spawn(async move {
            let result = ipc_server::run_server(cmd_send, socket_file).await;
            if let Err(err) = result {
                error_handling_ctx::print_error(err);
            }
        });
    }

    for domain in BusDomain::ALL {
        let service_send = service_send.clone();
        tokio::spawn(async move {
            let con = match domain.connect().await {
                Ok(con) => con,
                Err(err) => {
                    log::warn!("Not watching the {} bus, failed to connect: {}", domain, err);
                    return;
                }
            };
            tokio::select! {
                result = tray_engine::watch_services(domain, &con, service_send) => {
                    crate::print_result_err!(format!("while watching the {} bus", domain), result);
                }
                _ = crate::application_lifecycle::recv_exit() => {}
            }
        });
    }

    tokio::spawn(async move {
        // Wait for application exit event
        let _ = crate::application_lifecycle::recv_exit().await;
        log::debug!("Forward task received exit event");
        // Then forward that to the application
        let _ = cmd_send.send(app::DaemonCommand::KillServer);
    });
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ForkResult {
    Parent,
    Child,
}

/// Fork twice so the daemon is neither a child of the calling shell nor attached to its terminal.
/// Output that would have gone to the terminal ends up in `log_file_path` instead.
fn do_detach(log_file_path: &Path) -> Result<ForkResult> {
    use nix::unistd::{dup2, fork, isatty, setsid, ForkResult as Fork};

    if let Fork::Parent { child } = unsafe { fork() }.context("Failed to fork the daemon")? {
        log::debug!("Daemon session leader forked as {}", child);
        return Ok(ForkResult::Parent);
    }
    setsid().context("Failed to start a new session")?;
    if let Fork::Parent { .. } = unsafe { fork() }.context("Failed to fork the daemon")? {
        std::process::exit(0);
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path)
        .with_context(|| format!("Failed to open log file {}", log_file_path.display()))?;
    for target in [std::io::stdout().as_raw_fd(), std::io::stderr().as_raw_fd()] {
        if isatty(target)? {
            dup2(log_file.as_raw_fd(), target)?;
        }
    }
    Ok(ForkResult::Child)
}
