//! Applets run as child processes. Each one lives in its own process group so that tearing it
//! down also takes care of anything it spawned.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use nix::{
    sys::signal,
    unistd::{setpgid, Pid},
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc::UnboundedSender,
};
use tokio_util::sync::CancellationToken;
use tray_engine::{Applet, AppletFactory, AppletId, PluginDescriptor, PluginId};

use crate::{app::DaemonCommand, discovery::LaunchSpec};

pub const APPLET_ID_ENV: &str = "TRAYD_APPLET_ID";
pub const APPLET_CONFIG_ENV: &str = "TRAYD_APPLET_CONFIG";
pub const PLUGIN_ID_ENV: &str = "TRAYD_PLUGIN_ID";

/// How long an applet gets to exit after SIGTERM before it is killed.
const TERMINATE_GRACE: std::time::Duration = std::time::Duration::from_secs(10);

pub struct ProcessLauncher {
    specs: HashMap<PluginId, LaunchSpec>,
    applets_dir: PathBuf,
    evt_send: UnboundedSender<DaemonCommand>,
}

impl ProcessLauncher {
    pub fn new(specs: HashMap<PluginId, LaunchSpec>, applets_dir: PathBuf, evt_send: UnboundedSender<DaemonCommand>) -> Self {
        ProcessLauncher { specs, applets_dir, evt_send }
    }
}

impl AppletFactory for ProcessLauncher {
    fn create(&mut self, plugin: &PluginDescriptor, identity: AppletId) -> tray_engine::Result<Box<dyn Applet>> {
        let spec = self.specs.get(&plugin.id).ok_or_else(|| tray_engine::Error::NotInstalled(plugin.id.clone()))?;
        let config_dir = self.applets_dir.join(identity.to_string());

        log::debug!("Starting applet {} for {}: `{}` (from {})", identity, plugin.id, spec.exec, spec.source.display());
        let mut child = unsafe {
            tokio::process::Command::new("sh")
                .args(["-c", &spec.exec])
                .env(APPLET_ID_ENV, identity.to_string())
                .env(APPLET_CONFIG_ENV, &config_dir)
                .env(PLUGIN_ID_ENV, &plugin.id.0)
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::piped())
                .pre_exec(|| {
                    let _ = setpgid(Pid::from_raw(0), Pid::from_raw(0));
                    Ok(())
                })
                .spawn()
                .map_err(|source| tray_engine::Error::SpawnFailed { plugin: plugin.id.clone(), source })?
        };

        let ready = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();
        let stderr = child.stderr.take();
        let plugin_id = plugin.id.clone();
        let evt_send = self.evt_send.clone();
        {
            let ready = ready.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut stderr_lines = stderr.map(|stderr| BufReader::new(stderr).lines());
                let exited = loop {
                    tokio::select! {
                        status = child.wait() => {
                            match status {
                                Ok(status) if cancel.is_cancelled() => log::debug!("Applet {} of {} exited ({})", identity, plugin_id, status),
                                Ok(status) => log::warn!("Applet {} of {} exited unexpectedly ({})", identity, plugin_id, status),
                                Err(err) => log::error!("Failed to wait for applet {} of {}: {}", identity, plugin_id, err),
                            }
                            break true;
                        }
                        _ = cancel.cancelled() => break false,
                        Ok(()) = crate::application_lifecycle::recv_exit() => break false,
                        Ok(Some(line)) = next_line(&mut stderr_lines) => {
                            log::warn!("stderr of {}: {}", plugin_id, line);
                        }
                    }
                };
                ready.store(false, Ordering::SeqCst);
                if !exited {
                    terminate_handle(child).await;
                }
                crate::print_result_err!(
                    "while reporting applet teardown",
                    evt_send.send(DaemonCommand::TeardownFinished { plugin: plugin_id, identity })
                );
            });
        }

        Ok(Box::new(ProcessApplet { identity, ready, cancel }))
    }
}

async fn next_line<R: tokio::io::AsyncBufRead + Unpin>(
    lines: &mut Option<tokio::io::Lines<R>>,
) -> std::io::Result<Option<String>> {
    match lines {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}

async fn terminate_handle(mut child: tokio::process::Child) {
    if let Some(id) = child.id() {
        log::debug!("Terminating applet process group {}", id);
        let _ = signal::killpg(Pid::from_raw(id as i32), signal::SIGTERM);
        tokio::select! {
            _ = child.wait() => { },
            _ = tokio::time::sleep(TERMINATE_GRACE) => {
                let _ = child.kill().await;
            }
        };
    } else {
        let _ = child.kill().await;
    }
}

/// Handle to an applet process. The process itself is owned by its supervising task.
pub struct ProcessApplet {
    identity: AppletId,
    ready: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Applet for ProcessApplet {
    fn identity(&self) -> AppletId {
        self.identity
    }

    fn request_teardown(&mut self) {
        self.cancel.cancel();
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}
