use itertools::Itertools;
use tray_engine::{AllowList, AppletId, EngineEvent, LifecycleEngine, LifecycleState, PluginId};

use crate::{
    config::ConfigStore,
    daemon_response::DaemonResponseSender,
    launcher::ProcessLauncher,
    paths::TraydPaths,
    util::format_columns,
};

/// How long the daemon waits for applets to go away when shutting down.
const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(12);

/// A command for the trayd daemon.
/// While these are mostly generated from trayd CLI commands (see [`crate::opts::ActionWithServer`]),
/// they may also be generated from other places internally.
#[derive(Debug)]
pub enum DaemonCommand {
    NoOp,
    KillServer,
    /// The process of an applet is gone, be it because it was asked to or on its own.
    TeardownFinished {
        plugin: PluginId,
        identity: AppletId,
    },
    SetAllowed {
        allowed: AllowList,
        sender: DaemonResponseSender,
    },
    Enable {
        plugin: PluginId,
        sender: DaemonResponseSender,
    },
    Disable {
        plugin: PluginId,
        sender: DaemonResponseSender,
    },
    PrintPlugins(DaemonResponseSender),
    PrintState(DaemonResponseSender),
    PrintAllowed(DaemonResponseSender),
}

pub type Engine = LifecycleEngine<ProcessLauncher, ConfigStore>;

pub struct App {
    pub engine: Engine,
    pub paths: TraydPaths,
    /// Set once shutdown began. The daemon exits when all applets are gone or this passes.
    pub shutdown_deadline: Option<tokio::time::Instant>,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("allowed", self.engine.allowed())
            .field("instances", &self.engine.instances().collect_vec())
            .field("paths", &self.paths)
            .finish()
    }
}

impl App {
    pub fn new(engine: Engine, paths: TraydPaths) -> Self {
        App { engine, paths, shutdown_deadline: None }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_deadline.is_some()
    }

    /// Whether shutdown has begun and no applet is left to wait for.
    pub fn shutdown_complete(&self) -> bool {
        self.is_shutting_down() && self.engine.instances().next().is_none()
    }

    /// Handle a [`DaemonCommand`] event.
    pub fn handle_command(&mut self, event: DaemonCommand) {
        log::debug!("Handling event: {:?}", &event);
        match event {
            DaemonCommand::NoOp => {}
            DaemonCommand::KillServer => self.begin_shutdown(),
            DaemonCommand::TeardownFinished { plugin, identity } => {
                self.engine.teardown_finished(&plugin, identity);
            }
            DaemonCommand::SetAllowed { allowed, sender } => {
                let result = self.set_allowed(allowed);
                crate::print_result_err!("while responding to set-allowed", sender.respond_with_result(result));
            }
            DaemonCommand::Enable { plugin, sender } => {
                let result = match self.check_tray_plugin(&plugin) {
                    Ok(()) => {
                        let allowed = self.engine.allowed().with(plugin);
                        self.set_allowed(allowed)
                    }
                    Err(err) => Err(err),
                };
                crate::print_result_err!("while responding to enable", sender.respond_with_result(result));
            }
            DaemonCommand::Disable { plugin, sender } => {
                let allowed = self.engine.allowed().without(&plugin);
                let result = self.set_allowed(allowed);
                crate::print_result_err!("while responding to disable", sender.respond_with_result(result));
            }
            DaemonCommand::PrintPlugins(sender) => {
                let rows = self
                    .engine
                    .catalog()
                    .available_plugins()
                    .into_iter()
                    .map(|plugin| vec![plugin.id.to_string(), plugin.label, plugin.category])
                    .collect_vec();
                crate::print_result_err!("while responding to list", sender.send_success(format_columns(&rows)));
            }
            DaemonCommand::PrintState(sender) => {
                crate::print_result_err!("while responding to state", sender.send_success(self.describe_state()));
            }
            DaemonCommand::PrintAllowed(sender) => {
                let output = self.engine.allowed().iter().join("\n");
                crate::print_result_err!("while responding to allowed", sender.send_success(output));
            }
        }
    }

    pub fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::AppletAdded { plugin, identity } => log::debug!("Applet {} of {} is up", identity, plugin),
            EngineEvent::AppletRemoved { plugin, identity } => log::debug!("Applet {} of {} is going away", identity, plugin),
            EngineEvent::AllowedChanged(allowed) => {
                crate::print_result_err!("while saving the allow list", self.engine.store_mut().set_allowed(allowed));
            }
        }
    }

    fn set_allowed(&mut self, allowed: AllowList) -> anyhow::Result<()> {
        if self.is_shutting_down() {
            anyhow::bail!("trayd is shutting down");
        }
        if let Some(unknown) = allowed.iter().find(|plugin| !self.engine.catalog().is_tray_plugin(plugin)) {
            log::warn!("Allowing {}, which is not an installed tray plugin", unknown);
        }
        if !self.engine.set_allowed(allowed) {
            log::debug!("Allow list unchanged");
        }
        Ok(())
    }

    fn check_tray_plugin(&self, plugin: &PluginId) -> anyhow::Result<()> {
        if self.engine.catalog().is_tray_plugin(plugin) {
            Ok(())
        } else {
            Err(tray_engine::Error::NotInstalled(plugin.clone()).into())
        }
    }

    /// Stop every applet and tell all tasks to wind down.
    fn begin_shutdown(&mut self) {
        if self.is_shutting_down() {
            return;
        }
        log::info!("Shutting down trayd daemon...");
        self.shutdown_deadline = Some(tokio::time::Instant::now() + SHUTDOWN_GRACE);
        let running = self.engine.instances().map(|instance| instance.plugin.clone()).collect_vec();
        for plugin in running {
            self.engine.ensure_stopped(&plugin);
        }
        crate::print_result_err!("while notifying tasks of shutdown", crate::application_lifecycle::send_exit());
    }

    fn describe_state(&self) -> String {
        let mut rows = vec![["plugin", "state", "identity", "activation"].map(str::to_owned).to_vec()];
        for plugin in self.engine.catalog().iter() {
            let state = self.engine.state_of(&plugin.id);
            let identity = self
                .engine
                .instance(&plugin.id)
                .map(|instance| instance.identity)
                .or_else(|| self.engine.recycled_identity(&plugin.id))
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_owned());
            let activation = match &plugin.activation_pattern {
                Some(pattern) => format!("{} ({} alive)", pattern, self.engine.activation().count(&plugin.id)),
                None => "static".to_owned(),
            };
            let ready = self.engine.instance(&plugin.id).map_or(false, |instance| instance.is_ready());
            let state = state_label(state, ready, self.engine.allowed().contains(&plugin.id));
            rows.push(vec![plugin.id.to_string(), state, identity, activation]);
        }
        format_columns(&rows)
    }
}

/// A running applet that is not ready has exited, and the daemon has not caught up with that yet.
fn state_label(state: LifecycleState, ready: bool, allowed: bool) -> String {
    let mut label = state.to_string();
    if state == LifecycleState::Running && !ready {
        label.push_str(" (exited)");
    }
    if !allowed {
        label.push_str(" (not allowed)");
    }
    label
}
