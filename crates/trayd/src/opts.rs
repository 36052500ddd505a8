use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tray_engine::PluginId;

use crate::{
    app,
    daemon_response::{self, DaemonResponse, DaemonResponseReceiver},
};

/// Struct that gets generated from `RawOpt`.
#[derive(Debug, PartialEq)]
pub struct Opt {
    pub log_debug: bool,
    pub show_logs: bool,
    pub restart: bool,
    pub config_path: Option<std::path::PathBuf>,
    pub action: Action,
    pub no_daemonize: bool,
}

#[derive(Parser, Debug, PartialEq)]
#[command(version, about, long_about = None)]
pub(super) struct RawOpt {
    /// Write out debug logs. (To read the logs, run `trayd logs`).
    #[arg(long = "debug", global = true)]
    log_debug: bool,

    /// Override the configuration directory (the one that contains tray.json)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Watch the log output after executing the command
    #[arg(long = "logs", global = true)]
    show_logs: bool,

    /// Avoid daemonizing trayd.
    #[arg(long = "no-daemonize", global = true)]
    no_daemonize: bool,

    /// Restart the daemon completely before running the command
    #[arg(long = "restart", global = true)]
    restart: bool,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Action {
    /// Generate a shell completion script
    ShellCompletions {
        #[arg(short, long)]
        shell: clap_complete::shells::Shell,
    },

    /// Start the trayd daemon.
    #[command(name = "daemon", alias = "d")]
    Daemon,

    #[command(flatten)]
    ClientOnly(ActionClientOnly),

    #[command(flatten)]
    WithServer(ActionWithServer),
}

#[derive(Subcommand, Debug, Serialize, Deserialize, PartialEq)]
pub enum ActionClientOnly {
    /// Print and watch the trayd logs
    #[command(name = "logs")]
    Logs,
}

#[derive(Subcommand, Debug, Serialize, Deserialize, PartialEq)]
pub enum ActionWithServer {
    /// Ping the trayd server, checking if it is reachable.
    #[command(name = "ping")]
    Ping,

    /// Kill the trayd daemon, stopping all applets
    #[command(name = "kill", alias = "k")]
    KillServer,

    /// List all installed tray plugins
    #[command(name = "list", alias = "ls")]
    ListPlugins,

    /// Print the lifecycle state of every plugin
    #[command(name = "state")]
    ShowState,

    /// Print the plugins that are currently allowed to run
    #[command(name = "allowed")]
    ShowAllowed,

    /// Replace the set of allowed plugins
    #[command(name = "set-allowed")]
    SetAllowed {
        /// Ids of the plugins to allow. Passing none disallows everything.
        plugins: Vec<PluginId>,
    },

    /// Allow a plugin to run
    #[command(name = "enable")]
    Enable { plugin: PluginId },

    /// Disallow a plugin, stopping it and discarding its settings
    #[command(name = "disable")]
    Disable { plugin: PluginId },
}

impl Opt {
    pub fn from_env() -> Self {
        let raw: RawOpt = RawOpt::parse();
        raw.into()
    }
}

impl From<RawOpt> for Opt {
    fn from(other: RawOpt) -> Self {
        let RawOpt { log_debug, config, show_logs, no_daemonize, restart, action } = other;
        Opt { log_debug, show_logs, restart, config_path: config, action, no_daemonize }
    }
}

impl ActionWithServer {
    /// Whether running this command is enough reason to start a daemon if none is running yet.
    pub fn can_start_daemon(&self) -> bool {
        matches!(self, ActionWithServer::SetAllowed { .. } | ActionWithServer::Enable { .. } | ActionWithServer::Disable { .. })
    }

    pub fn into_daemon_command(self) -> (app::DaemonCommand, Option<DaemonResponseReceiver>) {
        let command = match self {
            ActionWithServer::Ping => {
                let (send, recv) = tokio::sync::mpsc::unbounded_channel();
                let _ = send.send(DaemonResponse::Success("pong".to_owned()));
                return (app::DaemonCommand::NoOp, Some(recv));
            }
            ActionWithServer::KillServer => app::DaemonCommand::KillServer,
            ActionWithServer::ListPlugins => return with_response_channel(app::DaemonCommand::PrintPlugins),
            ActionWithServer::ShowState => return with_response_channel(app::DaemonCommand::PrintState),
            ActionWithServer::ShowAllowed => return with_response_channel(app::DaemonCommand::PrintAllowed),
            ActionWithServer::SetAllowed { plugins } => {
                return with_response_channel(|sender| app::DaemonCommand::SetAllowed { allowed: plugins.into_iter().collect(), sender })
            }
            ActionWithServer::Enable { plugin } => {
                return with_response_channel(|sender| app::DaemonCommand::Enable { plugin, sender })
            }
            ActionWithServer::Disable { plugin } => {
                return with_response_channel(|sender| app::DaemonCommand::Disable { plugin, sender })
            }
        };
        (command, None)
    }
}

fn with_response_channel<O, F>(f: F) -> (O, Option<DaemonResponseReceiver>)
where
    F: FnOnce(daemon_response::DaemonResponseSender) -> O,
{
    let (sender, recv) = daemon_response::create_pair();
    (f(sender), Some(recv))
}
