use thiserror::Error;

use crate::PluginId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Dbus connection error")]
    DbusError(#[from] zbus::Error),
    #[error("Dbus call failed")]
    DbusCallError(#[from] zbus::fdo::Error),
    #[error("IO error")]
    Io(#[from] std::io::Error),
    #[error("Activation pattern {pattern:?} is not a valid wildcard")]
    InvalidPattern { pattern: String, source: regex::Error },
    #[error("Plugin {0} is not installed")]
    NotInstalled(PluginId),
    #[error("Failed to start applet for plugin {plugin}")]
    SpawnFailed { plugin: PluginId, source: std::io::Error },
    #[error("Failed to persist applet configuration: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, Error>;
