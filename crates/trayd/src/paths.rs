use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};

/// Stores references to all the paths relevant to trayd, and abstracts access to these files and directories
#[derive(Debug, Clone)]
pub struct TraydPaths {
    pub log_file: PathBuf,
    pub config_dir: PathBuf,
    pub ipc_socket_file: PathBuf,
    pub plugin_dirs: Vec<PathBuf>,
}

impl TraydPaths {
    pub fn from_config_dir<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref();
        if config_dir.is_file() {
            bail!("Please provide the path to the config directory, not a file within it")
        }

        if !config_dir.exists() {
            log::info!("Creating config dir {}", config_dir.display());
            std::fs::create_dir_all(config_dir)
                .with_context(|| format!("Failed to create configuration directory {}", config_dir.display()))?;
        }

        let config_dir = config_dir.canonicalize()?;

        let mut hasher = DefaultHasher::new();
        format!("{}", config_dir.display()).hash(&mut hasher);
        // a hash keeps the socket path below the 108 byte limit of unix sockets (man 7 unix)
        let daemon_id = format!("{:x}", hasher.finish());

        let ipc_socket_file = std::env::var("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
            .join(format!("trayd-server_{}", daemon_id));

        // 100 as the limit isn't quite 108 everywhere (i.e 104 on BSD or mac)
        if format!("{}", ipc_socket_file.display()).len() > 100 {
            log::warn!("The IPC socket file's absolute path exceeds 100 bytes, the socket may fail to create.");
        }

        let log_dir = xdg_dir("XDG_CACHE_HOME", ".cache")?.join("trayd");
        if !log_dir.exists() {
            log::info!("Creating log dir");
            std::fs::create_dir_all(&log_dir)?;
        }

        Ok(TraydPaths {
            config_dir,
            log_file: log_dir.join(format!("trayd_{}.log", daemon_id)),
            ipc_socket_file,
            plugin_dirs: default_plugin_dirs()?,
        })
    }

    pub fn default() -> Result<Self> {
        Self::from_config_dir(xdg_dir("XDG_CONFIG_HOME", ".config")?.join("trayd"))
    }

    pub fn get_log_file(&self) -> &Path {
        self.log_file.as_path()
    }

    pub fn get_ipc_socket_file(&self) -> &Path {
        self.ipc_socket_file.as_path()
    }

    pub fn get_config_dir(&self) -> &Path {
        self.config_dir.as_path()
    }

    pub fn get_state_file(&self) -> PathBuf {
        self.config_dir.join("tray.json")
    }

    /// Parent of the per-applet settings directories, which are named after the applet identity.
    pub fn get_applets_dir(&self) -> PathBuf {
        self.config_dir.join("applets")
    }

    /// Directories searched for plugin metadata, in order of precedence.
    pub fn get_plugin_dirs(&self) -> &[PathBuf] {
        &self.plugin_dirs
    }
}

impl std::fmt::Display for TraydPaths {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "config-dir: {}, ipc-socket: {}, log-file: {}",
            self.config_dir.display(),
            self.ipc_socket_file.display(),
            self.log_file.display()
        )
    }
}

fn xdg_dir(var: &str, home_fallback: &str) -> Result<PathBuf> {
    match std::env::var(var) {
        Ok(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
        _ => {
            let home = std::env::var("HOME").with_context(|| format!("Neither {} nor HOME are set", var))?;
            Ok(PathBuf::from(home).join(home_fallback))
        }
    }
}

fn default_plugin_dirs() -> Result<Vec<PathBuf>> {
    let data_dirs = std::env::var("XDG_DATA_DIRS").unwrap_or_default();
    Ok(plugin_dirs_from(&xdg_dir("XDG_DATA_HOME", ".local/share")?, &data_dirs))
}

fn plugin_dirs_from(data_home: &Path, data_dirs: &str) -> Vec<PathBuf> {
    let data_dirs = if data_dirs.is_empty() { "/usr/local/share:/usr/share" } else { data_dirs };
    std::iter::once(data_home)
        .chain(data_dirs.split(':').filter(|d| !d.is_empty()).map(Path::new))
        .map(|dir| dir.join("trayd").join("plugins"))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_plugin_dirs() {
        assert_eq!(
            vec![
                PathBuf::from("/home/me/.local/share/trayd/plugins"),
                PathBuf::from("/opt/share/trayd/plugins"),
                PathBuf::from("/usr/share/trayd/plugins"),
            ],
            plugin_dirs_from(Path::new("/home/me/.local/share"), "/opt/share::/usr/share")
        );
        assert_eq!(
            vec![
                PathBuf::from("/data/trayd/plugins"),
                PathBuf::from("/usr/local/share/trayd/plugins"),
                PathBuf::from("/usr/share/trayd/plugins"),
            ],
            plugin_dirs_from(Path::new("/data"), "")
        );
    }

    #[test]
    fn test_config_files() {
        let paths = TraydPaths {
            log_file: PathBuf::from("/home/me/.cache/trayd/trayd_0.log"),
            config_dir: PathBuf::from("/home/me/.config/trayd"),
            ipc_socket_file: PathBuf::from("/run/user/1000/trayd-server_0"),
            plugin_dirs: Vec::new(),
        };
        assert_eq!(PathBuf::from("/home/me/.config/trayd/applets"), paths.get_applets_dir());
        assert_eq!(PathBuf::from("/home/me/.config/trayd/tray.json"), paths.get_state_file());
    }
}
