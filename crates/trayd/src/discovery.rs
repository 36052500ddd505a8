//! Plugins are described by `*.json` files in the plugin directories.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use itertools::Itertools;
use serde::Deserialize;
use tray_engine::{PluginDiscovery, PluginId, PluginMetadata};

use crate::util::StringExt;

/// A single plugin metadata file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PluginFile {
    #[serde(flatten)]
    pub metadata: PluginMetadata,
    /// Shell command that runs the applet.
    #[serde(default)]
    pub exec: Option<String>,
}

/// How to run the applet of a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub exec: String,
    pub source: PathBuf,
}

/// Everything found in the plugin directories.
#[derive(Debug, Default)]
pub struct FileDiscovery {
    files: Vec<(PathBuf, PluginFile)>,
}

impl FileDiscovery {
    /// Read all plugin files. Earlier directories take precedence over later ones; files that
    /// can't be read or parsed are skipped.
    pub fn scan(dirs: &[PathBuf]) -> Self {
        let mut files = Vec::new();
        for dir in dirs {
            if !dir.is_dir() {
                continue;
            }
            match read_dir_sorted(dir) {
                Ok(paths) => {
                    for path in paths {
                        match read_plugin_file(&path) {
                            Ok(file) => files.push((path, file)),
                            Err(err) => log::warn!("Skipping plugin file: {:?}", err),
                        }
                    }
                }
                Err(err) => log::warn!("Failed to list plugin directory {}: {:?}", dir.display(), err),
            }
        }
        log::debug!("Found {} plugin files", files.len());
        FileDiscovery { files }
    }

    pub fn from_files(files: Vec<(PathBuf, PluginFile)>) -> Self {
        FileDiscovery { files }
    }

    /// Launch commands by plugin id. The first file declaring an id wins, as in the catalog.
    pub fn launch_specs(&self) -> HashMap<PluginId, LaunchSpec> {
        let mut specs = HashMap::new();
        for (path, file) in &self.files {
            let Some(id) = file.metadata.id.as_deref().filter(|id| !id.is_blank()) else {
                continue;
            };
            if specs.contains_key(id) {
                continue;
            }
            match file.exec.as_deref().filter(|exec| !exec.is_blank()) {
                Some(exec) => {
                    specs.insert(PluginId::from(id), LaunchSpec { exec: exec.to_owned(), source: path.clone() });
                }
                None if file.metadata.notification_area => {
                    log::warn!("Plugin {} ({}) has no exec line, its applet can't be started", id, path.display());
                }
                None => {}
            }
        }
        specs
    }
}

impl PluginDiscovery for FileDiscovery {
    fn list_plugin_metadata(&self) -> Vec<PluginMetadata> {
        self.files.iter().map(|(_, file)| file.metadata.clone()).collect()
    }
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)?;
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().map_or(false, |ext| ext == "json") {
            paths.push(path);
        }
    }
    Ok(paths.into_iter().sorted().collect())
}

fn read_plugin_file(path: &Path) -> Result<PluginFile> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}
