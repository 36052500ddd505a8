//! The persisted state of the tray: which plugins the user allowed, and which configuration
//! group belongs to which plugin.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tray_engine::{AllowList, AppletId, AppletStore, PluginId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppletGroup {
    pub plugin: PluginId,
}

/// Contents of `tray.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrayConfig {
    /// `None` until the user (or the first start) decided on an allow list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<AllowList>,
    #[serde(default)]
    pub applets: BTreeMap<AppletId, AppletGroup>,
}

impl TrayConfig {
    pub fn read_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("No tray state at {}, starting fresh", path.display());
            return Ok(TrayConfig::default());
        }
        let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content).with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path).with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }
}

/// File-backed [`AppletStore`]. Every change is written through to disk immediately.
#[derive(Debug)]
pub struct ConfigStore {
    state_file: PathBuf,
    applets_dir: PathBuf,
    config: TrayConfig,
}

impl ConfigStore {
    pub fn load(state_file: PathBuf, applets_dir: PathBuf) -> Result<Self> {
        let config = TrayConfig::read_from_file(&state_file)?;
        Ok(ConfigStore { state_file, applets_dir, config })
    }

    pub fn allowed(&self) -> Option<&AllowList> {
        self.config.allowed.as_ref()
    }

    pub fn set_allowed(&mut self, allowed: AllowList) -> Result<()> {
        self.config.allowed = Some(allowed);
        self.save()
    }

    fn save(&self) -> Result<()> {
        self.config.write_to_file(&self.state_file)
    }

    fn applet_dir(&self, identity: AppletId) -> PathBuf {
        self.applets_dir.join(identity.to_string())
    }
}

impl AppletStore for ConfigStore {
    fn load_groups(&self) -> tray_engine::Result<Vec<(AppletId, PluginId)>> {
        Ok(self.config.applets.iter().map(|(id, group)| (*id, group.plugin.clone())).collect())
    }

    fn record_group(&mut self, identity: AppletId, plugin: &PluginId) -> tray_engine::Result<()> {
        self.config.applets.insert(identity, AppletGroup { plugin: plugin.clone() });
        std::fs::create_dir_all(self.applet_dir(identity))?;
        self.save().map_err(|e| tray_engine::Error::Store(format!("{:#}", e)))
    }

    fn erase_group(&mut self, identity: AppletId) -> tray_engine::Result<()> {
        let dir = self.applet_dir(identity);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        if self.config.applets.remove(&identity).is_some() {
            self.save().map_err(|e| tray_engine::Error::Store(format!("{:#}", e)))?;
        }
        Ok(())
    }
}
