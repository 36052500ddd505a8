use std::collections::{BTreeMap, HashSet};

use crate::{ActivationIndex, AllowList, PluginDescriptor, PluginId, PluginMetadata, ServicePattern, UNKNOWN_CATEGORY};

/// Suffix appended to the label of bus-activated plugins in [`PluginCatalog::available_plugins`].
pub const AUTOMATIC_LOAD_SUFFIX: &str = " (Automatic load)";

/// Source of plugin metadata. Asked exactly once, when the catalog is built.
pub trait PluginDiscovery {
    fn list_plugin_metadata(&self) -> Vec<PluginMetadata>;
}

/// Entry of the list of plugins the user can choose from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailablePlugin {
    pub id: PluginId,
    pub label: String,
    pub category: String,
}

/// All tray plugins that are installed.
#[derive(Debug, Default)]
pub struct PluginCatalog {
    plugins: BTreeMap<PluginId, PluginDescriptor>,
    default_plugins: Vec<PluginId>,
}

impl PluginCatalog {
    /// Build the catalog from `discovery`, registering bus-activated plugins in `activation`.
    ///
    /// Metadata that isn't meant for the notification area is ignored, and metadata that is
    /// incomplete is skipped with a warning.
    pub fn discover(discovery: &dyn PluginDiscovery, activation: &mut ActivationIndex) -> Self {
        let mut catalog = PluginCatalog::default();
        for meta in discovery.list_plugin_metadata() {
            if !meta.notification_area {
                continue;
            }
            let id_hint = meta.id.clone().unwrap_or_default();
            let descriptor = match PluginDescriptor::try_from(meta) {
                Ok(descriptor) => descriptor,
                Err(missing) => {
                    log::warn!("Skipping plugin {:?}: metadata has no {}", id_hint, missing);
                    continue;
                }
            };
            if catalog.plugins.contains_key(&descriptor.id) {
                log::warn!("Plugin {} was found more than once, keeping the first one", descriptor.id);
                continue;
            }

            if let Some(pattern) = &descriptor.activation_pattern {
                match ServicePattern::new(pattern) {
                    Ok(pattern) => activation.register(descriptor.id.clone(), pattern),
                    Err(e) => {
                        log::warn!("Skipping plugin {}: {}", descriptor.id, e);
                        continue;
                    }
                }
            }
            if descriptor.enabled_by_default {
                catalog.default_plugins.push(descriptor.id.clone());
            }
            catalog.plugins.insert(descriptor.id.clone(), descriptor);
        }
        log::info!("Found {} tray plugins", catalog.plugins.len());
        catalog
    }

    pub fn get(&self, plugin: &str) -> Option<&PluginDescriptor> {
        self.plugins.get(plugin)
    }

    pub fn is_tray_plugin(&self, plugin: &str) -> bool {
        self.plugins.contains_key(plugin)
    }

    pub fn category_of(&self, plugin: &str) -> &str {
        self.plugins.get(plugin).map(|d| d.category.as_str()).unwrap_or(UNKNOWN_CATEGORY)
    }

    /// Plugins that want to be allowed when the user hasn't configured anything yet.
    pub fn default_plugins(&self) -> &[PluginId] {
        &self.default_plugins
    }

    /// Descriptors ordered by plugin id.
    pub fn iter(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.plugins.values()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Every plugin, sorted by label, for presenting a choice to the user.
    pub fn available_plugins(&self) -> Vec<AvailablePlugin> {
        let mut list: Vec<_> = self
            .plugins
            .values()
            .map(|d| AvailablePlugin {
                id: d.id.clone(),
                label: if d.is_bus_activated() { format!("{}{}", d.display_name, AUTOMATIC_LOAD_SUFFIX) } else { d.display_name.clone() },
                category: d.category.clone(),
            })
            .collect();
        list.sort_by(|a, b| a.label.cmp(&b.label).then_with(|| a.id.cmp(&b.id)));
        list
    }

    /// Allowed plugins that are started unconditionally, i.e. that have no activation pattern.
    ///
    /// Plugins sharing a display name are indistinguishable to the user, so only the one with the
    /// lexicographically smallest id is returned.
    pub fn static_plugins(&self, allowed: &AllowList) -> Vec<PluginId> {
        let mut seen_names = HashSet::new();
        let mut result = Vec::new();
        for descriptor in self.plugins.values() {
            if !allowed.contains(&descriptor.id) || descriptor.is_bus_activated() {
                continue;
            }
            if !seen_names.insert(descriptor.display_name.as_str()) {
                log::debug!("Not starting {}: another plugin is already called {:?}", descriptor.id, descriptor.display_name);
                continue;
            }
            result.push(descriptor.id.clone());
        }
        result
    }
}

impl PluginDiscovery for Vec<PluginMetadata> {
    fn list_plugin_metadata(&self) -> Vec<PluginMetadata> {
        self.clone()
    }
}
