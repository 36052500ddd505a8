use derive_more::{Display, From, FromStr};
use serde::{Deserialize, Serialize};

/// Category reported for plugins that don't declare one.
pub const UNKNOWN_CATEGORY: &str = "UnknownCategory";

/// The stable identifier of a tray plugin, e.g. `org.example.battery`.
#[repr(transparent)]
#[derive(Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize, From, FromStr, Display)]
#[serde(transparent)]
pub struct PluginId(pub String);

impl std::borrow::Borrow<str> for PluginId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::ops::Deref for PluginId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for PluginId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PluginId {
    fn from(s: &str) -> Self {
        PluginId(s.to_owned())
    }
}

/// Persisted identity of an applet instance. This is the key of the configuration group that
/// holds the applet's settings, so a relaunch with the same identity gets its old settings back.
#[repr(transparent)]
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize, From, FromStr, Display)]
#[serde(transparent)]
pub struct AppletId(pub u32);

/// Raw plugin metadata, as handed to us by discovery. Nothing in here is validated yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PluginMetadata {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub enabled_by_default: bool,
    /// Whether this plugin belongs in the notification area at all.
    #[serde(default)]
    pub notification_area: bool,
    /// Wildcard over bus service names. When present, the plugin is loaded while a matching
    /// service exists instead of being started unconditionally.
    #[serde(default)]
    pub dbus_activation: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum MissingField {
    #[display("id")]
    Id,
    #[display("name")]
    Name,
}

/// A validated tray plugin. Never changes after discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptor {
    pub id: PluginId,
    pub display_name: String,
    pub category: String,
    pub enabled_by_default: bool,
    pub activation_pattern: Option<String>,
}

impl PluginDescriptor {
    pub fn is_bus_activated(&self) -> bool {
        self.activation_pattern.is_some()
    }
}

impl TryFrom<PluginMetadata> for PluginDescriptor {
    type Error = MissingField;

    fn try_from(meta: PluginMetadata) -> std::result::Result<Self, MissingField> {
        let id = meta.id.filter(|id| !id.trim().is_empty()).ok_or(MissingField::Id)?;
        let display_name = meta.name.filter(|name| !name.trim().is_empty()).ok_or(MissingField::Name)?;
        Ok(PluginDescriptor {
            id: PluginId(id),
            display_name,
            category: meta.category.filter(|c| !c.is_empty()).unwrap_or_else(|| UNKNOWN_CATEGORY.to_owned()),
            enabled_by_default: meta.enabled_by_default,
            activation_pattern: meta.dbus_activation.filter(|p| !p.is_empty()),
        })
    }
}
