//! The collaborators the engine drives: something that can create applets, the applets
//! themselves, and somewhere to remember which configuration slot belongs to which plugin.

use crate::{AppletId, PluginDescriptor, PluginId, Result};

/// A live applet instance.
pub trait Applet {
    /// The configuration slot this applet was created with.
    fn identity(&self) -> AppletId;

    /// Ask the applet to go away. This returns immediately; the owner of the engine reports the
    /// actual end via [`crate::LifecycleEngine::teardown_finished`].
    fn request_teardown(&mut self);

    /// Whether the applet is up and running.
    fn is_ready(&self) -> bool;
}

/// Creates applets for plugins, by plugin id.
pub trait AppletFactory {
    /// Instantiate `plugin` using the configuration slot `identity`. Failing here (e.g. because
    /// the plugin was uninstalled) is not fatal for the engine.
    fn create(&mut self, plugin: &PluginDescriptor, identity: AppletId) -> Result<Box<dyn Applet>>;
}

/// Durable storage of applet configuration groups.
pub trait AppletStore {
    /// Every stored `(group, plugin)` pair.
    fn load_groups(&self) -> Result<Vec<(AppletId, PluginId)>>;

    /// Remember that configuration group `identity` belongs to `plugin`.
    fn record_group(&mut self, identity: AppletId, plugin: &PluginId) -> Result<()>;

    /// Delete configuration group `identity` together with all settings stored in it.
    fn erase_group(&mut self, identity: AppletId) -> Result<()>;
}
