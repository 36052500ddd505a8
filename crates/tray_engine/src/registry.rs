use std::collections::{BTreeMap, HashMap};

use crate::{Applet, AppletId, PluginId};

/// Lifecycle state of a single plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum LifecycleState {
    /// No instance exists.
    Absent,
    /// A live instance exists.
    Running,
    /// Teardown of the instance was requested but has not finished yet.
    Stopping,
}

/// One applet instance known to the registry.
pub struct RunningInstance {
    pub plugin: PluginId,
    pub identity: AppletId,
    stopping: bool,
    applet: Box<dyn Applet>,
}

impl RunningInstance {
    pub fn state(&self) -> LifecycleState {
        if self.stopping {
            LifecycleState::Stopping
        } else {
            LifecycleState::Running
        }
    }

    pub fn is_ready(&self) -> bool {
        !self.stopping && self.applet.is_ready()
    }
}

impl std::fmt::Debug for RunningInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningInstance")
            .field("plugin", &self.plugin)
            .field("identity", &self.identity)
            .field("state", &self.state())
            .finish()
    }
}

/// Which configuration slot each plugin used last.
///
/// Entries stay around after an applet stops, so starting the same plugin again reuses its old
/// settings. Fresh identities are never handed out twice.
#[derive(Debug, Default)]
pub struct IdentityRecycleTable {
    known: HashMap<PluginId, AppletId>,
    next_free: u32,
}

impl IdentityRecycleTable {
    pub fn from_groups(groups: impl IntoIterator<Item = (AppletId, PluginId)>) -> Self {
        let mut table = Self::default();
        let mut groups: Vec<_> = groups.into_iter().collect();
        groups.sort();
        for (identity, plugin) in groups {
            let Some(next_free) = identity.0.checked_add(1) else {
                log::warn!("Ignoring configuration group {} of {}, the identity is out of range", identity, plugin);
                continue;
            };
            if let Some(previous) = table.known.insert(plugin.clone(), identity) {
                log::warn!("Plugin {} has more than one configuration group, using {} instead of {}", plugin, identity, previous);
            }
            table.next_free = table.next_free.max(next_free);
        }
        table
    }

    pub fn get(&self, plugin: &str) -> Option<AppletId> {
        self.known.get(plugin).copied()
    }

    /// Hand out an identity no other plugin has used in this session, or `None` once the
    /// identity space is used up.
    pub fn allocate(&mut self) -> Option<AppletId> {
        let identity = AppletId(self.next_free);
        self.next_free = self.next_free.checked_add(1)?;
        Some(identity)
    }

    pub fn record(&mut self, plugin: PluginId, identity: AppletId) {
        self.known.insert(plugin, identity);
    }

    pub fn forget(&mut self, plugin: &str) -> Option<AppletId> {
        self.known.remove(plugin)
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

/// The applet instances that currently exist, at most one per plugin.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    instances: BTreeMap<PluginId, RunningInstance>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, plugin: &str) -> LifecycleState {
        self.instances.get(plugin).map(RunningInstance::state).unwrap_or(LifecycleState::Absent)
    }

    pub fn get(&self, plugin: &str) -> Option<&RunningInstance> {
        self.instances.get(plugin)
    }

    /// Track a freshly created applet.
    ///
    /// # Panics
    /// If `plugin` already has an instance. Callers must check [`Self::state`] first.
    pub fn insert(&mut self, plugin: PluginId, applet: Box<dyn Applet>) -> AppletId {
        assert!(!self.instances.contains_key(&plugin), "second instance of {} requested", plugin);
        let identity = applet.identity();
        self.instances.insert(plugin.clone(), RunningInstance { plugin, identity, stopping: false, applet });
        identity
    }

    /// Move a running instance to [`LifecycleState::Stopping`] and request its teardown. Returns the
    /// identity of the instance, or `None` if there was no running instance.
    pub fn begin_teardown(&mut self, plugin: &str) -> Option<AppletId> {
        let instance = self.instances.get_mut(plugin).filter(|instance| !instance.stopping)?;
        instance.stopping = true;
        instance.applet.request_teardown();
        Some(instance.identity)
    }

    /// Forget the instance of `plugin`, provided it has the given identity.
    pub fn remove(&mut self, plugin: &str, identity: AppletId) -> Option<RunningInstance> {
        if self.instances.get(plugin)?.identity != identity {
            return None;
        }
        self.instances.remove(plugin)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RunningInstance> {
        self.instances.values()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
