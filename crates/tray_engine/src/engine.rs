use itertools::Itertools;
use tokio::sync::mpsc::UnboundedSender;

use crate::*;

#[cfg(test)]
mod test;

/// Things observers of the engine want to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    AppletAdded { plugin: PluginId, identity: AppletId },
    /// Sent as soon as teardown is requested, not when it has finished.
    AppletRemoved { plugin: PluginId, identity: AppletId },
    AllowedChanged(AllowList),
}

/// Decides which applets exist.
///
/// Applets are started either because they are allowed and have no activation pattern, or because
/// they are allowed and at least one bus service matching their pattern is alive. There is never
/// more than one instance per plugin.
///
/// All methods are meant to be called from a single thread of control. Teardown of applets is
/// asynchronous: [`Self::ensure_stopped`] only requests it, and whoever owns the engine reports
/// completion through [`Self::teardown_finished`].
pub struct LifecycleEngine<F, S> {
    catalog: PluginCatalog,
    activation: ActivationIndex,
    policy: AllowListPolicy,
    registry: InstanceRegistry,
    identities: IdentityRecycleTable,
    factory: F,
    store: S,
    evt_send: UnboundedSender<EngineEvent>,
}

impl<F: AppletFactory, S: AppletStore> LifecycleEngine<F, S> {
    /// Create an engine with an empty allow list. Nothing is started until [`Self::start`].
    pub fn new(discovery: &dyn PluginDiscovery, factory: F, store: S, evt_send: UnboundedSender<EngineEvent>) -> Self {
        let mut activation = ActivationIndex::new();
        let catalog = PluginCatalog::discover(discovery, &mut activation);
        let groups = match store.load_groups() {
            Ok(groups) => groups,
            Err(e) => {
                log::warn!("Could not read stored applet configuration, starting from scratch: {}", e);
                Vec::new()
            }
        };
        let identities = IdentityRecycleTable::from_groups(groups);
        log::debug!("Recycling configuration of {} plugins", identities.len());

        LifecycleEngine {
            catalog,
            activation,
            policy: AllowListPolicy::default(),
            registry: InstanceRegistry::new(),
            identities,
            factory,
            store,
            evt_send,
        }
    }

    /// Install the initial allow list and run the first reconciliation.
    pub fn start(&mut self, allowed: AllowList) {
        self.policy.replace(allowed);
        self.reconcile();
    }

    pub fn catalog(&self) -> &PluginCatalog {
        &self.catalog
    }

    pub fn activation(&self) -> &ActivationIndex {
        &self.activation
    }

    pub fn allowed(&self) -> &AllowList {
        self.policy.allowed()
    }

    pub fn state_of(&self, plugin: &str) -> LifecycleState {
        self.registry.state(plugin)
    }

    pub fn instance(&self, plugin: &str) -> Option<&RunningInstance> {
        self.registry.get(plugin)
    }

    pub fn instances(&self) -> impl Iterator<Item = &RunningInstance> {
        self.registry.iter()
    }

    /// The identity `plugin` will be started with, if it has been started before.
    pub fn recycled_identity(&self, plugin: &str) -> Option<AppletId> {
        self.identities.get(plugin)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Replace the allow list. Does nothing and returns `false` if the new list holds the same
    /// plugins as the current one; otherwise reconciles and announces the change.
    pub fn set_allowed(&mut self, allowed: AllowList) -> bool {
        if !self.policy.replace(allowed) {
            return false;
        }
        log::info!("Allowed plugins changed: {}", self.policy.allowed().iter().join(", "));
        self.reconcile();
        self.emit(EngineEvent::AllowedChanged(self.policy.allowed().clone()));
        true
    }

    /// Bring the running applets in line with the allow list.
    pub fn reconcile(&mut self) {
        let allowed = self.policy.allowed().clone();

        // first, get rid of everything that isn't allowed anymore
        let disallowed: Vec<_> =
            self.registry.iter().filter(|instance| !allowed.contains(&instance.plugin)).map(|instance| instance.plugin.clone()).collect();
        for plugin in disallowed {
            self.force_stop(&plugin);
        }
        self.activation.forget_disallowed(&allowed);

        for plugin in self.catalog.static_plugins(&allowed) {
            log::debug!("Adding applet {}", plugin);
            self.ensure_running(&plugin);
        }

        // bus-activated plugins that just got allowed while their service is already around
        let activatable: Vec<_> = self.activation.activatable().filter(|plugin| allowed.contains(plugin)).cloned().collect();
        for plugin in activatable {
            if self.activation.reseed(&plugin) {
                self.ensure_running(&plugin);
            }
        }
    }

    /// Start `plugin` unless it already has an instance.
    pub fn ensure_running(&mut self, plugin: &PluginId) {
        match self.registry.state(plugin) {
            LifecycleState::Running => return,
            LifecycleState::Stopping => {
                // the old instance is still being torn down, a later activation will bring it back
                log::debug!("Not starting {} while its previous instance is stopping", plugin);
                return;
            }
            LifecycleState::Absent => {}
        }

        let Some(descriptor) = self.catalog.get(plugin) else {
            log::warn!("Unable to find applet {}", plugin);
            return;
        };

        let recycled = self.identities.get(plugin);
        let Some(identity) = recycled.or_else(|| self.identities.allocate()) else {
            log::warn!("Unable to start applet {}: no configuration identity left", plugin);
            return;
        };
        let applet = match self.factory.create(descriptor, identity) {
            Ok(applet) => applet,
            Err(e) => {
                log::warn!("Unable to start applet {} ({}): {}", plugin, identity, e);
                return;
            }
        };

        if recycled.is_none() {
            self.identities.record(plugin.clone(), identity);
            if let Err(e) = self.store.record_group(identity, plugin) {
                log::warn!("Failed to store configuration group {} of {}: {}", identity, plugin, e);
            }
        }
        let identity = self.registry.insert(plugin.clone(), applet);
        log::info!("Started applet {} ({})", plugin, identity);
        self.emit(EngineEvent::AppletAdded { plugin: plugin.clone(), identity });
    }

    /// Request teardown of the instance of `plugin`, if it is running. Its configuration is kept,
    /// so it will be reused when the plugin starts again.
    pub fn ensure_stopped(&mut self, plugin: &PluginId) {
        match self.registry.begin_teardown(plugin) {
            Some(identity) => {
                log::info!("Stopping applet {} ({})", plugin, identity);
                self.emit(EngineEvent::AppletRemoved { plugin: plugin.clone(), identity });
            }
            None => log::debug!("Not stopping {}, it is {}", plugin, self.registry.state(plugin)),
        }
    }

    /// Stop `plugin` for good, deleting its configuration.
    fn force_stop(&mut self, plugin: &PluginId) {
        let Some(identity) = self.registry.get(plugin).map(|instance| instance.identity) else { return };
        if self.registry.begin_teardown(plugin).is_some() {
            log::info!("Removing disallowed applet {} ({})", plugin, identity);
            self.emit(EngineEvent::AppletRemoved { plugin: plugin.clone(), identity });
        }
        self.identities.forget(plugin);
        if let Err(e) = self.store.erase_group(identity) {
            log::warn!("Failed to erase configuration group {} of {}: {}", identity, plugin, e);
        }
    }

    /// Report that an applet is gone for good.
    ///
    /// Usually this is the completion of a requested teardown. If the applet was still supposed to
    /// be running, it died by itself; observers are told, but it is not restarted.
    pub fn teardown_finished(&mut self, plugin: &str, identity: AppletId) {
        match self.registry.remove(plugin, identity) {
            Some(instance) if instance.state() == LifecycleState::Stopping => {
                log::debug!("Teardown of {} ({}) finished", plugin, identity);
            }
            Some(instance) => {
                log::warn!("Applet {} ({}) exited unexpectedly", plugin, identity);
                self.emit(EngineEvent::AppletRemoved { plugin: instance.plugin, identity });
            }
            None => log::debug!("Ignoring teardown of unknown applet {} ({})", plugin, identity),
        }
    }

    pub fn handle_service_event(&mut self, event: ServiceEvent) {
        match event.presence {
            Presence::Registered => self.service_registered(event.domain, &event.service),
            Presence::Unregistered => self.service_unregistered(event.domain, &event.service),
        }
    }

    /// A bus service appeared. Starts every allowed plugin it matches.
    ///
    /// Only the first matching service really starts a plugin. Later ones still ask for it, which
    /// brings back a plugin whose start was dropped while its previous instance was stopping.
    pub fn service_registered(&mut self, domain: BusDomain, service: &str) {
        if !self.activation.service_appeared(domain, service) {
            return;
        }
        for plugin in self.activation.matches(service, self.policy.allowed()) {
            if self.activation.increment_and_check_first(&plugin) {
                log::info!("Service {} appeared on the {} bus, loading {}", service, domain, plugin);
            }
            self.ensure_running(&plugin);
        }
    }

    /// A bus service vanished. Stops every allowed plugin for which this was the last matching
    /// service.
    pub fn service_unregistered(&mut self, domain: BusDomain, service: &str) {
        if !self.activation.service_vanished(domain, service) {
            return;
        }
        for plugin in self.activation.matches(service, self.policy.allowed()) {
            if self.activation.decrement_and_check_last(&plugin) {
                log::info!("Service {} disappeared from the {} bus, unloading {}", service, domain, plugin);
                self.ensure_stopped(&plugin);
            }
        }
    }

    fn emit(&self, event: EngineEvent) {
        if let Err(e) = self.evt_send.send(event) {
            log::debug!("Nobody is listening to engine events: {:?}", e.0);
        }
    }
}
