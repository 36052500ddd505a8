use std::collections::{BTreeMap, HashMap, HashSet};

use crate::{AllowList, BusDomain, PluginId, ServicePattern};

/// Bus services whose names start with this are anonymous connections (`:1.42`). No published
/// service looks like that, so they are never matched.
pub const ANONYMOUS_NAME_PREFIX: char = ':';

/// Tracks which plugins are started by bus services, and how many matching services are currently
/// alive for each of them.
#[derive(Debug, Default)]
pub struct ActivationIndex {
    patterns: BTreeMap<PluginId, ServicePattern>,
    /// Only plugins with at least one live service have an entry.
    counts: HashMap<PluginId, usize>,
    /// Live services that match at least one registered pattern.
    present: HashSet<(BusDomain, String)>,
}

impl ActivationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: PluginId, pattern: ServicePattern) {
        log::debug!("Found bus-activated plugin {} ({})", plugin, pattern);
        self.patterns.insert(plugin, pattern);
    }

    pub fn is_activatable(&self, plugin: &str) -> bool {
        self.patterns.contains_key(plugin)
    }

    pub fn pattern_of(&self, plugin: &str) -> Option<&ServicePattern> {
        self.patterns.get(plugin)
    }

    /// All allowed plugins whose pattern matches `service`.
    pub fn matches(&self, service: &str, allowed: &AllowList) -> Vec<PluginId> {
        if service.starts_with(ANONYMOUS_NAME_PREFIX) {
            return Vec::new();
        }
        self.patterns
            .iter()
            .filter(|(plugin, pattern)| allowed.contains(plugin) && pattern.matches(service))
            .map(|(plugin, _)| plugin.clone())
            .collect()
    }

    fn matches_any(&self, service: &str) -> bool {
        !service.starts_with(ANONYMOUS_NAME_PREFIX) && self.patterns.values().any(|p| p.matches(service))
    }

    /// Record that `service` appeared on `domain`. Returns `false` if the service is of no
    /// interest to any plugin, or if it was already known to be present.
    pub fn service_appeared(&mut self, domain: BusDomain, service: &str) -> bool {
        self.matches_any(service) && self.present.insert((domain, service.to_owned()))
    }

    /// Record that `service` vanished from `domain`. Returns `false` if it was never counted.
    pub fn service_vanished(&mut self, domain: BusDomain, service: &str) -> bool {
        self.present.remove(&(domain, service.to_owned()))
    }

    pub fn count(&self, plugin: &str) -> usize {
        self.counts.get(plugin).copied().unwrap_or(0)
    }

    /// Increment the live service count of `plugin`, returning `true` if this was its first one.
    pub fn increment_and_check_first(&mut self, plugin: &PluginId) -> bool {
        let count = self.counts.entry(plugin.clone()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Decrement the live service count of `plugin`, returning `true` if this was its last one.
    ///
    /// # Panics
    /// If the count is already zero. That means an unregistration was counted that never had a
    /// matching registration, which is a bug in the caller.
    pub fn decrement_and_check_last(&mut self, plugin: &PluginId) -> bool {
        let count = self.counts.get_mut(plugin);
        let count = match count {
            Some(count) if *count > 0 => count,
            _ => panic!("activation count of {} would drop below zero", plugin),
        };
        *count -= 1;
        if *count == 0 {
            self.counts.remove(plugin);
            true
        } else {
            false
        }
    }

    /// Drop the counts of every plugin that is not allowed anymore.
    pub fn forget_disallowed(&mut self, allowed: &AllowList) {
        self.counts.retain(|plugin, _| allowed.contains(plugin));
    }

    /// Recount `plugin` from the services currently present, if it has no count yet. Returns
    /// `true` if that found at least one live service.
    pub fn reseed(&mut self, plugin: &PluginId) -> bool {
        if self.counts.contains_key(plugin) {
            return false;
        }
        let Some(pattern) = self.patterns.get(plugin) else { return false };
        let live = self.present.iter().filter(|(_, service)| pattern.matches(service)).count();
        if live > 0 {
            self.counts.insert(plugin.clone(), live);
        }
        live > 0
    }

    pub fn counts(&self) -> impl Iterator<Item = (&PluginId, usize)> {
        self.counts.iter().map(|(plugin, count)| (plugin, *count))
    }

    pub fn activatable(&self) -> impl Iterator<Item = &PluginId> {
        self.patterns.keys()
    }
}
