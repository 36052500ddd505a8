use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::PluginId;

/// The set of plugins that may run. Order never matters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllowList(BTreeSet<PluginId>);

impl AllowList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains<Q: AsRef<str> + ?Sized>(&self, plugin: &Q) -> bool {
        self.0.contains(plugin.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &PluginId> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy of this list with `plugin` added.
    pub fn with(&self, plugin: PluginId) -> Self {
        let mut set = self.0.clone();
        set.insert(plugin);
        AllowList(set)
    }

    /// Copy of this list with `plugin` removed.
    pub fn without(&self, plugin: &str) -> Self {
        let mut set = self.0.clone();
        set.remove(plugin);
        AllowList(set)
    }
}

impl<T: Into<PluginId>> FromIterator<T> for AllowList {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        AllowList(iter.into_iter().map(Into::into).collect())
    }
}

impl<'a> IntoIterator for &'a AllowList {
    type Item = &'a PluginId;
    type IntoIter = std::collections::btree_set::Iter<'a, PluginId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Holds the current allow list. The list is only ever replaced as a whole.
#[derive(Debug, Default)]
pub struct AllowListPolicy {
    allowed: AllowList,
}

impl AllowListPolicy {
    pub fn new(allowed: AllowList) -> Self {
        AllowListPolicy { allowed }
    }

    pub fn allowed(&self) -> &AllowList {
        &self.allowed
    }

    pub fn is_allowed<Q: AsRef<str> + ?Sized>(&self, plugin: &Q) -> bool {
        self.allowed.contains(plugin)
    }

    /// Replace the allow list. Returns `false` (and changes nothing) if `allowed` holds the same
    /// plugins as the current list.
    pub fn replace(&mut self, allowed: AllowList) -> bool {
        if allowed == self.allowed {
            return false;
        }
        self.allowed = allowed;
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_replace_ignores_order_and_duplicates() {
        let mut policy = AllowListPolicy::new(["a", "b"].into_iter().collect());
        assert!(!policy.replace(["b", "a", "b"].into_iter().collect()));
        assert!(policy.replace(["a"].into_iter().collect()));
        assert!(policy.is_allowed("a"));
        assert!(!policy.is_allowed("b"));
    }

    #[test]
    fn test_with_and_without() {
        let list: AllowList = ["a"].into_iter().collect();
        assert!(list.with("b".into()).contains("b"));
        assert!(list.without("a").is_empty());
        assert_eq!(1, list.len());
    }
}
