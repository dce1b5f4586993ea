use std::collections::{BTreeMap, btree_map};

/// Launch options handed over by the host runtime.
///
/// The orchestrator never reads these; it only forwards them to the plugin
/// registry and the host continuation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LaunchContext {
    options: BTreeMap<String, String>,
}

impl LaunchContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.options.iter()
    }
}

impl<K, V> FromIterator<(K, V)> for LaunchContext
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            options: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
