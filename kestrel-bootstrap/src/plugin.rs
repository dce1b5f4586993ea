use std::{
    collections::HashSet,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{PoisonError, RwLock},
};

use thiserror::Error;

use crate::{launch::LaunchContext, sink};

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin `{name}` failed to register: {source}")]
    Registration {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("{} plugin(s) failed to register: {}", .0.len(), DisplayNames(.0))]
    Failures(Vec<PluginError>),
}

struct DisplayNames<'a>(&'a [PluginError]);

impl fmt::Display for DisplayNames<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, error) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            match error {
                PluginError::Registration { name, .. } => f.write_str(name)?,
                PluginError::Failures(nested) => write!(f, "[{}]", DisplayNames(nested))?,
            }
        }
        Ok(())
    }
}

/// An extension that attaches itself to the host during launch.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn register(&self, context: &LaunchContext) -> anyhow::Result<()>;
}

/// Registers every known plugin against the launch context.
///
/// Calling it again within the same process must not re-register or fail
/// because of plugins that are already attached.
pub trait PluginRegistry: Send + Sync {
    fn register_all(&self, context: &LaunchContext) -> Result<RegistrationReport, PluginError>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RegistrationReport {
    pub registered: Vec<String>,
    pub already_registered: Vec<String>,
}

/// A fixed list of plugins known at build time.
///
/// Each plugin is attached at most once per process, keyed by name. A plugin
/// that fails stays unregistered and is retried by the next call.
#[derive(Default)]
pub struct PluginSet {
    plugins: Vec<Box<dyn Plugin>>,
    registered: RwLock<HashSet<String>>,
}

impl PluginSet {
    pub fn new(plugins: Vec<Box<dyn Plugin>>) -> Self {
        Self {
            plugins,
            registered: RwLock::new(HashSet::new()),
        }
    }

    pub fn with_plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(Box::new(plugin));
        self
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registered
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }
}

impl PluginRegistry for PluginSet {
    fn register_all(&self, context: &LaunchContext) -> Result<RegistrationReport, PluginError> {
        let mut report = RegistrationReport::default();
        let mut failures = Vec::new();
        let mut registered = self
            .registered
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for plugin in &self.plugins {
            let name = plugin.name();
            if registered.contains(name) {
                tracing::debug!(plugin = name, "plugin already registered");
                report.already_registered.push(name.to_string());
                continue;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| plugin.register(context)))
                .unwrap_or_else(|payload| {
                    Err(anyhow::anyhow!(
                        "panicked: {}",
                        sink::panic_message(payload.as_ref())
                    ))
                });
            match outcome {
                Ok(()) => {
                    tracing::debug!(plugin = name, "plugin registered");
                    registered.insert(name.to_string());
                    report.registered.push(name.to_string());
                }
                Err(source) => failures.push(PluginError::Registration {
                    name: name.to_string(),
                    source,
                }),
            }
        }
        if failures.is_empty() {
            Ok(report)
        } else {
            tracing::debug!(
                registered = report.registered.len(),
                failed = failures.len(),
                "plugins partially registered"
            );
            Err(PluginError::Failures(failures))
        }
    }
}
