use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock},
    thread::{self, JoinHandle},
};

use serde::Deserialize;
use thiserror::Error;
use typed_builder::TypedBuilder;

use crate::{
    config::ConfigPrefix,
    sink::{self, BootstrapStep, ErrorSink, StartupFailure},
};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry backend is misconfigured: {0}")]
    Misconfigured(String),
    #[error("missing telemetry credentials: {0}")]
    MissingCredentials(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Application-level setup of the telemetry backend, done before any
/// collection flag is touched. Must be safe to call more than once.
pub trait TelemetryBackend: Send + Sync {
    fn configure(&self) -> Result<(), TelemetryError>;
}

/// Crash-reporting collaborator. Setting the same flag twice has no extra effect.
pub trait CrashReporter: Send + Sync {
    fn set_collection_enabled(&self, enabled: bool) -> Result<(), TelemetryError>;
}

/// Usage-analytics collaborator. Setting the same flag twice has no extra effect.
pub trait AnalyticsCollector: Send + Sync {
    fn set_collection_enabled(&self, enabled: bool) -> Result<(), TelemetryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryStep {
    Backend,
    CrashCollection,
    AnalyticsCollection,
}

impl TelemetryStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            TelemetryStep::Backend => "backend configuration",
            TelemetryStep::CrashCollection => "crash collection",
            TelemetryStep::AnalyticsCollection => "analytics collection",
        }
    }
}

impl fmt::Display for TelemetryStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// How telemetry calls are issued during launch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dispatch {
    /// On the launching thread, one after another.
    #[default]
    Inline,
    /// Each call on its own background thread, not awaited.
    Detached,
}

/// Telemetry section of the configuration.
#[derive(Debug, Clone, Deserialize, TypedBuilder)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    #[builder(default = true)]
    crash_collection_enabled: bool,
    #[builder(default = true)]
    analytics_collection_enabled: bool,
    #[builder(default)]
    dispatch: Dispatch,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ConfigPrefix for TelemetryConfig {
    const PREFIX: &'static str = "telemetry";
}

impl TelemetryConfig {
    pub fn crash_collection_enabled(&self) -> bool {
        self.crash_collection_enabled
    }

    pub fn analytics_collection_enabled(&self) -> bool {
        self.analytics_collection_enabled
    }

    pub fn dispatch(&self) -> Dispatch {
        self.dispatch
    }
}

/// Collection state as last acknowledged by the collaborators.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryState {
    pub backend_configured: bool,
    pub crash_collection_enabled: bool,
    pub analytics_collection_enabled: bool,
}

/// Owns the telemetry collaborators and the state they were left in.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use kestrel_bootstrap::telemetry::*;
///
/// struct Noop;
/// impl CrashReporter for Noop {
///     fn set_collection_enabled(&self, _: bool) -> Result<(), TelemetryError> { Ok(()) }
/// }
/// impl AnalyticsCollector for Noop {
///     fn set_collection_enabled(&self, _: bool) -> Result<(), TelemetryError> { Ok(()) }
/// }
///
/// let service = TelemetryService::builder()
///     .crash_reporter(Arc::new(Noop))
///     .analytics(Arc::new(Noop))
///     .build();
/// service.apply(TelemetryStep::CrashCollection, &TelemetryConfig::default()).unwrap();
/// assert!(service.state().crash_collection_enabled);
/// ```
#[derive(TypedBuilder)]
pub struct TelemetryService {
    #[builder(default, setter(strip_option))]
    backend: Option<Arc<dyn TelemetryBackend>>,
    crash_reporter: Arc<dyn CrashReporter>,
    analytics: Arc<dyn AnalyticsCollector>,
    #[builder(default, setter(skip))]
    state: RwLock<TelemetryState>,
}

impl TelemetryService {
    pub fn state(&self) -> TelemetryState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// The calls a launch issues, in order.
    pub fn steps(&self) -> Vec<TelemetryStep> {
        let mut steps = Vec::with_capacity(3);
        if self.backend.is_some() {
            steps.push(TelemetryStep::Backend);
        }
        steps.push(TelemetryStep::CrashCollection);
        steps.push(TelemetryStep::AnalyticsCollection);
        steps
    }

    /// Issues one call and records the acknowledged flag.
    pub fn apply(
        &self,
        step: TelemetryStep,
        settings: &TelemetryConfig,
    ) -> Result<(), TelemetryError> {
        match step {
            TelemetryStep::Backend => {
                if let Some(backend) = &self.backend {
                    backend.configure()?;
                    self.update(|s| s.backend_configured = true);
                }
            }
            TelemetryStep::CrashCollection => {
                let enabled = settings.crash_collection_enabled();
                self.crash_reporter.set_collection_enabled(enabled)?;
                self.update(|s| s.crash_collection_enabled = enabled);
            }
            TelemetryStep::AnalyticsCollection => {
                let enabled = settings.analytics_collection_enabled();
                self.analytics.set_collection_enabled(enabled)?;
                self.update(|s| s.analytics_collection_enabled = enabled);
            }
        }
        tracing::debug!(%step, "telemetry step applied");
        Ok(())
    }

    /// Issues every step in order, reporting failures and panics to `sink`.
    ///
    /// With [`Dispatch::Detached`] the whole sequence runs on one background
    /// thread, so the backend is still configured before any flag is set. The
    /// returned handle is not joined here.
    pub fn configure(
        self: &Arc<Self>,
        settings: &TelemetryConfig,
        sink: &Arc<dyn ErrorSink>,
    ) -> Option<JoinHandle<()>> {
        match settings.dispatch() {
            Dispatch::Inline => {
                self.apply_all(settings, sink.as_ref());
                None
            }
            Dispatch::Detached => {
                let service = Arc::clone(self);
                let settings = settings.clone();
                let task_sink = Arc::clone(sink);
                let spawned = thread::Builder::new()
                    .name("kestrel-telemetry".to_string())
                    .spawn(move || service.apply_all(&settings, task_sink.as_ref()));
                match spawned {
                    Ok(handle) => Some(handle),
                    Err(source) => {
                        sink.report(&StartupFailure::DetachFailed { source });
                        None
                    }
                }
            }
        }
    }

    fn apply_all(&self, settings: &TelemetryConfig, sink: &dyn ErrorSink) {
        for step in self.steps() {
            self.apply_contained(step, settings, sink);
        }
    }

    fn apply_contained(
        &self,
        step: TelemetryStep,
        settings: &TelemetryConfig,
        sink: &dyn ErrorSink,
    ) {
        let result = sink::contain(BootstrapStep::Telemetry(step), sink, || {
            self.apply(step, settings)
        });
        if let Some(Err(source)) = result {
            sink.report(&StartupFailure::Telemetry { step, source });
        }
    }

    fn update(&self, f: impl FnOnce(&mut TelemetryState)) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut *state);
    }
}
