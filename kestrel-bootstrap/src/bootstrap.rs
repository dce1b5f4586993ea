use std::{
    path::PathBuf,
    sync::{Arc, Mutex, OnceLock, PoisonError, RwLock},
    thread::JoinHandle,
};

use crate::{
    config::Config,
    continuation::Continuation,
    error::BootstrapError,
    launch::LaunchContext,
    log::{self, AppenderGuard, LoggingConfig},
    module::Module,
    plugin::PluginRegistry,
    sink::{self, BootstrapStep, ErrorSink, StartupFailure, TracingErrorSink},
    state::{BootstrapState, StateCell},
    telemetry::{TelemetryConfig, TelemetryService},
};
use di::{Ref, ServiceCollection, ServiceProvider, singleton_as_self};
use typed_builder::TypedBuilder;

/// Bootstrap is the entry point the host runtime hands launch to.
///
/// [`initialize`](Bootstrap::initialize) prepares the process (configuration,
/// logging), then [`bootstrap`](Bootstrap::bootstrap) runs the launch
/// sequence: telemetry, plugins, host continuation.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use kestrel_bootstrap::{bootstrap::Bootstrap, launch::LaunchContext, plugin::PluginSet};
/// # use kestrel_bootstrap::telemetry::*;
/// # struct Noop;
/// # impl CrashReporter for Noop {
/// #     fn set_collection_enabled(&self, _: bool) -> Result<(), TelemetryError> { Ok(()) }
/// # }
/// # impl AnalyticsCollector for Noop {
/// #     fn set_collection_enabled(&self, _: bool) -> Result<(), TelemetryError> { Ok(()) }
/// # }
/// # let telemetry = Arc::new(TelemetryService::builder()
/// #     .crash_reporter(Arc::new(Noop)).analytics(Arc::new(Noop)).build());
///
/// let bootstrap = Bootstrap::builder()
///     .telemetry(telemetry)
///     .plugins(Arc::new(PluginSet::default()))
///     .continuation(|_: &LaunchContext| true)
///     .build();
/// bootstrap.initialize().unwrap();
/// assert!(bootstrap.bootstrap(&LaunchContext::new()));
/// ```
#[derive(TypedBuilder)]
pub struct Bootstrap {
    /// Whether need to initialize logging.
    #[builder(default = true)]
    initialize_logging: bool,
    /// Whether need to print config.
    #[builder(default = false)]
    show_config: bool,

    /// Prefix of environment variables to override config values.
    #[builder(default = Some("KESTREL".to_string()))]
    env_config_prefix: Option<String>,
    /// Separator of environment variables to override config values.
    #[builder(default = "__".to_string())]
    env_config_split: String,
    /// Folder holding `config.toml`, the default lookup applies when unset.
    #[builder(default, setter(strip_option, into))]
    config_folder: Option<PathBuf>,

    /// a collection of modules
    #[builder(default = vec![])]
    modules: Vec<Box<dyn Module>>,

    telemetry: Arc<TelemetryService>,
    plugins: Arc<dyn PluginRegistry>,
    #[builder(setter(transform = |continuation: impl Continuation + 'static| {
        Box::new(continuation) as Box<dyn Continuation>
    }))]
    continuation: Box<dyn Continuation>,
    /// Where contained failures go.
    #[builder(default = Arc::new(TracingErrorSink) as Arc<dyn ErrorSink>)]
    error_sink: Arc<dyn ErrorSink>,

    #[builder(default, setter(skip))]
    state: StateCell,
    #[builder(default, setter(skip))]
    outcome: OnceLock<bool>,
    #[builder(default, setter(skip))]
    detached: Mutex<Vec<JoinHandle<()>>>,
    #[builder(default, setter(skip))]
    base_modules: RwLock<BootstrapBaseModule>,
}

impl Bootstrap {
    pub fn initialize(&self) -> Result<(), BootstrapError> {
        // first we try to initialize config
        self.initialize_config()?;
        // then we try to initialize logging by logger config
        self.initialize_logging()?;
        if self.show_config {
            // after logging initialized, we show config if needed
            self.show_config()?;
        }
        Ok(())
    }

    pub fn initialize_config(&self) -> Result<(), BootstrapError> {
        let env_config_prefix: Option<&str> = self.env_config_prefix.as_deref();
        let env_config_split: &str = self.env_config_split.as_str();
        let config = match &self.config_folder {
            Some(folder) => Config::from_folder(folder, env_config_prefix, env_config_split)?,
            None => Config::load(env_config_prefix, env_config_split)?,
        };
        let telemetry_config: TelemetryConfig = config.get()?;
        let mut base_modules = self.base_modules_mut();
        let _ = base_modules.config.insert(Ref::new(config));
        let _ = base_modules
            .telemetry_config
            .insert(Ref::new(telemetry_config));
        Ok(())
    }

    pub fn initialize_logging(&self) -> Result<(), BootstrapError> {
        if !self.initialize_logging {
            return Ok(());
        }
        let Some(config) = self.base_modules().config.clone() else {
            return Err(BootstrapError::MissingConfigValueError(
                "config must be loaded before logging".to_string(),
            ));
        };
        let logging_config = LoggingConfig::new(&config)?;
        let guard = log::install(&logging_config)?;
        // keep the guard alive so the non-blocking writers keep flushing
        let mut base_modules = self.base_modules_mut();
        let _ = base_modules.logging_config.insert(Ref::new(logging_config));
        let _ = base_modules.logger.insert(Ref::new(guard));
        Ok(())
    }

    pub fn show_config(&self) -> Result<(), BootstrapError> {
        if let Some(config) = &self.base_modules().config {
            let properties = config
                .to_properties()
                .map_err(BootstrapError::ConfigShowError)?;
            for line in properties.to_lines() {
                tracing::info!("load config {}", line);
            }
        }
        Ok(())
    }

    /// Runs the launch sequence and returns the host continuation's verdict.
    ///
    /// Telemetry and plugin failures are reported to the error sink and never
    /// change the result. Only the first call runs the sequence; later calls
    /// return the first result. The continuation must not call back into
    /// `bootstrap`.
    pub fn bootstrap(&self, launch: &LaunchContext) -> bool {
        let mut first_run = false;
        let accepted = *self.outcome.get_or_init(|| {
            first_run = true;
            self.run(launch)
        });
        if !first_run {
            tracing::warn!(accepted, "bootstrap already ran, returning the previous result");
        }
        accepted
    }

    pub fn state(&self) -> BootstrapState {
        self.state.current()
    }

    /// Telemetry settings from the loaded config, defaults before `initialize`.
    pub fn telemetry_config(&self) -> TelemetryConfig {
        self.base_modules()
            .telemetry_config
            .as_deref()
            .cloned()
            .unwrap_or_default()
    }

    /// Blocks until every detached telemetry call has finished.
    pub fn wait_detached(&self) {
        let handles: Vec<JoinHandle<()>> = self
            .detached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            if handle.join().is_err() {
                tracing::warn!("detached telemetry call terminated abnormally");
            }
        }
    }

    /// Builds a provider holding the base services and every module's services.
    pub fn service_provider(&self) -> Result<ServiceProvider, BootstrapError> {
        let mut services = ServiceCollection::new();
        self.base_modules().configure(&mut services);
        register_service(&Some(self.telemetry.clone()), &mut services);
        for module in &self.modules {
            module.configure(&mut services);
        }
        services
            .build_provider()
            .map_err(|e| BootstrapError::ServiceValidationError(e.to_string()))
    }

    fn run(&self, launch: &LaunchContext) -> bool {
        let span = tracing::info_span!("bootstrap", launch_options = launch.len());
        let _entered = span.enter();
        let sink = self.error_sink.as_ref();

        let handle = self
            .telemetry
            .configure(&self.telemetry_config(), &self.error_sink);
        self.detached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handle);
        self.advance(BootstrapState::TelemetryConfigured);

        match sink::contain(BootstrapStep::PluginRegistration, sink, || {
            self.plugins.register_all(launch)
        }) {
            Some(Ok(report)) => tracing::info!(
                registered = report.registered.len(),
                already_registered = report.already_registered.len(),
                "plugins registered"
            ),
            Some(Err(e)) => sink.report(&StartupFailure::Plugins(e)),
            // the panic was already reported
            None => {}
        }
        self.advance(BootstrapState::PluginsRegistered);

        let accepted = match sink::contain(BootstrapStep::Continuation, sink, || {
            self.continuation.finish_launching(launch)
        }) {
            Some(true) => true,
            Some(false) => {
                sink.report(&StartupFailure::ContinuationRejected);
                false
            }
            None => false,
        };
        self.advance(BootstrapState::Ready);
        tracing::info!(accepted, "bootstrap finished");
        accepted
    }

    fn advance(&self, to: BootstrapState) {
        if let Err(e) = self.state.advance(to) {
            tracing::error!(error = %e, "bootstrap state out of order");
        }
    }

    fn base_modules(&self) -> std::sync::RwLockReadGuard<'_, BootstrapBaseModule> {
        self.base_modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn base_modules_mut(&self) -> std::sync::RwLockWriteGuard<'_, BootstrapBaseModule> {
        self.base_modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Services produced by [`Bootstrap::initialize`].
#[derive(Default)]
struct BootstrapBaseModule {
    config: Option<Ref<Config>>,
    telemetry_config: Option<Ref<TelemetryConfig>>,
    logging_config: Option<Ref<LoggingConfig>>,
    logger: Option<Ref<AppenderGuard>>,
}

impl Module for BootstrapBaseModule {
    fn configure(&self, binder: &mut ServiceCollection) {
        register_service::<Config>(&self.config, binder);
        register_service::<TelemetryConfig>(&self.telemetry_config, binder);
        register_service::<LoggingConfig>(&self.logging_config, binder);
        register_service::<AppenderGuard>(&self.logger, binder);
    }
}

/// register a service to the service collection, skipped when absent.
fn register_service<T: Send + Sync + 'static>(
    service: &Option<Ref<T>>,
    binder: &mut ServiceCollection,
) {
    if let Some(svc) = service.clone() {
        binder.add(singleton_as_self::<T>().from(move |_| svc.clone()));
    }
}
