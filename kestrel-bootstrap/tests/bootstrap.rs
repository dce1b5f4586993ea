use std::sync::{Arc, Mutex};

use kestrel_bootstrap::{
    Bootstrap, LaunchContext,
    plugin::{Plugin, PluginError, PluginRegistry, PluginSet, RegistrationReport},
    sink::{ErrorSink, StartupFailure},
    state::BootstrapState,
    telemetry::{
        AnalyticsCollector, CrashReporter, Dispatch, TelemetryBackend, TelemetryError,
        TelemetryService,
    },
};
use rstest::{fixture, rstest};

/// Every collaborator call, in the order it happened.
#[derive(Clone, Default)]
struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| e.as_str() == entry).count()
    }
}

struct FakeTelemetry {
    journal: Journal,
    crash_failure: bool,
    analytics_panic: bool,
}

impl TelemetryBackend for FakeTelemetry {
    fn configure(&self) -> Result<(), TelemetryError> {
        self.journal.push("backend");
        Ok(())
    }
}

impl CrashReporter for FakeTelemetry {
    fn set_collection_enabled(&self, enabled: bool) -> Result<(), TelemetryError> {
        self.journal.push(format!("crash={enabled}"));
        if self.crash_failure {
            return Err(TelemetryError::MissingCredentials(
                "crash reporter api key".to_string(),
            ));
        }
        Ok(())
    }
}

impl AnalyticsCollector for FakeTelemetry {
    fn set_collection_enabled(&self, enabled: bool) -> Result<(), TelemetryError> {
        self.journal.push(format!("analytics={enabled}"));
        if self.analytics_panic {
            panic!("analytics sdk not linked");
        }
        Ok(())
    }
}

struct JournalPlugin {
    journal: Journal,
}

impl Plugin for JournalPlugin {
    fn name(&self) -> &str {
        "journal"
    }

    fn register(&self, _context: &LaunchContext) -> anyhow::Result<()> {
        self.journal.push("plugin");
        Ok(())
    }
}

struct FailingRegistry {
    journal: Journal,
}

impl PluginRegistry for FailingRegistry {
    fn register_all(&self, _context: &LaunchContext) -> Result<RegistrationReport, PluginError> {
        self.journal.push("plugins");
        Err(PluginError::Registration {
            name: "camera".to_string(),
            source: anyhow::anyhow!("missing entitlement"),
        })
    }
}

#[derive(Default)]
struct CollectingSink(Mutex<Vec<String>>);

impl ErrorSink for CollectingSink {
    fn report(&self, failure: &StartupFailure) {
        self.0.lock().unwrap().push(failure.to_string());
    }
}

impl CollectingSink {
    fn reports(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

#[fixture]
fn journal() -> Journal {
    Journal::default()
}

fn telemetry(
    journal: &Journal,
    crash_failure: bool,
    analytics_panic: bool,
) -> Arc<TelemetryService> {
    let fake = Arc::new(FakeTelemetry {
        journal: journal.clone(),
        crash_failure,
        analytics_panic,
    });
    Arc::new(
        TelemetryService::builder()
            .backend(fake.clone())
            .crash_reporter(fake.clone())
            .analytics(fake)
            .build(),
    )
}

fn plugin_set(journal: &Journal) -> Arc<PluginSet> {
    Arc::new(PluginSet::default().with_plugin(JournalPlugin {
        journal: journal.clone(),
    }))
}

fn orchestrator(
    journal: &Journal,
    telemetry: Arc<TelemetryService>,
    plugins: Arc<dyn PluginRegistry>,
    sink: Arc<CollectingSink>,
    verdict: bool,
) -> Bootstrap {
    let continuation_journal = journal.clone();
    Bootstrap::builder()
        .initialize_logging(false)
        .telemetry(telemetry)
        .plugins(plugins)
        .error_sink(sink)
        .continuation(move |_: &LaunchContext| {
            continuation_journal.push("continuation");
            verdict
        })
        .build()
}

const HAPPY_PATH: [&str; 5] = [
    "backend",
    "crash=true",
    "analytics=true",
    "plugin",
    "continuation",
];

#[rstest]
fn empty_launch_with_healthy_collaborators_is_accepted(journal: Journal) {
    let telemetry = telemetry(&journal, false, false);
    let plugins = plugin_set(&journal);
    let sink = Arc::new(CollectingSink::default());
    let bootstrap = orchestrator(&journal, telemetry.clone(), plugins.clone(), sink.clone(), true);

    assert!(bootstrap.bootstrap(&LaunchContext::new()));

    assert_eq!(journal.entries(), HAPPY_PATH);
    let state = telemetry.state();
    assert!(state.backend_configured);
    assert!(state.crash_collection_enabled);
    assert!(state.analytics_collection_enabled);
    assert!(plugins.is_registered("journal"));
    assert_eq!(bootstrap.state(), BootstrapState::Ready);
    assert!(sink.reports().is_empty());
}

#[rstest]
#[case::accepted(true)]
#[case::rejected(false)]
fn result_is_the_continuation_verdict(journal: Journal, #[case] verdict: bool) {
    let sink = Arc::new(CollectingSink::default());
    let bootstrap = orchestrator(
        &journal,
        telemetry(&journal, false, false),
        plugin_set(&journal),
        sink.clone(),
        verdict,
    );

    assert_eq!(bootstrap.bootstrap(&LaunchContext::new()), verdict);

    // telemetry and plugins run exactly once either way
    assert_eq!(journal.entries(), HAPPY_PATH);
    assert_eq!(bootstrap.state(), BootstrapState::Ready);
    assert_eq!(
        sink.reports().contains(&"host continuation rejected startup".to_string()),
        !verdict
    );
}

#[rstest]
#[case::accepted(true)]
#[case::rejected(false)]
fn collaborator_failures_never_change_the_verdict(journal: Journal, #[case] verdict: bool) {
    let sink = Arc::new(CollectingSink::default());
    let bootstrap = orchestrator(
        &journal,
        telemetry(&journal, true, true),
        Arc::new(FailingRegistry {
            journal: journal.clone(),
        }),
        sink.clone(),
        verdict,
    );

    assert_eq!(bootstrap.bootstrap(&LaunchContext::new()), verdict);

    assert_eq!(
        journal.entries(),
        [
            "backend",
            "crash=true",
            "analytics=true",
            "plugins",
            "continuation"
        ]
    );
    let reports = sink.reports();
    assert!(reports.contains(
        &"crash collection failed: missing telemetry credentials: crash reporter api key"
            .to_string()
    ));
    assert!(reports.contains(
        &"telemetry analytics collection panicked: analytics sdk not linked".to_string()
    ));
    assert!(reports.contains(
        &"plugin registration failed: plugin `camera` failed to register: missing entitlement"
            .to_string()
    ));
}

#[rstest]
fn crash_reporter_failure_still_reaches_plugins_and_continuation(journal: Journal) {
    let telemetry = telemetry(&journal, true, false);
    let bootstrap = orchestrator(
        &journal,
        telemetry.clone(),
        plugin_set(&journal),
        Arc::new(CollectingSink::default()),
        true,
    );

    assert!(bootstrap.bootstrap(&LaunchContext::new()));

    assert_eq!(journal.count("plugin"), 1);
    assert_eq!(journal.count("continuation"), 1);
    assert!(!telemetry.state().crash_collection_enabled);
    assert!(telemetry.state().analytics_collection_enabled);
}

#[rstest]
fn panicking_continuation_is_a_rejection(journal: Journal) {
    let sink = Arc::new(CollectingSink::default());
    let bootstrap = Bootstrap::builder()
        .initialize_logging(false)
        .telemetry(telemetry(&journal, false, false))
        .plugins(plugin_set(&journal))
        .error_sink(sink.clone())
        .continuation(|_: &LaunchContext| -> bool { panic!("window scene missing") })
        .build();

    assert!(!bootstrap.bootstrap(&LaunchContext::new()));

    assert_eq!(bootstrap.state(), BootstrapState::Ready);
    assert_eq!(
        sink.reports(),
        ["host continuation panicked: window scene missing"]
    );
}

#[rstest]
fn second_call_does_not_rerun_the_sequence(journal: Journal) {
    let bootstrap = orchestrator(
        &journal,
        telemetry(&journal, false, false),
        plugin_set(&journal),
        Arc::new(CollectingSink::default()),
        false,
    );

    assert!(!bootstrap.bootstrap(&LaunchContext::new()));
    assert!(!bootstrap.bootstrap(&LaunchContext::new().with_option("url", "app://again")));

    assert_eq!(journal.entries(), HAPPY_PATH);
}

#[rstest]
fn restart_leaves_the_same_telemetry_and_plugin_state(journal: Journal) {
    let telemetry = telemetry(&journal, false, false);
    let plugins = plugin_set(&journal);
    let first_sink = Arc::new(CollectingSink::default());
    let first = orchestrator(&journal, telemetry.clone(), plugins.clone(), first_sink.clone(), true);
    assert!(first.bootstrap(&LaunchContext::new()));
    let after_first = telemetry.state();

    let second_sink = Arc::new(CollectingSink::default());
    let second = orchestrator(&journal, telemetry.clone(), plugins.clone(), second_sink.clone(), true);
    assert!(second.bootstrap(&LaunchContext::new()));

    assert_eq!(telemetry.state(), after_first);
    assert!(plugins.is_registered("journal"));
    // the plugin attached only once, and no duplicate error was reported
    assert_eq!(journal.count("plugin"), 1);
    assert!(first_sink.reports().is_empty());
    assert!(second_sink.reports().is_empty());
}

#[rstest]
fn detached_telemetry_does_not_block_the_sequence(journal: Journal) {
    let dir = std::env::temp_dir().join(format!("kestrel-detached-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("config.toml"), "[telemetry]\ndispatch = \"detached\"\n").unwrap();

    let telemetry = telemetry(&journal, false, false);
    let bootstrap = Bootstrap::builder()
        .initialize_logging(false)
        .config_folder(dir.clone())
        .telemetry(telemetry.clone())
        .plugins(plugin_set(&journal))
        .continuation(|_: &LaunchContext| true)
        .build();
    bootstrap.initialize().unwrap();
    assert_eq!(bootstrap.telemetry_config().dispatch(), Dispatch::Detached);

    assert!(bootstrap.bootstrap(&LaunchContext::new()));
    bootstrap.wait_detached();

    let telemetry_calls: Vec<String> = journal
        .entries()
        .into_iter()
        .filter(|e| e != "plugin")
        .collect();
    assert_eq!(telemetry_calls, ["backend", "crash=true", "analytics=true"]);
    assert!(telemetry.state().crash_collection_enabled);
    assert!(telemetry.state().analytics_collection_enabled);
    std::fs::remove_dir_all(dir).unwrap();
}

#[rstest]
fn launch_options_reach_plugins_and_continuation(journal: Journal) {
    struct Echo(Journal);

    impl Plugin for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn register(&self, context: &LaunchContext) -> anyhow::Result<()> {
            self.0.push(format!("plugin:{}", context.get("url").unwrap_or("-")));
            Ok(())
        }
    }

    let plugins = Arc::new(PluginSet::default().with_plugin(Echo(journal.clone())));
    let seen = journal.clone();
    let bootstrap = Bootstrap::builder()
        .initialize_logging(false)
        .telemetry(telemetry(&journal, false, false))
        .plugins(plugins)
        .continuation(move |launch: &LaunchContext| {
            seen.push(format!("continuation:{}", launch.get("url").unwrap_or("-")));
            true
        })
        .build();

    assert!(bootstrap.bootstrap(&LaunchContext::new().with_option("url", "app://inbox")));

    let entries = journal.entries();
    assert!(entries.contains(&"plugin:app://inbox".to_string()));
    assert!(entries.contains(&"continuation:app://inbox".to_string()));
}

#[rstest]
fn panicking_plugin_leaves_later_plugins_registered(journal: Journal) {
    struct Exploding;

    impl Plugin for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }

        fn register(&self, _context: &LaunchContext) -> anyhow::Result<()> {
            panic!("native bridge missing")
        }
    }

    let plugins = Arc::new(
        PluginSet::default()
            .with_plugin(Exploding)
            .with_plugin(JournalPlugin {
                journal: journal.clone(),
            }),
    );
    let sink = Arc::new(CollectingSink::default());
    let bootstrap = orchestrator(
        &journal,
        telemetry(&journal, false, false),
        plugins.clone(),
        sink.clone(),
        true,
    );

    assert!(bootstrap.bootstrap(&LaunchContext::new()));

    assert_eq!(journal.entries(), HAPPY_PATH);
    assert!(plugins.is_registered("journal"));
    assert!(!plugins.is_registered("exploding"));
    assert_eq!(
        sink.reports(),
        ["plugin registration failed: 1 plugin(s) failed to register: exploding"]
    );
    assert_eq!(bootstrap.state(), BootstrapState::Ready);
}
