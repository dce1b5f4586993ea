use std::{process::ExitCode, sync::Arc};

use kestrel_bootstrap::{
    Bootstrap, LaunchContext,
    plugin::{Plugin, PluginSet},
    telemetry::{
        AnalyticsCollector, CrashReporter, TelemetryBackend, TelemetryError, TelemetryService,
    },
};

struct ConsoleTelemetry;

impl TelemetryBackend for ConsoleTelemetry {
    fn configure(&self) -> Result<(), TelemetryError> {
        tracing::info!("telemetry backend configured");
        Ok(())
    }
}

impl CrashReporter for ConsoleTelemetry {
    fn set_collection_enabled(&self, enabled: bool) -> Result<(), TelemetryError> {
        tracing::info!(enabled, "crash collection");
        Ok(())
    }
}

impl AnalyticsCollector for ConsoleTelemetry {
    fn set_collection_enabled(&self, enabled: bool) -> Result<(), TelemetryError> {
        tracing::info!(enabled, "analytics collection");
        Ok(())
    }
}

struct DeepLinks;

impl Plugin for DeepLinks {
    fn name(&self) -> &str {
        "deep-links"
    }

    fn register(&self, context: &LaunchContext) -> anyhow::Result<()> {
        if let Some(url) = context.get("url") {
            tracing::info!(url, "opening deep link after launch");
        }
        Ok(())
    }
}

/// Simulated host: `kestrel-example url=app://home reject=1`
fn main() -> anyhow::Result<ExitCode> {
    let launch: LaunchContext = std::env::args()
        .skip(1)
        .filter_map(|arg| {
            arg.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect();

    let telemetry = Arc::new(ConsoleTelemetry);
    let bootstrap = Bootstrap::builder()
        .initialize_logging(true)
        .show_config(true)
        .telemetry(Arc::new(
            TelemetryService::builder()
                .backend(telemetry.clone())
                .crash_reporter(telemetry.clone())
                .analytics(telemetry)
                .build(),
        ))
        .plugins(Arc::new(PluginSet::default().with_plugin(DeepLinks)))
        .continuation(|launch: &LaunchContext| launch.get("reject").is_none())
        .build();
    bootstrap.initialize()?;

    let accepted = bootstrap.bootstrap(&launch);
    bootstrap.wait_detached();
    tracing::info!(accepted, state = %bootstrap.state(), "host launch finished");
    Ok(if accepted {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
