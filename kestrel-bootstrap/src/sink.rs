use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
};

use thiserror::Error;

use crate::{plugin::PluginError, telemetry::TelemetryError, telemetry::TelemetryStep};

/// A step of the launch sequence, used to label contained failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStep {
    Telemetry(TelemetryStep),
    PluginRegistration,
    Continuation,
}

impl fmt::Display for BootstrapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapStep::Telemetry(step) => write!(f, "telemetry {}", step),
            BootstrapStep::PluginRegistration => f.pad("plugin registration"),
            BootstrapStep::Continuation => f.pad("host continuation"),
        }
    }
}

/// A failure absorbed by the orchestrator instead of being returned.
#[derive(Debug, Error)]
pub enum StartupFailure {
    #[error("{step} failed: {source}")]
    Telemetry {
        step: TelemetryStep,
        #[source]
        source: TelemetryError,
    },
    #[error("plugin registration failed: {0}")]
    Plugins(#[from] PluginError),
    #[error("{step} panicked: {message}")]
    Panicked { step: BootstrapStep, message: String },
    #[error("unable to detach telemetry: {source}")]
    DetachFailed {
        #[source]
        source: std::io::Error,
    },
    #[error("host continuation rejected startup")]
    ContinuationRejected,
}

/// Out-of-band channel for failures the launch sequence swallows.
pub trait ErrorSink: Send + Sync {
    fn report(&self, failure: &StartupFailure);
}

/// Reports every failure as a tracing event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, failure: &StartupFailure) {
        match failure {
            StartupFailure::ContinuationRejected => {
                tracing::error!("{}", failure);
            }
            _ => {
                tracing::warn!(error = %failure, "startup step failed, continuing launch");
            }
        }
    }
}

/// Runs `f`, turning a panic into a [`StartupFailure::Panicked`] report.
pub(crate) fn contain<T>(
    step: BootstrapStep,
    sink: &dyn ErrorSink,
    f: impl FnOnce() -> T,
) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            sink.report(&StartupFailure::Panicked {
                step,
                message: panic_message(payload.as_ref()),
            });
            None
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<String>>);

    impl ErrorSink for Collect {
        fn report(&self, failure: &StartupFailure) {
            self.0.lock().unwrap().push(failure.to_string());
        }
    }

    #[test]
    fn contain_passes_values_through() {
        let sink = Collect::default();
        assert_eq!(contain(BootstrapStep::Continuation, &sink, || 7), Some(7));
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn contain_reports_panics_with_step_and_message() {
        let sink = Collect::default();
        let out: Option<()> = contain(BootstrapStep::PluginRegistration, &sink, || {
            panic!("registry exploded")
        });
        assert_eq!(out, None);
        assert_eq!(
            sink.0.lock().unwrap().as_slice(),
            ["plugin registration panicked: registry exploded"]
        );
    }

    #[test]
    fn telemetry_step_is_named_in_failures() {
        let failure = StartupFailure::Telemetry {
            step: TelemetryStep::CrashCollection,
            source: TelemetryError::MissingCredentials("api key".to_string()),
        };
        assert_eq!(
            failure.to_string(),
            "crash collection failed: missing telemetry credentials: api key"
        );
    }
}
