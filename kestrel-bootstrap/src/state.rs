use std::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
};

use crate::error::BootstrapError;

/// Progress of the launch sequence within one process.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum BootstrapState {
    #[default]
    Uninitialized,
    TelemetryConfigured,
    PluginsRegistered,
    Ready,
}

impl BootstrapState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BootstrapState::Uninitialized => "uninitialized",
            BootstrapState::TelemetryConfigured => "telemetry-configured",
            BootstrapState::PluginsRegistered => "plugins-registered",
            BootstrapState::Ready => "ready",
        }
    }

    /// The only state reachable from `self`, `None` once ready.
    pub fn next(&self) -> Option<BootstrapState> {
        match self {
            BootstrapState::Uninitialized => Some(BootstrapState::TelemetryConfigured),
            BootstrapState::TelemetryConfigured => Some(BootstrapState::PluginsRegistered),
            BootstrapState::PluginsRegistered => Some(BootstrapState::Ready),
            BootstrapState::Ready => None,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => BootstrapState::Uninitialized,
            1 => BootstrapState::TelemetryConfigured,
            2 => BootstrapState::PluginsRegistered,
            _ => BootstrapState::Ready,
        }
    }
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Monotonic holder of a [`BootstrapState`].
///
/// Transitions only ever move one step forward; there is no reset.
#[derive(Debug, Default)]
pub struct StateCell {
    inner: AtomicU8,
}

impl StateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> BootstrapState {
        BootstrapState::from_u8(self.inner.load(Ordering::Acquire))
    }

    pub fn advance(&self, to: BootstrapState) -> Result<(), BootstrapError> {
        let from = self.current();
        if from.next() != Some(to) {
            return Err(BootstrapError::InvalidTransitionError { from, to });
        }
        self.inner
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| BootstrapError::InvalidTransitionError {
                from: BootstrapState::from_u8(actual),
                to,
            })
    }
}
