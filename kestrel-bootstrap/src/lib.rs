//! Run-once application bootstrap.
//!
//! A host runtime builds a [`Bootstrap`], calls [`Bootstrap::initialize`] to
//! load configuration and logging, then hands launch over with
//! [`Bootstrap::bootstrap`]. The launch sequence configures telemetry,
//! registers plugins and finally defers to the host's own continuation,
//! whose verdict is the only thing it returns.

pub mod bootstrap;
pub mod config;
pub mod continuation;
pub mod error;
pub mod launch;
pub mod log;
pub mod module;
pub mod plugin;
pub mod serde;
pub mod sink;
pub mod state;
pub mod telemetry;

pub use bootstrap::Bootstrap;
pub use error::BootstrapError;
pub use launch::LaunchContext;
