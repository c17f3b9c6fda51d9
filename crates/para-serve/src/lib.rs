//! Local lifecycle supervisor for the Para MCP backend.
//!
//! The crate starts, monitors, and stops a single backend process and
//! optionally exposes it through a public tunnel. Callers work through a
//! [`ServiceController`] built per invocation: it resolves the backend's
//! working directory, delegates to a [`ProcessSupervisor`] strategy (direct
//! spawning or the host service manager), drives the [`TunnelController`],
//! and reports a [`ServiceStatus`] recomputed from live OS queries.
//!
//! State lives in plain files under the working directory (`server.pid`,
//! `server.port`, `tunnel.pid`, `tunnel.url`, and `logs/`), so separate
//! invocations agree on what is running. Stale files left by processes that
//! died out of band are removed whenever they are observed.
//!
//! Nothing here prints; every operation returns a typed result and emits
//! `tracing` events.

mod controller;
pub mod environment;
mod error;
mod files;
pub mod logs;
mod paths;
pub mod process;
pub mod service_manager;
pub mod status;
pub mod supervisor;
pub mod tunnel;

pub use controller::{ServiceController, StartOptions, StopReport};
pub use environment::{EnvironmentResolver, Resolution, ServiceDescriptor};
pub use error::ServiceError;
pub use logs::{LogAccess, LogKind};
pub use paths::ServicePaths;
pub use status::ServiceStatus;
pub use supervisor::{ProcessHandle, ProcessStatus, ProcessSupervisor, StopOutcome};
pub use tunnel::{
    TunnelController, TunnelHandle, TunnelProcess, TunnelSettings, TunnelStatus, TunnelStopOutcome,
};

#[cfg(all(test, unix))]
mod test_support;
#[cfg(all(test, unix))]
mod tests;
