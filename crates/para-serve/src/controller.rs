//! Caller-facing facade over one working directory.
//!
//! A controller is built per call with the resolved working directory
//! injected; it holds no state beyond what the components persist on disk.

use std::path::Path;
use std::sync::Arc;

use para_serve_config::{Config, SupervisionKind, TunnelMode};
use tracing::{info, warn};

use crate::environment::{EnvironmentResolver, Resolution, ServiceDescriptor};
use crate::error::ServiceError;
use crate::logs::LogAccess;
use crate::service_manager::{CommandRunner, ServiceManager, SystemCommandRunner};
use crate::status::{ServiceStatus, port_is_listening};
use crate::supervisor::{
    DirectSupervisor, ProcessSupervisor, ServiceManagerSupervisor, StopOutcome,
};
use crate::tunnel::{TunnelController, TunnelSettings, TunnelStopOutcome};

const CONTROLLER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::controller");

/// Parameters of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartOptions {
    /// Port the backend listens on.
    pub port: u16,
    /// Tunnel to bring up once the backend is running.
    pub tunnel_mode: TunnelMode,
    /// Detach and log to file rather than sharing the caller's terminal.
    pub background: bool,
}

/// What a stop request stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReport {
    /// Backend outcome, `None` when it was not running.
    pub backend: Option<StopOutcome>,
    /// Tunnel outcome, `None` when no tunnel was running.
    pub tunnel: Option<TunnelStopOutcome>,
}

/// Lifecycle operations for the backend and its tunnel.
pub struct ServiceController {
    resolution: Resolution,
    supervisor: Box<dyn ProcessSupervisor>,
    tunnel: TunnelController,
    logs: LogAccess,
}

impl std::fmt::Debug for ServiceController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceController")
            .field("resolution", &self.resolution)
            .field("tunnel", &self.tunnel)
            .finish_non_exhaustive()
    }
}

impl ServiceController {
    /// Resolves the working directory and wires components for the host.
    pub fn from_config(config: &Config) -> Result<Self, ServiceError> {
        let resolution = EnvironmentResolver::from_config(config).resolve();
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner);
        Self::with_parts(config, resolution, ServiceManager::host(runner))
    }

    /// Wires components around an explicit resolution and service manager.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::ServiceUnitNotInstalled`] when service-manager
    /// supervision is configured but no service manager is available.
    pub fn with_parts(
        config: &Config,
        resolution: Resolution,
        manager: Option<ServiceManager>,
    ) -> Result<Self, ServiceError> {
        let working_dir = resolution.working_dir.clone();
        let descriptor = ServiceDescriptor::new(&working_dir, config.port());
        let paths = descriptor.paths().clone();
        let supervisor: Box<dyn ProcessSupervisor> = match config.supervision() {
            SupervisionKind::Direct => Box::new(DirectSupervisor::new(
                descriptor,
                config.python(),
                config.shutdown_timeout(),
            )),
            SupervisionKind::ServiceManager => {
                let Some(manager) = manager.clone() else {
                    return Err(ServiceError::ServiceUnitNotInstalled {
                        label: config.service_label().to_owned(),
                        path: working_dir,
                    });
                };
                Box::new(ServiceManagerSupervisor::new(
                    descriptor,
                    config.python(),
                    config.service_label(),
                    manager,
                    config.shutdown_timeout(),
                ))
            }
        };
        let tunnel = TunnelController::new(
            paths.clone(),
            TunnelSettings::from_config(config, &working_dir),
            manager,
        );
        Ok(Self {
            resolution,
            supervisor,
            tunnel,
            logs: LogAccess::new(paths),
        })
    }

    /// How the working directory was chosen.
    pub const fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    /// Resolved working directory.
    pub fn working_dir(&self) -> &Path {
        &self.resolution.working_dir
    }

    /// Whether the dependency environment exists.
    pub fn is_ready(&self) -> bool {
        self.supervisor.is_ready()
    }

    /// Provisions the dependency environment.
    pub fn setup(&self) -> Result<(), ServiceError> {
        self.supervisor.setup()
    }

    /// Starts the backend in the background with an optional tunnel.
    pub fn start(&self, port: u16, tunnel_mode: TunnelMode) -> Result<ServiceStatus, ServiceError> {
        self.start_with(StartOptions {
            port,
            tunnel_mode,
            background: true,
        })
    }

    /// Starts the backend, then the tunnel, and reports the resulting status.
    ///
    /// A tunnel failure leaves the backend running and is returned as the
    /// error.
    pub fn start_with(&self, options: StartOptions) -> Result<ServiceStatus, ServiceError> {
        let handle = self.supervisor.start(options.port, options.background)?;
        if let Err(error) = self.tunnel.start(options.tunnel_mode, options.port) {
            warn!(
                target: CONTROLLER_TARGET,
                pid = handle.pid,
                %error,
                "tunnel failed to start; backend left running"
            );
            return Err(error);
        }
        self.status()
    }

    /// Stops the tunnel, then the backend.
    ///
    /// Both are attempted even if the first fails. Returns
    /// [`ServiceError::NotRunning`] only when neither was running.
    pub fn stop(&self) -> Result<StopReport, ServiceError> {
        let tunnel = not_running_as_none(self.tunnel.stop());
        let backend = not_running_as_none(self.supervisor.stop());
        let report = StopReport {
            tunnel: tunnel?,
            backend: backend?,
        };
        if report.backend.is_none() && report.tunnel.is_none() {
            return Err(ServiceError::NotRunning);
        }
        info!(
            target: CONTROLLER_TARGET,
            backend = ?report.backend,
            tunnel = ?report.tunnel,
            "service stopped"
        );
        Ok(report)
    }

    /// Recomputes the status snapshot.
    pub fn status(&self) -> Result<ServiceStatus, ServiceError> {
        let process = self.supervisor.status()?;
        let tunnel = self.tunnel.status()?;
        let listening = process
            .port
            .filter(|_| process.is_running())
            .is_some_and(port_is_listening);
        Ok(ServiceStatus::aggregate(&process, &tunnel, listening))
    }

    /// Log locations and readers.
    pub const fn logs(&self) -> &LogAccess {
        &self.logs
    }
}

fn not_running_as_none<T>(result: Result<T, ServiceError>) -> Result<Option<T>, ServiceError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(error) if error.is_not_running() => Ok(None),
        Err(error) => Err(error),
    }
}
