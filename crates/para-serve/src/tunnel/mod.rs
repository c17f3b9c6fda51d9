//! Optional public tunnel in front of the backend's local port.
//!
//! Ephemeral tunnels are quick tunnels whose random URL is scraped from the
//! client's log. Persistent tunnels are pre-registered named tunnels run by
//! the host service manager, with a stable hostname read from the client's
//! configuration file.

pub mod discovery;
mod ephemeral;
mod persistent;

use std::path::PathBuf;
use std::time::Duration;

use para_serve_config::{Config, TunnelMode};
use tracing::{info, warn};

use crate::error::ServiceError;
use crate::files::{read_text, read_value, remove_file};
use crate::paths::ServicePaths;
use crate::process;
use crate::service_manager::ServiceManager;

pub(crate) const TUNNEL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::tunnel");

/// Tunnel client options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSettings {
    /// Tunnel client binary, looked up on `PATH` unless absolute.
    pub binary: String,
    /// Client configuration holding the persistent tunnel's hostname.
    pub config_path: PathBuf,
    /// Script registering and starting the persistent tunnel.
    pub setup_script: PathBuf,
    /// Service-manager label of the persistent tunnel unit.
    pub label: String,
    /// How long to wait for an ephemeral tunnel to publish its URL.
    pub url_timeout: Duration,
    /// Grace period between SIGTERM and SIGKILL.
    pub shutdown_timeout: Duration,
}

impl TunnelSettings {
    /// Derives settings from configuration for a backend under `working_dir`.
    pub fn from_config(config: &Config, working_dir: &std::path::Path) -> Self {
        Self {
            binary: config.tunnel_binary().to_owned(),
            config_path: config.tunnel_config().into_std_path_buf(),
            setup_script: config.tunnel_setup_script(working_dir),
            label: config.tunnel_label().to_owned(),
            url_timeout: config.tunnel_timeout(),
            shutdown_timeout: config.shutdown_timeout(),
        }
    }
}

/// What keeps a tunnel alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelProcess {
    /// A tunnel client spawned by this program.
    Pid(u32),
    /// A service-manager unit.
    Unit(String),
}

/// A started tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelHandle {
    /// Process or unit running the tunnel.
    pub process: TunnelProcess,
    /// Public URL forwarding to the backend.
    pub url: String,
    /// File receiving the client's output.
    pub log_path: PathBuf,
}

/// Liveness of the tunnel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TunnelStatus {
    /// Process or unit running the tunnel, `None` when not running.
    pub process: Option<TunnelProcess>,
    /// PID of the client, when known.
    pub pid: Option<u32>,
    /// Persisted public URL.
    pub url: Option<String>,
}

impl TunnelStatus {
    /// Returns true when a live tunnel was found.
    pub const fn is_running(&self) -> bool {
        self.process.is_some()
    }
}

/// Result of stopping a tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelStopOutcome {
    /// Process or unit that was stopped.
    pub process: TunnelProcess,
    /// Whether SIGKILL was needed.
    pub forced: bool,
}

/// Starts, stops, and inspects the tunnel for one working directory.
#[derive(Debug, Clone)]
pub struct TunnelController {
    paths: ServicePaths,
    settings: TunnelSettings,
    manager: Option<ServiceManager>,
}

impl TunnelController {
    /// Builds a controller; `manager` is needed only for persistent tunnels.
    pub fn new(
        paths: ServicePaths,
        settings: TunnelSettings,
        manager: Option<ServiceManager>,
    ) -> Self {
        Self {
            paths,
            settings,
            manager,
        }
    }

    /// Brings up a tunnel to `port`; returns `None` for [`TunnelMode::None`].
    pub fn start(&self, mode: TunnelMode, port: u16) -> Result<Option<TunnelHandle>, ServiceError> {
        if !mode.is_enabled() {
            return Ok(None);
        }
        if let Some(pid) = self.status()?.pid {
            return Err(ServiceError::AlreadyRunning { pid });
        }
        let handle = match mode {
            TunnelMode::Ephemeral => ephemeral::start(&self.paths, &self.settings, port)?,
            TunnelMode::Persistent => {
                persistent::start(&self.paths, &self.settings, self.manager.as_ref(), port)?
            }
            TunnelMode::None => return Ok(None),
        };
        info!(target: TUNNEL_TARGET, url = %handle.url, ?mode, "tunnel ready");
        Ok(Some(handle))
    }

    /// Stops whichever tunnel is running.
    pub fn stop(&self) -> Result<TunnelStopOutcome, ServiceError> {
        if let Some(pid) = self.recorded_pid()? {
            if process::is_alive(pid)? {
                let termination = process::terminate(pid, self.settings.shutdown_timeout);
                self.clear_state()?;
                let termination = termination?;
                info!(target: TUNNEL_TARGET, pid, ?termination, "tunnel stopped");
                return Ok(TunnelStopOutcome {
                    process: TunnelProcess::Pid(pid),
                    forced: termination.was_forced(),
                });
            }
            warn!(target: TUNNEL_TARGET, pid, "removing stale tunnel pid file");
            self.clear_state()?;
        }
        if let Some(manager) = self.installed_manager() {
            if manager.pid_of(&self.settings.label)?.is_some() {
                manager.unload(&self.settings.label)?;
                remove_file(self.paths.tunnel_url_path())?;
                info!(target: TUNNEL_TARGET, label = %self.settings.label, "tunnel unit unloaded");
                return Ok(TunnelStopOutcome {
                    process: TunnelProcess::Unit(self.settings.label.clone()),
                    forced: false,
                });
            }
        }
        remove_file(self.paths.tunnel_url_path())?;
        Err(ServiceError::NotRunning)
    }

    /// Reports tunnel liveness, removing stale state as a side effect.
    pub fn status(&self) -> Result<TunnelStatus, ServiceError> {
        if let Some(pid) = self.recorded_pid()? {
            if process::is_alive(pid)? {
                return Ok(TunnelStatus {
                    process: Some(TunnelProcess::Pid(pid)),
                    pid: Some(pid),
                    url: read_text(self.paths.tunnel_url_path())?,
                });
            }
            warn!(target: TUNNEL_TARGET, pid, "removing stale tunnel pid file");
            self.clear_state()?;
        }
        if let Some(manager) = self.installed_manager() {
            if let Some(pid) = manager.pid_of(&self.settings.label)? {
                return Ok(TunnelStatus {
                    process: Some(TunnelProcess::Unit(self.settings.label.clone())),
                    pid: Some(pid),
                    url: read_text(self.paths.tunnel_url_path())?,
                });
            }
        }
        if self.paths.tunnel_url_path().exists() {
            warn!(target: TUNNEL_TARGET, "removing url of a tunnel that is not running");
            remove_file(self.paths.tunnel_url_path())?;
        }
        Ok(TunnelStatus::default())
    }

    /// Service manager, if the persistent tunnel unit is installed.
    fn installed_manager(&self) -> Option<&ServiceManager> {
        self.manager
            .as_ref()
            .filter(|manager| manager.is_installed(&self.settings.label))
    }

    fn recorded_pid(&self) -> Result<Option<u32>, ServiceError> {
        match read_value::<u32>(self.paths.tunnel_pid_path()) {
            Ok(pid) => Ok(pid),
            Err(ServiceError::StateParse { .. }) => {
                self.clear_state()?;
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    fn clear_state(&self) -> Result<(), ServiceError> {
        remove_file(self.paths.tunnel_pid_path())?;
        remove_file(self.paths.tunnel_url_path())
    }
}

#[cfg(all(test, unix))]
mod tests;
