//! Supervision by spawning the interpreter directly and tracking a PID file.

use std::ffi::OsString;
use std::fs;
use std::time::{Duration, SystemTime};

use tracing::{info, warn};

use crate::environment::ServiceDescriptor;
use crate::error::ServiceError;
use crate::files::{read_value, remove_file, write_value};
use crate::process::{self, OutputTarget, SpawnRequest};

use super::setup::provision;
use super::{ProcessHandle, ProcessStatus, ProcessSupervisor, StopOutcome, SUPERVISOR_TARGET};

/// Spawns the backend as a child of the calling process.
#[derive(Debug, Clone)]
pub struct DirectSupervisor {
    descriptor: ServiceDescriptor,
    python: String,
    shutdown_timeout: Duration,
}

impl DirectSupervisor {
    /// Builds a supervisor for `descriptor`, provisioning with `python` and
    /// allowing `shutdown_timeout` between SIGTERM and SIGKILL.
    pub fn new(
        descriptor: ServiceDescriptor,
        python: impl Into<String>,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            descriptor,
            python: python.into(),
            shutdown_timeout,
        }
    }

    /// PID from the PID file if that process is alive; stale files are removed.
    fn live_pid(&self) -> Result<Option<u32>, ServiceError> {
        let paths = self.descriptor.paths();
        let Some(pid) = read_recorded_pid(paths.pid_path())? else {
            return Ok(None);
        };
        if process::is_alive(pid)? {
            return Ok(Some(pid));
        }
        warn!(
            target: SUPERVISOR_TARGET,
            pid,
            file = %paths.pid_path().display(),
            "removing stale pid file"
        );
        self.clear_state()?;
        Ok(None)
    }

    fn clear_state(&self) -> Result<(), ServiceError> {
        let paths = self.descriptor.paths();
        remove_file(paths.pid_path())?;
        remove_file(paths.port_path())
    }
}

/// Reads the PID file, treating unparsable content as a stale file.
fn read_recorded_pid(path: &std::path::Path) -> Result<Option<u32>, ServiceError> {
    match read_value::<u32>(path) {
        Ok(pid) => Ok(pid),
        Err(ServiceError::StateParse { value, .. }) => {
            warn!(
                target: SUPERVISOR_TARGET,
                file = %path.display(),
                %value,
                "discarding unreadable pid file"
            );
            remove_file(path)?;
            Ok(None)
        }
        Err(error) => Err(error),
    }
}

impl ProcessSupervisor for DirectSupervisor {
    fn is_ready(&self) -> bool {
        self.descriptor.paths().venv_dir().is_dir()
    }

    fn setup(&self) -> Result<(), ServiceError> {
        provision(&self.python, self.descriptor.paths())
    }

    fn start(&self, port: u16, background: bool) -> Result<ProcessHandle, ServiceError> {
        if let Some(pid) = self.live_pid()? {
            return Err(ServiceError::AlreadyRunning { pid });
        }
        let paths = self.descriptor.paths();
        if !self.is_ready() {
            return Err(ServiceError::EnvironmentNotSetup {
                path: paths.venv_dir().to_path_buf(),
            });
        }

        let (output, log_path) = if background {
            let log = paths.server_log().to_path_buf();
            (OutputTarget::Append(log.clone()), Some(log))
        } else {
            (OutputTarget::Inherit, None)
        };
        let request = SpawnRequest {
            program: self.descriptor.program().as_os_str().to_owned(),
            arguments: self
                .descriptor
                .arguments()
                .iter()
                .map(OsString::from)
                .collect(),
            working_dir: paths.working_dir().to_path_buf(),
            environment: self.descriptor.environment_for(port),
            output,
            detach: background,
        };
        let pid = process::spawn_detached(&request)?;
        let started_at = SystemTime::now();
        write_value(paths.pid_path(), pid)?;
        write_value(paths.port_path(), port)?;
        info!(target: SUPERVISOR_TARGET, pid, port, background, "backend started");
        Ok(ProcessHandle {
            pid,
            port,
            started_at: Some(started_at),
            log_path,
        })
    }

    fn stop(&self) -> Result<StopOutcome, ServiceError> {
        let Some(pid) = self.live_pid()? else {
            return Err(ServiceError::NotRunning);
        };
        let termination = process::terminate(pid, self.shutdown_timeout);
        self.clear_state()?;
        let termination = termination?;
        info!(
            target: SUPERVISOR_TARGET,
            pid,
            ?termination,
            "backend stopped"
        );
        Ok(StopOutcome {
            pid,
            forced: termination.was_forced(),
        })
    }

    fn status(&self) -> Result<ProcessStatus, ServiceError> {
        let paths = self.descriptor.paths();
        let Some(pid) = self.live_pid()? else {
            return Ok(ProcessStatus::default());
        };
        let port = match read_value::<u16>(paths.port_path()) {
            Ok(port) => port,
            Err(ServiceError::StateParse { .. }) => None,
            Err(error) => return Err(error),
        };
        let started_at = fs::metadata(paths.pid_path())
            .and_then(|metadata| metadata.modified())
            .ok();
        Ok(ProcessStatus {
            pid: Some(pid),
            port: port.or(Some(self.descriptor.port())),
            started_at,
        })
    }
}
