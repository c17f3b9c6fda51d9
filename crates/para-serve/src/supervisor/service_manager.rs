//! Supervision delegated to launchd or systemd.

use std::thread;
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info};

use crate::environment::ServiceDescriptor;
use crate::error::ServiceError;
use crate::files::{read_value, remove_file, write_value};
use crate::process::{self, POLL_INTERVAL};
use crate::service_manager::{ServiceManager, UnitSpec};

use super::setup::provision;
use super::{ProcessHandle, ProcessStatus, ProcessSupervisor, StopOutcome, SUPERVISOR_TARGET};

/// How long to wait for a freshly loaded unit to report its main PID.
const MAIN_PID_WAIT: Duration = Duration::from_secs(3);

/// Runs the backend as a host service-manager unit.
#[derive(Debug, Clone)]
pub struct ServiceManagerSupervisor {
    descriptor: ServiceDescriptor,
    python: String,
    label: String,
    manager: ServiceManager,
    shutdown_timeout: Duration,
}

impl ServiceManagerSupervisor {
    /// Builds a supervisor for the unit named `label`.
    pub fn new(
        descriptor: ServiceDescriptor,
        python: impl Into<String>,
        label: impl Into<String>,
        manager: ServiceManager,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            descriptor,
            python: python.into(),
            label: label.into(),
            manager,
            shutdown_timeout,
        }
    }

    fn unit_spec(&self, port: u16) -> UnitSpec {
        let paths = self.descriptor.paths();
        UnitSpec {
            label: self.label.clone(),
            program: self.descriptor.program().to_path_buf(),
            arguments: self.descriptor.arguments().to_vec(),
            working_dir: paths.working_dir().to_path_buf(),
            environment: self.descriptor.environment_for(port),
            log_path: paths.server_log().to_path_buf(),
        }
    }

    fn await_main_pid(&self) -> Result<u32, ServiceError> {
        let deadline = Instant::now() + MAIN_PID_WAIT;
        loop {
            if let Some(pid) = self.manager.pid_of(&self.label)? {
                return Ok(pid);
            }
            if Instant::now() >= deadline {
                return Err(ServiceError::ServiceManager {
                    command: format!("pid query for '{}'", self.label),
                    detail: String::from("unit reported no main pid after loading"),
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl ProcessSupervisor for ServiceManagerSupervisor {
    fn is_ready(&self) -> bool {
        self.descriptor.paths().venv_dir().is_dir()
    }

    fn setup(&self) -> Result<(), ServiceError> {
        provision(&self.python, self.descriptor.paths())?;
        std::fs::create_dir_all(self.descriptor.paths().log_dir()).map_err(|source| {
            ServiceError::LogPrepare {
                path: self.descriptor.paths().log_dir().to_path_buf(),
                source,
            }
        })?;
        self.manager.install(&self.unit_spec(self.descriptor.port()))?;
        Ok(())
    }

    fn start(&self, port: u16, background: bool) -> Result<ProcessHandle, ServiceError> {
        if let Some(pid) = self.manager.pid_of(&self.label)? {
            return Err(ServiceError::AlreadyRunning { pid });
        }
        let paths = self.descriptor.paths();
        if !self.is_ready() {
            return Err(ServiceError::EnvironmentNotSetup {
                path: paths.venv_dir().to_path_buf(),
            });
        }
        if !self.manager.is_installed(&self.label) {
            return Err(ServiceError::ServiceUnitNotInstalled {
                label: self.label.clone(),
                path: self.manager.unit_path(&self.label),
            });
        }
        if !background {
            debug!(
                target: SUPERVISOR_TARGET,
                label = %self.label,
                "service-manager units always log to the server log"
            );
        }
        // Rewrite the descriptor so the unit listens on the requested port.
        self.manager.install(&self.unit_spec(port))?;
        self.manager.load(&self.label)?;
        write_value(paths.port_path(), port)?;
        let pid = self.await_main_pid()?;
        info!(target: SUPERVISOR_TARGET, pid, port, label = %self.label, "backend unit loaded");
        Ok(ProcessHandle {
            pid,
            port,
            started_at: Some(SystemTime::now()),
            log_path: Some(paths.server_log().to_path_buf()),
        })
    }

    fn stop(&self) -> Result<StopOutcome, ServiceError> {
        let Some(pid) = self.manager.pid_of(&self.label)? else {
            return Err(ServiceError::NotRunning);
        };
        self.manager.unload(&self.label)?;
        remove_file(self.descriptor.paths().port_path())?;
        let forced = if process::wait_for_exit(pid, self.shutdown_timeout)? {
            false
        } else {
            process::terminate(pid, POLL_INTERVAL)?.was_forced()
        };
        info!(target: SUPERVISOR_TARGET, pid, forced, label = %self.label, "backend unit unloaded");
        Ok(StopOutcome { pid, forced })
    }

    fn status(&self) -> Result<ProcessStatus, ServiceError> {
        let Some(pid) = self.manager.pid_of(&self.label)? else {
            return Ok(ProcessStatus::default());
        };
        let port = match read_value::<u16>(self.descriptor.paths().port_path()) {
            Ok(port) => port,
            Err(ServiceError::StateParse { .. }) => None,
            Err(error) => return Err(error),
        }
        .unwrap_or(self.descriptor.port());
        Ok(ProcessStatus {
            pid: Some(pid),
            port: Some(port),
            started_at: None,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::service_manager::{CommandOutput, ServiceManagerKind};
    use crate::test_support::{BackendScript, MockRunner, ServiceFixture, UNUSED_PID, args};
    use mockall::predicate::{eq, function};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const LABEL: &str = "com.para-mcp.server";

    fn is_show(arguments: &[String]) -> bool {
        arguments.iter().any(|argument| argument == "show")
    }

    fn supervisor(service: &ServiceFixture, runner: MockRunner) -> ServiceManagerSupervisor {
        let manager = ServiceManager::new(
            ServiceManagerKind::Systemd,
            service.unit_dir(),
            Arc::new(runner),
        );
        ServiceManagerSupervisor::new(
            service.descriptor(8000),
            "python3",
            LABEL,
            manager,
            Duration::from_millis(200),
        )
    }

    #[test]
    fn start_without_unit_is_rejected() {
        let service = ServiceFixture::ready(BackendScript::Sleeps);
        let mut runner = MockRunner::new();
        runner
            .expect_run()
            .with(eq("systemctl"), function(is_show))
            .returning(|_, _| Ok(CommandOutput::ok("0\n")));
        let error = supervisor(&service, runner)
            .start(8000, true)
            .expect_err("unit missing");
        assert!(matches!(error, ServiceError::ServiceUnitNotInstalled { ref label, .. } if label == LABEL));
    }

    #[test]
    fn start_reports_live_unit_as_already_running() {
        let service = ServiceFixture::ready(BackendScript::Sleeps);
        let mut runner = MockRunner::new();
        runner
            .expect_run()
            .with(eq("systemctl"), function(is_show))
            .returning(|_, _| Ok(CommandOutput::ok("4242\n")));
        let error = supervisor(&service, runner)
            .start(8000, true)
            .expect_err("already running");
        assert!(matches!(error, ServiceError::AlreadyRunning { pid: 4242 }));
    }

    #[test]
    fn start_rewrites_unit_loads_it_and_reports_main_pid() {
        let service = ServiceFixture::ready(BackendScript::Sleeps);
        service.install_unit(&format!("{LABEL}.service"));
        let queries = Arc::new(AtomicUsize::new(0));
        let mut runner = MockRunner::new();
        let seen = Arc::clone(&queries);
        runner
            .expect_run()
            .with(eq("systemctl"), function(is_show))
            .returning(move |_, _| {
                let reply = if seen.fetch_add(1, Ordering::SeqCst) == 0 { "0" } else { "4321" };
                Ok(CommandOutput::ok(reply))
            });
        runner
            .expect_run()
            .with(eq("systemctl"), eq(args(&["--user", "daemon-reload"])))
            .once()
            .returning(|_, _| Ok(CommandOutput::ok("")));
        runner
            .expect_run()
            .with(
                eq("systemctl"),
                eq(args(&["--user", "enable", "--now", "com.para-mcp.server.service"])),
            )
            .once()
            .returning(|_, _| Ok(CommandOutput::ok("")));

        let handle = supervisor(&service, runner).start(8765, true).expect("start");
        assert_eq!(handle.pid, 4321);
        assert_eq!(handle.port, 8765);
        let unit = std::fs::read_to_string(service.unit_dir().join(format!("{LABEL}.service")))
            .expect("unit written");
        assert!(unit.contains("Environment=\"PORT=8765\""));
        assert_eq!(queries.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stop_of_inactive_unit_is_not_running() {
        let service = ServiceFixture::ready(BackendScript::Sleeps);
        let mut runner = MockRunner::new();
        runner
            .expect_run()
            .with(eq("systemctl"), function(is_show))
            .returning(|_, _| Ok(CommandOutput::ok("0\n")));
        let error = supervisor(&service, runner).stop().expect_err("inactive");
        assert!(error.is_not_running());
    }

    #[test]
    fn stop_unloads_running_unit() {
        let service = ServiceFixture::ready(BackendScript::Sleeps);
        let mut runner = MockRunner::new();
        runner
            .expect_run()
            .with(eq("systemctl"), function(is_show))
            .returning(|_, _| Ok(CommandOutput::ok(UNUSED_PID.to_string())));
        runner
            .expect_run()
            .with(
                eq("systemctl"),
                eq(args(&["--user", "disable", "--now", "com.para-mcp.server.service"])),
            )
            .once()
            .returning(|_, _| Ok(CommandOutput::ok("")));
        let outcome = supervisor(&service, runner).stop().expect("stop");
        assert_eq!(outcome, StopOutcome { pid: UNUSED_PID, forced: false });
    }

    #[test]
    fn status_uses_recorded_port() {
        let service = ServiceFixture::ready(BackendScript::Sleeps);
        std::fs::write(service.paths().port_path(), "9001\n").expect("seed port");
        let mut runner = MockRunner::new();
        runner
            .expect_run()
            .returning(|_, _| Ok(CommandOutput::ok("777\n")));
        let status = supervisor(&service, runner).status().expect("status");
        assert_eq!(status.pid, Some(777));
        assert_eq!(status.port, Some(9001));
    }

    fn live_unit_runner() -> MockRunner {
        let mut runner = MockRunner::new();
        runner
            .expect_run()
            .returning(|_, _| Ok(CommandOutput::ok("777\n")));
        runner
    }

    #[test]
    fn status_falls_back_to_configured_port_when_port_file_is_garbage() {
        let service = ServiceFixture::ready(BackendScript::Sleeps);
        std::fs::write(service.paths().port_path(), "not-a-port\n").expect("seed port");
        let status = supervisor(&service, live_unit_runner()).status().expect("status");
        assert_eq!(status.port, Some(8000));
    }

    #[test]
    fn status_surfaces_unreadable_port_file() {
        let service = ServiceFixture::ready(BackendScript::Sleeps);
        std::fs::create_dir_all(service.paths().port_path()).expect("seed directory");
        let error = supervisor(&service, live_unit_runner())
            .status()
            .expect_err("port path is a directory");
        assert!(matches!(error, ServiceError::StateRead { .. }), "{error:?}");
    }
}
