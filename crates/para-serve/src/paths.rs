//! Derives and exposes the artefact paths kept under the working directory.

use std::path::{Path, PathBuf};

const VENV_DIR: &str = "venv";
const LOG_DIR: &str = "logs";

/// Canonical locations of every file the supervisor reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePaths {
    working_dir: PathBuf,
    venv_dir: PathBuf,
    pid_path: PathBuf,
    port_path: PathBuf,
    tunnel_pid_path: PathBuf,
    tunnel_url_path: PathBuf,
    log_dir: PathBuf,
    server_log: PathBuf,
    tunnel_log: PathBuf,
}

impl ServicePaths {
    /// Lays out artefact paths beneath `working_dir`. Nothing is created.
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        let working_dir = working_dir.into();
        let log_dir = working_dir.join(LOG_DIR);
        Self {
            venv_dir: working_dir.join(VENV_DIR),
            pid_path: working_dir.join("server.pid"),
            port_path: working_dir.join("server.port"),
            tunnel_pid_path: working_dir.join("tunnel.pid"),
            tunnel_url_path: working_dir.join("tunnel.url"),
            server_log: log_dir.join("server.log"),
            tunnel_log: log_dir.join("tunnel.log"),
            log_dir,
            working_dir,
        }
    }

    /// Directory the backend runs in.
    pub fn working_dir(&self) -> &Path {
        self.working_dir.as_path()
    }

    /// Isolated dependency environment.
    pub fn venv_dir(&self) -> &Path {
        self.venv_dir.as_path()
    }

    /// Interpreter inside the dependency environment.
    pub fn venv_python(&self) -> PathBuf {
        if cfg!(windows) {
            self.venv_dir.join("Scripts").join("python.exe")
        } else {
            self.venv_dir.join("bin").join("python")
        }
    }

    /// Backend PID file.
    pub fn pid_path(&self) -> &Path {
        self.pid_path.as_path()
    }

    /// Port recorded when the backend was started.
    pub fn port_path(&self) -> &Path {
        self.port_path.as_path()
    }

    /// Ephemeral tunnel PID file.
    pub fn tunnel_pid_path(&self) -> &Path {
        self.tunnel_pid_path.as_path()
    }

    /// Discovered public URL.
    pub fn tunnel_url_path(&self) -> &Path {
        self.tunnel_url_path.as_path()
    }

    /// Directory holding both logs.
    pub fn log_dir(&self) -> &Path {
        self.log_dir.as_path()
    }

    /// Backend output log.
    pub fn server_log(&self) -> &Path {
        self.server_log.as_path()
    }

    /// Tunnel output log.
    pub fn tunnel_log(&self) -> &Path {
        self.tunnel_log.as_path()
    }
}
