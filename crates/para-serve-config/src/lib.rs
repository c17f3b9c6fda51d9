//! Layered configuration shared by the `para-serve` library and CLI.
//!
//! Values are merged from built-in defaults, an optional configuration file,
//! `PARA_SERVE_*` environment variables, and command-line flags, in that
//! order of increasing precedence.

mod defaults;
mod logging;
mod modes;

use std::path::{Path, PathBuf};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_LOG_FILTER, DEFAULT_PORT, DEFAULT_PYTHON, DEFAULT_SERVICE_LABEL,
    DEFAULT_SHUTDOWN_TIMEOUT_MS, DEFAULT_TUNNEL_BINARY, DEFAULT_TUNNEL_LABEL,
    DEFAULT_TUNNEL_SETUP_SCRIPT, DEFAULT_TUNNEL_TIMEOUT_MS, default_log_filter,
    default_log_filter_string, default_log_format, default_tunnel_config,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use modes::{ModeParseError, SupervisionKind, TunnelMode};

/// Runtime configuration for the service supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "PARA_SERVE")]
pub struct Config {
    /// Explicit working directory, examined before every other candidate.
    #[serde(default)]
    pub working_dir: Option<Utf8PathBuf>,
    /// Port the backend listens on.
    #[serde(default = "defaults::default_port")]
    pub port: u16,
    /// Tunnel started alongside the backend.
    #[serde(default)]
    pub tunnel_mode: TunnelMode,
    /// Strategy used to supervise the backend.
    #[serde(default)]
    pub supervision: SupervisionKind,
    /// Interpreter used to create the virtual environment.
    #[serde(default = "defaults::default_python")]
    pub python: String,
    /// Tunnel client binary name or path.
    #[serde(default = "defaults::default_tunnel_binary")]
    pub tunnel_binary: String,
    /// cloudflared configuration read for the persistent hostname.
    #[serde(default)]
    pub tunnel_config: Option<Utf8PathBuf>,
    /// Script that registers and loads the persistent tunnel.
    #[serde(default)]
    pub tunnel_setup_script: Option<Utf8PathBuf>,
    /// Service-manager label for the backend.
    #[serde(default = "defaults::default_service_label")]
    pub service_label: String,
    /// Service-manager label for the persistent tunnel.
    #[serde(default = "defaults::default_tunnel_label")]
    pub tunnel_label: String,
    /// Grace period before a stopping process is killed.
    #[serde(default = "defaults::default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    /// Deadline for ephemeral tunnel URL discovery.
    #[serde(default = "defaults::default_tunnel_timeout_ms")]
    pub tunnel_timeout_ms: u64,
    /// `tracing` filter expression.
    #[serde(default = "defaults::default_log_filter_string")]
    pub log_filter: String,
    /// Log output format.
    #[serde(default = "defaults::default_log_format")]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            working_dir: None,
            port: DEFAULT_PORT,
            tunnel_mode: TunnelMode::default(),
            supervision: SupervisionKind::default(),
            python: defaults::default_python(),
            tunnel_binary: defaults::default_tunnel_binary(),
            tunnel_config: None,
            tunnel_setup_script: None,
            service_label: defaults::default_service_label(),
            tunnel_label: defaults::default_tunnel_label(),
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            tunnel_timeout_ms: DEFAULT_TUNNEL_TIMEOUT_MS,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Explicit working directory override, if configured.
    pub fn working_dir(&self) -> Option<&Utf8Path> {
        self.working_dir.as_deref()
    }

    /// Port the backend listens on.
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Configured tunnel mode.
    pub const fn tunnel_mode(&self) -> TunnelMode {
        self.tunnel_mode
    }

    /// Configured supervision strategy.
    pub const fn supervision(&self) -> SupervisionKind {
        self.supervision
    }

    /// Interpreter used during setup.
    pub fn python(&self) -> &str {
        &self.python
    }

    /// Tunnel client binary.
    pub fn tunnel_binary(&self) -> &str {
        &self.tunnel_binary
    }

    /// cloudflared configuration path, falling back to `~/.cloudflared/config.yml`.
    pub fn tunnel_config(&self) -> Utf8PathBuf {
        self.tunnel_config
            .clone()
            .unwrap_or_else(default_tunnel_config)
    }

    /// Persistent tunnel setup script, relative paths resolved against `working_dir`.
    pub fn tunnel_setup_script(&self, working_dir: &Path) -> PathBuf {
        let script = self
            .tunnel_setup_script
            .clone()
            .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_TUNNEL_SETUP_SCRIPT))
            .into_std_path_buf();
        if script.is_absolute() {
            script
        } else {
            working_dir.join(script)
        }
    }

    /// Service-manager label for the backend.
    pub fn service_label(&self) -> &str {
        &self.service_label
    }

    /// Service-manager label for the persistent tunnel.
    pub fn tunnel_label(&self) -> &str {
        &self.tunnel_label
    }

    /// Grace period before a stopping process is killed.
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Deadline for ephemeral tunnel URL discovery.
    pub const fn tunnel_timeout(&self) -> Duration {
        Duration::from_millis(self.tunnel_timeout_ms)
    }

    /// `tracing` filter expression.
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}
