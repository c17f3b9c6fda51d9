use camino::Utf8PathBuf;

use crate::logging::LogFormat;

/// Port the backend listens on unless overridden.
pub const DEFAULT_PORT: u16 = 8000;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Interpreter used to provision the backend's virtual environment.
pub const DEFAULT_PYTHON: &str = "python3";

/// Tunnel client binary.
pub const DEFAULT_TUNNEL_BINARY: &str = "cloudflared";

/// Service-manager label for the backend unit.
pub const DEFAULT_SERVICE_LABEL: &str = "com.para-mcp.server";

/// Service-manager label for the persistent tunnel unit.
pub const DEFAULT_TUNNEL_LABEL: &str = "com.para-mcp.tunnel";

/// Script, relative to the working directory, that registers the persistent tunnel.
pub const DEFAULT_TUNNEL_SETUP_SCRIPT: &str = "scripts/setup-tunnel.sh";

/// Grace period between SIGTERM and SIGKILL.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;

/// Upper bound on waiting for an ephemeral tunnel to publish its URL.
pub const DEFAULT_TUNNEL_TIMEOUT_MS: u64 = 30_000;

/// Default log filter expression used by the binaries.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
pub fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

pub(crate) fn default_port() -> u16 {
    DEFAULT_PORT
}

pub(crate) fn default_python() -> String {
    DEFAULT_PYTHON.to_owned()
}

pub(crate) fn default_tunnel_binary() -> String {
    DEFAULT_TUNNEL_BINARY.to_owned()
}

pub(crate) fn default_service_label() -> String {
    DEFAULT_SERVICE_LABEL.to_owned()
}

pub(crate) fn default_tunnel_label() -> String {
    DEFAULT_TUNNEL_LABEL.to_owned()
}

pub(crate) fn default_shutdown_timeout_ms() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_MS
}

pub(crate) fn default_tunnel_timeout_ms() -> u64 {
    DEFAULT_TUNNEL_TIMEOUT_MS
}

/// Location of the cloudflared configuration holding the named tunnel's hostname.
pub fn default_tunnel_config() -> Utf8PathBuf {
    let mut path = dirs::home_dir()
        .and_then(|home| Utf8PathBuf::from_path_buf(home).ok())
        .unwrap_or_else(|| Utf8PathBuf::from("~"));
    path.push(".cloudflared");
    path.push("config.yml");
    path
}
