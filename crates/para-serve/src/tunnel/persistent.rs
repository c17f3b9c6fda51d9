//! Named tunnels with a stable hostname.

use std::fs;
use std::io;
use std::path::Path;
use std::process::Command;

use tracing::{info, warn};

use crate::error::ServiceError;
use crate::files::{read_value, remove_file, write_value};
use crate::paths::ServicePaths;
use crate::process;
use crate::service_manager::ServiceManager;
use crate::supervisor::tail_lines;

use super::{TUNNEL_TARGET, TunnelHandle, TunnelProcess, TunnelSettings};

pub(super) fn start(
    paths: &ServicePaths,
    settings: &TunnelSettings,
    manager: Option<&ServiceManager>,
    port: u16,
) -> Result<TunnelHandle, ServiceError> {
    let installed = manager.filter(|manager| manager.is_installed(&settings.label));
    let process = if let Some(manager) = installed {
        load_unit(manager, &settings.label)?
    } else if settings.setup_script.is_file() {
        run_setup_script(&settings.setup_script, paths, port)?;
        adopt_script_tunnel(paths, settings, manager)?
    } else {
        return Err(ServiceError::TunnelSetupFailed {
            reason: format!(
                "tunnel unit '{}' is not installed and no setup script exists at '{}'",
                settings.label,
                settings.setup_script.display()
            ),
        });
    };

    let hostname = read_hostname(&settings.config_path)?.ok_or_else(|| {
        ServiceError::TunnelUrlNotFound {
            reason: format!(
                "no hostname entry in '{}'",
                settings.config_path.display()
            ),
        }
    })?;
    let url = format!("https://{hostname}");
    write_value(paths.tunnel_url_path(), &url)?;
    Ok(TunnelHandle {
        process,
        url,
        log_path: paths.tunnel_log().to_path_buf(),
    })
}

fn load_unit(manager: &ServiceManager, label: &str) -> Result<TunnelProcess, ServiceError> {
    manager
        .load(label)
        .map_err(|error| ServiceError::TunnelSetupFailed {
            reason: error.to_string(),
        })?;
    info!(target: TUNNEL_TARGET, label, "tunnel unit loaded");
    Ok(TunnelProcess::Unit(label.to_owned()))
}

/// Finds what the setup script left running: either the tunnel unit it
/// installed or the client PID it recorded in `TUNNEL_PID_FILE`.
fn adopt_script_tunnel(
    paths: &ServicePaths,
    settings: &TunnelSettings,
    manager: Option<&ServiceManager>,
) -> Result<TunnelProcess, ServiceError> {
    let installed = manager.filter(|manager| manager.is_installed(&settings.label));
    if let Some(manager) = installed {
        if manager.pid_of(&settings.label)?.is_some() {
            return Ok(TunnelProcess::Unit(settings.label.clone()));
        }
        return load_unit(manager, &settings.label);
    }
    let recorded = match read_value::<u32>(paths.tunnel_pid_path()) {
        Ok(pid) => pid,
        Err(ServiceError::StateParse { .. }) => None,
        Err(error) => return Err(error),
    };
    if let Some(pid) = recorded {
        if process::is_alive(pid)? {
            info!(target: TUNNEL_TARGET, pid, "adopted tunnel client started by setup script");
            return Ok(TunnelProcess::Pid(pid));
        }
        warn!(target: TUNNEL_TARGET, pid, "setup script recorded a client that is not running");
    }
    remove_file(paths.tunnel_pid_path())?;
    Err(ServiceError::TunnelSetupFailed {
        reason: format!(
            "'{}' neither installed tunnel unit '{}' nor recorded a running client in '{}'",
            settings.setup_script.display(),
            settings.label,
            paths.tunnel_pid_path().display()
        ),
    })
}

fn run_setup_script(script: &Path, paths: &ServicePaths, port: u16) -> Result<(), ServiceError> {
    info!(target: TUNNEL_TARGET, script = %script.display(), "running tunnel setup script");
    let output = Command::new(script)
        .current_dir(paths.working_dir())
        .env("PORT", port.to_string())
        .env("TUNNEL_PID_FILE", paths.tunnel_pid_path())
        .output()
        .map_err(|error| ServiceError::TunnelSetupFailed {
            reason: format!("could not run '{}': {error}", script.display()),
        })?;
    if output.status.success() {
        return Ok(());
    }
    Err(ServiceError::TunnelSetupFailed {
        reason: format!(
            "'{}' exited with status {:?}: {}",
            script.display(),
            output.status.code(),
            tail_lines(&String::from_utf8_lossy(&output.stderr), 5)
        ),
    })
}

/// Reads the first `hostname:` entry of a cloudflared configuration file.
fn read_hostname(config: &Path) -> Result<Option<String>, ServiceError> {
    match fs::read_to_string(config) {
        Ok(text) => Ok(parse_hostname(&text)),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ServiceError::StateRead {
            path: config.to_path_buf(),
            source,
        }),
    }
}

pub(super) fn parse_hostname(text: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let entry = line.trim().trim_start_matches('-').trim_start();
        let value = entry.strip_prefix("hostname:")?;
        let value = value.split(" #").next().unwrap_or_default().trim();
        let value = value.trim_matches(|c| c == '"' || c == '\'');
        (!value.is_empty()).then(|| value.to_owned())
    })
}
