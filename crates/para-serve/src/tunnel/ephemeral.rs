//! Quick tunnels with a random `trycloudflare.com` URL.

use std::collections::BTreeMap;
use std::ffi::OsString;

use tracing::{info, warn};

use crate::error::ServiceError;
use crate::files::{remove_file, write_value};
use crate::paths::ServicePaths;
use crate::process::{self, OutputTarget, SpawnRequest};

use super::discovery::{DISCOVERY_INTERVAL, ProcessLog, SystemClock, discover_url};
use super::{TUNNEL_TARGET, TunnelHandle, TunnelProcess, TunnelSettings};

/// Arguments requesting a quick tunnel to `port`.
pub(super) fn client_arguments(port: u16) -> Vec<String> {
    vec![
        String::from("tunnel"),
        String::from("--no-autoupdate"),
        String::from("--url"),
        format!("http://localhost:{port}"),
    ]
}

pub(super) fn start(
    paths: &ServicePaths,
    settings: &TunnelSettings,
    port: u16,
) -> Result<TunnelHandle, ServiceError> {
    let binary = which::which(&settings.binary).map_err(|_| ServiceError::TunnelBinaryNotFound {
        binary: settings.binary.clone(),
    })?;
    // Truncating the log keeps a previous run's URL from being rediscovered.
    let request = SpawnRequest {
        program: binary.into_os_string(),
        arguments: client_arguments(port).into_iter().map(OsString::from).collect(),
        working_dir: paths.working_dir().to_path_buf(),
        environment: BTreeMap::new(),
        output: OutputTarget::Truncate(paths.tunnel_log().to_path_buf()),
        detach: true,
    };
    let pid = process::spawn_detached(&request)?;
    write_value(paths.tunnel_pid_path(), pid)?;
    info!(target: TUNNEL_TARGET, pid, port, "waiting for quick tunnel url");

    let mut log = ProcessLog::new(paths.tunnel_log(), pid);
    match discover_url(&mut log, &SystemClock, settings.url_timeout, DISCOVERY_INTERVAL) {
        Ok(url) => {
            write_value(paths.tunnel_url_path(), &url)?;
            Ok(TunnelHandle {
                process: TunnelProcess::Pid(pid),
                url,
                log_path: paths.tunnel_log().to_path_buf(),
            })
        }
        Err(error) => {
            if let Err(stop_error) = process::terminate(pid, settings.shutdown_timeout) {
                warn!(target: TUNNEL_TARGET, pid, %stop_error, "failed to stop tunnel client");
            }
            remove_file(paths.tunnel_pid_path())?;
            Err(error)
        }
    }
}
