//! Combines backend and tunnel liveness into one snapshot.
//!
//! Snapshots are recomputed from OS queries and persisted identifiers on
//! every call and never cached.

use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::supervisor::ProcessStatus;
use crate::tunnel::TunnelStatus;

/// Upper bound on the local listening check.
const CONNECT_TIMEOUT: Duration = Duration::from_millis(200);

/// Point-in-time view of the service and its tunnel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    /// Whether the backend process is alive.
    pub is_running: bool,
    /// Backend PID.
    pub pid: Option<u32>,
    /// Port the backend was started on.
    pub port: Option<u16>,
    /// Local address of the backend.
    #[serde(rename = "localURL")]
    pub local_url: Option<String>,
    /// Public URL; always `None` while the backend is down.
    #[serde(rename = "tunnelURL")]
    pub tunnel_url: Option<String>,
    /// Whether a tunnel process or unit is alive.
    pub tunnel_running: bool,
    /// A tunnel is alive although the backend is not.
    pub tunnel_detached: bool,
    /// Whether a TCP connection to the local port succeeded.
    pub listening: bool,
    /// Backend start time in seconds since the Unix epoch.
    pub started_at: Option<u64>,
}

impl ServiceStatus {
    /// Combines the two component views; `listening` is the connect result.
    pub fn aggregate(process: &ProcessStatus, tunnel: &TunnelStatus, listening: bool) -> Self {
        let is_running = process.is_running();
        let tunnel_running = tunnel.is_running();
        Self {
            is_running,
            pid: process.pid,
            port: process.port.filter(|_| is_running),
            local_url: process.port.filter(|_| is_running).map(local_url),
            tunnel_url: tunnel.url.clone().filter(|_| is_running && tunnel_running),
            tunnel_running,
            tunnel_detached: tunnel_running && !is_running,
            listening: listening && is_running,
            started_at: process.started_at.and_then(epoch_seconds),
        }
    }
}

/// Address of a backend listening on `port`.
pub fn local_url(port: u16) -> String {
    format!("http://localhost:{port}")
}

/// Returns true when something accepts TCP connections on the loopback port.
pub fn port_is_listening(port: u16) -> bool {
    let address = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    TcpStream::connect_timeout(&address, CONNECT_TIMEOUT).is_ok()
}

fn epoch_seconds(time: SystemTime) -> Option<u64> {
    time.duration_since(UNIX_EPOCH)
        .ok()
        .map(|elapsed| elapsed.as_secs())
}
