//! Bounded polling for the public URL a quick tunnel prints to its log.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;
use tracing::debug;

use crate::error::ServiceError;
use crate::process;

use super::TUNNEL_TARGET;

/// Interval between reads of the tunnel log.
pub const DISCOVERY_INTERVAL: Duration = Duration::from_millis(500);

/// Host that quick tunnels are requested from; it appears in logs but is
/// never the assigned URL.
const API_URL: &str = "https://api.trycloudflare.com";

static QUICK_TUNNEL_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://[a-z0-9-]+\.trycloudflare\.com")
        .expect("Quick tunnel URL pattern is valid")
});

/// Source of time for the discovery loop.
pub trait Clock {
    /// Current instant.
    fn now(&self) -> Instant;
    /// Blocks for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// The tunnel's output together with the liveness of the process writing it.
pub trait LogSource {
    /// Everything logged so far.
    fn contents(&mut self) -> Result<String, ServiceError>;
    /// Whether the process writing the log is still running.
    fn producer_alive(&mut self) -> Result<bool, ServiceError>;
}

/// Reads a log file written by a tracked process.
#[derive(Debug, Clone)]
pub struct ProcessLog {
    path: PathBuf,
    pid: u32,
}

impl ProcessLog {
    /// Watches `path`, written by `pid`.
    pub fn new(path: impl Into<PathBuf>, pid: u32) -> Self {
        Self {
            path: path.into(),
            pid,
        }
    }
}

impl LogSource for ProcessLog {
    fn contents(&mut self) -> Result<String, ServiceError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(source) => Err(ServiceError::LogRead {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn producer_alive(&mut self) -> Result<bool, ServiceError> {
        process::is_alive(self.pid)
    }
}

/// Returns the first quick-tunnel URL in `text`.
pub fn find_url(text: &str) -> Option<&str> {
    QUICK_TUNNEL_URL
        .find_iter(text)
        .map(|found| found.as_str())
        .find(|url| *url != API_URL)
}

/// Polls `source` every `interval` until a URL appears, the producer exits,
/// or `timeout` elapses.
pub fn discover_url(
    source: &mut dyn LogSource,
    clock: &dyn Clock,
    timeout: Duration,
    interval: Duration,
) -> Result<String, ServiceError> {
    let deadline = clock.now() + timeout;
    loop {
        if let Some(url) = find_url(&source.contents()?) {
            debug!(target: TUNNEL_TARGET, %url, "tunnel url discovered");
            return Ok(url.to_owned());
        }
        if !source.producer_alive()? {
            // The process may have flushed its URL just before exiting.
            if let Some(url) = find_url(&source.contents()?) {
                return Ok(url.to_owned());
            }
            return Err(ServiceError::TunnelUrlNotFound {
                reason: String::from("tunnel process exited before publishing a URL"),
            });
        }
        let now = clock.now();
        if now >= deadline {
            return Err(ServiceError::TunnelUrlNotFound {
                reason: format!("no URL appeared within {} ms", timeout.as_millis()),
            });
        }
        clock.sleep(interval.min(deadline - now));
    }
}
