//! Read access to the backend and tunnel logs.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::error::ServiceError;
use crate::paths::ServicePaths;

/// Upper bound on lines reserved up front; larger tails grow on demand.
const TAIL_PREALLOCATION: usize = 1024;

/// Interval between checks for appended output while following.
pub const FOLLOW_INTERVAL: Duration = Duration::from_millis(250);

/// Which log to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    /// Backend stdout and stderr.
    Server,
    /// Tunnel client output.
    Tunnel,
}

/// Log locations for one working directory.
#[derive(Debug, Clone)]
pub struct LogAccess {
    paths: ServicePaths,
}

impl LogAccess {
    /// Exposes the logs under `paths`.
    pub const fn new(paths: ServicePaths) -> Self {
        Self { paths }
    }

    /// Location of the `kind` log.
    pub fn path(&self, kind: LogKind) -> &Path {
        match kind {
            LogKind::Server => self.paths.server_log(),
            LogKind::Tunnel => self.paths.tunnel_log(),
        }
    }

    /// Last `lines` lines of the log; a missing log has none.
    pub fn tail(&self, kind: LogKind, lines: usize) -> Result<Vec<String>, ServiceError> {
        let path = self.path(kind);
        let Some(file) = open_existing(path)? else {
            return Ok(Vec::new());
        };
        let to_error = |source| ServiceError::LogRead {
            path: path.to_path_buf(),
            source,
        };
        let mut reader = BufReader::new(file);
        let mut window = VecDeque::with_capacity(lines.min(TAIL_PREALLOCATION));
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            if reader.read_until(b'\n', &mut buffer).map_err(to_error)? == 0 {
                break;
            }
            if lines == 0 {
                continue;
            }
            if window.len() == lines {
                window.pop_front();
            }
            let line = String::from_utf8_lossy(&buffer);
            window.push_back(line.trim_end_matches(['\n', '\r']).to_owned());
        }
        Ok(window.into())
    }

    /// Copies output appended after the call to `sink` until `stop` is raised.
    ///
    /// A log that is truncated while being followed is re-read from the start.
    pub fn follow(
        &self,
        kind: LogKind,
        sink: &mut dyn Write,
        stop: &AtomicBool,
    ) -> Result<(), ServiceError> {
        let path = self.path(kind);
        let to_error = |source| ServiceError::LogRead {
            path: path.to_path_buf(),
            source,
        };
        let mut position = match open_existing(path)? {
            Some(file) => file.metadata().map_err(to_error)?.len(),
            None => 0,
        };
        let mut chunk = Vec::new();
        while !stop.load(Ordering::SeqCst) {
            if let Some(mut file) = open_existing(path)? {
                let length = file.metadata().map_err(to_error)?.len();
                if length < position {
                    position = 0;
                }
                if length > position {
                    file.seek(SeekFrom::Start(position)).map_err(to_error)?;
                    chunk.clear();
                    let read = file
                        .take(length - position)
                        .read_to_end(&mut chunk)
                        .map_err(to_error)?;
                    position += read as u64;
                    sink.write_all(&chunk).map_err(to_error)?;
                    sink.flush().map_err(to_error)?;
                }
            }
            thread::sleep(FOLLOW_INTERVAL);
        }
        Ok(())
    }
}

fn open_existing(path: &Path) -> Result<Option<File>, ServiceError> {
    match File::open(path) {
        Ok(file) => Ok(Some(file)),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ServiceError::LogRead {
            path: path.to_path_buf(),
            source,
        }),
    }
}
