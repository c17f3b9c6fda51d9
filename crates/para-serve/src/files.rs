//! Plain-text state files holding one value each.

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::str::FromStr;

use tempfile::Builder;
use tracing::debug;

use crate::error::ServiceError;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

const FILES_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::files");

/// Writes the provided bytes to the path using an atomic persist step.
///
/// Data is flushed and fsync'd before the temporary file is renamed into
/// place so readers never observe a partially written payload.
pub(crate) fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let directory = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            "target path did not have a parent directory",
        )
    })?;

    let mut builder = Builder::new();
    builder.prefix(
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("para-serve"),
    );
    #[cfg(unix)]
    {
        use std::fs::Permissions;
        builder.permissions(Permissions::from_mode(0o600));
    }

    let mut file = builder.tempfile_in(directory)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|error| error.error)?;
    Ok(())
}

/// Persists a single value followed by a newline.
pub(crate) fn write_value(path: &Path, value: impl std::fmt::Display) -> Result<(), ServiceError> {
    atomic_write(path, format!("{value}\n").as_bytes()).map_err(|source| {
        ServiceError::StateWrite {
            path: path.to_path_buf(),
            source,
        }
    })?;
    debug!(target: FILES_TARGET, file = %path.display(), "state file written");
    Ok(())
}

/// Reads a trimmed value, returning `None` if the file is missing or empty.
pub(crate) fn read_text(path: &Path) -> Result<Option<String>, ServiceError> {
    match fs::read_to_string(path) {
        Ok(content) => {
            let trimmed = content.trim();
            if trimmed.is_empty() {
                Ok(None)
            } else {
                Ok(Some(trimmed.to_owned()))
            }
        }
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ServiceError::StateRead {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Reads and parses a value such as a PID or port.
pub(crate) fn read_value<T: FromStr>(path: &Path) -> Result<Option<T>, ServiceError> {
    let Some(text) = read_text(path)? else {
        return Ok(None);
    };
    text.parse::<T>()
        .map(Some)
        .map_err(|_| ServiceError::StateParse {
            path: path.to_path_buf(),
            value: text,
        })
}

/// Removes a file, treating absence as success.
pub(crate) fn remove_file(path: &Path) -> Result<(), ServiceError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(ServiceError::Cleanup {
            path: path.to_path_buf(),
            source,
        }),
    }
}
