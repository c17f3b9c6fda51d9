//! Provisions the backend's dependency environment.

use std::path::Path;
use std::process::Command;

use tracing::{info, warn};

use crate::error::ServiceError;
use crate::paths::ServicePaths;

use super::SUPERVISOR_TARGET;

/// Number of trailing stderr lines kept when an install step fails.
const STDERR_TAIL_LINES: usize = 20;

/// Creates `venv` when absent and installs the declared dependencies.
pub(crate) fn provision(python: &str, paths: &ServicePaths) -> Result<(), ServiceError> {
    let interpreter = which::which(python).map_err(|_| ServiceError::RuntimeNotFound {
        program: python.to_owned(),
    })?;

    if paths.venv_dir().is_dir() {
        info!(
            target: SUPERVISOR_TARGET,
            venv = %paths.venv_dir().display(),
            "dependency environment already present"
        );
    } else {
        info!(
            target: SUPERVISOR_TARGET,
            interpreter = %interpreter.display(),
            dir = %paths.working_dir().display(),
            "creating dependency environment"
        );
        run_step(
            &interpreter,
            &["-m", "venv", "venv"],
            paths.working_dir(),
        )?;
    }

    let requirements = paths.working_dir().join("requirements.txt");
    let pyproject = paths.working_dir().join("pyproject.toml");
    let install: &[&str] = if requirements.is_file() {
        &["-m", "pip", "install", "-r", "requirements.txt"]
    } else if pyproject.is_file() {
        &["-m", "pip", "install", "-e", "."]
    } else {
        warn!(
            target: SUPERVISOR_TARGET,
            dir = %paths.working_dir().display(),
            "no requirements.txt or pyproject.toml; skipping dependency install"
        );
        return Ok(());
    };
    run_step(&paths.venv_python(), install, paths.working_dir())?;
    info!(target: SUPERVISOR_TARGET, "dependencies installed");
    Ok(())
}

fn run_step(program: &Path, arguments: &[&str], dir: &Path) -> Result<(), ServiceError> {
    let output = Command::new(program)
        .args(arguments)
        .current_dir(dir)
        .output()
        .map_err(|source| ServiceError::Spawn {
            program: program.to_string_lossy().into_owned(),
            source,
        })?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(ServiceError::DependencyInstallFailed {
        status: output.status.code(),
        detail: tail_lines(&stderr, STDERR_TAIL_LINES),
    })
}

pub(crate) fn tail_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}
