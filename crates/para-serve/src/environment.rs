//! Locates the backend's working directory and describes how to launch it.
//!
//! Resolution never fails: when no candidate holds a provisioned dependency
//! environment the first candidate is returned verbatim so that `setup` and
//! diagnostics always have a concrete path to act on.

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use para_serve_config::Config;
use serde::Serialize;
use tracing::debug;

use crate::paths::ServicePaths;

const ENVIRONMENT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::environment");

/// Directory name the backend is checked out or installed under.
pub const PROJECT_DIR: &str = "para-mcp";

/// Conventional developer checkouts, relative to the home directory.
const DEVELOPER_ROOTS: &[&str] = &["code", "Developer", "projects"];

/// Variables forwarded verbatim to the backend when set in the caller's environment.
pub const FORWARDED_ENV_VARS: &[&str] = &["PARA_HOME", "PARA_ARCHIVE", "PARA_CLI_PATH"];

/// Where a candidate directory came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    /// Explicit configuration override.
    Override,
    /// Relative to the running executable.
    Executable,
    /// Conventional developer location under the home directory.
    Developer,
    /// The process's current directory.
    CurrentDir,
    /// Standard per-user installation directory.
    Installed,
}

impl fmt::Display for CandidateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Override => f.write_str("override"),
            Self::Executable => f.write_str("executable"),
            Self::Developer => f.write_str("developer"),
            Self::CurrentDir => f.write_str("current-dir"),
            Self::Installed => f.write_str("installed"),
        }
    }
}

/// A directory considered during resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    /// Origin of the candidate.
    pub source: CandidateSource,
    /// Directory examined.
    pub path: PathBuf,
}

/// Ambient inputs the candidate list is derived from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmbientLocations {
    /// Explicit override from configuration.
    pub override_dir: Option<PathBuf>,
    /// Directory containing the running executable.
    pub executable_dir: Option<PathBuf>,
    /// User home directory.
    pub home_dir: Option<PathBuf>,
    /// Current working directory.
    pub current_dir: Option<PathBuf>,
    /// Per-user data directory.
    pub data_dir: Option<PathBuf>,
}

impl AmbientLocations {
    /// Reads the ambient locations of the current process.
    pub fn detect(config: &Config) -> Self {
        Self {
            override_dir: config.working_dir().map(|dir| dir.as_std_path().to_path_buf()),
            executable_dir: env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf)),
            home_dir: dirs::home_dir(),
            current_dir: env::current_dir().ok(),
            data_dir: dirs::data_dir(),
        }
    }

    /// Expands the locations into the ordered candidate list.
    pub fn candidates(&self) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        let mut push = |source, path: PathBuf| candidates.push(Candidate { source, path });
        if let Some(dir) = &self.override_dir {
            push(CandidateSource::Override, dir.clone());
        }
        if let Some(dir) = &self.executable_dir {
            if let Some(parent) = dir.parent() {
                push(CandidateSource::Executable, parent.join(PROJECT_DIR));
            }
            push(CandidateSource::Executable, dir.join(PROJECT_DIR));
        }
        if let Some(home) = &self.home_dir {
            for root in DEVELOPER_ROOTS {
                push(CandidateSource::Developer, home.join(root).join(PROJECT_DIR));
            }
        }
        if let Some(dir) = &self.current_dir {
            push(CandidateSource::CurrentDir, dir.clone());
        }
        if let Some(dir) = &self.data_dir {
            push(CandidateSource::Installed, dir.join(PROJECT_DIR));
        }
        candidates
    }
}

/// Outcome of walking the candidate list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    /// Selected working directory.
    pub working_dir: PathBuf,
    /// Whether the selected directory holds a dependency environment.
    pub qualified: bool,
    /// Every candidate, in the order examined.
    pub candidates: Vec<Candidate>,
}

/// Walks an ordered candidate list to find the working directory.
#[derive(Debug, Clone)]
pub struct EnvironmentResolver {
    candidates: Vec<Candidate>,
}

impl EnvironmentResolver {
    /// Builds a resolver over the ambient locations of this process.
    pub fn from_config(config: &Config) -> Self {
        Self::from_locations(&AmbientLocations::detect(config))
    }

    /// Builds a resolver over explicit locations.
    pub fn from_locations(locations: &AmbientLocations) -> Self {
        Self::with_candidates(locations.candidates())
    }

    /// Builds a resolver over an explicit candidate list.
    pub fn with_candidates(candidates: Vec<Candidate>) -> Self {
        Self { candidates }
    }

    /// Candidates in resolution order.
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Returns the first candidate holding a dependency environment, falling
    /// back to the first candidate.
    pub fn resolve(&self) -> Resolution {
        let qualified = self
            .candidates
            .iter()
            .find(|candidate| has_environment(&candidate.path));
        let (working_dir, qualified) = match (qualified, self.candidates.first()) {
            (Some(candidate), _) => (candidate.path.clone(), true),
            (None, Some(first)) => (first.path.clone(), false),
            (None, None) => (PathBuf::from("."), false),
        };
        debug!(
            target: ENVIRONMENT_TARGET,
            dir = %working_dir.display(),
            qualified,
            examined = self.candidates.len(),
            "resolved working directory"
        );
        Resolution {
            working_dir,
            qualified,
            candidates: self.candidates.clone(),
        }
    }
}

/// Whether `dir` holds a provisioned dependency environment.
pub fn has_environment(dir: &Path) -> bool {
    ServicePaths::new(dir).venv_dir().is_dir()
}

/// Everything needed to launch the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    paths: ServicePaths,
    program: PathBuf,
    arguments: Vec<String>,
    port: u16,
    environment: BTreeMap<String, String>,
}

impl ServiceDescriptor {
    /// Describes the backend under `working_dir` with the ambient overrides
    /// from [`FORWARDED_ENV_VARS`].
    pub fn new(working_dir: impl Into<PathBuf>, port: u16) -> Self {
        let forwarded = FORWARDED_ENV_VARS
            .iter()
            .filter_map(|key| env::var(key).ok().map(|value| ((*key).to_owned(), value)))
            .collect();
        Self::with_environment(working_dir, port, forwarded)
    }

    /// Describes the backend with explicit environment overrides.
    pub fn with_environment(
        working_dir: impl Into<PathBuf>,
        port: u16,
        environment: BTreeMap<String, String>,
    ) -> Self {
        let paths = ServicePaths::new(working_dir);
        Self {
            program: paths.venv_python(),
            arguments: vec![String::from("-m"), String::from("src.server")],
            paths,
            port,
            environment,
        }
    }

    /// Artefact paths under the working directory.
    pub fn paths(&self) -> &ServicePaths {
        &self.paths
    }

    /// Working directory.
    pub fn working_dir(&self) -> &Path {
        self.paths.working_dir()
    }

    /// Interpreter inside the dependency environment.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Entry-point arguments.
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// Port the backend listens on unless a start request overrides it.
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Variables injected into the backend when listening on `port`.
    ///
    /// `PORT` and `USE_HTTP` are always set; they cannot be overridden by the
    /// forwarded variables.
    pub fn environment_for(&self, port: u16) -> BTreeMap<String, String> {
        let mut environment = self.environment.clone();
        environment.insert(String::from("PORT"), port.to_string());
        environment.insert(String::from("USE_HTTP"), String::from("true"));
        environment
    }
}
