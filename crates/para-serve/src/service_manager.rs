//! Adapter over the host service manager: launchd on macOS, systemd user
//! units elsewhere.
//!
//! Commands run through [`CommandRunner`] so tests can substitute canned
//! responses for `launchctl` and `systemctl`.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::ServiceError;
use crate::files::atomic_write;

const SERVICE_MANAGER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::service_manager");

/// Captured result of an external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal.
    pub status: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Builds a successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Returns true for a zero exit code.
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Executes external commands to completion.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `arguments`, capturing its output.
    fn run(&self, program: &str, arguments: &[String]) -> io::Result<CommandOutput>;
}

/// Runs commands with [`std::process::Command`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, arguments: &[String]) -> io::Result<CommandOutput> {
        let output = Command::new(program).args(arguments).output()?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Supported host service managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceManagerKind {
    /// macOS `launchd` agents driven by `launchctl`.
    Launchd,
    /// systemd user units driven by `systemctl --user`.
    Systemd,
}

impl ServiceManagerKind {
    /// Service manager native to the build target.
    pub const fn host() -> Self {
        if cfg!(target_os = "macos") {
            Self::Launchd
        } else {
            Self::Systemd
        }
    }

    /// Per-user directory holding unit descriptors.
    pub fn default_unit_dir(self) -> Option<PathBuf> {
        match self {
            Self::Launchd => dirs::home_dir().map(|home| home.join("Library").join("LaunchAgents")),
            Self::Systemd => dirs::config_dir().map(|config| config.join("systemd").join("user")),
        }
    }

    const fn descriptor_extension(self) -> &'static str {
        match self {
            Self::Launchd => "plist",
            Self::Systemd => "service",
        }
    }
}

/// Description of a unit to install for the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSpec {
    /// Unit label (launchd label or systemd unit stem).
    pub label: String,
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments passed to the executable.
    pub arguments: Vec<String>,
    /// Directory the unit runs in.
    pub working_dir: PathBuf,
    /// Environment injected into the unit.
    pub environment: BTreeMap<String, String>,
    /// File receiving stdout and stderr.
    pub log_path: PathBuf,
}

/// Drives one host service manager.
#[derive(Clone)]
pub struct ServiceManager {
    kind: ServiceManagerKind,
    unit_dir: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for ServiceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceManager")
            .field("kind", &self.kind)
            .field("unit_dir", &self.unit_dir)
            .finish_non_exhaustive()
    }
}

impl ServiceManager {
    /// Builds an adapter over an explicit unit directory.
    pub fn new(
        kind: ServiceManagerKind,
        unit_dir: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            kind,
            unit_dir: unit_dir.into(),
            runner,
        }
    }

    /// Builds an adapter for the host, or `None` if the unit directory cannot
    /// be located.
    pub fn host(runner: Arc<dyn CommandRunner>) -> Option<Self> {
        let kind = ServiceManagerKind::host();
        kind.default_unit_dir()
            .map(|unit_dir| Self::new(kind, unit_dir, runner))
    }

    /// Which manager this adapter drives.
    pub const fn kind(&self) -> ServiceManagerKind {
        self.kind
    }

    /// Descriptor location for `label`.
    pub fn unit_path(&self, label: &str) -> PathBuf {
        self.unit_dir
            .join(format!("{label}.{}", self.kind.descriptor_extension()))
    }

    /// Returns true when the descriptor for `label` exists.
    pub fn is_installed(&self, label: &str) -> bool {
        self.unit_path(label).is_file()
    }

    /// Writes the descriptor for `spec` and makes the manager aware of it.
    pub fn install(&self, spec: &UnitSpec) -> Result<PathBuf, ServiceError> {
        let path = self.unit_path(&spec.label);
        let not_installed = |_| ServiceError::ServiceUnitNotInstalled {
            label: spec.label.clone(),
            path: path.clone(),
        };
        std::fs::create_dir_all(&self.unit_dir).map_err(not_installed)?;
        let descriptor = match self.kind {
            ServiceManagerKind::Launchd => render_launchd_plist(spec),
            ServiceManagerKind::Systemd => render_systemd_unit(spec),
        };
        atomic_write(&path, descriptor.as_bytes()).map_err(not_installed)?;
        if self.kind == ServiceManagerKind::Systemd {
            self.run_checked("systemctl", &["--user", "daemon-reload"])?;
        }
        info!(
            target: SERVICE_MANAGER_TARGET,
            label = %spec.label,
            file = %path.display(),
            "unit descriptor installed"
        );
        Ok(path)
    }

    /// Loads and starts the unit.
    pub fn load(&self, label: &str) -> Result<(), ServiceError> {
        self.ensure_installed(label)?;
        match self.kind {
            ServiceManagerKind::Launchd => {
                let plist = self.unit_path(label).to_string_lossy().into_owned();
                self.run_checked("launchctl", &["load", "-w", &plist])
            }
            ServiceManagerKind::Systemd => {
                let unit = systemd_unit_name(label);
                self.run_checked("systemctl", &["--user", "enable", "--now", &unit])
            }
        }
    }

    /// Stops and unloads the unit.
    pub fn unload(&self, label: &str) -> Result<(), ServiceError> {
        match self.kind {
            ServiceManagerKind::Launchd => {
                let plist = self.unit_path(label).to_string_lossy().into_owned();
                self.run_checked("launchctl", &["unload", "-w", &plist])
            }
            ServiceManagerKind::Systemd => {
                let unit = systemd_unit_name(label);
                self.run_checked("systemctl", &["--user", "disable", "--now", &unit])
            }
        }
    }

    /// PID of the unit's main process, `None` when it is not running.
    pub fn pid_of(&self, label: &str) -> Result<Option<u32>, ServiceError> {
        match self.kind {
            ServiceManagerKind::Launchd => {
                let output = self.run_checked_output("launchctl", &["list"])?;
                Ok(parse_launchctl_list(&output.stdout, label))
            }
            ServiceManagerKind::Systemd => {
                let unit = systemd_unit_name(label);
                let output = self.run_checked_output(
                    "systemctl",
                    &["--user", "show", "-p", "MainPID", "--value", &unit],
                )?;
                Ok(parse_systemd_main_pid(&output.stdout))
            }
        }
    }

    fn ensure_installed(&self, label: &str) -> Result<(), ServiceError> {
        if self.is_installed(label) {
            Ok(())
        } else {
            Err(ServiceError::ServiceUnitNotInstalled {
                label: label.to_owned(),
                path: self.unit_path(label),
            })
        }
    }

    fn run_checked(&self, program: &str, arguments: &[&str]) -> Result<(), ServiceError> {
        self.run_checked_output(program, arguments).map(|_| ())
    }

    fn run_checked_output(
        &self,
        program: &str,
        arguments: &[&str],
    ) -> Result<CommandOutput, ServiceError> {
        let owned: Vec<String> = arguments.iter().map(|arg| (*arg).to_owned()).collect();
        let command = format!("{program} {}", owned.join(" "));
        debug!(target: SERVICE_MANAGER_TARGET, %command, "running service manager command");
        let output = self
            .runner
            .run(program, &owned)
            .map_err(|error| ServiceError::ServiceManager {
                command: command.clone(),
                detail: error.to_string(),
            })?;
        if output.success() {
            Ok(output)
        } else {
            Err(ServiceError::ServiceManager {
                command,
                detail: format!(
                    "exit status {:?}: {}",
                    output.status,
                    output.stderr.trim()
                ),
            })
        }
    }
}

fn systemd_unit_name(label: &str) -> String {
    format!("{label}.service")
}

/// Finds `label` in `launchctl list` output (`PID\tStatus\tLabel` rows).
pub(crate) fn parse_launchctl_list(output: &str, label: &str) -> Option<u32> {
    output.lines().find_map(|line| {
        let mut columns = line.split_whitespace();
        let pid = columns.next()?;
        let _status = columns.next()?;
        let name = columns.next()?;
        if name == label {
            pid.parse::<u32>().ok()
        } else {
            None
        }
    })
}

/// Interprets `systemctl show -p MainPID --value`; `0` means not running.
pub(crate) fn parse_systemd_main_pid(output: &str) -> Option<u32> {
    output
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|pid| *pid != 0)
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn render_launchd_plist(spec: &UnitSpec) -> String {
    let mut plist = String::from(concat!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
        "<!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" ",
        "\"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n",
        "<plist version=\"1.0\">\n<dict>\n",
    ));
    let _ = writeln!(plist, "  <key>Label</key>\n  <string>{}</string>", xml_escape(&spec.label));
    plist.push_str("  <key>ProgramArguments</key>\n  <array>\n");
    let _ = writeln!(plist, "    <string>{}</string>", xml_escape(&path_text(&spec.program)));
    for argument in &spec.arguments {
        let _ = writeln!(plist, "    <string>{}</string>", xml_escape(argument));
    }
    plist.push_str("  </array>\n");
    let _ = writeln!(
        plist,
        "  <key>WorkingDirectory</key>\n  <string>{}</string>",
        xml_escape(&path_text(&spec.working_dir))
    );
    if !spec.environment.is_empty() {
        plist.push_str("  <key>EnvironmentVariables</key>\n  <dict>\n");
        for (key, value) in &spec.environment {
            let _ = writeln!(
                plist,
                "    <key>{}</key>\n    <string>{}</string>",
                xml_escape(key),
                xml_escape(value)
            );
        }
        plist.push_str("  </dict>\n");
    }
    let log = xml_escape(&path_text(&spec.log_path));
    let _ = writeln!(plist, "  <key>StandardOutPath</key>\n  <string>{log}</string>");
    let _ = writeln!(plist, "  <key>StandardErrorPath</key>\n  <string>{log}</string>");
    plist.push_str("  <key>RunAtLoad</key>\n  <true/>\n");
    plist.push_str("  <key>KeepAlive</key>\n  <false/>\n");
    plist.push_str("</dict>\n</plist>\n");
    plist
}

fn render_systemd_unit(spec: &UnitSpec) -> String {
    let mut unit = String::new();
    let _ = writeln!(unit, "[Unit]\nDescription={}\n", escape_specifiers(&spec.label));
    unit.push_str("[Service]\nType=simple\n");
    let _ = writeln!(
        unit,
        "WorkingDirectory={}",
        escape_specifiers(&path_text(&spec.working_dir))
    );
    let exec: Vec<String> = std::iter::once(path_text(&spec.program))
        .chain(spec.arguments.iter().cloned())
        .map(|word| systemd_quote(&word.replace('$', "$$")))
        .collect();
    let _ = writeln!(unit, "ExecStart={}", exec.join(" "));
    for (key, value) in &spec.environment {
        let _ = writeln!(unit, "Environment={}", systemd_quote(&format!("{key}={value}")));
    }
    let log = escape_specifiers(&path_text(&spec.log_path));
    let _ = writeln!(unit, "StandardOutput=append:{log}");
    let _ = writeln!(unit, "StandardError=append:{log}");
    unit.push_str("Restart=no\n\n[Install]\nWantedBy=default.target\n");
    unit
}

/// Doubles `%` so systemd does not read it as a specifier.
fn escape_specifiers(value: &str) -> String {
    value.replace('%', "%%")
}

/// Double-quotes one word of a unit setting, escaping per systemd.syntax(7).
fn systemd_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for character in value.chars() {
        match character {
            '"' | '\\' => {
                quoted.push('\\');
                quoted.push(character);
            }
            '%' => quoted.push_str("%%"),
            '\n' => quoted.push_str("\\n"),
            _ => quoted.push(character),
        }
    }
    quoted.push('"');
    quoted
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
