//! Fixtures shared by the unit tests: temporary working directories with fake
//! interpreters and tunnel binaries written as shell scripts.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use mockall::mock;
use tempfile::TempDir;

use crate::environment::ServiceDescriptor;
use crate::paths::ServicePaths;
use crate::service_manager::{CommandOutput, CommandRunner};

/// PID far above any platform's `pid_max`, so it never names a live process.
pub(crate) const UNUSED_PID: u32 = 99_999_999;

mock! {
    pub(crate) Runner {}
    impl CommandRunner for Runner {
        fn run(&self, program: &str, arguments: &[String]) -> io::Result<CommandOutput>;
    }
}

pub(crate) fn args(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_owned()).collect()
}

/// Behaviour of the fake `venv/bin/python`.
#[derive(Debug, Clone, Copy)]
pub(crate) enum BackendScript {
    /// Logs its port then sleeps until signalled.
    Sleeps,
    /// Ignores SIGTERM so only SIGKILL stops it.
    IgnoresTerm,
}

impl BackendScript {
    fn body(self) -> &'static str {
        match self {
            Self::Sleeps => "echo \"backend port=$PORT http=$USE_HTTP\"\nexec sleep 30\n",
            Self::IgnoresTerm => concat!(
                "trap '' TERM\n",
                "echo \"backend port=$PORT http=$USE_HTTP\"\n",
                "while :; do sleep 1; done\n",
            ),
        }
    }
}

/// Behaviour of the fake tunnel client.
#[derive(Debug, Clone)]
pub(crate) enum TunnelScript {
    /// Prints a quick-tunnel banner with `url` after a short delay.
    Publishes(String),
    /// Runs without ever printing a URL.
    Silent,
    /// Exits immediately with a failure.
    Exits,
}

impl TunnelScript {
    fn body(&self) -> String {
        match self {
            Self::Publishes(url) => format!(
                concat!(
                    "echo \"args: $*\"\n",
                    "echo \"INF Requesting new quick Tunnel on trycloudflare.com...\"\n",
                    "sleep 0.3\n",
                    "echo \"INF |  {url}  |\"\n",
                    "exec sleep 30\n",
                ),
                url = url
            ),
            Self::Silent => String::from("echo \"args: $*\"\nexec sleep 30\n"),
            Self::Exits => String::from("echo \"failed to connect\"\nexit 1\n"),
        }
    }
}

/// A temporary backend checkout.
pub(crate) struct ServiceFixture {
    dir: TempDir,
}

impl ServiceFixture {
    /// A checkout with a provisioned environment whose interpreter runs `script`.
    pub(crate) fn ready(script: BackendScript) -> Self {
        let fixture = Self::unprovisioned();
        let python = fixture.paths().venv_python();
        write_script(&python, script.body());
        fixture
    }

    /// A checkout without `venv`.
    pub(crate) fn unprovisioned() -> Self {
        Self {
            dir: TempDir::new().expect("temp dir"),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        self.dir.path()
    }

    pub(crate) fn paths(&self) -> ServicePaths {
        ServicePaths::new(self.dir.path())
    }

    pub(crate) fn descriptor(&self, port: u16) -> ServiceDescriptor {
        ServiceDescriptor::with_environment(self.dir.path(), port, BTreeMap::new())
    }

    pub(crate) fn unit_dir(&self) -> PathBuf {
        self.dir.path().join("units")
    }

    pub(crate) fn install_unit(&self, file_name: &str) {
        fs::create_dir_all(self.unit_dir()).expect("unit dir");
        fs::write(self.unit_dir().join(file_name), "placeholder\n").expect("unit file");
    }

    /// Writes a fake system interpreter whose `-m venv <dir>` creates an
    /// environment running `script`, and returns its absolute path.
    pub(crate) fn interpreter(&self, script: BackendScript) -> PathBuf {
        let path = self.dir.path().join("bin").join("python3");
        let body = format!(
            concat!(
                "if [ \"$1 $2\" = \"-m venv\" ]; then\n",
                "  mkdir -p \"$3/bin\"\n",
                "  cat > \"$3/bin/python\" <<'BACKEND'\n",
                "#!/bin/sh\n",
                "{backend}",
                "BACKEND\n",
                "  chmod 755 \"$3/bin/python\"\n",
                "fi\n",
            ),
            backend = script.body()
        );
        write_script(&path, &body);
        path
    }

    /// Writes a fake tunnel client and returns its absolute path.
    pub(crate) fn tunnel_binary(&self, script: &TunnelScript) -> PathBuf {
        let path = self.dir.path().join("bin").join("cloudflared");
        write_script(&path, &script.body());
        path
    }

    pub(crate) fn server_log_lines(&self) -> Vec<String> {
        read_lines(self.paths().server_log())
    }

    pub(crate) fn tunnel_log_lines(&self) -> Vec<String> {
        read_lines(self.paths().tunnel_log())
    }

    /// Waits until the server log holds at least `count` lines.
    pub(crate) fn wait_for_log_lines(&self, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.server_log_lines().len() < count {
            assert!(Instant::now() < deadline, "server log never reached {count} lines");
            thread::sleep(Duration::from_millis(20));
        }
    }
}

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .map(|content| content.lines().map(str::to_owned).collect())
        .unwrap_or_default()
}

pub(crate) fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("script dir");
    }
    fs::write(path, format!("#!/bin/sh\n{body}")).expect("write script");
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).expect("chmod script");
}
