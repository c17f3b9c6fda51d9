//! Rendering of lifecycle reports for humans and machines.

use std::io::Write;
use std::path::PathBuf;

use clap::ValueEnum;
use para_serve::environment::{CandidateSource, has_environment};
use para_serve::{LogKind, ServiceController, ServiceStatus, StopReport, TunnelProcess};
use para_serve_config::Config;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::AppError;

/// Output format selection for reports.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Selects `human` for terminal output and `json` for redirected output.
    #[default]
    Auto,
    /// Always render human-readable output.
    Human,
    /// Always emit JSON.
    Json,
}

/// Output format after resolving `auto` based on TTY detection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResolvedOutputFormat {
    /// Human-readable text.
    Human,
    /// A single JSON document.
    Json,
}

impl OutputFormat {
    /// Resolves the output format based on whether stdout is a terminal.
    #[must_use]
    pub fn resolve(self, stdout_is_terminal: bool) -> ResolvedOutputFormat {
        match self {
            Self::Auto => {
                if stdout_is_terminal {
                    ResolvedOutputFormat::Human
                } else {
                    ResolvedOutputFormat::Json
                }
            }
            Self::Human => ResolvedOutputFormat::Human,
            Self::Json => ResolvedOutputFormat::Json,
        }
    }
}

pub(crate) fn write_json<T: Serialize>(
    writer: &mut dyn Write,
    what: &'static str,
    value: &T,
) -> Result<(), AppError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|source| AppError::Serialise { what, source })?;
    writeln!(writer, "{json}")?;
    Ok(())
}

/// Writes a status snapshot in the requested format.
pub(crate) fn render_status(
    writer: &mut dyn Write,
    status: &ServiceStatus,
    format: ResolvedOutputFormat,
) -> Result<(), AppError> {
    match format {
        ResolvedOutputFormat::Json => write_json(writer, "status", status),
        ResolvedOutputFormat::Human => render_status_human(writer, status),
    }
}

fn render_status_human(writer: &mut dyn Write, status: &ServiceStatus) -> Result<(), AppError> {
    match status.pid.filter(|_| status.is_running) {
        Some(pid) => writeln!(writer, "Server:    running (pid {pid})")?,
        None => writeln!(writer, "Server:    stopped")?,
    }
    if let Some(url) = &status.local_url {
        writeln!(writer, "Local URL: {url}")?;
        let listening = if status.listening { "yes" } else { "not yet" };
        writeln!(writer, "Listening: {listening}")?;
    }
    if let Some(started) = status.started_at.filter(|_| status.is_running) {
        writeln!(writer, "Started:   {}", format_timestamp(started))?;
    }
    if let Some(url) = &status.tunnel_url {
        writeln!(writer, "Tunnel:    {url}")?;
    } else if status.tunnel_detached {
        writeln!(
            writer,
            "Tunnel:    running without a server; run 'para-serve stop' to clean up"
        )?;
    } else if status.tunnel_running {
        writeln!(writer, "Tunnel:    running")?;
    }
    Ok(())
}

/// Summarises a successful start.
pub(crate) fn render_started(
    writer: &mut dyn Write,
    status: &ServiceStatus,
) -> Result<(), AppError> {
    let pid = status
        .pid
        .map_or_else(|| "unknown".to_owned(), |pid| pid.to_string());
    match &status.local_url {
        Some(url) => writeln!(writer, "Server started on {url} (pid {pid})")?,
        None => writeln!(writer, "Server started (pid {pid})")?,
    }
    if let Some(url) = &status.tunnel_url {
        writeln!(writer, "Tunnel available at {url}")?;
    }
    Ok(())
}

/// Summarises a stop request.
pub(crate) fn render_stopped(writer: &mut dyn Write, report: &StopReport) -> Result<(), AppError> {
    if let Some(tunnel) = &report.tunnel {
        let forced = if tunnel.forced { " (forced)" } else { "" };
        match &tunnel.process {
            TunnelProcess::Pid(pid) => writeln!(writer, "Stopped tunnel (pid {pid}){forced}")?,
            TunnelProcess::Unit(label) => writeln!(writer, "Stopped tunnel unit {label}{forced}")?,
        }
    }
    if let Some(backend) = &report.backend {
        let forced = if backend.forced { " (forced)" } else { "" };
        writeln!(writer, "Stopped server (pid {}){forced}", backend.pid)?;
    }
    Ok(())
}

fn format_timestamp(epoch_seconds: u64) -> String {
    i64::try_from(epoch_seconds)
        .ok()
        .and_then(|seconds| OffsetDateTime::from_unix_timestamp(seconds).ok())
        .and_then(|moment| moment.format(&Rfc3339).ok())
        .unwrap_or_else(|| epoch_seconds.to_string())
}

/// Diagnostic view of working-directory resolution and tool discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EnvironmentReport {
    pub(crate) working_dir: PathBuf,
    pub(crate) qualified: bool,
    pub(crate) ready: bool,
    pub(crate) candidates: Vec<CandidateReport>,
    pub(crate) python: ToolReport,
    pub(crate) tunnel_binary: ToolReport,
    pub(crate) server_log: PathBuf,
    pub(crate) tunnel_log: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CandidateReport {
    pub(crate) source: CandidateSource,
    pub(crate) path: PathBuf,
    pub(crate) has_environment: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct ToolReport {
    pub(crate) name: String,
    pub(crate) path: Option<PathBuf>,
}

impl ToolReport {
    fn locate(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            path: which::which(name).ok(),
        }
    }
}

impl EnvironmentReport {
    pub(crate) fn collect(controller: &ServiceController, config: &Config) -> Self {
        let resolution = controller.resolution();
        let candidates = resolution
            .candidates
            .iter()
            .map(|candidate| CandidateReport {
                source: candidate.source,
                path: candidate.path.clone(),
                has_environment: has_environment(&candidate.path),
            })
            .collect();
        Self {
            working_dir: resolution.working_dir.clone(),
            qualified: resolution.qualified,
            ready: controller.is_ready(),
            candidates,
            python: ToolReport::locate(config.python()),
            tunnel_binary: ToolReport::locate(config.tunnel_binary()),
            server_log: controller.logs().path(LogKind::Server).to_path_buf(),
            tunnel_log: controller.logs().path(LogKind::Tunnel).to_path_buf(),
        }
    }
}

pub(crate) fn render_environment(
    writer: &mut dyn Write,
    report: &EnvironmentReport,
    format: ResolvedOutputFormat,
) -> Result<(), AppError> {
    if format == ResolvedOutputFormat::Json {
        return write_json(writer, "environment report", report);
    }
    writeln!(writer, "Working directory: {}", report.working_dir.display())?;
    let state = match (report.qualified, report.ready) {
        (_, true) => "ready",
        (false, false) => "no candidate is set up; run 'para-serve setup'",
        (true, false) => "not set up",
    };
    writeln!(writer, "Environment:       {state}")?;
    writeln!(writer, "Candidates:")?;
    for candidate in &report.candidates {
        let marker = if candidate.has_environment { "*" } else { " " };
        writeln!(
            writer,
            "  {marker} {:<12} {}",
            candidate.source.to_string(),
            candidate.path.display()
        )?;
    }
    for tool in [&report.python, &report.tunnel_binary] {
        match &tool.path {
            Some(path) => writeln!(writer, "{:<18} {}", format!("{}:", tool.name), path.display())?,
            None => writeln!(writer, "{:<18} not found", format!("{}:", tool.name))?,
        }
    }
    writeln!(writer, "Server log:        {}", report.server_log.display())?;
    writeln!(writer, "Tunnel log:        {}", report.tunnel_log.display())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use para_serve::StopOutcome;
    use para_serve::tunnel::TunnelStopOutcome;
    use rstest::rstest;

    fn rendered(render: impl FnOnce(&mut Vec<u8>) -> Result<(), AppError>) -> String {
        let mut buffer = Vec::new();
        render(&mut buffer).expect("render succeeds");
        String::from_utf8(buffer).expect("utf8 output")
    }

    fn running_status() -> ServiceStatus {
        ServiceStatus {
            is_running: true,
            pid: Some(4242),
            port: Some(8000),
            local_url: Some("http://localhost:8000".to_owned()),
            tunnel_url: Some("https://calm-river.trycloudflare.com".to_owned()),
            tunnel_running: true,
            tunnel_detached: false,
            listening: true,
            started_at: Some(0),
        }
    }

    #[rstest]
    #[case(OutputFormat::Auto, true, ResolvedOutputFormat::Human)]
    #[case(OutputFormat::Auto, false, ResolvedOutputFormat::Json)]
    #[case(OutputFormat::Json, true, ResolvedOutputFormat::Json)]
    #[case(OutputFormat::Human, false, ResolvedOutputFormat::Human)]
    fn resolves_output_format(
        #[case] format: OutputFormat,
        #[case] terminal: bool,
        #[case] expected: ResolvedOutputFormat,
    ) {
        assert_eq!(format.resolve(terminal), expected);
    }

    #[test]
    fn human_status_lists_urls_and_start_time() {
        let text = rendered(|out| {
            render_status(out, &running_status(), ResolvedOutputFormat::Human)
        });
        assert!(text.contains("running (pid 4242)"), "{text}");
        assert!(text.contains("http://localhost:8000"), "{text}");
        assert!(text.contains("https://calm-river.trycloudflare.com"), "{text}");
        assert!(text.contains("1970-01-01T00:00:00Z"), "{text}");
    }

    #[test]
    fn human_status_flags_detached_tunnel() {
        let status = ServiceStatus {
            tunnel_running: true,
            tunnel_detached: true,
            ..ServiceStatus::default()
        };
        let text = rendered(|out| render_status(out, &status, ResolvedOutputFormat::Human));
        assert!(text.contains("stopped"), "{text}");
        assert!(text.contains("running without a server"), "{text}");
    }

    #[test]
    fn json_status_uses_camel_case_keys() {
        let text = rendered(|out| render_status(out, &running_status(), ResolvedOutputFormat::Json));
        let value: serde_json::Value = serde_json::from_str(&text).expect("valid json");
        assert_eq!(value["isRunning"], true);
        assert_eq!(value["localURL"], "http://localhost:8000");
        assert_eq!(value["tunnelURL"], "https://calm-river.trycloudflare.com");
    }

    #[test]
    fn stop_report_mentions_both_components() {
        let report = StopReport {
            backend: Some(StopOutcome {
                pid: 10,
                forced: true,
            }),
            tunnel: Some(TunnelStopOutcome {
                process: TunnelProcess::Unit("com.para.tunnel".to_owned()),
                forced: false,
            }),
        };
        let text = rendered(|out| render_stopped(out, &report));
        assert_eq!(
            text,
            "Stopped tunnel unit com.para.tunnel\nStopped server (pid 10) (forced)\n"
        );
    }
}
