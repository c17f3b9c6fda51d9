use std::sync::Arc;
use std::time::{Duration, Instant};

use mockall::predicate::{eq, function};
use rstest::rstest;

use super::*;
use crate::service_manager::{CommandOutput, ServiceManagerKind};
use crate::test_support::{
    BackendScript, MockRunner, ServiceFixture, TunnelScript, args, write_script,
};

const LABEL: &str = "com.para-mcp.tunnel";
const QUICK_URL: &str = "https://brave-otter-17.trycloudflare.com";

fn settings(service: &ServiceFixture, binary: String) -> TunnelSettings {
    TunnelSettings {
        binary,
        config_path: service.path().join("cloudflared.yml"),
        setup_script: service.path().join("scripts").join("setup-tunnel.sh"),
        label: String::from(LABEL),
        url_timeout: Duration::from_secs(5),
        shutdown_timeout: Duration::from_millis(300),
    }
}

fn ephemeral_controller(service: &ServiceFixture, script: &TunnelScript) -> TunnelController {
    let binary = service.tunnel_binary(script).to_string_lossy().into_owned();
    TunnelController::new(service.paths(), settings(service, binary), None)
}

fn persistent_controller(service: &ServiceFixture, runner: MockRunner) -> TunnelController {
    let manager = ServiceManager::new(
        ServiceManagerKind::Systemd,
        service.unit_dir(),
        Arc::new(runner),
    );
    TunnelController::new(
        service.paths(),
        settings(service, String::from("cloudflared")),
        Some(manager),
    )
}

fn is_show(arguments: &[String]) -> bool {
    arguments.iter().any(|argument| argument == "show")
}

#[test]
fn mode_none_starts_nothing() {
    let service = ServiceFixture::ready(BackendScript::Sleeps);
    let controller = ephemeral_controller(&service, &TunnelScript::Silent);
    assert_eq!(controller.start(TunnelMode::None, 8000).expect("start"), None);
    assert!(!service.paths().tunnel_pid_path().exists());
}

#[test]
fn ephemeral_tunnel_publishes_discovered_url() {
    let service = ServiceFixture::ready(BackendScript::Sleeps);
    let controller = ephemeral_controller(&service, &TunnelScript::Publishes(QUICK_URL.into()));

    let handle = controller
        .start(TunnelMode::Ephemeral, 8123)
        .expect("start")
        .expect("handle");
    assert_eq!(handle.url, QUICK_URL);
    let TunnelProcess::Pid(pid) = handle.process else {
        panic!("expected a pid-backed tunnel");
    };
    assert_eq!(
        read_text(service.paths().tunnel_url_path()).expect("url").as_deref(),
        Some(QUICK_URL)
    );
    assert_eq!(read_value::<u32>(service.paths().tunnel_pid_path()).expect("pid"), Some(pid));
    assert_eq!(
        service.tunnel_log_lines().first().map(String::as_str),
        Some("args: tunnel --no-autoupdate --url http://localhost:8123")
    );

    let status = controller.status().expect("status");
    assert_eq!(status.pid, Some(pid));
    assert_eq!(status.url.as_deref(), Some(QUICK_URL));

    let outcome = controller.stop().expect("stop");
    assert_eq!(outcome.process, TunnelProcess::Pid(pid));
    assert!(!service.paths().tunnel_url_path().exists());
    assert!(!controller.status().expect("status").is_running());
}

#[test]
fn stale_log_url_is_not_rediscovered() {
    let service = ServiceFixture::ready(BackendScript::Sleeps);
    std::fs::create_dir_all(service.paths().log_dir()).expect("log dir");
    std::fs::write(
        service.paths().tunnel_log(),
        "| https://stale-old-1.trycloudflare.com |\n",
    )
    .expect("seed log");
    let controller = ephemeral_controller(&service, &TunnelScript::Publishes(QUICK_URL.into()));
    let handle = controller
        .start(TunnelMode::Ephemeral, 8000)
        .expect("start")
        .expect("handle");
    assert_eq!(handle.url, QUICK_URL);
    controller.stop().expect("stop");
}

#[test]
fn silent_tunnel_times_out_within_bound() {
    let service = ServiceFixture::ready(BackendScript::Sleeps);
    let binary = service
        .tunnel_binary(&TunnelScript::Silent)
        .to_string_lossy()
        .into_owned();
    let mut tunnel_settings = settings(&service, binary);
    tunnel_settings.url_timeout = Duration::from_secs(1);
    let controller = TunnelController::new(service.paths(), tunnel_settings, None);

    let started = Instant::now();
    let error = controller
        .start(TunnelMode::Ephemeral, 8000)
        .expect_err("no url");
    assert!(matches!(error, ServiceError::TunnelUrlNotFound { .. }));
    assert!(started.elapsed() < Duration::from_secs(1) + Duration::from_secs(2));
    assert!(!service.paths().tunnel_pid_path().exists());
    assert!(!controller.status().expect("status").is_running());
}

#[test]
fn exiting_tunnel_client_fails_fast() {
    let service = ServiceFixture::ready(BackendScript::Sleeps);
    let controller = ephemeral_controller(&service, &TunnelScript::Exits);
    let started = Instant::now();
    let error = controller
        .start(TunnelMode::Ephemeral, 8000)
        .expect_err("client exits");
    assert!(matches!(error, ServiceError::TunnelUrlNotFound { .. }));
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[test]
fn missing_tunnel_binary_is_reported() {
    let service = ServiceFixture::ready(BackendScript::Sleeps);
    let controller = TunnelController::new(
        service.paths(),
        settings(&service, String::from("para-serve-missing-cloudflared")),
        None,
    );
    let error = controller
        .start(TunnelMode::Ephemeral, 8000)
        .expect_err("binary missing");
    assert!(matches!(error, ServiceError::TunnelBinaryNotFound { .. }));
}

#[test]
fn second_ephemeral_start_is_rejected() {
    let service = ServiceFixture::ready(BackendScript::Sleeps);
    let controller = ephemeral_controller(&service, &TunnelScript::Publishes(QUICK_URL.into()));
    let handle = controller
        .start(TunnelMode::Ephemeral, 8000)
        .expect("start")
        .expect("handle");
    let error = controller
        .start(TunnelMode::Ephemeral, 8000)
        .expect_err("already running");
    assert!(
        matches!((&error, &handle.process), (ServiceError::AlreadyRunning { pid }, TunnelProcess::Pid(live)) if pid == live)
    );
    controller.stop().expect("stop");
}

#[test]
fn stop_without_tunnel_is_not_running() {
    let service = ServiceFixture::ready(BackendScript::Sleeps);
    let controller = ephemeral_controller(&service, &TunnelScript::Silent);
    assert!(controller.stop().expect_err("nothing running").is_not_running());
}

#[test]
fn stale_tunnel_pid_is_removed_by_status() {
    let service = ServiceFixture::ready(BackendScript::Sleeps);
    std::fs::write(
        service.paths().tunnel_pid_path(),
        format!("{}\n", crate::test_support::UNUSED_PID),
    )
    .expect("seed pid");
    std::fs::write(service.paths().tunnel_url_path(), format!("{QUICK_URL}\n")).expect("seed url");
    let controller = ephemeral_controller(&service, &TunnelScript::Silent);
    assert!(!controller.status().expect("status").is_running());
    assert!(!service.paths().tunnel_pid_path().exists());
    assert!(!service.paths().tunnel_url_path().exists());
}

#[test]
fn persistent_without_unit_or_script_fails_setup() {
    let service = ServiceFixture::ready(BackendScript::Sleeps);
    let mut runner = MockRunner::new();
    runner.expect_run().never();
    let error = persistent_controller(&service, runner)
        .start(TunnelMode::Persistent, 8000)
        .expect_err("no unit, no script");
    assert!(matches!(error, ServiceError::TunnelSetupFailed { .. }));
}

/// Setup script that launches a detached client and records its PID.
const RECORDING_SETUP_SCRIPT: &str = "echo \"setup for $PORT\" > setup.out\n\
     sleep 30 </dev/null >/dev/null 2>&1 &\n\
     echo $! > \"$TUNNEL_PID_FILE\"\n";

fn seed_named_tunnel_config(service: &ServiceFixture) {
    std::fs::write(
        service.path().join("cloudflared.yml"),
        "tunnel: para\ningress:\n  - hostname: para.example.com\n    service: http://localhost:8000\n",
    )
    .expect("seed config");
}

fn script_only_controller(service: &ServiceFixture) -> TunnelController {
    let mut runner = MockRunner::new();
    runner.expect_run().never();
    persistent_controller(service, runner)
}

#[test]
fn persistent_setup_script_then_hostname() {
    let service = ServiceFixture::ready(BackendScript::Sleeps);
    write_script(
        &service.path().join("scripts").join("setup-tunnel.sh"),
        RECORDING_SETUP_SCRIPT,
    );
    seed_named_tunnel_config(&service);
    let controller = script_only_controller(&service);

    let handle = controller
        .start(TunnelMode::Persistent, 8010)
        .expect("start")
        .expect("handle");
    assert_eq!(handle.url, "https://para.example.com");
    let TunnelProcess::Pid(pid) = handle.process else {
        panic!("expected the recorded client pid, got {:?}", handle.process);
    };
    let marker = std::fs::read_to_string(service.path().join("setup.out")).expect("script ran");
    assert_eq!(marker.trim(), "setup for 8010");
    controller.stop().expect("stop");
    assert!(!process::is_alive(pid).expect("liveness check"));
}

#[test]
fn script_started_tunnel_is_tracked_until_stopped() {
    let service = ServiceFixture::ready(BackendScript::Sleeps);
    write_script(
        &service.path().join("scripts").join("setup-tunnel.sh"),
        RECORDING_SETUP_SCRIPT,
    );
    seed_named_tunnel_config(&service);
    let controller = script_only_controller(&service);
    let handle = controller
        .start(TunnelMode::Persistent, 8020)
        .expect("start")
        .expect("handle");

    let status = controller.status().expect("status");
    assert!(status.is_running());
    assert_eq!(status.process, Some(handle.process.clone()));
    assert_eq!(status.url.as_deref(), Some("https://para.example.com"));

    let error = controller
        .start(TunnelMode::Persistent, 8020)
        .expect_err("second start");
    assert!(matches!(error, ServiceError::AlreadyRunning { .. }));
    let marker = std::fs::read_to_string(service.path().join("setup.out")).expect("script ran");
    assert_eq!(marker.lines().count(), 1, "setup script must run once");

    let outcome = controller.stop().expect("stop");
    assert_eq!(outcome.process, handle.process);
    assert!(!controller.status().expect("status").is_running());
    assert!(!service.paths().tunnel_pid_path().exists());
    assert!(!service.paths().tunnel_url_path().exists());
}

#[test]
fn setup_script_leaving_nothing_running_fails() {
    let service = ServiceFixture::ready(BackendScript::Sleeps);
    write_script(
        &service.path().join("scripts").join("setup-tunnel.sh"),
        "echo registered > setup.out\n",
    );
    seed_named_tunnel_config(&service);
    let error = script_only_controller(&service)
        .start(TunnelMode::Persistent, 8000)
        .expect_err("nothing to track");
    assert!(matches!(error, ServiceError::TunnelSetupFailed { .. }));
    assert!(!service.paths().tunnel_url_path().exists());
    assert!(!service.paths().tunnel_pid_path().exists());
}

#[test]
fn failing_setup_script_is_reported() {
    let service = ServiceFixture::ready(BackendScript::Sleeps);
    write_script(
        &service.path().join("scripts").join("setup-tunnel.sh"),
        "echo 'tunnel not registered' >&2\nexit 3\n",
    );
    let mut runner = MockRunner::new();
    runner.expect_run().never();
    let error = persistent_controller(&service, runner)
        .start(TunnelMode::Persistent, 8000)
        .expect_err("script fails");
    let ServiceError::TunnelSetupFailed { reason } = error else {
        panic!("expected TunnelSetupFailed, got {error:?}");
    };
    assert!(reason.contains("Some(3)"));
    assert!(reason.contains("tunnel not registered"));
}

#[test]
fn installed_unit_is_loaded_and_hostname_required() {
    let service = ServiceFixture::ready(BackendScript::Sleeps);
    service.install_unit(&format!("{LABEL}.service"));
    let mut runner = MockRunner::new();
    runner
        .expect_run()
        .with(eq("systemctl"), function(is_show))
        .returning(|_, _| Ok(CommandOutput::ok("0\n")));
    runner
        .expect_run()
        .with(
            eq("systemctl"),
            eq(args(&["--user", "enable", "--now", "com.para-mcp.tunnel.service"])),
        )
        .once()
        .returning(|_, _| Ok(CommandOutput::ok("")));
    let error = persistent_controller(&service, runner)
        .start(TunnelMode::Persistent, 8000)
        .expect_err("no hostname configured");
    assert!(matches!(error, ServiceError::TunnelUrlNotFound { .. }));
}

#[test]
fn running_unit_is_reported_and_unloaded() {
    let service = ServiceFixture::ready(BackendScript::Sleeps);
    service.install_unit(&format!("{LABEL}.service"));
    std::fs::write(service.paths().tunnel_url_path(), "https://para.example.com\n")
        .expect("seed url");
    let mut runner = MockRunner::new();
    runner
        .expect_run()
        .with(eq("systemctl"), function(is_show))
        .returning(|_, _| Ok(CommandOutput::ok("5150\n")));
    runner
        .expect_run()
        .with(
            eq("systemctl"),
            eq(args(&["--user", "disable", "--now", "com.para-mcp.tunnel.service"])),
        )
        .once()
        .returning(|_, _| Ok(CommandOutput::ok("")));
    let controller = persistent_controller(&service, runner);

    let status = controller.status().expect("status");
    assert_eq!(status.pid, Some(5150));
    assert_eq!(status.url.as_deref(), Some("https://para.example.com"));

    let outcome = controller.stop().expect("stop");
    assert_eq!(outcome.process, TunnelProcess::Unit(String::from(LABEL)));
    assert!(!service.paths().tunnel_url_path().exists());
}

#[rstest]
#[case("hostname: para.example.com\n", Some("para.example.com"))]
#[case("ingress:\n  - hostname: \"quoted.example.com\"\n", Some("quoted.example.com"))]
#[case("  - hostname: first.example.com # main\n  - hostname: second.example.com\n", Some("first.example.com"))]
#[case("tunnel: abc\ncredentials-file: /x.json\n", None)]
#[case("hostname:\n", None)]
fn hostname_is_read_from_cloudflared_config(#[case] text: &str, #[case] expected: Option<&str>) {
    assert_eq!(persistent::parse_hostname(text).as_deref(), expected);
}

#[test]
fn ephemeral_arguments_point_at_localhost() {
    assert_eq!(
        ephemeral::client_arguments(9000),
        vec!["tunnel", "--no-autoupdate", "--url", "http://localhost:9000"]
    );
}
