//! End-to-end tests against the real `lxc-monitord` binary.
//!
//! Each test uses its own runtime root and lxcpath so daemons started here
//! never collide with each other or with a system monitord. Daemons are
//! started with a short idle timeout and go away on their own.
//!
//! Lives at the workspace root because `CARGO_BIN_EXE_*` is only set for
//! tests of the package that owns the binaries.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

use std::io;
use std::os::linux::net::SocketAddrExt;
use std::os::unix::net::{SocketAddr, UnixListener};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use lxcmon::config::DEFAULT_CONNECT_BACKOFF;
use lxcmon::{DaemonLauncher, MonitorConnection, PublishOutcome, Publisher, ReadOutcome, ReadTimeout};
use lxcmon_core::{ContainerState, RUNTIME_DIR_ENV};
use lxcmon_protocol::{fifo_path, MessageKind, SocketName};
use tempfile::TempDir;

/// Idle timeout handed to every daemon started by these tests, in seconds
const DAEMON_IDLE_SECS: &str = "2";

/// Time for a daemon to accept a freshly connected subscriber
const ACCEPT_GRACE_PERIOD: Duration = Duration::from_millis(200);

fn monitord() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_lxc-monitord"))
}

fn unique_group(tag: &str) -> String {
    format!("/lxcmon-e2e/{}/{tag}", std::process::id())
}

fn launcher(runtime_root: &Path) -> DaemonLauncher {
    DaemonLauncher::new(monitord())
        .with_runtime_dir(runtime_root)
        .env("LXC_MONITORD_IDLE_TIMEOUT", DAEMON_IDLE_SECS)
}

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    condition()
}

#[test]
fn test_publish_reaches_subscriber_through_spawned_daemon() {
    let runtime = TempDir::new().unwrap();
    let group = unique_group("basic");

    launcher(runtime.path()).ensure_running(&group).unwrap();
    let connection = MonitorConnection::connect(&group, &DEFAULT_CONNECT_BACKOFF).unwrap();
    thread::sleep(ACCEPT_GRACE_PERIOD);

    let outcome = Publisher::new(runtime.path()).send_state(&group, "test1", ContainerState::Running);
    assert_eq!(outcome, PublishOutcome::Delivered);

    match connection
        .read_timeout(ReadTimeout::After(Duration::from_secs(5)))
        .unwrap()
    {
        ReadOutcome::Message { index, message } => {
            assert_eq!(index, 0);
            assert_eq!(message.kind(), MessageKind::StateChanged);
            assert_eq!(message.name(), "test1");
            assert_eq!(message.value(), 2);
        }
        ReadOutcome::TimedOut => panic!("No event received"),
    }

    connection.close();
}

#[test]
fn test_concurrent_launches_leave_one_daemon() {
    let runtime = TempDir::new().unwrap();
    let group = unique_group("concurrent");

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let launcher = launcher(runtime.path());
            let group = group.clone();
            thread::spawn(move || launcher.ensure_running(&group))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    // The address is owned by exactly one running daemon.
    let name = SocketName::for_group(&group).unwrap();
    let addr = SocketAddr::from_abstract_name(name.as_bytes()).unwrap();
    let err = UnixListener::bind_addr(&addr).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::AddrInUse);

    // A third launch finds it running and still succeeds.
    launcher(runtime.path()).ensure_running(&group).unwrap();
    assert!(fifo_path(runtime.path(), &group, false).unwrap().exists());
}

#[test]
fn test_idle_daemon_removes_fifo() {
    let runtime = TempDir::new().unwrap();
    let group = unique_group("idle");

    launcher(runtime.path()).ensure_running(&group).unwrap();
    let fifo = fifo_path(runtime.path(), &group, false).unwrap();
    assert!(fifo.exists());

    assert!(wait_until(Duration::from_secs(10), || !fifo.exists()));
    assert_eq!(
        Publisher::new(runtime.path()).send_exit_code(&group, "c1", 0),
        PublishOutcome::NoListener
    );
}

#[test]
fn test_missing_daemon_binary() {
    let runtime = TempDir::new().unwrap();
    let err = DaemonLauncher::new(runtime.path().join("no-such-monitord"))
        .ensure_running(&unique_group("missing"))
        .unwrap_err();
    assert!(matches!(err, lxcmon::MonitorError::SpawnFailed(_)));
}

#[test]
fn test_cli_prints_events() {
    let runtime = TempDir::new().unwrap();
    let group = unique_group("cli");

    let mut child = Command::new(env!("CARGO_BIN_EXE_lxc-monitor"))
        .args(["-P", &group, "-n", "test1", "-t", "2", "--monitord"])
        .arg(monitord())
        .env(RUNTIME_DIR_ENV, runtime.path())
        .env("LXC_MONITORD_IDLE_TIMEOUT", DAEMON_IDLE_SECS)
        .stdout(std::process::Stdio::piped())
        .spawn()
        .unwrap();

    // The CLI connects at some point during this window; keep publishing
    // until then. Events for other names are filtered out.
    let publisher = Publisher::new(runtime.path());
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(1500) {
        publisher.send_state(&group, "test1", ContainerState::Running);
        publisher.send_state(&group, "other", ContainerState::Stopped);
        thread::sleep(Duration::from_millis(100));
    }

    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("'test1' changed state to [RUNNING]"));
    assert!(!stdout.contains("'other'"));
}
