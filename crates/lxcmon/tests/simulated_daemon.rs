//! Client round trip against an in-test stand-in for monitord.
//!
//! The stand-in binds the group's abstract socket, owns the FIFO and
//! copies each record from one to the other, which is all a subscriber and
//! a publisher can observe of the real daemon.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::os::linux::net::SocketAddrExt;
use std::os::unix::net::{SocketAddr, UnixListener, UnixStream};
use std::path::Path;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use lxcmon::config::DEFAULT_CONNECT_BACKOFF;
use lxcmon::{read_any, MonitorConnection, PublishOutcome, Publisher, ReadOutcome, ReadTimeout};
use lxcmon_core::ContainerState;
use lxcmon_protocol::{GroupAddress, MessageKind, RECORD_SIZE};
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;

/// Serves one subscriber and forwards `records` records to it, then hands
/// back the subscriber's socket so it stays open.
fn spawn_forwarder(runtime_root: &Path, group: &str, records: usize) -> JoinHandle<UnixStream> {
    let address = GroupAddress::resolve(runtime_root, group, true).unwrap();
    mkfifo(&address.fifo_path, Mode::S_IRUSR | Mode::S_IWUSR).unwrap();

    let addr = SocketAddr::from_abstract_name(address.socket_name.as_bytes()).unwrap();
    let listener = UnixListener::bind_addr(&addr).unwrap();

    thread::spawn(move || {
        let (mut subscriber, _) = listener.accept().unwrap();
        // Read-write so the open does not wait for a publisher.
        let mut fifo = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&address.fifo_path)
            .unwrap();

        let mut record = [0u8; RECORD_SIZE];
        for _ in 0..records {
            fifo.read_exact(&mut record).unwrap();
            subscriber.write_all(&record).unwrap();
        }
        subscriber
    })
}

fn unique_group(tag: &str) -> String {
    format!("/lxcmon-sim/{}/{tag}", std::process::id())
}

/// Publishes until the stand-in has opened its FIFO.
fn publish_until_delivered(publisher: &Publisher, group: &str, name: &str, state: ContainerState) {
    for _ in 0..250 {
        if publisher.send_state(group, name, state) == PublishOutcome::Delivered {
            return;
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!("Stand-in never opened the fifo");
}

#[test]
fn test_state_change_round_trip() {
    let runtime = tempfile::tempdir().unwrap();
    let group = unique_group("test1");
    let forwarder = spawn_forwarder(runtime.path(), &group, 1);

    let connection = MonitorConnection::connect(&group, &DEFAULT_CONNECT_BACKOFF).unwrap();
    assert_eq!(connection.group(), group);

    let publisher = Publisher::new(runtime.path());
    publish_until_delivered(&publisher, &group, "test1", ContainerState::Running);

    let message = connection.read().unwrap();
    assert_eq!(message.kind(), MessageKind::StateChanged);
    assert_eq!(message.name(), "test1");
    assert_eq!(message.value(), 2);

    forwarder.join().unwrap();
}

#[test]
fn test_read_any_reports_source_connection() {
    let runtime = tempfile::tempdir().unwrap();
    let quiet = unique_group("quiet");
    let busy = unique_group("busy");
    let quiet_forwarder = spawn_forwarder(runtime.path(), &quiet, 0);
    let busy_forwarder = spawn_forwarder(runtime.path(), &busy, 1);

    let connections = vec![
        MonitorConnection::connect(&quiet, &DEFAULT_CONNECT_BACKOFF).unwrap(),
        MonitorConnection::connect(&busy, &DEFAULT_CONNECT_BACKOFF).unwrap(),
    ];
    let _quiet_socket = quiet_forwarder.join().unwrap();

    let publisher = Publisher::new(runtime.path());
    publish_until_delivered(&publisher, &busy, "c9", ContainerState::Frozen);

    match read_any(&connections, ReadTimeout::After(Duration::from_secs(5))).unwrap() {
        ReadOutcome::Message { index, message } => {
            assert_eq!(index, 1);
            assert_eq!(connections[index].group(), busy);
            assert_eq!(message.state(), Some(ContainerState::Frozen));
        }
        ReadOutcome::TimedOut => panic!("No event received"),
    }

    busy_forwarder.join().unwrap();
}
