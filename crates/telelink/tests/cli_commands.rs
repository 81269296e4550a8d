#![cfg(feature = "cli")]

use std::io::Read;
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::Command;
use std::thread;

fn telelink() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_telelink"));
    cmd.arg("--log-level").arg("error");
    cmd
}

fn temp_file(tag: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "telelink-cli-{tag}-{}-{}.json",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::write(&path, contents).expect("temp file should be writable");
    path
}

#[test]
fn version_prints_package_version() {
    let output = telelink().arg("version").output().expect("version should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("telelink "));
}

#[test]
fn send_writes_one_stream_frame() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
    let addr = listener.local_addr().unwrap();
    let reader = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept should succeed");
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes).expect("read should succeed");
        bytes
    });

    let status = telelink()
        .args(["send", &addr.to_string(), "--id", "0x11", "--hex", "5a01"])
        .status()
        .expect("send should run");
    assert!(status.success());
    assert_eq!(reader.join().unwrap(), vec![0x11, 0, 0, 0, 2, 0x5A, 0x01]);
}

#[test]
fn send_control_command() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
    let addr = listener.local_addr().unwrap();
    let reader = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept should succeed");
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes).expect("read should succeed");
        bytes
    });

    let status = telelink()
        .args(["send", &addr.to_string(), "--command", "reconfigure"])
        .status()
        .expect("send should run");
    assert!(status.success());
    assert_eq!(reader.join().unwrap(), vec![0xFF, 0, 0, 0, 1, 3]);
}

#[test]
fn send_to_closed_port_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let output = telelink()
        .args(["send", &addr.to_string(), "--id", "1"])
        .output()
        .expect("send should run");
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn invalid_host_config_returns_60() {
    let config = temp_file(
        "bad-host",
        r#"{ "records": [ { "identifier": 0, "element_type": "uint8", "length": 1 } ] }"#,
    );
    let output = telelink()
        .args(["host", "--config"])
        .arg(&config)
        .output()
        .expect("host should run");
    assert_eq!(output.status.code(), Some(60));
    let _ = std::fs::remove_file(&config);
}

#[test]
fn unparsable_field_config_returns_60() {
    let config = temp_file("garbled-field", "{ not json");
    let output = telelink()
        .args(["field", "--config"])
        .arg(&config)
        .output()
        .expect("field should run");
    assert_eq!(output.status.code(), Some(60));
    let _ = std::fs::remove_file(&config);
}
