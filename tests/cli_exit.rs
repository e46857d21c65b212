//! Exit status of the `nano-tcp-relay` binary.

use std::io::Write;
use std::net::TcpListener;
use std::process::{Command, Output, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(10);

fn relay(args: &[&str]) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_nano-tcp-relay"));
    command
        .args(args)
        .env_remove("RUST_LOG")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    command
}

/// Run to completion, feeding `input` on stdin and then closing it.
fn run(mut command: Command, input: &str) -> Output {
    let mut child = command.stdin(Stdio::piped()).spawn().unwrap();
    let mut stdin = child.stdin.take().unwrap();
    stdin.write_all(input.as_bytes()).unwrap();
    drop(stdin);

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(child.wait_with_output());
    });
    rx.recv_timeout(TIMEOUT)
        .expect("relay did not exit")
        .unwrap()
}

fn free_port() -> u16 {
    TcpListener::bind("0.0.0.0:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[test]
fn test_localhost_self_forward_exits_with_usage() {
    let port = free_port().to_string();
    let output = run(relay(&["localhost", &port]), "");

    assert_eq!(output.status.code(), Some(64));
    let stderr = text(&output.stderr);
    assert!(stderr.contains("Localhost infinite loop is dangerous"), "{stderr}");
    assert!(stderr.contains("Usage:"), "{stderr}");
    assert!(!text(&output.stdout).contains("[listen]"));
}

#[test]
fn test_invalid_port_exits_with_usage() {
    let output = run(relay(&["127.0.0.1", "70000"]), "");

    assert_eq!(output.status.code(), Some(64));
    assert!(!text(&output.stdout).contains("[listen]"));
}

#[test]
fn test_missing_host_exits_with_usage() {
    let output = run(relay(&[]), "");

    assert_eq!(output.status.code(), Some(64));
    assert!(text(&output.stderr).contains("Usage:"));
}

#[test]
fn test_bind_failure_at_startup_exits_70() {
    let taken = TcpListener::bind("0.0.0.0:0").unwrap();
    let taken_port = taken.local_addr().unwrap().port();
    let first = free_port();

    let output = run(
        relay(&["127.0.0.1", &format!("{first}-1"), &format!("{taken_port}-2")]),
        "",
    );

    assert_eq!(output.status.code(), Some(70));
    assert!(text(&output.stderr).contains("failed to bind"));
    assert!(text(&output.stdout).contains(&format!("[listen] {first} (--> 1)")));
    assert!(TcpListener::bind(("0.0.0.0", first)).is_ok());
}

#[test]
fn test_quit_exits_0() {
    let port = free_port();
    let output = run(relay(&["127.0.0.1", &format!("{port}-1")]), "l\nq\n");

    assert_eq!(output.status.code(), Some(0));
    let stdout = text(&output.stdout);
    assert!(stdout.contains(&format!("[listen] {port} (--> 1)")), "{stdout}");
    assert!(stdout.contains(&format!("{port}-1\n")), "{stdout}");
}

#[test]
fn test_end_of_input_exits_0() {
    let port = free_port();
    let output = run(relay(&["127.0.0.1", &format!("{port}-1")]), "");

    assert_eq!(output.status.code(), Some(0));
    assert!(text(&output.stdout).contains("COMMAND> "));
}
