#![cfg(feature = "cli")]

use std::io::Read;
use std::net::TcpListener;
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn pamlink() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_pamlink"));
    cmd.arg("--log-level").arg("error");
    cmd
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .expect("ephemeral port should be available")
        .port()
}

fn wait_with_timeout(mut child: Child, timeout: Duration) -> Output {
    let start = Instant::now();
    loop {
        match child.try_wait().expect("child status should be readable") {
            Some(_) => return child.wait_with_output().expect("child output"),
            None if start.elapsed() >= timeout => {
                let _ = child.kill();
                let output = child.wait_with_output().expect("child output");
                panic!(
                    "child did not exit in time; stderr: {}",
                    String::from_utf8_lossy(&output.stderr)
                );
            }
            None => thread::sleep(Duration::from_millis(25)),
        }
    }
}

fn json_line(stdout: &[u8]) -> serde_json::Value {
    let text = String::from_utf8_lossy(stdout);
    let line = text.lines().next().expect("command should print a line");
    serde_json::from_str(line).expect("output should be JSON")
}

#[test]
fn version_prints_package_version() {
    let output = pamlink().arg("version").output().expect("version should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("pamlink {}", env!("CARGO_PKG_VERSION")));
}

#[test]
fn encode_hi_as_json() {
    let output = pamlink()
        .args(["--format", "json", "encode", "HI"])
        .output()
        .expect("encode should run");
    assert!(output.status.success());

    let value = json_line(&output.stdout);
    assert_eq!(value["symbols"], serde_json::json!([1, 0, 2, 0, 1, 0, 2, 1]));
    assert_eq!(value["wire"], "0100020001000201");
    assert_eq!(value["width"], "pam4");
}

#[test]
fn decode_guesses_width() {
    let output = pamlink()
        .args(["--format", "json", "decode", "1,0,2,0,1,0,2,1"])
        .output()
        .expect("decode should run");
    assert!(output.status.success());

    let value = json_line(&output.stdout);
    assert_eq!(value["text"], "HI");
    assert_eq!(value["width"], "pam4");
    assert_eq!(value["guessed"], true);
}

#[test]
fn decode_rejects_non_numeric_symbols() {
    let output = pamlink()
        .args(["decode", "1,x,2"])
        .output()
        .expect("decode should run");
    assert!(!output.status.success());
}

#[test]
fn relay_rejects_inconsistent_configuration() {
    let output = pamlink()
        .args(["relay", "--slots", "2", "--fallback-slot", "5"])
        .output()
        .expect("relay should run");
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn send_reaches_listener_started_late() {
    let port = free_port();
    let addr = format!("127.0.0.1:{port}");

    let sender = pamlink()
        .args(["--format", "json", "send", &addr, "--text", "hola", "--retry-delay", "100ms"])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("send should start");

    thread::sleep(Duration::from_millis(300));
    let listener = pamlink()
        .args(["--format", "json", "listen", &addr, "--count", "1"])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("listen should start");

    let sent = wait_with_timeout(sender, Duration::from_secs(10));
    assert!(sent.status.success(), "send failed: {}", String::from_utf8_lossy(&sent.stderr));
    assert_eq!(json_line(&sent.stdout)["writes"], 1);

    let heard = wait_with_timeout(listener, Duration::from_secs(10));
    assert!(heard.status.success());
    let value = json_line(&heard.stdout);
    assert_eq!(value["kind"], "text");
    assert_eq!(value["text"], "hola");
    assert_eq!(value["slot"], 1);
}

#[test]
fn relay_forwards_to_sink() {
    let sink = TcpListener::bind("127.0.0.1:0").expect("sink should bind");
    let sink_addr = sink.local_addr().expect("sink addr").to_string();
    let relay_addr = format!("127.0.0.1:{}", free_port());

    let mut relay = pamlink()
        .args(["relay", "--listen", &relay_addr, "--forward", &sink_addr])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("relay should start");

    let sender = pamlink()
        .args(["send", &relay_addr, "--symbols", "3,2,1,0", "--retry-delay", "100ms"])
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("send should start");

    let (mut inbound, _) = sink.accept().expect("relay should dial the sink");
    inbound
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("sink read timeout");
    let mut buf = [0u8; 4];
    inbound.read_exact(&mut buf).expect("sink should receive the chunk");
    assert_eq!(buf, [3, 2, 1, 0]);

    let sent = wait_with_timeout(sender, Duration::from_secs(10));
    assert!(sent.status.success());

    let _ = relay.kill();
    let _ = relay.wait();
}
