//! End-to-end checks against the compiled binary.

use std::io::Write;
use std::process::{Command, Output};
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const BIN: &str = env!("CARGO_BIN_EXE_scarebox");

fn scarebox(args: &[&str]) -> Output {
    Command::new(BIN)
        .args(args)
        .output()
        .expect("failed to spawn scarebox")
}

fn yaml(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

// ============================================================================
// version / config
// ============================================================================

#[test]
fn version_prints_name_and_semver() {
    let output = scarebox(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("scarebox "), "unexpected output: {stdout}");
    assert_eq!(stdout.trim().split('.').count(), 3);
}

#[test]
fn config_validate_accepts_a_good_file() {
    let file = yaml("mode: adult\ntiming:\n  countdown_duration: 5\n");
    let output = scarebox(&["--quiet", "config", "validate", "--config", file.path().to_str().unwrap()]);
    assert!(
        output.status.success(),
        "validate should exit 0: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("OK"));
}

#[test]
fn config_validate_exits_with_config_error() {
    let file = yaml("timing:\n  reset_duration: 0\n");
    let output = scarebox(&["--quiet", "config", "validate", "--config", file.path().to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("timing.reset_duration"),
        "stderr should name the field: {stderr}"
    );
}

#[test]
fn config_show_fills_in_defaults() {
    let file = yaml("mode: adult\n");
    let output = scarebox(&["--quiet", "config", "show", "--config", file.path().to_str().unwrap()]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("mode: adult"));
    assert!(stdout.contains("countdown_duration"));
}

#[test]
fn run_rejects_a_bad_bind_address() {
    let file = yaml("{}\n");
    let output = scarebox(&[
        "--quiet",
        "run",
        "--config",
        file.path().to_str().unwrap(),
        "--bind",
        "not-an-address",
    ]);
    assert_eq!(output.status.code(), Some(64));
}

// ============================================================================
// run
// ============================================================================

async fn http_get(port: u16, path: &str) -> Option<String> {
    let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port)).await.ok()?;
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.ok()?;
    let mut response = String::new();
    stream.read_to_string(&mut response).await.ok()?;
    Some(response)
}

#[tokio::test]
async fn run_serves_the_api() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let file = yaml("mode: child\n");

    let mut child = tokio::process::Command::new(BIN)
        .args([
            "--quiet",
            "run",
            "--config",
            file.path().to_str().unwrap(),
            "--bind",
            &format!("127.0.0.1:{port}"),
            "--no-autostart",
        ])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .expect("failed to spawn scarebox");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let response = loop {
        if let Some(response) = http_get(port, "/api/state").await {
            break response;
        }
        assert!(tokio::time::Instant::now() < deadline, "server never came up");
        tokio::time::sleep(Duration::from_millis(50)).await;
    };

    assert!(response.starts_with("HTTP/1.1 200"), "unexpected: {response}");
    assert!(response.contains(r#""phase":"idle""#));
    assert!(response.contains(r#""running":false"#));

    child.kill().await.unwrap();
}
