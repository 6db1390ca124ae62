//! Failure-path tests against a scripted stand-in daemon.
//!
//! A minimal unix-socket HTTP server plays the docker API with injected
//! faults (a start call that fails, an exec peer that never reads) which a
//! real daemon cannot be made to produce on demand. Every request is
//! logged so the tests can assert on the engine's cleanup traffic.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

use crucible_common::types::{ExecutionRequest, Language};

use crate::config::EngineConfig;
use crate::docker::ContainerRegistry;
use crate::executor::{ExecutionMode, Executor};

/// Scripted response to `POST /containers/{name}/start`.
#[derive(Clone, Copy)]
enum StartBehavior {
    Ok,
    Fail,
}

struct FakeDaemon {
    socket_path: std::path::PathBuf,
    log: Arc<Mutex<Vec<String>>>,
}

impl FakeDaemon {
    fn spawn(start: StartBehavior) -> Self {
        let socket_path = std::env::temp_dir().join(format!(
            "crucible-test-{}.sock",
            uuid::Uuid::new_v4().simple()
        ));
        let listener = UnixListener::bind(&socket_path).expect("bind test socket");
        let log: Arc<Mutex<Vec<String>>> = Arc::default();
        let exec_counter = Arc::new(AtomicUsize::new(0));

        let accept_log = log.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(serve(
                    stream,
                    accept_log.clone(),
                    start,
                    exec_counter.clone(),
                ));
            }
        });

        Self { socket_path, log }
    }

    fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn executor(&self) -> Executor {
        let config = EngineConfig {
            docker_socket: self.socket_path.to_string_lossy().into_owned(),
            run_timeout_ms: 300,
            stdin_settle_ms: 10,
            ..EngineConfig::default()
        };
        Executor::new(config, ContainerRegistry::default(), ExecutionMode::Ephemeral)
            .expect("client construction needs no live socket")
    }
}

impl Drop for FakeDaemon {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

async fn serve(
    mut stream: UnixStream,
    log: Arc<Mutex<Vec<String>>>,
    start: StartBehavior,
    exec_counter: Arc<AtomicUsize>,
) {
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let Some((method, path)) = read_request(&mut stream, &mut pending).await else {
            return;
        };
        log.lock().unwrap().push(format!("{method} {path}"));
        let route = path.split('?').next().unwrap_or_default().to_string();

        if method == "DELETE" {
            respond(&mut stream, "204 No Content", "").await;
        } else if route.ends_with("/containers/create") {
            respond(&mut stream, "201 Created", r#"{"Id":"c1","Warnings":[]}"#).await;
        } else if route.contains("/exec/") && route.ends_with("/start") {
            let upgrade =
                "HTTP/1.1 101 UPGRADED\r\nConnection: Upgrade\r\nUpgrade: tcp\r\n\r\n";
            let _ = stream.write_all(upgrade.as_bytes()).await;
            let _ = stream.flush().await;
            if route.contains("/exec/exec-1/") {
                // Source injection: no output, clean close.
                return;
            }
            // The sandboxed run: hold the connection open and stop
            // reading, so the peer's stdin write can only ever block.
            tokio::time::sleep(Duration::from_secs(30)).await;
            return;
        } else if route.contains("/exec/") && route.ends_with("/json") {
            respond(&mut stream, "200 OK", r#"{"Running":false,"ExitCode":0}"#).await;
        } else if route.ends_with("/exec") {
            let n = exec_counter.fetch_add(1, Ordering::SeqCst) + 1;
            let body = format!(r#"{{"Id":"exec-{n}"}}"#);
            respond(&mut stream, "201 Created", &body).await;
        } else if route.ends_with("/start") {
            match start {
                StartBehavior::Ok => respond(&mut stream, "204 No Content", "").await,
                StartBehavior::Fail => {
                    respond(
                        &mut stream,
                        "500 Internal Server Error",
                        r#"{"message":"start failed"}"#,
                    )
                    .await
                }
            }
        } else if route.ends_with("/stop") {
            respond(&mut stream, "204 No Content", "").await;
        } else {
            respond(&mut stream, "200 OK", "{}").await;
        }
    }
}

/// Read one request head plus its content-length body; bytes past the
/// request stay in `pending` for the next call.
async fn read_request(
    stream: &mut UnixStream,
    pending: &mut Vec<u8>,
) -> Option<(String, String)> {
    let mut buf = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = find_subslice(pending, b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        pending.extend_from_slice(&buf[..n]);
    };

    let head: Vec<u8> = pending.drain(..head_end).collect();
    let head = String::from_utf8_lossy(&head).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while pending.len() < content_length {
        let n = stream.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        pending.extend_from_slice(&buf[..n]);
    }
    pending.drain(..content_length);
    Some((method, path))
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn respond(stream: &mut UnixStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.flush().await;
}

#[tokio::test]
async fn failed_start_still_removes_the_created_container() {
    let daemon = FakeDaemon::spawn(StartBehavior::Fail);
    let executor = daemon.executor();
    let request = ExecutionRequest::new("print(1)", Language::Python);

    let result = executor.execute(&request).await.unwrap();
    assert_eq!(result.stdout, "");
    assert!(result.stderr.contains("start failed"));

    // Removal runs from a spawned guard; poll until it lands. The
    // defensive pre-remove happens before create, so only a DELETE after
    // the failed start counts.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        let entries = daemon.entries();
        let started_at = entries
            .iter()
            .position(|e| e.starts_with("POST") && e.contains("/start"));
        let removed_after = started_at.is_some_and(|at| {
            entries[at..]
                .iter()
                .any(|e| e.starts_with("DELETE") && e.contains("/containers/crucible-"))
        });
        if removed_after {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "container created but never removed after start failed: {entries:?}"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn stdin_flood_still_honors_the_run_budget() {
    let daemon = FakeDaemon::spawn(StartBehavior::Ok);
    let executor = daemon.executor();
    // Far more than any socket buffer holds, fed to a peer that never
    // reads: the write itself has to be covered by the wall-clock budget.
    let request = ExecutionRequest::new("data = input()", Language::Python)
        .with_stdin("x".repeat(2 * 1024 * 1024));

    let result = tokio::time::timeout(Duration::from_secs(5), executor.execute(&request))
        .await
        .expect("run must resolve within its budget even when stdin backs up")
        .unwrap();

    assert_eq!(result.stdout, "");
    assert_eq!(result.stderr, "Execution timed out");
}
