//! Tests for the `swarm-controller` binary.

use std::io::Write;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_stop_command_exits_while_stdin_stays_open() {
    let mut child = Command::new(env!("CARGO_BIN_EXE_swarm-controller"))
        .env("SWARM_TICK_MS", "50")
        .env("SWARM_LOG_LEVEL", "warn")
        .env_remove("RUST_LOG")
        .env_remove("SWARM_TOPOLOGY_FILE")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let mut stdin = child.stdin.take().unwrap();
    stdin.write_all(b"{\"action\":\"run\",\"key\":\"stop\"}\n").unwrap();
    stdin.flush().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break Some(status);
        }
        if Instant::now() >= deadline {
            break None;
        }
        thread::sleep(Duration::from_millis(20));
    };

    let Some(status) = status else {
        let _ = child.kill();
        let _ = child.wait();
        panic!("controller still running after stop with stdin open");
    };
    assert!(status.success());
    drop(stdin);
}
