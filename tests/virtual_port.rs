//! End-to-end tests against the built binary.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const PORT_PREFIX: &str = "Virtual COM Port: ";

struct Running {
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr: JoinHandle<String>,
    path: PathBuf,
}

fn start(args: &[&str]) -> Running {
    let mut child = Command::new(env!("CARGO_BIN_EXE_vcom-echo"))
        .args(args)
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to start vcom-echo");

    // Drain the log continuously so a chatty run never blocks on a full pipe.
    let mut log = child.stderr.take().unwrap();
    let stderr = thread::spawn(move || {
        let mut out = String::new();
        let _ = log.read_to_string(&mut out);
        out
    });

    let mut stdout = BufReader::new(child.stdout.take().unwrap());
    let mut line = String::new();
    stdout.read_line(&mut line).unwrap();
    let path = line
        .trim_end()
        .strip_prefix(PORT_PREFIX)
        .unwrap_or_else(|| panic!("unexpected first line: {line:?}"))
        .into();

    Running {
        child,
        stdout,
        stderr,
        path,
    }
}

fn open_client(path: &PathBuf) -> File {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY)
        .open(path)
        .expect("announced path should be openable")
}

fn signal(child: &Child, sig: libc::c_int) {
    // SAFETY: plain kill(2) on a child we spawned.
    let rc = unsafe { libc::kill(child.id() as libc::pid_t, sig) };
    assert_eq!(rc, 0);
}

fn wait_with_timeout(child: &mut Child, limit: Duration) -> ExitStatus {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            panic!("vcom-echo did not exit within {limit:?}");
        }
        thread::sleep(Duration::from_millis(10));
    }
}

fn remaining_output(stdout: &mut BufReader<ChildStdout>) -> String {
    let mut rest = String::new();
    stdout.read_to_string(&mut rest).unwrap();
    rest
}

#[test]
fn raw_echo_then_sigint_exits_cleanly() {
    let mut running = start(&["--delay-ms", "50", "--mode", "raw"]);
    let mut client = open_client(&running.path);

    let sent_at = Instant::now();
    client.write_all(&[0x41, 0x42]).unwrap();
    let mut reply = [0u8; 2];
    client.read_exact(&mut reply).unwrap();

    assert!(sent_at.elapsed() >= Duration::from_millis(50));
    assert_eq!(reply, [0x41, 0x42]);

    signal(&running.child, libc::SIGINT);
    let status = wait_with_timeout(&mut running.child, Duration::from_secs(5));
    assert_eq!(status.code(), Some(0));
    assert!(remaining_output(&mut running.stdout).contains("Exiting"));

    let log = running.stderr.join().unwrap();
    assert!(log.contains("received: 41 42"), "log was: {log}");
}

#[test]
fn prefixed_echo_then_sigterm_exits_cleanly() {
    let mut running = start(&["--delay-ms", "10", "--mode", "prefixed", "--log-format", "text"]);
    let mut client = open_client(&running.path);

    client.write_all(b"hi").unwrap();
    let mut reply = [0u8; 8];
    client.read_exact(&mut reply).unwrap();
    assert_eq!(&reply, b"Echo: hi");

    signal(&running.child, libc::SIGTERM);
    let status = wait_with_timeout(&mut running.child, Duration::from_secs(5));
    assert_eq!(status.code(), Some(0));
    assert!(remaining_output(&mut running.stdout).contains("Exiting"));
}

#[test]
fn interrupt_while_idle_does_not_hang() {
    let mut running = start(&[]);

    // No client ever writes, so the responder sits in its read.
    thread::sleep(Duration::from_millis(100));
    signal(&running.child, libc::SIGINT);

    let status = wait_with_timeout(&mut running.child, Duration::from_secs(5));
    assert_eq!(status.code(), Some(0));
    assert!(remaining_output(&mut running.stdout).contains("Exiting"));
}

#[test]
fn interrupt_with_unread_replies_does_not_hang() {
    let mut running = start(&["--delay-ms", "0"]);
    let mut client = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
        .open(&running.path)
        .unwrap();

    // Keep writing without ever reading the replies until the slave's
    // input queue is full and the responder is stuck in its write.
    let chunk = [b'x'; 256];
    let mut written = 0usize;
    let until = Instant::now() + Duration::from_millis(1500);
    while Instant::now() < until {
        match client.write(&chunk) {
            Ok(n) => written += n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(5));
            }
            Err(e) => panic!("client write failed: {e}"),
        }
    }
    assert!(written > 0);

    signal(&running.child, libc::SIGINT);
    let status = wait_with_timeout(&mut running.child, Duration::from_secs(5));
    assert_eq!(status.code(), Some(0));
    assert!(remaining_output(&mut running.stdout).contains("Exiting"));
}

#[test]
fn invalid_config_exits_nonzero() {
    let status = Command::new(env!("CARGO_BIN_EXE_vcom-echo"))
        .args(["--buffer-size", "0"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));
}
