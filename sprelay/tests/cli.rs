//! Tests against the built `sprelay` binary.

#![cfg(unix)]

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn sprelay() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_sprelay"));
    cmd.env("SPRELAY_ENV", "test").env_remove("RUST_LOG");
    cmd
}

fn free_endpoint() -> String {
    let port = portpicker::pick_unused_port().expect("no free port");
    format!("tcp://127.0.0.1:{}", port)
}

fn write_config(dir: &Path, pub_ep: &str, sub_ep: &str) -> PathBuf {
    let pidfile = dir.join("sprelay.pid");
    write_config_with_pidfile(dir, pub_ep, sub_ep, &pidfile.display().to_string())
}

fn write_config_with_pidfile(dir: &Path, pub_ep: &str, sub_ep: &str, pidfile: &str) -> PathBuf {
    let path = dir.join("config.toml");
    fs::write(
        &path,
        format!(
            "[test]\npub_endpoint = \"{}\"\nsub_endpoint = \"{}\"\npidfile = \"{}\"\nmaxprocs = 1\n",
            pub_ep, sub_ep, pidfile
        ),
    )
    .unwrap();
    path
}

/// Wait for the daemon to finish writing `pidfile` and return the pid.
fn wait_for_pid(pidfile: &Path) -> i32 {
    for _ in 0..100 {
        if let Ok(text) = fs::read_to_string(pidfile) {
            if text.ends_with('\n') {
                return text.trim().parse().unwrap();
            }
        }
        thread::sleep(Duration::from_millis(50));
    }
    panic!("pid file {} not written", pidfile.display());
}

fn stop(pid: i32) {
    let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
}

#[test]
fn test_unknown_flag_prints_usage() {
    let out = sprelay().arg("--bogus").output().unwrap();
    assert_eq!(out.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("Usage"), "stderr: {}", stderr);
}

#[test]
fn test_unsupported_endpoint_exits_with_failure() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), "ipc:///tmp/sprelay-test.ipc", &free_endpoint());

    let out = sprelay().arg("-c").arg(&config).output().unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(!tmp.path().join("sprelay.pid").exists());
}

#[test]
fn test_daemon_mode_detaches_and_writes_pidfile() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), &free_endpoint(), &free_endpoint());
    let pidfile = tmp.path().join("sprelay.pid");

    let status = sprelay().arg("-d").arg("-c").arg(&config).status().unwrap();
    assert!(status.success(), "foreground parent should exit 0");

    let pid = wait_for_pid(&pidfile);
    let alive = kill(Pid::from_raw(pid), None).is_ok();
    let mode = fs::metadata(&pidfile).unwrap().permissions().mode() & 0o777;
    stop(pid);

    assert!(alive, "daemon not running");
    // The daemon runs with umask 0; the file must still not be writable by others
    assert_eq!(mode & 0o022, 0, "pid file mode {:o}", mode);
}

#[test]
fn test_relative_pidfile_lands_in_launch_directory() {
    let tmp = TempDir::new().unwrap();
    let name = format!("sprelay-rel-{}.pid", std::process::id());
    let config = write_config_with_pidfile(tmp.path(), &free_endpoint(), &free_endpoint(), &name);

    let status = sprelay()
        .current_dir(tmp.path())
        .arg("-d")
        .arg("-c")
        .arg(&config)
        .status()
        .unwrap();
    assert!(status.success());

    let pid = wait_for_pid(&tmp.path().join(&name));
    stop(pid);
    assert!(!Path::new("/").join(&name).exists());
}

#[test]
fn test_live_pidfile_refused_before_detaching() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), &free_endpoint(), &free_endpoint());
    let pidfile = tmp.path().join("sprelay.pid");

    let mut holder = Command::new("sleep").arg("30").spawn().unwrap();
    fs::write(&pidfile, format!("{}\n", holder.id())).unwrap();

    let out = sprelay().arg("-d").arg("-c").arg(&config).output().unwrap();
    let recorded = fs::read_to_string(&pidfile).unwrap();
    holder.kill().unwrap();
    holder.wait().unwrap();

    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("still running"));
    assert_eq!(recorded.trim(), holder.id().to_string());
}
