//! Process discovery and termination

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Grace period after SIGKILL before giving up on a process
pub const KILL_GRACE: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Pids of all processes whose root, working directory, executable or any
/// open file lies under `dir`, ascending
#[must_use]
pub fn directory_pids(dir: &Path) -> Vec<i32> {
    debug!(dir = %dir.display(), "scanning for processes");
    let dir = std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
    let Ok(entries) = std::fs::read_dir("/proc") else {
        warn!("/proc is not available, cannot list processes");
        return Vec::new();
    };

    let mut pids = BTreeSet::new();
    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|name| name.parse::<i32>().ok()) else {
            continue;
        };
        if process_uses_dir(&entry.path(), &dir) {
            pids.insert(pid);
        }
    }
    pids.into_iter().collect()
}

fn process_uses_dir(proc_dir: &Path, dir: &Path) -> bool {
    let under = |link: &Path| std::fs::read_link(link).is_ok_and(|target| target.starts_with(dir));

    if ["root", "cwd", "exe"]
        .iter()
        .any(|name| under(&proc_dir.join(name)))
    {
        return true;
    }
    std::fs::read_dir(proc_dir.join("fd"))
        .map(|fds| fds.flatten().any(|fd| under(&fd.path())))
        .unwrap_or(false)
}

/// Whether a process with `pid` exists and is not a zombie
#[must_use]
pub fn is_pid_running(pid: i32) -> bool {
    if kill(Pid::from_raw(pid), None).is_err() {
        return false;
    }
    process_state(pid) != Some('Z')
}

fn process_state(pid: i32) -> Option<char> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // The command name may contain spaces and parentheses
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().next()?.chars().next()
}

/// Command line of a process, arguments separated by spaces
#[must_use]
pub fn pid_command(pid: i32) -> Option<String> {
    let raw = std::fs::read(format!("/proc/{pid}/cmdline")).ok()?;
    let args: Vec<String> = raw
        .split(|b| *b == 0)
        .filter(|arg| !arg.is_empty())
        .map(|arg| String::from_utf8_lossy(arg).into_owned())
        .collect();
    (!args.is_empty()).then(|| args.join(" "))
}

/// Wait for a process to die. After `kill_after` it is sent SIGKILL, and
/// after a further [`KILL_GRACE`] the wait is abandoned.
pub async fn wait_for_pid(pid: i32, kill_after: Duration) {
    let started = Instant::now();
    let mut deadline = started + kill_after;
    let mut killed = false;
    while is_pid_running(pid) {
        if Instant::now() >= deadline {
            if killed {
                warn!(pid, "process survived SIGKILL, giving up");
                return;
            }
            info!(pid, elapsed = ?started.elapsed(), "process did not terminate, sending SIGKILL");
            if kill(Pid::from_raw(pid), Signal::SIGKILL).is_err() {
                return;
            }
            killed = true;
            deadline = Instant::now() + KILL_GRACE;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Terminate a process with SIGTERM, escalating to SIGKILL after `timeout`.
/// The calling process is never signalled.
pub async fn kill_pid(pid: i32, timeout: Duration) {
    if u32::try_from(pid).is_ok_and(|pid| pid == std::process::id()) {
        debug!(pid, "refusing to kill own process");
        return;
    }
    let command = pid_command(pid);
    info!(pid, command = command.as_deref().unwrap_or("N/A"), "sending SIGTERM");
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        debug!(pid, error = %e, "process already gone");
        return;
    }
    wait_for_pid(pid, timeout).await;
}
