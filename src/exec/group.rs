// src/exec/group.rs

//! Signals addressed to a whole process group.
//!
//! Builds and managed processes are spawned with `process_group(0)`, so the
//! child's pid is also the id of the group holding everything it forks.
//! Signalling the group reaches those descendants too.

#[cfg(unix)]
use tracing::{debug, warn};

/// Ask every process in the group to exit (SIGTERM).
#[cfg(unix)]
pub fn terminate_group(pid: u32) {
    signal_group(pid, nix::sys::signal::Signal::SIGTERM);
}

/// Kill every process still left in the group (SIGKILL).
#[cfg(unix)]
pub fn kill_group(pid: u32) {
    signal_group(pid, nix::sys::signal::Signal::SIGKILL);
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        warn!(pid, "pid out of range; cannot signal process group");
        return;
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) => debug!(pid, ?signal, "signalled process group"),
        // Nothing left in the group.
        Err(Errno::ESRCH) => {}
        Err(err) => warn!(pid, ?signal, error = %err, "failed to signal process group"),
    }
}

#[cfg(not(unix))]
pub fn terminate_group(_pid: u32) {}

#[cfg(not(unix))]
pub fn kill_group(_pid: u32) {}
