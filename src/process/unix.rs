use nix::sys::signal::{Signal, kill};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;
use std::thread;
use std::time::{Duration, Instant};
use sysinfo::{ProcessRefreshKind, ProcessStatus, System};

use super::{ProcessController, StopRequest};

const REAP_TIMEOUT: Duration = Duration::from_secs(1);
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct UnixController;

impl ProcessController for UnixController {
    fn is_running(&self, pid: u32) -> bool {
        let Some(target) = to_pid(pid) else {
            return false;
        };
        kill(target, None).is_ok() && !is_zombie(pid)
    }

    fn request_stop(&self, pid: u32) -> StopRequest {
        match to_pid(pid).map(|target| kill(target, Signal::SIGTERM)) {
            Some(Ok(())) => StopRequest::Sent,
            _ => StopRequest::Failed,
        }
    }

    fn force_kill(&self, pid: u32) {
        let Some(target) = to_pid(pid) else {
            return;
        };
        if kill(target, Signal::SIGKILL).is_err() {
            return;
        }

        // Our own child is reaped directly; anyone else's is waited on.
        if waitpid(target, None).is_err() {
            let deadline = Instant::now() + REAP_TIMEOUT;
            while Instant::now() < deadline && self.is_running(pid) {
                thread::sleep(REAP_POLL_INTERVAL);
            }
        }
    }
}

// pid 0 and negative pids address process groups, never a single process.
fn to_pid(pid: u32) -> Option<Pid> {
    i32::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .map(Pid::from_raw)
}

// Only the one pid is refreshed; this runs on every poll tick.
fn is_zombie(pid: u32) -> bool {
    let pid = sysinfo::Pid::from_u32(pid);
    let mut system = System::new();
    if !system.refresh_process_specifics(pid, ProcessRefreshKind::new()) {
        return false;
    }
    matches!(
        system.process(pid).map(|process| process.status()),
        Some(ProcessStatus::Zombie | ProcessStatus::Dead)
    )
}
