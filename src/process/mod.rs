//! Liveness probing and graceful-then-forced termination.
//!
//! Everything above this module talks to a [`ProcessController`]; the
//! platform implementation is picked once by [`platform_controller`].

use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

pub const KILL_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_GRACEFUL_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of asking a process to exit on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopRequest {
    Sent,
    /// The platform has no graceful termination signal.
    Unsupported,
    /// Delivery failed, usually because the pid is already gone.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    AlreadyStopped,
    Exited,
    ForceKilled,
}

pub trait ProcessController: Send + Sync {
    /// True iff the pid exists and can be signalled. Never has side effects.
    fn is_running(&self, pid: u32) -> bool;

    fn request_stop(&self, pid: u32) -> StopRequest;

    /// Unconditional kill. Waits for the process to go away where possible;
    /// errors are swallowed.
    fn force_kill(&self, pid: u32);
}

pub fn platform_controller() -> Box<dyn ProcessController> {
    #[cfg(unix)]
    {
        Box::new(unix::UnixController)
    }

    #[cfg(windows)]
    {
        Box::new(windows::WindowsController)
    }
}

pub fn graceful_kill(
    controller: &dyn ProcessController,
    pid: u32,
    timeout: Duration,
) -> KillOutcome {
    graceful_kill_with_tick(controller, pid, timeout, KILL_POLL_INTERVAL)
}

fn graceful_kill_with_tick(
    controller: &dyn ProcessController,
    pid: u32,
    timeout: Duration,
    tick: Duration,
) -> KillOutcome {
    if !controller.is_running(pid) {
        return KillOutcome::AlreadyStopped;
    }

    match controller.request_stop(pid) {
        StopRequest::Sent => {}
        StopRequest::Failed => return KillOutcome::AlreadyStopped,
        StopRequest::Unsupported => {
            tracing::debug!(pid, "no graceful stop on this platform, killing");
            controller.force_kill(pid);
            return KillOutcome::ForceKilled;
        }
    }

    let deadline = Instant::now() + timeout;
    loop {
        thread::sleep(tick);
        if !controller.is_running(pid) {
            return KillOutcome::Exited;
        }
        if Instant::now() >= deadline {
            tracing::debug!(pid, ?timeout, "graceful stop timed out, killing");
            controller.force_kill(pid);
            return KillOutcome::ForceKilled;
        }
    }
}

/// Detaches a background child from the invoking terminal.
#[cfg(unix)]
pub fn apply_detach_settings(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(windows)]
pub fn apply_detach_settings(command: &mut Command) {
    windows::apply_spawn_settings(command);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Scripted controller: the process "exits" after `exits_after` liveness
    /// probes that follow the stop request, or never when `None`.
    struct FakeController {
        alive: Mutex<bool>,
        exits_after: Option<usize>,
        probes_after_stop: Mutex<Option<usize>>,
        stop_request: StopRequest,
        force_kills: Mutex<usize>,
    }

    impl FakeController {
        fn new(alive: bool, exits_after: Option<usize>, stop_request: StopRequest) -> Self {
            Self {
                alive: Mutex::new(alive),
                exits_after,
                probes_after_stop: Mutex::new(None),
                stop_request,
                force_kills: Mutex::new(0),
            }
        }

        fn force_kills(&self) -> usize {
            *self.force_kills.lock().unwrap()
        }
    }

    impl ProcessController for FakeController {
        fn is_running(&self, _pid: u32) -> bool {
            let mut probes = self.probes_after_stop.lock().unwrap();
            if let Some(count) = probes.as_mut() {
                *count += 1;
                if self.exits_after.is_some_and(|limit| *count >= limit) {
                    *self.alive.lock().unwrap() = false;
                }
            }
            *self.alive.lock().unwrap()
        }

        fn request_stop(&self, _pid: u32) -> StopRequest {
            *self.probes_after_stop.lock().unwrap() = Some(0);
            self.stop_request
        }

        fn force_kill(&self, _pid: u32) {
            *self.force_kills.lock().unwrap() += 1;
            *self.alive.lock().unwrap() = false;
        }
    }

    const TICK: Duration = Duration::from_millis(1);

    #[test]
    fn dead_pid_is_a_no_op() {
        let controller = FakeController::new(false, None, StopRequest::Sent);
        let outcome = graceful_kill_with_tick(&controller, 7, Duration::from_millis(50), TICK);
        assert_eq!(outcome, KillOutcome::AlreadyStopped);
        assert_eq!(controller.force_kills(), 0);
    }

    #[test]
    fn voluntary_exit_skips_force_kill() {
        let controller = FakeController::new(true, Some(3), StopRequest::Sent);
        let outcome = graceful_kill_with_tick(&controller, 7, Duration::from_secs(5), TICK);
        assert_eq!(outcome, KillOutcome::Exited);
        assert_eq!(controller.force_kills(), 0);
    }

    #[test]
    fn stubborn_process_is_force_killed_after_timeout() {
        let controller = FakeController::new(true, None, StopRequest::Sent);
        let started = Instant::now();
        let outcome = graceful_kill_with_tick(&controller, 7, Duration::from_millis(30), TICK);
        assert_eq!(outcome, KillOutcome::ForceKilled);
        assert_eq!(controller.force_kills(), 1);
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(!controller.is_running(7));
    }

    #[test]
    fn unsupported_graceful_stop_kills_immediately() {
        let controller = FakeController::new(true, None, StopRequest::Unsupported);
        let outcome = graceful_kill_with_tick(&controller, 7, Duration::from_secs(60), TICK);
        assert_eq!(outcome, KillOutcome::ForceKilled);
        assert_eq!(controller.force_kills(), 1);
    }

    #[test]
    fn failed_stop_request_counts_as_stopped() {
        let controller = FakeController::new(true, None, StopRequest::Failed);
        let outcome = graceful_kill_with_tick(&controller, 7, Duration::from_secs(60), TICK);
        assert_eq!(outcome, KillOutcome::AlreadyStopped);
        assert_eq!(controller.force_kills(), 0);
    }
}
