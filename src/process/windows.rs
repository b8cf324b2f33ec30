use std::os::windows::process::CommandExt;
use std::process::{Command, Stdio};
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, System};

use super::{ProcessController, StopRequest};

const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

pub fn apply_spawn_settings(command: &mut Command) {
    command.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

pub struct WindowsController;

impl ProcessController for WindowsController {
    fn is_running(&self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        let mut system = System::new();
        if !system.refresh_process_specifics(pid, ProcessRefreshKind::new()) {
            return false;
        }
        match system.process(pid) {
            Some(process) => !matches!(
                process.status(),
                ProcessStatus::Zombie | ProcessStatus::Dead
            ),
            None => false,
        }
    }

    fn request_stop(&self, _pid: u32) -> StopRequest {
        StopRequest::Unsupported
    }

    fn force_kill(&self, pid: u32) {
        let _ = Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}
