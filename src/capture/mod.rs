//! Where a command's stdio goes: a pseudo-terminal, in-memory buffers, the
//! real stdio, or a log file.
//!
//! The strategy is chosen from [`Capabilities`], probed once per invocation,
//! so callers never branch on the platform themselves.

use std::env;
use std::fs::{self, OpenOptions};
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::process;

#[cfg(unix)]
mod pty;

pub const LOG_WAIT_TIMEOUT: Duration = Duration::from_secs(2);
const LOG_WAIT_INTERVAL: Duration = Duration::from_millis(20);

/// Flavour of the `script` transcript recorder found on `PATH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorder {
    /// util-linux: `script -qf -c <cmd> <log>`
    UtilLinux,
    /// BSD/macOS: `script -qF <log> sh -c <cmd>`
    Bsd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// A pseudo-terminal backend exists on this platform.
    pub pty: bool,
    /// Our own stdout is an interactive terminal.
    pub terminal: bool,
    pub recorder: Option<Recorder>,
}

impl Capabilities {
    pub fn probe() -> Self {
        Self {
            pty: cfg!(unix),
            terminal: io::stdout().is_terminal(),
            recorder: probe_recorder(),
        }
    }

    /// Plain pipes and files only, as in CI or with redirected output.
    pub fn plain() -> Self {
        Self {
            pty: false,
            terminal: false,
            recorder: None,
        }
    }
}

fn probe_recorder() -> Option<Recorder> {
    if !cfg!(unix) {
        return None;
    }

    let path = env::var_os("PATH")?;
    let found = env::split_paths(&path).any(|dir| dir.join("script").is_file());
    if !found {
        return None;
    }

    if cfg!(any(
        target_os = "macos",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly"
    )) {
        Some(Recorder::Bsd)
    } else {
        Some(Recorder::UtilLinux)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Foreground {
    /// Child runs on a fresh PTY. Interactive runs relay it to our terminal,
    /// buffered runs collect it.
    Pty { buffered: bool },
    Buffered,
    Direct,
}

impl Foreground {
    pub fn select(caps: &Capabilities, buffered: bool) -> Self {
        if caps.pty && caps.terminal {
            Self::Pty { buffered }
        } else if buffered {
            Self::Buffered
        } else {
            Self::Direct
        }
    }

    pub fn is_buffered(self) -> bool {
        matches!(self, Self::Pty { buffered: true } | Self::Buffered)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Background {
    /// Wrapped in the transcript recorder, which owns the PTY and the log.
    Recorder(Recorder),
    /// stdout and stderr appended to the log file.
    Redirect,
    Discard,
}

impl Background {
    pub fn select(caps: &Capabilities, has_log: bool) -> Self {
        match (has_log, caps.recorder) {
            (false, _) => Self::Discard,
            (true, Some(recorder)) => Self::Recorder(recorder),
            (true, None) => Self::Redirect,
        }
    }
}

/// A finished foreground command. `output` is empty unless buffered.
#[derive(Debug)]
pub struct Completed {
    /// `None` when the process was ended by a signal.
    pub code: Option<i32>,
    pub output: String,
}

impl Completed {
    pub fn from_code(code: Option<i32>, output: String) -> Self {
        Self { code, output }
    }

    fn from_status(status: ExitStatus, output: String) -> Self {
        Self::from_code(status.code(), output)
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn describe(&self) -> String {
        match self.code {
            Some(code) => format!("exit status: {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

pub fn shell_command(command: &str, dir: &Path) -> Command {
    #[cfg(unix)]
    let mut cmd = {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    };

    #[cfg(windows)]
    let mut cmd = {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    };

    cmd.current_dir(dir);
    cmd
}

pub fn run_foreground(strategy: Foreground, command: &str, dir: &Path) -> io::Result<Completed> {
    match strategy {
        Foreground::Pty { buffered } => run_pty(command, dir, buffered),
        Foreground::Buffered => {
            let output = shell_command(command, dir)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()?;

            let mut combined = String::from_utf8_lossy(&output.stderr).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stdout));
            Ok(Completed::from_status(output.status, combined))
        }
        Foreground::Direct => {
            let status = shell_command(command, dir)
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status()?;
            Ok(Completed::from_status(status, String::new()))
        }
    }
}

#[cfg(unix)]
fn run_pty(command: &str, dir: &Path, buffered: bool) -> io::Result<Completed> {
    pty::run(command, dir, buffered)
}

#[cfg(not(unix))]
fn run_pty(_command: &str, _dir: &Path, _buffered: bool) -> io::Result<Completed> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "pseudo-terminals are not supported on this platform",
    ))
}

/// Columns and rows of the terminal on our stdout, if it is one.
pub fn terminal_size() -> Option<(u16, u16)> {
    if !io::stdout().is_terminal() {
        return None;
    }
    crossterm::terminal::size()
        .ok()
        .filter(|(cols, rows)| *cols > 0 && *rows > 0)
}

pub fn terminal_columns() -> Option<u16> {
    terminal_size().map(|(cols, _)| cols)
}

/// Starts `command` detached from us and returns its pid. With a log path
/// the child's output ends up in that file; the call returns once the file
/// exists or [`LOG_WAIT_TIMEOUT`] passes.
pub fn spawn_background(
    caps: &Capabilities,
    command: &str,
    dir: &Path,
    log: Option<&Path>,
) -> io::Result<u32> {
    let strategy = Background::select(caps, log.is_some());

    if let Some(parent) = log.and_then(Path::parent) {
        fs::create_dir_all(parent)?;
    }

    let mut cmd = match (strategy, log) {
        (Background::Recorder(recorder), Some(log)) => {
            let mut cmd = recorder_command(recorder, command, log);
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
            cmd
        }
        (Background::Redirect, Some(log)) => {
            let file = OpenOptions::new().create(true).append(true).open(log)?;
            let mut cmd = shell_command(command, dir);
            cmd.stdout(Stdio::from(file.try_clone()?))
                .stderr(Stdio::from(file));
            cmd
        }
        _ => {
            let mut cmd = shell_command(command, dir);
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
            cmd
        }
    };
    cmd.current_dir(dir).stdin(Stdio::null());
    process::apply_detach_settings(&mut cmd);

    let child = cmd.spawn()?;
    let pid = child.id();
    tracing::debug!(pid, ?strategy, command, "spawned background process");

    if let Some(log) = log {
        wait_for_file(log, LOG_WAIT_TIMEOUT);
    }

    Ok(pid)
}

fn recorder_command(recorder: Recorder, command: &str, log: &Path) -> Command {
    let mut cmd = Command::new("script");
    match recorder {
        Recorder::UtilLinux => {
            cmd.arg("-qf").arg("-c").arg(command).arg(log);
        }
        Recorder::Bsd => {
            cmd.arg("-qF").arg(log).arg("sh").arg("-c").arg(command);
        }
    }
    cmd
}

fn wait_for_file(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        thread::sleep(LOG_WAIT_INTERVAL);
    }
}

/// Renames the pending log to its pid-named sibling.
pub fn promote_pending_log(pending: &Path, pid: u32) -> io::Result<PathBuf> {
    let target = pending.with_file_name(format!("{pid}.log"));
    fs::rename(pending, &target)?;
    Ok(target)
}
