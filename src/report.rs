//! User-facing progress notifications.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use crate::capture;

const DEFAULT_BORDER_WIDTH: usize = 60;

/// Sink for progress notifications. Every command execution gets exactly one
/// `start` followed by exactly one of `success`, `failure` or `background`.
pub trait Reporter: Send + Sync {
    fn start(&self, project: &str, command: &str);
    fn success(&self, project: &str, command: &str);
    fn failure(&self, project: &str, command: &str, reason: &str);
    fn background(&self, project: &str, command: &str, pid: u32);
    /// Captured output of a failed buffered command.
    fn output(&self, project: &str, output: &str);
    fn border(&self);
    fn project_done(&self, project: &str);
    fn stopping(&self, project: &str, command: &str, pid: u32);
    fn stopped(&self, project: &str);
    fn attached(&self, project: &str, command: &str, pid: u32);
    fn detached(&self, project: &str);
    fn process_exited(&self, project: &str, pid: u32);
    fn warn(&self, project: &str, message: &str);
}

impl<R: Reporter + ?Sized> Reporter for Arc<R> {
    fn start(&self, project: &str, command: &str) {
        (**self).start(project, command)
    }
    fn success(&self, project: &str, command: &str) {
        (**self).success(project, command)
    }
    fn failure(&self, project: &str, command: &str, reason: &str) {
        (**self).failure(project, command, reason)
    }
    fn background(&self, project: &str, command: &str, pid: u32) {
        (**self).background(project, command, pid)
    }
    fn output(&self, project: &str, output: &str) {
        (**self).output(project, output)
    }
    fn border(&self) {
        (**self).border()
    }
    fn project_done(&self, project: &str) {
        (**self).project_done(project)
    }
    fn stopping(&self, project: &str, command: &str, pid: u32) {
        (**self).stopping(project, command, pid)
    }
    fn stopped(&self, project: &str) {
        (**self).stopped(project)
    }
    fn attached(&self, project: &str, command: &str, pid: u32) {
        (**self).attached(project, command, pid)
    }
    fn detached(&self, project: &str) {
        (**self).detached(project)
    }
    fn process_exited(&self, project: &str, pid: u32) {
        (**self).process_exited(project, pid)
    }
    fn warn(&self, project: &str, message: &str) {
        (**self).warn(project, message)
    }
}

/// Line-oriented reporter; one lock per notification keeps lines from
/// concurrent projects whole.
pub struct ConsoleReporter {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleReporter {
    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    fn write_lines(&self, lines: &[String]) {
        let mut out = match self.out.lock() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        };
        for line in lines {
            let _ = writeln!(out, "{line}");
        }
        let _ = out.flush();
    }

    fn line(&self, line: String) {
        self.write_lines(&[line]);
    }
}

fn border_line() -> String {
    let width = capture::terminal_columns()
        .map(usize::from)
        .filter(|width| *width > 0)
        .unwrap_or(DEFAULT_BORDER_WIDTH);
    "=".repeat(width)
}

impl Reporter for ConsoleReporter {
    fn start(&self, project: &str, command: &str) {
        tracing::debug!(project, command, "command started");
        self.line(format!("[{project}] Executing: {command}"));
    }

    fn success(&self, project: &str, command: &str) {
        tracing::debug!(project, command, "command completed");
        self.line(format!("[{project}] Completed: {command}"));
    }

    fn failure(&self, project: &str, command: &str, reason: &str) {
        tracing::debug!(project, command, reason, "command failed");
        self.line(format!("[{project}] Failed: {command}: {reason}"));
    }

    fn background(&self, project: &str, command: &str, pid: u32) {
        tracing::debug!(project, command, pid, "background process started");
        self.line(format!("[{project}] Background: {command} (pid {pid})"));
    }

    fn output(&self, project: &str, output: &str) {
        let trimmed = output.trim_end_matches(['\n', '\r']);
        if trimmed.is_empty() {
            return;
        }

        let border = border_line();
        let mut lines = Vec::new();
        lines.push(format!("   [{project}] {border}"));
        lines.extend(trimmed.lines().map(|line| format!("   [{project}] {line}")));
        lines.push(format!("   [{project}] {border}"));
        self.write_lines(&lines);
    }

    fn border(&self) {
        self.line(border_line());
    }

    fn project_done(&self, project: &str) {
        self.line(format!("[{project}] All commands completed"));
    }

    fn stopping(&self, project: &str, command: &str, pid: u32) {
        tracing::debug!(project, command, pid, "stopping process");
        self.line(format!("[{project}] Stopping: {command} (pid {pid})"));
    }

    fn stopped(&self, project: &str) {
        self.line(format!("[{project}] Stopped successfully"));
    }

    fn attached(&self, project: &str, command: &str, pid: u32) {
        self.line(format!("[{project}] Attached: {command} (pid {pid})"));
    }

    fn detached(&self, project: &str) {
        self.line(format!("[{project}] Detached"));
    }

    fn process_exited(&self, project: &str, pid: u32) {
        self.line(format!("[{project}] Process exited (pid {pid})"));
    }

    fn warn(&self, project: &str, message: &str) {
        tracing::warn!(project, "{message}");
        self.line(format!("warning: [{project}] {message}"));
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
        }
    }

    #[test]
    fn output_is_framed_and_prefixed() {
        let buf = SharedBuf::default();
        let reporter = ConsoleReporter::new(Box::new(buf.clone()));

        reporter.output("api", "first\nsecond\n\n");

        let text = buf.text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("   [api] ="));
        assert_eq!(lines[1], "   [api] first");
        assert_eq!(lines[2], "   [api] second");
        assert!(lines[3].starts_with("   [api] ="));
    }

    #[test]
    fn blank_output_prints_nothing() {
        let buf = SharedBuf::default();
        let reporter = ConsoleReporter::new(Box::new(buf.clone()));

        reporter.output("api", "\n\n");

        assert!(buf.text().is_empty());
    }

    #[test]
    fn background_line_carries_pid() {
        let buf = SharedBuf::default();
        let reporter = ConsoleReporter::new(Box::new(buf.clone()));

        reporter.background("api", "npm run dev", 4242);

        assert_eq!(buf.text(), "[api] Background: npm run dev (pid 4242)\n");
    }
}
