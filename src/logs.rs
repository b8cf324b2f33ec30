use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::Duration;

use crate::process::ProcessController;

pub const TAIL_CHUNK_SIZE: usize = 8192;
pub const FOLLOW_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// Read to end of file once without following.
    Drained,
    /// The tracked process went away and its last output was flushed.
    Exited,
    /// An interrupt stopped the follow; the process keeps running.
    Detached,
}

/// Streams the log at `path` into `out`. With `tail > 0` only the last
/// `tail` lines of what is already there are shown.
pub fn attach<W: Write>(
    path: &Path,
    pid: u32,
    tail: usize,
    follow_log: bool,
    controller: &dyn ProcessController,
    out: &mut W,
    detach: Option<&Receiver<()>>,
) -> Result<AttachOutcome> {
    let mut file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;

    if tail > 0 {
        seek_to_last_lines(&mut file, tail)
            .with_context(|| format!("failed to seek {}", path.display()))?;
    }

    if !follow_log {
        io::copy(&mut file, out).with_context(|| format!("failed to read {}", path.display()))?;
        out.flush()?;
        return Ok(AttachOutcome::Drained);
    }

    follow(&mut file, out, pid, controller, detach, FOLLOW_INTERVAL)
        .with_context(|| format!("failed to follow {}", path.display()))
}

/// Positions `file` at the start of its last `lines` lines. A trailing
/// newline ends the last line rather than starting an empty one. With fewer
/// lines than asked for the whole file is kept.
pub fn seek_to_last_lines<F: Read + Seek>(file: &mut F, lines: usize) -> io::Result<()> {
    seek_with_chunk(file, lines, TAIL_CHUNK_SIZE)
}

fn seek_with_chunk<F: Read + Seek>(file: &mut F, lines: usize, chunk_size: usize) -> io::Result<()> {
    let size = file.seek(SeekFrom::End(0))?;
    if size == 0 || lines == 0 {
        return Ok(());
    }

    let mut buf = vec![0u8; chunk_size];
    let mut end = size;
    let mut found = 0;

    while end > 0 {
        let start = end.saturating_sub(chunk_size as u64);
        let len = (end - start) as usize;
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut buf[..len])?;

        for (offset, byte) in buf[..len].iter().enumerate().rev() {
            let pos = start + offset as u64;
            if *byte != b'\n' || pos == size - 1 {
                continue;
            }
            found += 1;
            if found == lines {
                file.seek(SeekFrom::Start(pos + 1))?;
                return Ok(());
            }
        }

        end = start;
    }

    file.seek(SeekFrom::Start(0))?;
    Ok(())
}

/// Copies everything appended to `reader` until the process exits or a
/// detach arrives. Liveness is only checked once the reader is caught up.
pub fn follow<R: Read, W: Write>(
    reader: &mut R,
    out: &mut W,
    pid: u32,
    controller: &dyn ProcessController,
    detach: Option<&Receiver<()>>,
    interval: Duration,
) -> io::Result<AttachOutcome> {
    let mut buf = [0u8; TAIL_CHUNK_SIZE];

    loop {
        if detach_requested(detach) {
            return Ok(AttachOutcome::Detached);
        }

        let read = match reader.read(&mut buf) {
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        if read > 0 {
            out.write_all(&buf[..read])?;
            out.flush()?;
            continue;
        }

        if !controller.is_running(pid) {
            io::copy(reader, out)?;
            out.flush()?;
            return Ok(AttachOutcome::Exited);
        }

        thread::sleep(interval);
    }
}

fn detach_requested(detach: Option<&Receiver<()>>) -> bool {
    match detach.map(Receiver::try_recv) {
        Some(Ok(())) => true,
        Some(Err(TryRecvError::Empty | TryRecvError::Disconnected)) | None => false,
    }
}

/// Delivers one message when the user asks to stop following: SIGINT or
/// SIGTERM. Both signals are blocked on the calling thread first, so they no
/// longer terminate the CLI.
#[cfg(unix)]
pub fn spawn_interrupt_listener() -> Option<Receiver<()>> {
    use nix::sys::signal::{SigSet, Signal};

    let mut signals = SigSet::empty();
    signals.add(Signal::SIGINT);
    signals.add(Signal::SIGTERM);
    if let Err(err) = signals.thread_block() {
        tracing::warn!(%err, "cannot block interrupt signals; detach disabled");
        return None;
    }

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        if let Ok(signal) = signals.wait() {
            tracing::debug!(?signal, "detach requested");
            let _ = tx.send(());
        }
    });

    Some(rx)
}

/// Without POSIX signals, typing `q` + Enter on an interactive stdin detaches.
#[cfg(not(unix))]
pub fn spawn_interrupt_listener() -> Option<Receiver<()>> {
    use std::io::IsTerminal;

    if !io::stdin().is_terminal() {
        return None;
    }

    eprintln!("(press q + Enter to detach)");

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = io::stdin();
        loop {
            let mut line = String::new();
            match stdin.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            if line.trim().eq_ignore_ascii_case("q") {
                let _ = tx.send(());
                break;
            }
        }
    });

    Some(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::StopRequest;
    use std::fs::{self, OpenOptions};
    use std::io::Cursor;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn tail(content: &str, lines: usize, chunk: usize) -> String {
        let mut cursor = Cursor::new(content.as_bytes().to_vec());
        seek_with_chunk(&mut cursor, lines, chunk).expect("seek");
        let mut rest = String::new();
        cursor.read_to_string(&mut rest).unwrap();
        rest
    }

    #[test]
    fn returns_exact_last_lines() {
        let content = "one\ntwo\nthree\nfour\n";
        assert_eq!(tail(content, 1, TAIL_CHUNK_SIZE), "four\n");
        assert_eq!(tail(content, 2, TAIL_CHUNK_SIZE), "three\nfour\n");
        assert_eq!(tail(content, 4, TAIL_CHUNK_SIZE), content);
        assert_eq!(tail(content, 10, TAIL_CHUNK_SIZE), content);
    }

    #[test]
    fn chunk_boundaries_inside_lines_do_not_matter() {
        let content: String = (1..=40).map(|n| format!("line number {n}\n")).collect();
        let expected: String = (36..=40).map(|n| format!("line number {n}\n")).collect();

        for chunk in [1, 2, 3, 7, 16, 64, TAIL_CHUNK_SIZE] {
            assert_eq!(tail(&content, 5, chunk), expected, "chunk size {chunk}");
            assert_eq!(tail(&content, 40, chunk), content, "chunk size {chunk}");
        }
    }

    #[test]
    fn last_line_without_newline_counts() {
        assert_eq!(tail("a\nb\nc", 1, 2), "c");
        assert_eq!(tail("a\nb\nc", 2, 2), "b\nc");
    }

    #[test]
    fn empty_file_stays_at_start() {
        let mut cursor = Cursor::new(Vec::new());
        seek_to_last_lines(&mut cursor, 3).expect("seek");
        assert_eq!(cursor.position(), 0);

        let mut rest = Vec::new();
        cursor.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());
    }

    // Appends one more line on the first probe, reports the pid dead after.
    struct WritesThenExits {
        log: PathBuf,
        probes: Mutex<usize>,
    }

    impl ProcessController for WritesThenExits {
        fn is_running(&self, _pid: u32) -> bool {
            let mut probes = self.probes.lock().unwrap();
            *probes += 1;
            if *probes == 1 {
                let mut file = OpenOptions::new().append(true).open(&self.log).unwrap();
                file.write_all(b"late line\n").unwrap();
                return true;
            }
            false
        }

        fn request_stop(&self, _pid: u32) -> StopRequest {
            StopRequest::Failed
        }

        fn force_kill(&self, _pid: u32) {}
    }

    #[test]
    fn follow_flushes_output_written_before_exit() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("42.log");
        fs::write(&log, "first\nsecond\n").unwrap();
        let controller = WritesThenExits {
            log: log.clone(),
            probes: Mutex::new(0),
        };

        let mut out = Vec::new();
        let outcome = attach(&log, 42, 1, true, &controller, &mut out, None).expect("follow");

        assert_eq!(outcome, AttachOutcome::Exited);
        assert_eq!(String::from_utf8(out).unwrap(), "second\nlate line\n");
        assert_eq!(*controller.probes.lock().unwrap(), 2);
    }

    #[test]
    fn no_follow_reads_once_without_probing() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("7.log");
        fs::write(&log, "a\nb\nc\n").unwrap();
        let controller = WritesThenExits {
            log: log.clone(),
            probes: Mutex::new(0),
        };

        let mut out = Vec::new();
        let outcome = attach(&log, 7, 0, false, &controller, &mut out, None).expect("read");

        assert_eq!(outcome, AttachOutcome::Drained);
        assert_eq!(String::from_utf8(out).unwrap(), "a\nb\nc\n");
        assert_eq!(*controller.probes.lock().unwrap(), 0);
    }

    #[test]
    fn detach_stops_following_a_live_process() {
        struct AlwaysRunning;
        impl ProcessController for AlwaysRunning {
            fn is_running(&self, _pid: u32) -> bool {
                true
            }
            fn request_stop(&self, _pid: u32) -> StopRequest {
                StopRequest::Sent
            }
            fn force_kill(&self, _pid: u32) {}
        }

        let (tx, rx) = mpsc::channel();
        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            tx.send(()).unwrap();
        });

        let mut reader = Cursor::new(b"hello\n".to_vec());
        let mut out = Vec::new();
        let outcome = follow(
            &mut reader,
            &mut out,
            1,
            &AlwaysRunning,
            Some(&rx),
            Duration::from_millis(10),
        )
        .expect("follow");
        sender.join().unwrap();

        assert_eq!(outcome, AttachOutcome::Detached);
        assert_eq!(out, b"hello\n");
    }
}
