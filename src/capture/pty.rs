use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use portable_pty::{CommandBuilder, PtySize, native_pty_system};
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use super::Completed;

// Milliseconds the stdin relay waits before rechecking its stop flag.
const STDIN_POLL_MS: u16 = 50;

fn pty_size() -> PtySize {
    let (cols, rows) = super::terminal_size().unwrap_or((80, 24));
    PtySize {
        rows: rows.max(1),
        cols: cols.max(1),
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn pty_error(err: anyhow::Error) -> io::Error {
    io::Error::other(format!("{err:#}"))
}

/// Runs `command` through `sh -c` on a new PTY sized like our terminal.
/// Buffered runs collect the transcript; interactive runs relay our stdin in
/// and the transcript out to stdout until the child exits.
pub fn run(command: &str, dir: &Path, buffered: bool) -> io::Result<Completed> {
    let pair = native_pty_system().openpty(pty_size()).map_err(pty_error)?;

    let mut builder = CommandBuilder::new("sh");
    builder.arg("-c");
    builder.arg(command);
    builder.cwd(dir);

    let mut child = pair.slave.spawn_command(builder).map_err(pty_error)?;
    // The master only sees hang-up once our copy of the slave is closed.
    drop(pair.slave);

    let mut reader = pair.master.try_clone_reader().map_err(pty_error)?;

    if buffered {
        let mut transcript = Vec::new();
        let copied = copy_until_hangup(&mut reader, &mut transcript);
        let status = child.wait()?;
        copied?;
        return Ok(Completed::from_code(
            exit_code(&status),
            String::from_utf8_lossy(&transcript).into_owned(),
        ));
    }

    let relay = StdinRelay::start(pair.master.take_writer().map_err(pty_error)?);
    let copied = copy_until_hangup(&mut reader, &mut io::stdout());
    let status = child.wait();
    relay.stop();

    let status = status?;
    copied?;
    Ok(Completed::from_code(exit_code(&status), String::new()))
}

fn exit_code(status: &portable_pty::ExitStatus) -> Option<i32> {
    i32::try_from(status.exit_code()).ok()
}

// Linux reports a closed slave as EIO on the master rather than EOF.
fn copy_until_hangup<R: Read + ?Sized>(reader: &mut R, out: &mut impl Write) -> io::Result<()> {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => {
                out.write_all(&buf[..n])?;
                out.flush()?;
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) if err.raw_os_error() == Some(nix::libc::EIO) => return Ok(()),
            Err(err) => return Err(err),
        }
    }
}

/// Copies our stdin into the PTY until stopped. Stdin is polled with a short
/// timeout so the thread never outlives the run it belongs to.
struct StdinRelay {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl StdinRelay {
    fn start(mut writer: Box<dyn Write + Send>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stopped = Arc::clone(&stop);

        let handle = thread::spawn(move || {
            let stdin = io::stdin();
            let mut buf = [0u8; 4096];
            while !stopped.load(Ordering::Relaxed) {
                let mut fds = [PollFd::new(stdin.as_fd(), PollFlags::POLLIN)];
                match poll(&mut fds, PollTimeout::from(STDIN_POLL_MS)) {
                    Ok(0) | Err(Errno::EINTR) => continue,
                    Ok(_) => {}
                    Err(_) => break,
                }

                let n = match nix::unistd::read(stdin.as_raw_fd(), &mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(Errno::EINTR) => continue,
                    Err(_) => break,
                };
                if writer.write_all(&buf[..n]).and_then(|()| writer.flush()).is_err() {
                    break;
                }
            }
        });

        Self { stop, handle }
    }

    fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);
        if self.handle.join().is_err() {
            tracing::warn!("stdin relay panicked");
        }
    }
}
