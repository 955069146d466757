//! External process execution with a time budget
//!
//! Every command a provider runs goes through [`run`]. Output is drained on
//! helper threads so a chatty child cannot block on a full pipe while we
//! poll for its exit. The child leads its own process group; on timeout the
//! whole group is killed, including daemons it left holding our pipes.

use declarative::{CommandOutput, Error, Result};
use std::io::Read;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Render a command as `program arg1 arg2` for messages
pub fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

/// Run a command to completion, capturing output
///
/// A non-zero exit is not an error here; callers decide what it means. The
/// budget covers both the child's exit and the close of its output pipes.
/// Once `timeout` elapses the process group is killed and [`Error::Timeout`]
/// returned.
pub fn run(cmd: &mut Command, timeout: Option<Duration>) -> Result<CommandOutput> {
    let label = describe(cmd);
    log::debug!("running: {label}");

    let started = Instant::now();
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .spawn()
        .map_err(|e| Error::Exec {
            command: label.clone(),
            code: None,
            output: format!("failed to start: {e}"),
        })?;

    let (tx, rx) = mpsc::channel();
    drain(Stream::Stdout, child.stdout.take(), tx.clone());
    drain(Stream::Stderr, child.stderr.take(), tx);

    let deadline = timeout.map(|budget| (started, budget));
    let outcome = wait(&mut child, deadline).and_then(|status| {
        collect(&rx, deadline).map(|(stdout, stderr)| CommandOutput {
            stdout,
            stderr,
            code: status.code(),
            success: status.success(),
        })
    });

    match outcome {
        Ok(output) => {
            log::trace!("`{label}` exited with {:?}", output.code);
            Ok(output)
        }
        Err(WaitError::TimedOut(after)) => {
            log::warn!("killing `{label}` after {}s", after.as_secs());
            kill_group(&mut child);
            Err(Error::Timeout {
                command: label,
                after,
            })
        }
        Err(WaitError::Io(e)) => Err(Error::Exec {
            command: label,
            code: None,
            output: e.to_string(),
        }),
    }
}

/// Run `script` through `sh -c`
pub fn shell(script: &str, timeout: Option<Duration>) -> Result<CommandOutput> {
    run(Command::new("sh").arg("-c").arg(script), timeout)
}

enum WaitError {
    TimedOut(Duration),
    Io(std::io::Error),
}

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

type Deadline = Option<(Instant, Duration)>;

fn wait(child: &mut Child, deadline: Deadline) -> std::result::Result<ExitStatus, WaitError> {
    let Some((started, budget)) = deadline else {
        return child.wait().map_err(WaitError::Io);
    };

    loop {
        if let Some(status) = child.try_wait().map_err(WaitError::Io)? {
            return Ok(status);
        }
        if started.elapsed() >= budget {
            return Err(WaitError::TimedOut(budget));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Gather both pipes; a descendant still holding one open counts against
/// the same budget as the child itself
fn collect(
    rx: &Receiver<(Stream, Vec<u8>)>,
    deadline: Deadline,
) -> std::result::Result<(Vec<u8>, Vec<u8>), WaitError> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    for _ in 0..2 {
        let received = match deadline {
            Some((started, budget)) => rx.recv_timeout(budget.saturating_sub(started.elapsed())),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok((Stream::Stdout, buf)) => stdout = buf,
            Ok((Stream::Stderr, buf)) => stderr = buf,
            Err(RecvTimeoutError::Timeout) => {
                let budget = deadline.map(|(_, budget)| budget).unwrap_or_default();
                return Err(WaitError::TimedOut(budget));
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    Ok((stdout, stderr))
}

/// SIGKILL the child's process group, then reap the child
fn kill_group(child: &mut Child) {
    match libc::pid_t::try_from(child.id()) {
        // SAFETY: kill(2) with a negative pid only signals that process
        // group; the child leads it since it was spawned with process_group(0)
        Ok(pgid) => unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        },
        Err(_) => {
            let _ = child.kill();
        }
    }
    let _ = child.wait();
}

fn drain<R: Read + Send + 'static>(
    stream: Stream,
    pipe: Option<R>,
    tx: Sender<(Stream, Vec<u8>)>,
) {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = tx.send((stream, buf));
    });
}
