//! Command runner: launch an external program and wait for it, cancellably.
//!
//! The runner knows nothing about conversions. It returns the numeric exit
//! code of a process that ran to completion; interpreting that code is the
//! caller's job. A cancelled or timed-out context kills the child (and, on
//! Unix, every process in its group) and yields [`ConvertError::Cancelled`]
//! instead of an exit code.
//!
//! stdout and stderr are forwarded line by line to `tracing` at DEBUG level
//! so worker chatter is visible with `RUST_LOG=debug` without ever filling
//! a pipe buffer.

use crate::cancel::Cancellation;
use crate::error::ConvertError;
use std::ffi::OsStr;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Run `program` with `args` until it exits or `ctx` fires.
///
/// # Returns
/// `Ok(exit_code)` when the process terminated on its own, whatever the code.
///
/// # Errors
/// - [`ConvertError::Launch`] if the process could not be spawned
/// - [`ConvertError::Cancelled`] if `ctx` fired first; the process is killed
pub async fn run<I, S>(ctx: &Cancellation, program: &Path, args: I) -> Result<i32, ConvertError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let name = program_name(program);

    if let Some(reason) = ctx.reason() {
        return Err(ConvertError::Cancelled { reason });
    }

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    debug!("Running {:?}", cmd.as_std());

    let mut child = cmd.spawn().map_err(|source| ConvertError::Launch {
        program: program.display().to_string(),
        source,
    })?;

    let pid = child.id();
    let log_tasks = forward_output(&mut child, &name);

    let outcome = tokio::select! {
        status = child.wait() => Ok(status),
        reason = ctx.done() => Err(reason),
    };

    match outcome {
        Ok(status) => {
            let status = status.map_err(|e| {
                ConvertError::Internal(format!("waiting for '{name}' failed: {e}"))
            })?;
            let code = exit_code(status);
            // A leftover descendant may still hold the pipes open.
            let aborts: Vec<_> = log_tasks.iter().map(JoinHandle::abort_handle).collect();
            tokio::select! {
                _ = join_log_tasks(log_tasks) => {}
                reason = ctx.done() => {
                    warn!(
                        "'{}' exited with code {} but its output is still open ({}), killing its group",
                        name, code, reason
                    );
                    #[cfg(unix)]
                    if let Some(pid) = pid {
                        signal_group(pid, libc::SIGKILL);
                    }
                    for abort in aborts {
                        abort.abort();
                    }
                    return Err(ConvertError::Cancelled { reason });
                }
            }
            debug!("'{}' exited with code {}", name, code);
            Ok(code)
        }
        Err(reason) => {
            warn!("'{}' interrupted ({}), killing it", name, reason);
            kill_tree(&mut child).await;
            join_log_tasks(log_tasks).await;
            Err(ConvertError::Cancelled { reason })
        }
    }
}

/// Kill a child and everything in its process group, then reap it.
pub(crate) async fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        signal_group(pid, libc::SIGKILL);
    }
    if let Err(e) = child.kill().await {
        debug!("kill after group SIGKILL: {}", e);
    }
}

/// Send `signal` to the process group led by `pid`.
#[cfg(unix)]
pub(crate) fn signal_group(pid: u32, signal: libc::c_int) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions; a negative pid
    // addresses the process group created by `process_group(0)`.
    let rc = unsafe { libc::kill(-pgid, signal) };
    if rc != 0 {
        debug!(
            "kill(-{}, {}) failed: {}",
            pgid,
            signal,
            std::io::Error::last_os_error()
        );
    }
}

/// Map an exit status to a single integer; signals become `128 + signo`.
pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

pub(crate) fn program_name(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}

pub(crate) fn forward_output(child: &mut Child, name: &str) -> Vec<JoinHandle<()>> {
    let mut tasks = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        tasks.push(spawn_line_logger(stdout, format!("{name} stdout")));
    }
    if let Some(stderr) = child.stderr.take() {
        tasks.push(spawn_line_logger(stderr, format!("{name} stderr")));
    }
    tasks
}

fn spawn_line_logger<R>(reader: R, tag: String) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!("[{}] {}", tag, line);
        }
    })
}

async fn join_log_tasks(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        let _ = task.await;
    }
}
