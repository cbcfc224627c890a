//! Listener supervisor: one long-running headless LibreOffice, shared by
//! every conversion and recycled after a configurable number of uses.
//!
//! ## Locks
//!
//! * **gate**: a one-permit [`Semaphore`]. Holding the permit means owning
//!   the listener: a conversion between [`Listener::lock`] and
//!   [`ListenerLease::unlock`], or a start/stop/restart. Waiters are served
//!   in FIFO order.
//! * **state**: a `std::sync::Mutex` around the phase, port and use count.
//!   Held only for field reads/writes, never across an `.await`, so
//!   [`Listener::port`] and friends never wait behind a slow restart.
//!
//! ## Restart ordering
//!
//! Unlocking does not return the permit to the gate directly. The lease
//! sends it to the supervisor task, which bumps the use count, restarts the
//! worker if the threshold was reached, and only then drops the permit. The
//! next `lock()` therefore always sees the post-restart port, and the
//! releasing conversion never waits for the restart.
//!
//! ```text
//! lock() ──▶ [permit] ──▶ convert ──▶ unlock() ──Release(permit)──▶ supervisor
//!                                                        use_count += 1
//!                                                        restart if due
//!                                                        drop(permit) ──▶ next lock()
//! ```

use crate::cancel::Cancellation;
use crate::config::ServiceConfig;
use crate::error::ConvertError;
use crate::pipeline::runner;
use async_trait::async_trait;
use std::fmt;
use std::net::{Ipv4Addr, TcpListener as StdTcpListener};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Interval between two connection attempts while a listener starts.
const PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// How many times [`free_port`] asks the OS for a port before giving up.
const PORT_ATTEMPTS: usize = 16;

const SOFFICE_FLAGS: &[&str] = &[
    "--headless",
    "--invisible",
    "--nocrashreport",
    "--nodefault",
    "--nologo",
    "--nofirststartwizard",
    "--norestore",
];

// ── Worker launch ────────────────────────────────────────────────────────

/// Starts a worker process bound to a port.
///
/// The supervisor only needs "launch on port N", "has it exited?" and
/// "terminate it"; everything else about the process stays behind this seam.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Launch a worker that will accept connections on `127.0.0.1:port`.
    ///
    /// Must return as soon as the process is spawned; readiness is probed
    /// by the caller.
    async fn launch(&self, port: u16) -> Result<Box<dyn WorkerHandle>, ConvertError>;
}

/// A launched worker process.
#[async_trait]
pub trait WorkerHandle: Send {
    fn pid(&self) -> Option<u32>;

    /// Exit code if the process has already terminated, without blocking.
    fn try_exit_code(&mut self) -> Option<i32>;

    /// Ask the process to exit, escalating to a kill after `grace`.
    async fn terminate(&mut self, grace: Duration) -> Result<(), ConvertError>;
}

/// Launches `soffice` in headless listener mode with a throwaway profile.
#[derive(Debug, Clone)]
pub struct SofficeLauncher {
    soffice_bin: PathBuf,
}

impl SofficeLauncher {
    pub fn new(soffice_bin: impl Into<PathBuf>) -> Self {
        Self {
            soffice_bin: soffice_bin.into(),
        }
    }

    fn args(port: u16, profile: &TempDir) -> Vec<String> {
        let mut args: Vec<String> = SOFFICE_FLAGS.iter().map(|s| s.to_string()).collect();
        args.push(format!(
            "-env:UserInstallation=file://{}",
            profile.path().display()
        ));
        args.push(format!(
            "--accept=socket,host={},port={},tcpNoDelay=1;urp;StarOffice.ComponentContext",
            Ipv4Addr::LOCALHOST,
            port
        ));
        args
    }
}

#[async_trait]
impl Launcher for SofficeLauncher {
    async fn launch(&self, port: u16) -> Result<Box<dyn WorkerHandle>, ConvertError> {
        // A fresh profile per process: two instances sharing one profile
        // lock each other out.
        let profile = tempfile::Builder::new()
            .prefix("office2pdf-profile-")
            .tempdir()
            .map_err(|source| ConvertError::Io {
                path: std::env::temp_dir(),
                source,
            })?;

        let mut cmd = Command::new(&self.soffice_bin);
        cmd.args(Self::args(port, &profile))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        debug!("Running {:?}", cmd.as_std());

        let mut child = cmd.spawn().map_err(|source| ConvertError::Launch {
            program: self.soffice_bin.display().to_string(),
            source,
        })?;
        let name = runner::program_name(&self.soffice_bin);
        // The log forwarders end on their own when the pipes close.
        drop(runner::forward_output(&mut child, &name));

        Ok(Box::new(SofficeWorker {
            child,
            profile: Some(profile),
        }))
    }
}

struct SofficeWorker {
    child: Child,
    profile: Option<TempDir>,
}

impl SofficeWorker {
    fn remove_profile(&mut self) {
        if let Some(profile) = self.profile.take() {
            let path = profile.path().to_path_buf();
            if let Err(e) = profile.close() {
                warn!("Failed to remove LibreOffice profile {}: {}", path.display(), e);
            }
        }
    }
}

#[async_trait]
impl WorkerHandle for SofficeWorker {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_exit_code(&mut self) -> Option<i32> {
        match self.child.try_wait() {
            Ok(status) => status.map(runner::exit_code),
            Err(e) => {
                debug!("try_wait on LibreOffice listener failed: {}", e);
                None
            }
        }
    }

    async fn terminate(&mut self, grace: Duration) -> Result<(), ConvertError> {
        if self.try_exit_code().is_some() {
            self.remove_profile();
            return Ok(());
        }

        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            runner::signal_group(pid, libc::SIGTERM);
        }
        #[cfg(not(unix))]
        if let Err(e) = self.child.start_kill() {
            debug!("start_kill on LibreOffice listener failed: {}", e);
        }

        let result = match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!("LibreOffice listener exited with {}", status);
                Ok(())
            }
            Ok(Err(e)) => {
                runner::kill_tree(&mut self.child).await;
                Err(ConvertError::ListenerStop {
                    detail: format!("waiting for exit failed: {e}"),
                })
            }
            Err(_) => {
                warn!(
                    "LibreOffice listener ignored SIGTERM for {}ms, killing it",
                    grace.as_millis()
                );
                runner::kill_tree(&mut self.child).await;
                Ok(())
            }
        };

        self.remove_profile();
        result
    }
}

// ── Start-up ─────────────────────────────────────────────────────────────

/// Ask the OS for an unused local port, different from `avoid`.
///
/// The probe socket is closed before returning, so another process could in
/// theory grab the port before the worker binds it; the start-up probe then
/// fails and the caller sees a start error.
pub fn free_port(avoid: Option<u16>) -> Result<u16, ConvertError> {
    let mut last_error = None;
    for _ in 0..PORT_ATTEMPTS {
        let port = StdTcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .and_then(|socket| socket.local_addr())
            .map(|addr| addr.port());
        match port {
            Ok(port) if Some(port) != avoid => return Ok(port),
            Ok(_) => {}
            Err(e) => last_error = Some(e),
        }
    }
    Err(ConvertError::NoFreePort {
        source: last_error.unwrap_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                "the OS kept handing out the previous listener port",
            )
        }),
    })
}

/// A worker that accepted a connection on its port.
pub struct RunningWorker {
    port: u16,
    handle: Box<dyn WorkerHandle>,
}

impl RunningWorker {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Terminate the worker. The error is informational: the worker is gone
    /// from our point of view either way.
    pub async fn stop(mut self, grace: Duration) -> Result<(), ConvertError> {
        info!(port = self.port, pid = ?self.handle.pid(), "Stopping LibreOffice listener");
        self.handle.terminate(grace).await
    }
}

impl fmt::Debug for RunningWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningWorker")
            .field("port", &self.port)
            .field("pid", &self.handle.pid())
            .finish()
    }
}

/// Launch a worker on a fresh port and wait until it accepts connections.
///
/// On any failure, including cancellation, the half-started worker is
/// terminated before the error is returned.
pub async fn spawn_ready(
    launcher: &dyn Launcher,
    ctx: &Cancellation,
    start_timeout: Duration,
    stop_grace_period: Duration,
    avoid: Option<u16>,
) -> Result<RunningWorker, ConvertError> {
    if let Some(reason) = ctx.reason() {
        return Err(ConvertError::Cancelled { reason });
    }

    let port = free_port(avoid)?;
    debug!(port, "Launching LibreOffice listener");
    let mut handle = launcher.launch(port).await?;

    match wait_until_ready(handle.as_mut(), port, ctx, start_timeout).await {
        Ok(()) => {
            info!(port, pid = ?handle.pid(), "LibreOffice listener ready");
            Ok(RunningWorker { port, handle })
        }
        Err(e) => {
            if let Err(stop) = handle.terminate(stop_grace_period).await {
                warn!("Cleaning up failed listener on port {}: {}", port, stop);
            }
            Err(e)
        }
    }
}

async fn wait_until_ready(
    handle: &mut dyn WorkerHandle,
    port: u16,
    ctx: &Cancellation,
    start_timeout: Duration,
) -> Result<(), ConvertError> {
    let deadline = Instant::now() + start_timeout;
    loop {
        if let Some(code) = handle.try_exit_code() {
            return Err(ConvertError::ListenerExited {
                port,
                exit_code: Some(code),
            });
        }

        let probe = tokio::time::timeout(
            PROBE_INTERVAL,
            TcpStream::connect((Ipv4Addr::LOCALHOST, port)),
        );
        if let Ok(Ok(_stream)) = probe.await {
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(ConvertError::ListenerStartTimeout {
                port,
                timeout_ms: u64::try_from(start_timeout.as_millis()).unwrap_or(u64::MAX),
            });
        }

        tokio::select! {
            biased;
            reason = ctx.done() => return Err(ConvertError::Cancelled { reason }),
            _ = tokio::time::sleep(PROBE_INTERVAL.min(deadline - now)) => {}
        }
    }
}

// ── Supervisor ───────────────────────────────────────────────────────────

/// Timings and recycling policy of a [`Listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerConfig {
    pub start_timeout: Duration,
    /// Uses before a restart. Must be at least 1 for a shared listener.
    pub restart_threshold: u32,
    pub stop_grace_period: Duration,
}

impl From<&ServiceConfig> for ListenerConfig {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            start_timeout: config.start_timeout,
            restart_threshold: config.restart_threshold,
            stop_grace_period: config.stop_grace_period,
        }
    }
}

/// Observable lifecycle phase of the shared listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerPhase {
    Stopped,
    Starting,
    Running,
    /// Running, with a conversion (or a restart) holding the gate.
    Locked,
    Stopping,
}

struct ListenerState {
    phase: ListenerPhase,
    worker: Option<RunningWorker>,
    /// Port of the most recent worker, kept after it stops so the next one
    /// gets a different port.
    last_port: Option<u16>,
    use_count: u32,
}

#[derive(Debug)]
enum SupervisorMessage {
    Release(OwnedSemaphorePermit),
}

struct Shared {
    launcher: Arc<dyn Launcher>,
    config: ListenerConfig,
    gate: Arc<Semaphore>,
    state: Mutex<ListenerState>,
    lifecycle: CancellationToken,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, ListenerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True if a worker is running. A worker that died on its own is
    /// discarded here so the caller starts a new one.
    fn is_alive(&self) -> bool {
        let mut state = self.state();
        if state.phase != ListenerPhase::Running {
            return false;
        }
        let crashed = match state.worker.as_mut() {
            None => return false,
            Some(worker) => worker
                .handle
                .try_exit_code()
                .map(|code| (worker.port, code)),
        };
        if let Some((port, code)) = crashed {
            warn!(port, exit_code = code, "LibreOffice listener exited on its own");
            state.worker = None;
            state.phase = ListenerPhase::Stopped;
            state.use_count = 0;
            return false;
        }
        true
    }

    // The `*_locked` methods require the caller to hold the gate.

    async fn start_locked(&self, ctx: &Cancellation) -> Result<u16, ConvertError> {
        let avoid = {
            let mut state = self.state();
            state.phase = ListenerPhase::Starting;
            state.last_port
        };

        let started = spawn_ready(
            self.launcher.as_ref(),
            ctx,
            self.config.start_timeout,
            self.config.stop_grace_period,
            avoid,
        )
        .await;

        let mut state = self.state();
        match started {
            Ok(worker) => {
                let port = worker.port;
                state.phase = ListenerPhase::Running;
                state.last_port = Some(port);
                state.use_count = 0;
                state.worker = Some(worker);
                Ok(port)
            }
            Err(e) => {
                state.phase = ListenerPhase::Stopped;
                Err(e)
            }
        }
    }

    async fn stop_locked(&self) -> Result<(), ConvertError> {
        let worker = {
            let mut state = self.state();
            state.use_count = 0;
            match state.worker.take() {
                Some(worker) => {
                    state.phase = ListenerPhase::Stopping;
                    worker
                }
                None => {
                    state.phase = ListenerPhase::Stopped;
                    return Ok(());
                }
            }
        };

        let result = worker.stop(self.config.stop_grace_period).await;
        self.state().phase = ListenerPhase::Stopped;
        result
    }

    async fn restart_locked(&self, ctx: &Cancellation) -> Result<u16, ConvertError> {
        if let Err(e) = self.stop_locked().await {
            warn!("Stopping LibreOffice listener before restart: {}", e);
        }
        self.start_locked(ctx).await
    }

    /// Book-keeping after a conversion released the listener.
    async fn after_use(&self) {
        let uses = {
            let mut state = self.state();
            if state.phase != ListenerPhase::Running {
                return;
            }
            state.use_count += 1;
            state.use_count
        };
        debug!(uses, threshold = self.config.restart_threshold, "LibreOffice listener released");

        if uses < self.config.restart_threshold {
            return;
        }

        info!(uses, "Restart threshold reached, restarting LibreOffice listener");
        let ctx = Cancellation::from_token(self.lifecycle.child_token());
        match self.restart_locked(&ctx).await {
            Ok(port) => debug!(port, "LibreOffice listener restarted"),
            Err(e) => error!(
                "Restarting LibreOffice listener failed, the next conversion will start a new one: {}",
                e
            ),
        }
    }
}

async fn run_supervisor(
    shared: Arc<Shared>,
    mut commands: mpsc::UnboundedReceiver<SupervisorMessage>,
) {
    loop {
        let message = tokio::select! {
            biased;
            message = commands.recv() => message,
            _ = shared.lifecycle.cancelled() => None,
        };
        let Some(SupervisorMessage::Release(permit)) = message else {
            break;
        };
        shared.after_use().await;
        drop(permit);
    }
    debug!("LibreOffice listener supervisor stopped");
}

/// Handle to the shared listener. Clones share the same worker.
///
/// The worker is started lazily by the first [`lock`](Self::lock), or
/// eagerly with [`start`](Self::start).
#[derive(Clone)]
pub struct Listener {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<SupervisorMessage>,
}

impl Listener {
    /// Create the supervisor and spawn its task. Must be called inside a
    /// Tokio runtime.
    pub fn new(launcher: Arc<dyn Launcher>, config: ListenerConfig) -> Self {
        let shared = Arc::new(Shared {
            launcher,
            config,
            gate: Arc::new(Semaphore::new(1)),
            state: Mutex::new(ListenerState {
                phase: ListenerPhase::Stopped,
                worker: None,
                last_port: None,
                use_count: 0,
            }),
            lifecycle: CancellationToken::new(),
        });
        let (commands, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_supervisor(Arc::clone(&shared), receiver));
        Self { shared, commands }
    }

    /// Supervisor around a real `soffice`.
    pub fn soffice(soffice_bin: impl Into<PathBuf>, config: ListenerConfig) -> Self {
        Self::new(Arc::new(SofficeLauncher::new(soffice_bin)), config)
    }

    /// Start the worker if it is not already running.
    pub async fn start(&self, ctx: &Cancellation) -> Result<u16, ConvertError> {
        let _permit = self.acquire(ctx).await?;
        if self.shared.is_alive() {
            if let Some(port) = self.port() {
                return Ok(port);
            }
        }
        self.shared.start_locked(ctx).await
    }

    /// Stop the worker, waiting for any conversion in flight. The next
    /// [`lock`](Self::lock) starts a new one.
    pub async fn stop(&self) -> Result<(), ConvertError> {
        let _permit = self.acquire(&Cancellation::never()).await?;
        self.shared.stop_locked().await
    }

    /// Wait for exclusive use of a running worker.
    ///
    /// Starts the worker if it is stopped (first use, failed restart,
    /// crash). Read the port from the returned lease, never before: a
    /// restart triggered by the previous holder changes it.
    ///
    /// # Errors
    /// - [`ConvertError::Cancelled`] if `ctx` fires while queued or starting
    /// - [`ConvertError::Supervisor`] if the worker could not be started
    /// - [`ConvertError::ListenerClosed`] after [`shutdown`](Self::shutdown)
    pub async fn lock(&self, ctx: &Cancellation) -> Result<ListenerLease, ConvertError> {
        let permit = self.acquire(ctx).await?;

        let port = if self.shared.is_alive() {
            self.port()
        } else {
            Some(
                self.shared
                    .start_locked(ctx)
                    .await
                    .map_err(|e| ConvertError::supervisor("starting", e))?,
            )
        };
        let port = port.ok_or_else(|| {
            ConvertError::Internal("running LibreOffice listener has no port".into())
        })?;

        Ok(ListenerLease {
            permit: Some(permit),
            port,
            commands: self.commands.clone(),
        })
    }

    /// Port of the current worker, if one is running.
    pub fn port(&self) -> Option<u16> {
        self.shared.state().worker.as_ref().map(|w| w.port)
    }

    /// Conversions served by the current worker.
    pub fn use_count(&self) -> u32 {
        self.shared.state().use_count
    }

    pub fn restart_threshold(&self) -> u32 {
        self.shared.config.restart_threshold
    }

    pub fn phase(&self) -> ListenerPhase {
        let phase = self.shared.state().phase;
        if phase == ListenerPhase::Running && self.shared.gate.available_permits() == 0 {
            ListenerPhase::Locked
        } else {
            phase
        }
    }

    /// Wait for the current holder, stop the worker and refuse further locks.
    pub async fn shutdown(&self) -> Result<(), ConvertError> {
        let permit = match Arc::clone(&self.shared.gate).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return Ok(()),
        };
        let result = self.shared.stop_locked().await;
        self.shared.gate.close();
        drop(permit);
        self.shared.lifecycle.cancel();
        info!("LibreOffice listener shut down");
        result
    }

    async fn acquire(&self, ctx: &Cancellation) -> Result<OwnedSemaphorePermit, ConvertError> {
        let gate = Arc::clone(&self.shared.gate);
        tokio::select! {
            biased;
            reason = ctx.done() => Err(ConvertError::Cancelled { reason }),
            permit = gate.acquire_owned() => permit.map_err(|_| ConvertError::ListenerClosed),
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("phase", &self.phase())
            .field("port", &self.port())
            .field("use_count", &self.use_count())
            .field("config", &self.shared.config)
            .finish()
    }
}

/// Exclusive use of the shared listener. Dropping it unlocks.
#[derive(Debug)]
pub struct ListenerLease {
    permit: Option<OwnedSemaphorePermit>,
    port: u16,
    commands: mpsc::UnboundedSender<SupervisorMessage>,
}

impl ListenerLease {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn unlock(self) {
        drop(self);
    }
}

impl Drop for ListenerLease {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            // If the supervisor is gone the permit comes back with the
            // error and is dropped here, which still opens the gate.
            if let Err(mpsc::error::SendError(message)) =
                self.commands.send(SupervisorMessage::Release(permit))
            {
                drop(message);
            }
        }
    }
}
