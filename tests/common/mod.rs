//! Fakes shared by the integration tests.
//!
//! * [`FakeLauncher`] : an in-process "LibreOffice" that only binds its port
//! * `tests/fixtures/fake-unoconv` : a shell stand-in for `unoconv`
//! * [`RecordingEngine`] : a [`PdfEngine`] that records calls and writes files

#![allow(dead_code)]

use async_trait::async_trait;
use edgequake_office2pdf::{
    Cancellation, ConvertError, EngineError, Launcher, Listener, ListenerConfig, PdfEngine, Uno,
    WorkerHandle, WorkerMode,
};
use edgequake_office2pdf::pipeline::uno::EphemeralWorkers;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

// ── Fake listener ────────────────────────────────────────────────────────────

#[derive(Default)]
struct LauncherState {
    launches: AtomicUsize,
    alive: AtomicUsize,
    fail_next: AtomicUsize,
    silent: AtomicBool,
    ports: Mutex<Vec<u16>>,
    current: Mutex<Option<FakeProcess>>,
}

#[derive(Clone)]
struct FakeProcess {
    stop: CancellationToken,
    crashed: Arc<AtomicBool>,
}

/// Launches "workers" that accept TCP connections on the requested port and
/// do nothing else.
#[derive(Clone, Default)]
pub struct FakeLauncher {
    state: Arc<LauncherState>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` launches fail with a launch error.
    pub fn fail_next(&self, n: usize) {
        self.state.fail_next.store(n, Ordering::SeqCst);
    }

    /// Launched workers never open their port (start-up times out).
    pub fn set_silent(&self, silent: bool) {
        self.state.silent.store(silent, Ordering::SeqCst);
    }

    /// Kill the most recently launched worker as if it crashed.
    pub fn crash_current(&self) {
        if let Some(process) = self.state.current.lock().unwrap().as_ref() {
            process.crashed.store(true, Ordering::SeqCst);
            process.stop.cancel();
        }
    }

    pub fn launches(&self) -> usize {
        self.state.launches.load(Ordering::SeqCst)
    }

    /// Workers launched and not yet terminated.
    pub fn alive(&self) -> usize {
        self.state.alive.load(Ordering::SeqCst)
    }

    /// Ports of successful launches, in order.
    pub fn ports(&self) -> Vec<u16> {
        self.state.ports.lock().unwrap().clone()
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(&self, port: u16) -> Result<Box<dyn WorkerHandle>, ConvertError> {
        self.state.launches.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .state
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ConvertError::Launch {
                program: "fake-soffice".into(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "injected failure"),
            });
        }

        let process = FakeProcess {
            stop: CancellationToken::new(),
            crashed: Arc::new(AtomicBool::new(false)),
        };

        if !self.state.silent.load(Ordering::SeqCst) {
            let socket = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
                .await
                .map_err(|source| ConvertError::NoFreePort { source })?;
            let stop = process.stop.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        accepted = socket.accept() => {
                            if accepted.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }

        self.state.alive.fetch_add(1, Ordering::SeqCst);
        self.state.ports.lock().unwrap().push(port);
        *self.state.current.lock().unwrap() = Some(process.clone());

        Ok(Box::new(FakeWorker {
            process,
            state: Arc::clone(&self.state),
            terminated: false,
        }))
    }
}

struct FakeWorker {
    process: FakeProcess,
    state: Arc<LauncherState>,
    terminated: bool,
}

#[async_trait]
impl WorkerHandle for FakeWorker {
    fn pid(&self) -> Option<u32> {
        None
    }

    fn try_exit_code(&mut self) -> Option<i32> {
        self.process.crashed.load(Ordering::SeqCst).then_some(134)
    }

    async fn terminate(&mut self, _grace: Duration) -> Result<(), ConvertError> {
        self.process.stop.cancel();
        if !self.terminated {
            self.terminated = true;
            self.state.alive.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for FakeWorker {
    fn drop(&mut self) {
        self.process.stop.cancel();
        if !self.terminated {
            self.state.alive.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

pub fn listener_config(restart_threshold: u32) -> ListenerConfig {
    ListenerConfig {
        start_timeout: Duration::from_secs(5),
        restart_threshold,
        stop_grace_period: Duration::from_millis(200),
    }
}

pub fn shared_listener(launcher: &FakeLauncher, restart_threshold: u32) -> Listener {
    Listener::new(Arc::new(launcher.clone()), listener_config(restart_threshold))
}

// ── Fake unoconv ─────────────────────────────────────────────────────────────

pub fn fake_unoconv() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/fake-unoconv")
}

/// Invoker backed by a shared listener on `launcher`.
pub fn shared_uno(launcher: &FakeLauncher, restart_threshold: u32) -> Uno {
    Uno::new(
        fake_unoconv(),
        WorkerMode::Shared(shared_listener(launcher, restart_threshold)),
    )
}

/// Invoker starting a private worker from `launcher` per conversion.
pub fn ephemeral_uno(launcher: &FakeLauncher) -> Uno {
    Uno::new(
        fake_unoconv(),
        WorkerMode::Ephemeral(EphemeralWorkers::new(
            Arc::new(launcher.clone()),
            Duration::from_secs(5),
            Duration::from_millis(200),
        )),
    )
}

/// Lines the fake unoconv appended to `dir/calls.log`: `port format pages input`.
pub fn unoconv_calls(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("calls.log"))
        .map(|s| s.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Files in `dir` with the given extension (e.g. `pdf`).
pub fn files_with_extension(dir: &Path, extension: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|e| e == extension))
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

// ── Fake PDF engine ──────────────────────────────────────────────────────────

/// How [`RecordingEngine::convert`] answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertBehaviour {
    Succeed,
    FormatNotAvailable,
    Fail,
}

pub struct RecordingEngine {
    pub calls: Mutex<Vec<String>>,
    pub fail_merge: AtomicBool,
    pub convert_behaviour: Mutex<ConvertBehaviour>,
}

impl RecordingEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail_merge: AtomicBool::new(false),
            convert_behaviour: Mutex::new(ConvertBehaviour::Succeed),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_convert_behaviour(&self, behaviour: ConvertBehaviour) {
        *self.convert_behaviour.lock().unwrap() = behaviour;
    }
}

#[async_trait]
impl PdfEngine for RecordingEngine {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn merge(
        &self,
        _ctx: &Cancellation,
        inputs: &[PathBuf],
        output: &Path,
    ) -> Result<(), EngineError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("merge {}", inputs.len()));
        if self.fail_merge.load(Ordering::SeqCst) {
            return Err(EngineError::Failed {
                engine: "recording",
                detail: "injected merge failure".into(),
            });
        }
        let mut merged = Vec::new();
        for input in inputs {
            merged.extend(std::fs::read(input).map_err(|e| EngineError::Failed {
                engine: "recording",
                detail: e.to_string(),
            })?);
        }
        std::fs::write(output, merged).map_err(|e| EngineError::Failed {
            engine: "recording",
            detail: e.to_string(),
        })
    }

    async fn convert(
        &self,
        _ctx: &Cancellation,
        format: &str,
        input: &Path,
        output: &Path,
    ) -> Result<(), EngineError> {
        self.calls.lock().unwrap().push(format!("convert {format}"));
        let behaviour = *self.convert_behaviour.lock().unwrap();
        match behaviour {
            ConvertBehaviour::Succeed => std::fs::copy(input, output)
                .map(|_| ())
                .map_err(|e| EngineError::Failed {
                    engine: "recording",
                    detail: e.to_string(),
                }),
            ConvertBehaviour::FormatNotAvailable => Err(EngineError::FormatNotAvailable {
                engine: "recording",
                format: format.to_string(),
            }),
            ConvertBehaviour::Fail => Err(EngineError::Failed {
                engine: "recording",
                detail: "injected convert failure".into(),
            }),
        }
    }
}
