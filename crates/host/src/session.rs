//! One long-lived CPython-WASI instance per session.
//!
//! The guest runs `guest.py` on a dedicated worker thread — wasmtime's
//! synchronous API must not run on a tokio executor thread — while the
//! caller drives it over framed stdio from async context.  A session moves
//! through `Starting → Ready → (Executing → Ready)* → Closing → Closed`;
//! the per-session mutex guarantees at most one outstanding `exec_request`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use wasmtime::{Engine, Linker, Module, Store, UpdateDeadline};
use wasmtime_wasi::preview1::{self, WasiP1Ctx};
use wasmtime_wasi::{DirPerms, FilePerms, I32Exit, WasiCtxBuilder};

use codecell_wire::{ExecError, ExecOutcome, Message, ToolFault, WireError, read_frame, write_frame};

use crate::config::HostConfig;
use crate::error::HostError;
use crate::handler::ToolHandler;
use crate::pipe::{HostStdio, drain_now, stdio_pair};

/// In-guest runtime files materialized into every session directory.
const GUEST_LOOP: &str = include_str!("../guest/guest.py");
const GUEST_HELPERS: &str = include_str!("../guest/guest_helpers.py");

/// Outcome of one executed cell, as surfaced to callers.
#[derive(Debug, Clone, Serialize)]
pub struct ExecResult {
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
    pub wall_ms: u64,
    pub error: Option<String>,
}

/// How the guest worker thread ended.
#[derive(Debug, Clone)]
enum GuestExit {
    Clean,
    Exit(i32),
    Trapped(String),
    Failed(String),
}

impl GuestExit {
    fn describe(&self) -> String {
        match self {
            GuestExit::Clean => "guest exited".into(),
            GuestExit::Exit(code) => format!("guest exited with status {code}"),
            GuestExit::Trapped(msg) => format!("guest trapped: {msg}"),
            GuestExit::Failed(msg) => format!("guest failed to start: {msg}"),
        }
    }
}

struct GuestState {
    wasi: WasiP1Ctx,
}

struct IoState {
    stdio: HostStdio,
    closed: bool,
}

pub struct Session {
    sid: String,
    dir: PathBuf,
    engine: Engine,
    max_frame_bytes: usize,
    handler: Arc<dyn ToolHandler>,
    /// Set by the timeout timer just before it bumps the engine epoch.
    timed_out: Arc<AtomicBool>,
    guest_exit: Arc<StdMutex<Option<GuestExit>>>,
    guest_thread: std::thread::JoinHandle<()>,
    /// Serializes exec_cell, reset and close, and owns the host pipe ends.
    io: Mutex<IoState>,
}

impl Session {
    /// Spin up the WASI instance for `sid` under `config.root/<sid>`.
    ///
    /// The directory is created if needed, the guest runtime files are
    /// materialized, the interpreter module is loaded into a fresh engine
    /// (one engine per session, so an epoch bump can never interrupt a
    /// sibling), and the worker thread is started on `_start`.
    pub(crate) async fn new(
        sid: &str,
        config: &HostConfig,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<Self, HostError> {
        let dir = config.root.join(sid);
        std::fs::create_dir_all(&dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
        }
        materialize_guest_files(&dir)?;

        if !config.python_wasm.is_file() {
            return Err(HostError::Config(format!(
                "python.wasm not found at {}",
                config.python_wasm.display()
            )));
        }

        let mut engine_config = wasmtime::Config::new();
        engine_config.epoch_interruption(true);
        let engine = Engine::new(&engine_config).map_err(HostError::Wasm)?;
        let module = Module::from_file(&engine, &config.python_wasm).map_err(HostError::Wasm)?;
        debug!(sid, wasm = %config.python_wasm.display(), "interpreter module loaded");

        let (host_stdio, guest_stdio) = stdio_pair();

        let session_alias = config
            .session_guest_alias
            .clone()
            .unwrap_or_else(|| dir.to_string_lossy().into_owned());
        let guest_script = format!("{session_alias}/guest.py");

        let mut builder = WasiCtxBuilder::new();
        builder.stdin(guest_stdio.stdin);
        builder.stdout(guest_stdio.stdout);
        builder.stderr(guest_stdio.stderr);
        builder.args(&["python", "-u", guest_script.as_str()]);
        builder
            .preopened_dir(&dir, &session_alias, DirPerms::all(), FilePerms::all())
            .map_err(HostError::Wasm)?;
        configure_python_env(&mut builder, config, &session_alias)?;
        let wasi = builder.build_p1();

        let timed_out = Arc::new(AtomicBool::new(false));
        let mut store = Store::new(&engine, GuestState { wasi });
        store.set_epoch_deadline(1);
        let flag = timed_out.clone();
        store.epoch_deadline_callback(move |_| {
            if flag.load(Ordering::SeqCst) {
                Err(wasmtime::Error::msg("wall-clock deadline reached"))
            } else {
                // Stale epoch bump from a timer that lost the race against a
                // completing cell: re-arm and keep running.
                Ok(UpdateDeadline::Continue(1))
            }
        });

        let mut linker: Linker<GuestState> = Linker::new(&engine);
        preview1::add_to_linker_sync(&mut linker, |state: &mut GuestState| &mut state.wasi)
            .map_err(HostError::Wasm)?;

        let guest_exit: Arc<StdMutex<Option<GuestExit>>> = Arc::new(StdMutex::new(None));
        let exit_slot = guest_exit.clone();
        let thread_sid = sid.to_string();
        let guest_thread = std::thread::Builder::new()
            .name(format!("wasi-session-{sid}"))
            .spawn(move || {
                let exit = run_guest(store, linker, module);
                debug!(sid = %thread_sid, exit = ?exit, "guest thread finished");
                *lock_unpoisoned(&exit_slot) = Some(exit);
            })?;

        info!(sid, dir = %dir.display(), "session started");
        Ok(Self {
            sid: sid.to_string(),
            dir,
            engine,
            max_frame_bytes: config.max_frame_bytes,
            handler,
            timed_out,
            guest_exit,
            guest_thread,
            io: Mutex::new(IoState { stdio: host_stdio, closed: false }),
        })
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// The session's scratch directory on the host.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Execute one cell, waiting at most `timeout_ms` (0 disables the
    /// deadline).
    ///
    /// Tool upcalls made by the cell are dispatched to the handler serially,
    /// in arrival order.  Traps, timeouts and stream faults mid-cell are
    /// reported through the returned [`ExecResult`]; only lifecycle problems
    /// (session closed, guest already dead) surface as errors.
    pub async fn exec_cell(&self, code: &str, timeout_ms: u64) -> Result<ExecResult, HostError> {
        let mut io = self.io.lock().await;
        if io.closed {
            return Err(HostError::Stopped);
        }
        self.ensure_guest_alive()?;
        debug!(sid = %self.sid, timeout_ms, "exec start");

        let timer = (timeout_ms > 0).then(|| {
            let engine = self.engine.clone();
            let flag = self.timed_out.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
                flag.store(true, Ordering::SeqCst);
                engine.increment_epoch();
            })
        });

        let started = Instant::now();
        let outcome = self.run_turn(&mut io, code).await;

        if let Some(timer) = &timer {
            timer.abort();
        }
        let timed_out = self.timed_out.swap(false, Ordering::SeqCst);
        let wall_ms = started.elapsed().as_millis() as u64;

        let mut result = match outcome {
            Ok(outcome) => ExecResult {
                ok: outcome.ok,
                stdout: outcome.stdout,
                stderr: outcome.stderr,
                wall_ms,
                error: outcome.error.map(|e| e.msg),
            },
            Err(err) => {
                let error = if timed_out {
                    format!("Timeout after {timeout_ms} ms")
                } else if matches!(self.guest_exit_soon().await, Some(GuestExit::Trapped(_))) {
                    "Trap".to_string()
                } else {
                    err.to_string()
                };
                ExecResult {
                    ok: false,
                    stdout: String::new(),
                    stderr: String::new(),
                    wall_ms,
                    error: Some(error),
                }
            }
        };

        let late_stderr = drain_now(&mut io.stdio.stderr).await;
        if !late_stderr.is_empty() {
            result.stderr.push_str(&String::from_utf8_lossy(&late_stderr));
        }
        debug!(sid = %self.sid, ok = result.ok, wall_ms = result.wall_ms, "exec done");
        Ok(result)
    }

    async fn run_turn(&self, io: &mut IoState, code: &str) -> Result<ExecOutcome, HostError> {
        let request = Message::ExecRequest { code: code.to_string() };
        write_frame(&mut io.stdio.stdin, &request.to_value()).await?;
        drive_turn(
            &mut io.stdio.stdout,
            &mut io.stdio.stdin,
            self.handler.as_ref(),
            self.max_frame_bytes,
        )
        .await
    }

    /// Clear the guest's persistent globals.  The acknowledgement read is
    /// best-effort.
    pub async fn reset(&self) -> Result<(), HostError> {
        let mut io = self.io.lock().await;
        if io.closed {
            return Err(HostError::Stopped);
        }
        self.ensure_guest_alive()?;
        debug!(sid = %self.sid, "reset");
        write_frame(&mut io.stdio.stdin, &Message::Reset.to_value()).await?;
        if let Err(err) = read_frame(&mut io.stdio.stdout, self.max_frame_bytes).await {
            debug!(sid = %self.sid, error = %err, "reset ack not read");
        }
        Ok(())
    }

    /// Ask the guest to exit, then tear the stdio channel down.  Idempotent;
    /// all subsequent calls on this session fail with `Stopped`.
    pub async fn close(&self) {
        let mut io = self.io.lock().await;
        if io.closed {
            return;
        }
        io.closed = true;
        debug!(sid = %self.sid, "close");
        if !self.guest_thread.is_finished()
            && write_frame(&mut io.stdio.stdin, &Message::Exit.to_value())
                .await
                .is_ok()
        {
            let ack = tokio::time::timeout(
                Duration::from_secs(2),
                read_frame(&mut io.stdio.stdout, self.max_frame_bytes),
            )
            .await;
            if ack.is_err() {
                warn!(sid = %self.sid, "guest did not acknowledge exit in time");
            }
        }
        let _ = io.stdio.stdin.shutdown().await;
        info!(sid = %self.sid, "session closed");
    }

    fn ensure_guest_alive(&self) -> Result<(), HostError> {
        if !self.guest_thread.is_finished() {
            return Ok(());
        }
        let detail = lock_unpoisoned(&self.guest_exit)
            .clone()
            .map(|exit| exit.describe())
            .unwrap_or_else(|| "guest thread exited".into());
        Err(HostError::GuestTerminated(detail))
    }

    /// Snapshot the guest exit status, allowing a just-finished thread a
    /// moment to record it.  `None` while the guest is still running.
    async fn guest_exit_soon(&self) -> Option<GuestExit> {
        for _ in 0..20 {
            if let Some(exit) = lock_unpoisoned(&self.guest_exit).clone() {
                return Some(exit);
            }
            if !self.guest_thread.is_finished() {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        lock_unpoisoned(&self.guest_exit).clone()
    }
}

/// Receive loop for one execution turn: service `tool_request`s as they
/// arrive, return on the terminal execution result.
pub(crate) async fn drive_turn<R, W>(
    reader: &mut R,
    writer: &mut W,
    handler: &dyn ToolHandler,
    max_frame_bytes: usize,
) -> Result<ExecOutcome, HostError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let Some(value) = read_frame(reader, max_frame_bytes).await? else {
            // Null frame: nothing yet, keep reading.
            continue;
        };
        match Message::decode(value) {
            Ok(Message::ToolRequest { id, name, arguments }) => {
                let reply = dispatch_tool_request(handler, &id, &name, &arguments).await;
                write_frame(writer, &reply).await?;
            }
            Ok(Message::ExecResult(outcome)) => return Ok(outcome),
            Ok(Message::Ack { ok }) => return Ok(ExecOutcome { ok, ..ExecOutcome::default() }),
            Ok(other) => {
                warn!(message = ?other, "unexpected frame during execution");
                return Ok(ExecOutcome {
                    ok: false,
                    error: Some(ExecError {
                        kind: None,
                        msg: "unexpected frame during execution".into(),
                        trace: None,
                    }),
                    ..ExecOutcome::default()
                });
            }
            Err(err @ WireError::MissingId) => {
                // A tool request with no id cannot be answered; drop it.
                warn!(error = %err, "unroutable tool request dropped");
            }
            Err(err) => return Err(HostError::Protocol(err)),
        }
    }
}

/// Run the handler and shape its outcome into a `tool_result` frame.
/// `type` and `id` are filled in when the handler's map omits them.
async fn dispatch_tool_request(
    handler: &dyn ToolHandler,
    id: &str,
    name: &str,
    arguments: &Map<String, Value>,
) -> Value {
    debug!(tool = name, id, "tool upcall");
    match handler.handle(name, id, arguments).await {
        Ok(mut reply) => {
            reply
                .entry("type")
                .or_insert_with(|| Value::String("tool_result".into()));
            reply
                .entry("id")
                .or_insert_with(|| Value::String(id.to_string()));
            Value::Object(reply)
        }
        Err(err) => {
            warn!(tool = name, id, error = format!("{err:#}"), "tool handler failed");
            Message::ToolResult {
                id: id.to_string(),
                content: None,
                error: Some(ToolFault {
                    kind: "CallbackError".into(),
                    message: format!("{err:#}"),
                }),
            }
            .to_value()
        }
    }
}

/// Body of the worker thread: instantiate and run `_start` to completion.
fn run_guest(mut store: Store<GuestState>, linker: Linker<GuestState>, module: Module) -> GuestExit {
    let instance = match linker.instantiate(&mut store, &module) {
        Ok(instance) => instance,
        Err(err) => return GuestExit::Failed(format!("{err:#}")),
    };
    let start = match instance.get_typed_func::<(), ()>(&mut store, "_start") {
        Ok(start) => start,
        Err(err) => return GuestExit::Failed(format!("{err:#}")),
    };
    match start.call(&mut store, ()) {
        Ok(()) => GuestExit::Clean,
        Err(err) => {
            if let Some(exit) = err.downcast_ref::<I32Exit>() {
                if exit.0 == 0 {
                    GuestExit::Clean
                } else {
                    GuestExit::Exit(exit.0)
                }
            } else {
                // Wasm traps and epoch interrupts both land here.
                GuestExit::Trapped(format!("{err:#}"))
            }
        }
    }
}

fn materialize_guest_files(dir: &Path) -> std::io::Result<()> {
    for (name, contents) in [("guest.py", GUEST_LOOP), ("guest_helpers.py", GUEST_HELPERS)] {
        let path = dir.join(name);
        if !path.is_file() {
            std::fs::write(&path, contents)?;
        }
    }
    Ok(())
}

/// Preopen the interpreter home read-only and point the guest's Python at
/// it: `PYTHONHOME` plus a `PYTHONPATH` covering the lib tree, any stdlib
/// zip bundles, and the session directory itself (first).
fn configure_python_env(
    builder: &mut WasiCtxBuilder,
    config: &HostConfig,
    session_alias: &str,
) -> Result<(), HostError> {
    let mut search: Vec<String> = vec![session_alias.to_string()];

    if let Some(home) = &config.python_home {
        if home.is_dir() {
            let guest_home = config.home_guest_alias.trim_end_matches('/').to_string();
            builder
                .preopened_dir(home, &guest_home, DirPerms::READ, FilePerms::READ)
                .map_err(HostError::Wasm)?;
            builder.env("PYTHONHOME", &guest_home);

            let lib_dir = home.join("lib");
            if lib_dir.is_dir() {
                let guest_lib = format!("{guest_home}/lib");
                search.push(guest_lib.clone());
                let mut names: Vec<String> = std::fs::read_dir(&lib_dir)?
                    .filter_map(|entry| entry.ok())
                    .filter_map(|entry| entry.file_name().into_string().ok())
                    .collect();
                names.sort();
                for name in names {
                    let host_entry = lib_dir.join(&name);
                    if (name.ends_with(".zip") && host_entry.is_file()) || host_entry.is_dir() {
                        search.push(format!("{guest_lib}/{name}"));
                    }
                }
            } else {
                search.push(guest_home.clone());
            }
        } else {
            warn!(home = %home.display(), "python home missing; guest runs without a stdlib preopen");
        }
    }

    let mut deduped: Vec<String> = Vec::new();
    for path in search {
        if !deduped.contains(&path) {
            deduped.push(path);
        }
    }
    builder.env("PYTHONPATH", deduped.join(":"));
    Ok(())
}

fn lock_unpoisoned<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
