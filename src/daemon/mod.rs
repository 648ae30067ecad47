// daemon/mod.rs - background sync process (C6): self-respawning singleton
// that owns the sync ticker, heartbeat, and the unix-socket IPC surface the
// CLI uses to nudge it. Grounded on the oddjobs daemon's lifecycle module
// for the lock/bind/shutdown shape; the sync cycle itself is
// `sync::SyncManager::run_cycle` run once per configured backend.

pub mod ipc;
pub mod lifecycle;

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::net::UnixListener;
use tokio::sync::{mpsc, Semaphore};

use crate::config::{Config, Paths};
use crate::db::{sync_meta, Store};
use crate::queue::OperationQueue;
use crate::sync::{SyncManager, SyncManagerConfig};
use crate::{Error, Result};

use self::ipc::{BackendStatus, Request, Response};

const HEARTBEAT_INTERVAL_SECS: u64 = 10;
const NOTIFY_DEBOUNCE: Duration = Duration::from_millis(500);

/// Attempt to become the singleton daemon and run until a shutdown request
/// or idle timeout. Called only from the `__daemon` CLI entry point, inside
/// the re-exec'd child process (see [`spawn_detached`]).
pub async fn run(cfg: Config, paths: Paths) -> Result<()> {
    paths.ensure_all()?;
    let pid = std::process::id();
    tracing::info!(pid, "daemon starting");

    let pid_path = paths.pid_file();
    let mut lock = match lifecycle::PidLock::try_acquire(&pid_path)? {
        Some(lock) => lock,
        None => {
            tracing::warn!("another daemon instance already holds the PID lock, exiting");
            return Ok(());
        }
    };
    lock.write_pid(pid)?;

    let socket_path = paths.socket_file();
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }
    let listener = UnixListener::bind(&socket_path)?;

    let local_store = Store::open(&paths.local_store_file(), &cfg.sync.local_backend).await?;
    let daemon_store = Store::open(&paths.daemon_store_file(), "daemon").await?;
    let queue = OperationQueue::new(local_store.clone());

    let start = Utc::now();
    sync_meta::write_heartbeat_start(&daemon_store, i64::from(pid), start).await?;

    let manager = Arc::new(SyncManager::new(SyncManagerConfig {
        offline_mode: cfg.sync.offline_mode,
        connectivity_timeout: cfg.sync.connectivity_timeout(),
        conflict_resolution: cfg.sync.conflict_resolution,
        merge_fallback: cfg.sync.merge_fallback,
        missing_list_policy: cfg.sync.missing_list_policy,
        background_pull_cooldown: cfg.sync.background_pull_cooldown(),
    }));

    let backends = if cfg.sync.daemon.backends.is_empty() {
        cfg.backends
            .iter()
            .filter(|(_, b)| b.enabled)
            .map(|(name, _)| name.clone())
            .collect::<Vec<_>>()
    } else {
        cfg.sync.daemon.backends.clone()
    };

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<ShutdownKind>(1);
    let state = DaemonState {
        cfg: Arc::new(cfg),
        local_store,
        daemon_store: daemon_store.clone(),
        queue,
        manager,
        backends: Arc::new(backends),
        pid,
        started_at: start,
        shutdown_tx,
        last_activity: Arc::new(StdMutex::new(Instant::now())),
        last_notify: Arc::new(StdMutex::new(None)),
        sync_permit: Arc::new(Semaphore::new(1)),
        shutting_down: Arc::new(AtomicBool::new(false)),
    };

    let mut sync_ticker = tokio::time::interval(Duration::from_secs(state.cfg.sync.daemon.interval_secs.max(1)));
    sync_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut heartbeat_ticker = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .map_err(|e| Error::Internal(format!("failed to install SIGTERM handler: {e}")))?;

    tracing::info!(backends = ?state.backends, interval_secs = state.cfg.sync.daemon.interval_secs, "daemon ready");

    loop {
        #[cfg(unix)]
        let sigterm_fut = sigterm.recv();
        #[cfg(not(unix))]
        let sigterm_fut = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = sync_ticker.tick() => {
                *state.last_activity.lock().unwrap() = Instant::now();
                trigger_sync(state.clone());
            }
            _ = heartbeat_ticker.tick() => {
                let _ = sync_meta::beat(&state.daemon_store, Utc::now()).await;
                if let Some(idle_secs) = state.cfg.sync.daemon.idle_timeout_secs {
                    let elapsed = state.last_activity.lock().unwrap().elapsed();
                    if elapsed.as_secs() >= idle_secs {
                        tracing::info!(idle_secs, "idle timeout reached, shutting down");
                        break;
                    }
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        let state = state.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, state).await {
                                tracing::warn!("ipc connection error: {e}");
                            }
                        });
                    }
                    Err(e) => tracing::warn!("accept error: {e}"),
                }
            }
            kind = shutdown_rx.recv() => {
                match kind {
                    Some(ShutdownKind::Graceful) | None => {
                        tracing::info!("graceful shutdown requested, waiting for in-flight sync");
                        state.shutting_down.store(true, Ordering::SeqCst);
                        let _ = state.sync_permit.acquire().await;
                        break;
                    }
                    Some(ShutdownKind::Immediate) => {
                        tracing::warn!("immediate shutdown requested");
                        break;
                    }
                }
            }
            _ = sigterm_fut => {
                tracing::info!("received SIGTERM, shutting down gracefully");
                state.shutting_down.store(true, Ordering::SeqCst);
                let _ = state.sync_permit.acquire().await;
                break;
            }
        }
    }

    let _ = std::fs::remove_file(&socket_path);
    tracing::info!("daemon exiting");
    Ok(())
}

enum ShutdownKind {
    Graceful,
    Immediate,
}

#[derive(Clone)]
struct DaemonState {
    cfg: Arc<Config>,
    local_store: Store,
    daemon_store: Store,
    queue: OperationQueue,
    manager: Arc<SyncManager>,
    backends: Arc<Vec<String>>,
    pid: u32,
    started_at: chrono::DateTime<Utc>,
    shutdown_tx: mpsc::Sender<ShutdownKind>,
    last_activity: Arc<StdMutex<Instant>>,
    last_notify: Arc<StdMutex<Option<Instant>>>,
    sync_permit: Arc<Semaphore>,
    shutting_down: Arc<AtomicBool>,
}

/// Spawn a sync cycle across every configured backend unless one is already
/// in flight, in which case the trigger is dropped silently: a tick or a
/// notify arriving mid-cycle means "there's already a cycle coming."
fn trigger_sync(state: DaemonState) {
    tokio::spawn(async move {
        if state.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        let Ok(_permit) = Arc::clone(&state.sync_permit).try_acquire_owned() else {
            tracing::debug!("sync cycle already running, skipping trigger");
            return;
        };
        run_all_backends(&state).await;
    });
}

async fn run_all_backends(state: &DaemonState) {
    for name in state.backends.iter() {
        let Some(backend_cfg) = state.cfg.backends.get(name) else {
            tracing::warn!(backend = name, "configured in sync.daemon.backends but missing from backends");
            continue;
        };
        if !backend_cfg.enabled {
            continue;
        }
        let remote = match crate::open_backend(name, backend_cfg, &state.local_store).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(backend = name, "failed to open backend: {e}");
                continue;
            }
        };
        let scoped = state.local_store.with_backend(name.as_str());
        match state.manager.run_cycle(&scoped, &state.queue, remote.as_ref(), i64::from(state.pid)).await {
            Ok(summary) => tracing::info!(backend = name, "{}", summary.describe()),
            Err(e) => tracing::warn!(backend = name, "sync cycle failed: {e}"),
        }
    }
    let _ = sync_meta::record_sync_completed(&state.daemon_store, Utc::now()).await;
}

async fn handle_connection(mut stream: tokio::net::UnixStream, state: DaemonState) -> Result<()> {
    let req: Request = ipc::read_message(&mut stream).await?;
    let response = match req {
        Request::Status => build_status(&state).await,
        Request::Notify => {
            *state.last_activity.lock().unwrap() = Instant::now();
            let mut last_notify = state.last_notify.lock().unwrap();
            let should_trigger = match *last_notify {
                Some(last) => last.elapsed() >= NOTIFY_DEBOUNCE,
                None => true,
            };
            if should_trigger {
                *last_notify = Some(Instant::now());
                drop(last_notify);
                trigger_sync(state.clone());
            }
            Response::Ack
        }
        Request::Stop => {
            let _ = state.shutdown_tx.send(ShutdownKind::Graceful).await;
            Response::Ack
        }
        Request::Kill => {
            let _ = state.shutdown_tx.send(ShutdownKind::Immediate).await;
            Response::Ack
        }
    };
    ipc::write_message(&mut stream, &response).await
}

async fn build_status(state: &DaemonState) -> Response {
    let heartbeat = sync_meta::get_heartbeat(&state.daemon_store).await.ok().flatten();
    let mut backends = Vec::new();
    for name in state.backends.iter() {
        let scoped = state.local_store.with_backend(name.as_str());
        let last_sync = sync_meta::get_last_sync(&scoped).await.ok().flatten();
        backends.push(BackendStatus {
            backend_id: name.clone(),
            last_sync,
            last_error: None,
        });
    }
    match heartbeat {
        Some(hb) => Response::Status {
            pid: state.pid,
            started_at: hb.start_time,
            last_beat: hb.last_beat,
            sync_count: hb.sync_count,
            offline_mode: state.cfg.sync.offline_mode,
            interval_secs: state.cfg.sync.daemon.interval_secs,
            backends,
        },
        None => Response::Status {
            pid: state.pid,
            started_at: state.started_at,
            last_beat: state.started_at,
            sync_count: 0,
            offline_mode: state.cfg.sync.offline_mode,
            interval_secs: state.cfg.sync.daemon.interval_secs,
            backends,
        },
    }
}

/// Re-exec the current binary with the internal `__daemon` argument,
/// detached from the parent's stdio except for the daemon log file. We
/// avoid a raw `fork(2)` (which would need `unsafe`) in favor of spawning a
/// fresh child process, matching this codebase's avoidance of `unsafe`
/// elsewhere.
pub fn spawn_detached(paths: &Paths) -> Result<()> {
    let exe = std::env::current_exe()?;
    let log_path = paths.daemon_log_file();
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log = std::fs::OpenOptions::new().create(true).append(true).open(&log_path)?;
    std::process::Command::new(exe)
        .arg("__daemon")
        .stdin(Stdio::null())
        .stdout(Stdio::from(log.try_clone()?))
        .stderr(Stdio::from(log))
        .spawn()?;
    Ok(())
}

/// Start the daemon if nothing is currently holding the PID lock. Returns
/// whether a new process was spawned.
pub fn start_if_not_running(paths: &Paths) -> Result<bool> {
    if lifecycle::is_held(&paths.pid_file())? {
        return Ok(false);
    }
    spawn_detached(paths)?;
    Ok(true)
}

/// Called after a mutation when `sync.enabled && daemon.enabled &&
/// daemon.auto_start` all hold. Failure to start is never fatal to the CLI
/// command that triggered it.
pub fn maybe_auto_start(cfg: &Config, paths: &Paths) {
    if !(cfg.sync.enabled && cfg.sync.daemon.enabled && cfg.sync.daemon.auto_start) {
        return;
    }
    if let Err(e) = start_if_not_running(paths) {
        tracing::warn!("auto-start of sync daemon failed: {e}");
    }
}

/// Best-effort, fire-and-forget nudge: the CLI's read/write paths call this
/// and move on regardless of outcome, since the actual sync happens on the
/// daemon's own schedule.
pub async fn notify_fire_and_forget(paths: &Paths) {
    let socket = paths.socket_file();
    let attempt = tokio::time::timeout(Duration::from_millis(300), ipc::send_request(&socket, &Request::Notify)).await;
    if let Err(_) | Ok(Err(_)) = attempt {
        tracing::debug!("daemon notify skipped (daemon not reachable)");
    }
}

pub async fn status(paths: &Paths) -> Result<Response> {
    ipc::send_request(&paths.socket_file(), &Request::Status).await
}

pub async fn stop(paths: &Paths) -> Result<Response> {
    ipc::send_request(&paths.socket_file(), &Request::Stop).await
}

pub async fn kill(paths: &Paths) -> Result<Response> {
    ipc::send_request(&paths.socket_file(), &Request::Kill).await
}

pub fn is_running(paths: &Paths) -> Result<bool> {
    lifecycle::is_held(&paths.pid_file())
}
