// main.rs - thin CLI front end. Argument parsing and rendering (colorized
// tables, tree views) are explicitly out of scope for this spec's
// engineering focus; this binary resolves `clap`-parsed arguments into
// calls on `todoat_core::engine::TaskEngine` / `sync::SyncManager` /
// `daemon`, then prints the `INFO_ONLY|ACTION_COMPLETED|ERROR` result
// sentinel (spec §6).

use clap::{Parser, Subcommand};
use serde::Serialize;

use todoat_core::config::{Config, Paths};
use todoat_core::db::{credentials, Store};
use todoat_core::engine::{MatchMode, TaskEngine};
use todoat_core::model::{self, Status, Task};
use todoat_core::queue::OperationQueue;
use todoat_core::sync::{conflict::ConflictStrategy, SyncManager, SyncManagerConfig};
use todoat_core::{daemon, Error, Result};

#[derive(Parser)]
#[command(name = "todoat", version, about = "Offline-first, multi-backend task manager")]
struct Cli {
    /// Override the config file location (also settable via TODOAT_CONFIG).
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Emit machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    /// Backend to operate against; defaults to `default_backend`.
    #[arg(short = 'b', long, global = true)]
    backend: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Operate on a list: `todoat <list> [get|add|update|complete|delete] [args]`.
    #[command(external_subcommand)]
    Task(Vec<String>),

    /// List management: create, delete, restore, purge, show trash.
    List {
        #[command(subcommand)]
        action: ListAction,
    },

    /// Sync control: run a cycle now, inspect the queue, resolve conflicts, manage the daemon.
    Sync {
        #[command(subcommand)]
        action: SyncAction,
    },

    /// Apply a saved view to a list's tasks.
    View { name: String, list: String },

    /// Show the effective configuration.
    Config,

    /// Manage stored credentials (encrypted at rest; see db::crypto).
    Credentials {
        #[command(subcommand)]
        action: CredentialAction,
    },

    /// Run pending schema migrations against the local store.
    Migrate,

    /// Trash maintenance: list soft-deleted lists, purge expired ones.
    Trash {
        #[command(subcommand)]
        action: TrashAction,
    },
}

#[derive(Subcommand)]
enum ListAction {
    Get,
    Create {
        name: String,
        #[arg(long, default_value = "#FFFFFF")]
        color: String,
        #[arg(long)]
        description: Option<String>,
    },
    Delete {
        name: String,
    },
    Restore {
        name: String,
    },
    Purge {
        name: String,
    },
}

#[derive(Subcommand)]
enum SyncAction {
    /// Run one sync cycle now for the given (or default) backend.
    Now,
    Status,
    Queue,
    /// Drop all non-in-flight queue entries.
    Clear,
    Conflicts {
        #[command(subcommand)]
        action: ConflictAction,
    },
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Subcommand)]
enum ConflictAction {
    List,
    Resolve {
        uid: String,
        #[arg(long)]
        strategy: String,
    },
}

#[derive(Subcommand)]
enum DaemonAction {
    Start,
    Stop,
    Kill,
    Status,
}

#[derive(Subcommand)]
enum CredentialAction {
    Set { backend: String, key: String, value: String },
    Get { backend: String, key: String },
    Delete { backend: String, key: String },
}

#[derive(Subcommand)]
enum TrashAction {
    List,
    Purge,
}

#[derive(Serialize)]
#[serde(tag = "result")]
enum Outcome {
    #[serde(rename = "INFO_ONLY")]
    InfoOnly { message: String },
    #[serde(rename = "ACTION_COMPLETED")]
    ActionCompleted { message: String },
}

fn print_outcome(json: bool, outcome: &Outcome) {
    if json {
        println!("{}", serde_json::to_string(outcome).unwrap_or_else(|_| "{}".to_string()));
    } else {
        let (sentinel, message) = match outcome {
            Outcome::InfoOnly { message } => ("INFO_ONLY", message.as_str()),
            Outcome::ActionCompleted { message } => ("ACTION_COMPLETED", message.as_str()),
        };
        if !message.is_empty() {
            println!("{message}");
        }
        println!("{sentinel}");
    }
}

fn print_error(json: bool, err: &Error) -> i32 {
    if json {
        println!(
            "{}",
            serde_json::json!({"result": "ERROR", "error": err.to_string(), "kind": err.kind_name()})
        );
    } else {
        eprintln!("error: {err}");
        println!("ERROR");
    }
    1
}

#[tokio::main]
async fn main() {
    // `daemon::spawn_detached` re-execs this binary with a single internal
    // `__daemon` argument rather than calling `fork(2)`; intercept it before
    // clap ever sees it, since it isn't part of the public CLI surface.
    if std::env::args().nth(1).as_deref() == Some("__daemon") {
        tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
        let cfg = Config::load_default().unwrap_or_default();
        let paths = match Paths::new() {
            Ok(p) => p,
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        };
        if let Err(e) = daemon::run(cfg, paths).await {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json = cli.json;
    std::process::exit(match run(cli).await {
        Ok(outcome) => {
            print_outcome(json, &outcome);
            0
        }
        Err(e) => print_error(json, &e),
    });
}

struct Ctx {
    cfg: Config,
    paths: Paths,
    backend_id: String,
    store: Store,
    queue: OperationQueue,
    engine: TaskEngine,
}

async fn make_ctx(cli: &Cli) -> Result<Ctx> {
    let cfg = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    let paths = Paths::new()?;
    paths.ensure_all()?;

    let backend_id = cli.backend.clone().unwrap_or_else(|| cfg.default_backend.clone());

    let store_file = if backend_id == cfg.sync.local_backend {
        paths.local_store_file()
    } else {
        paths.cache_file(&backend_id)
    };
    let store = Store::open(&store_file, &backend_id).await?;
    let queue = OperationQueue::new(store.clone());
    let engine = TaskEngine::new(store.clone(), queue.clone());

    Ok(Ctx {
        cfg,
        paths,
        backend_id,
        store,
        queue,
        engine,
    })
}

async fn run(cli: Cli) -> Result<Outcome> {
    match &cli.command {
        Command::Task(args) => run_task(&cli, args).await,
        Command::List { action } => run_list(&cli, action).await,
        Command::Sync { action } => run_sync(&cli, action).await,
        Command::View { name, list } => run_view(&cli, name, list).await,
        Command::Config => run_config(&cli).await,
        Command::Credentials { action } => run_credentials(&cli, action).await,
        Command::Migrate => run_migrate(&cli).await,
        Command::Trash { action } => run_trash(&cli, action).await,
    }
}

/// `todoat <list-name> [<action>] [args]`, action defaults to `get`
/// (spec §6 CLI surface).
async fn run_task(cli: &Cli, args: &[String]) -> Result<Outcome> {
    let Some((list_name, rest)) = args.split_first() else {
        return Err(Error::Validation("usage: todoat <list-name> [action] [args]".to_string()));
    };
    let ctx = make_ctx(cli).await?;
    let list = ctx.engine.get_list_by_name(list_name).await?;

    let action = rest.first().map(String::as_str).unwrap_or("get");
    match action {
        "get" | "g" => {
            let tasks = ctx.engine.list_tasks(list.id).await?;
            Ok(Outcome::InfoOnly {
                message: format!("{} task(s) in {}", tasks.len(), list.name),
            })
        }
        "add" | "a" => {
            let summary = rest.get(1).cloned().unwrap_or_default();
            if summary.is_empty() {
                return Err(Error::Validation("add requires a summary".to_string()));
            }
            let literal = rest.iter().any(|a| a == "-l" || a == "--literal");
            let task = ctx.engine.create_by_path(list.id, &summary, literal).await?;
            maybe_kick_sync(&ctx).await;
            Ok(Outcome::ActionCompleted {
                message: format!("created {} ({})", task.summary, task.id),
            })
        }
        "update" | "u" => {
            let reference = rest.get(1).ok_or_else(|| Error::Validation("update requires a task reference".to_string()))?;
            let mut task = ctx.engine.resolve_task(list.id, reference, MatchMode::ByName).await?;
            apply_update_flags(&mut task, &rest[2..])?;
            ctx.engine.update_task(&task).await?;
            maybe_kick_sync(&ctx).await;
            Ok(Outcome::ActionCompleted {
                message: format!("updated {}", task.summary),
            })
        }
        "complete" | "c" => {
            let reference = rest.get(1).ok_or_else(|| Error::Validation("complete requires a task reference".to_string()))?;
            let mut task = ctx.engine.resolve_task(list.id, reference, MatchMode::ByName).await?;
            task.set_status(Status::Done, chrono::Utc::now());
            ctx.engine.update_task(&task).await?;
            maybe_kick_sync(&ctx).await;
            Ok(Outcome::ActionCompleted {
                message: format!("completed {}", task.summary),
            })
        }
        "delete" | "d" => {
            let reference = rest.get(1).ok_or_else(|| Error::Validation("delete requires a task reference".to_string()))?;
            let task = ctx.engine.resolve_task(list.id, reference, MatchMode::ByName).await?;
            let deleted = ctx.engine.delete_task_cascade(list.id, task.id).await?;
            maybe_kick_sync(&ctx).await;
            Ok(Outcome::ActionCompleted {
                message: format!("deleted {} task(s)", deleted.len()),
            })
        }
        other => Err(Error::Validation(format!("unknown action: {other}"))),
    }
}

fn apply_update_flags(task: &mut Task, flags: &[String]) -> Result<()> {
    let mut i = 0;
    while i < flags.len() {
        match flags[i].as_str() {
            "--priority" => {
                let value: u8 = flags
                    .get(i + 1)
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(|| Error::Validation("invalid --priority".to_string()))?;
                if value > 9 {
                    return Err(Error::Validation("priority out of range 0-9".to_string()));
                }
                task.priority = value;
                i += 2;
            }
            "--status" => {
                let value: Status = flags
                    .get(i + 1)
                    .ok_or_else(|| Error::Validation("--status requires a value".to_string()))?
                    .parse()?;
                task.set_status(value, chrono::Utc::now());
                i += 2;
            }
            "--due" => {
                let value = flags.get(i + 1).ok_or_else(|| Error::Validation("--due requires a value".to_string()))?;
                task.due = Some(model::date::parse(value, chrono::Utc::now())?);
                i += 2;
            }
            "--description" => {
                task.description = flags.get(i + 1).cloned();
                i += 2;
            }
            "--tag" => {
                if let Some(tag) = flags.get(i + 1) {
                    task.tags.push(tag.clone());
                }
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }
    task.touch(chrono::Utc::now());
    Ok(())
}

/// Fire-and-forget post-mutation sync nudge (spec §6 data flow): auto-start
/// the daemon if configured, then notify it over IPC without blocking.
async fn maybe_kick_sync(ctx: &Ctx) {
    if !ctx.cfg.sync.enabled {
        return;
    }
    if ctx.cfg.sync.daemon.enabled && ctx.cfg.sync.daemon.auto_start {
        daemon::maybe_auto_start(&ctx.cfg, &ctx.paths);
    }
    if ctx.cfg.sync.auto_sync_after_operation {
        daemon::notify_fire_and_forget(&ctx.paths).await;
    }
}

async fn run_list(cli: &Cli, action: &ListAction) -> Result<Outcome> {
    let ctx = make_ctx(cli).await?;
    match action {
        ListAction::Get => {
            let lists = ctx.engine.get_lists().await?;
            Ok(Outcome::InfoOnly {
                message: format!("{} list(s)", lists.len()),
            })
        }
        ListAction::Create { name, color, description } => {
            let list = ctx.engine.create_list(name, color, description.clone()).await?;
            Ok(Outcome::ActionCompleted {
                message: format!("created list {} ({})", list.name, list.id),
            })
        }
        ListAction::Delete { name } => {
            let list = ctx.engine.get_list_by_name(name).await?;
            ctx.engine.delete_list(list.id).await?;
            Ok(Outcome::ActionCompleted {
                message: format!("moved {name} to trash"),
            })
        }
        ListAction::Restore { name } => {
            let list = ctx
                .engine
                .get_deleted_lists()
                .await?
                .into_iter()
                .find(|l| l.name.eq_ignore_ascii_case(name))
                .ok_or_else(|| Error::NotFound(format!("trashed list {name}")))?;
            ctx.engine.restore_list(list.id).await?;
            Ok(Outcome::ActionCompleted {
                message: format!("restored {name}"),
            })
        }
        ListAction::Purge { name } => {
            let list = ctx
                .engine
                .get_deleted_lists()
                .await?
                .into_iter()
                .find(|l| l.name.eq_ignore_ascii_case(name))
                .ok_or_else(|| Error::NotFound(format!("trashed list {name}")))?;
            todoat_core::db::queries::purge_list(&ctx.store, list.id).await?;
            Ok(Outcome::ActionCompleted {
                message: format!("purged {name}"),
            })
        }
    }
}

async fn run_sync(cli: &Cli, action: &SyncAction) -> Result<Outcome> {
    let ctx = make_ctx(cli).await?;
    match action {
        SyncAction::Now => {
            let backend_cfg = ctx
                .cfg
                .backends
                .get(&ctx.backend_id)
                .cloned()
                .ok_or_else(|| Error::Config(format!("no backend configured named '{}'", ctx.backend_id)))?;
            let remote = todoat_core::open_backend(&ctx.backend_id, &backend_cfg, &ctx.store).await?;
            let manager = SyncManager::new(SyncManagerConfig {
                offline_mode: ctx.cfg.sync.offline_mode,
                connectivity_timeout: ctx.cfg.sync.connectivity_timeout(),
                conflict_resolution: ctx.cfg.sync.conflict_resolution,
                merge_fallback: ctx.cfg.sync.merge_fallback,
                missing_list_policy: ctx.cfg.sync.missing_list_policy,
                background_pull_cooldown: ctx.cfg.sync.background_pull_cooldown(),
            });
            let summary = manager
                .run_cycle(&ctx.store, &ctx.queue, remote.as_ref(), i64::from(std::process::id()))
                .await?;
            Ok(Outcome::ActionCompleted { message: summary.describe() })
        }
        SyncAction::Status => {
            let response = daemon::status(&ctx.paths).await?;
            Ok(Outcome::InfoOnly {
                message: format!("{response:?}"),
            })
        }
        SyncAction::Queue => {
            let entries = ctx.queue.list_for_backend(&ctx.backend_id).await?;
            Ok(Outcome::InfoOnly {
                message: format!("{} queued entrie(s)", entries.len()),
            })
        }
        SyncAction::Clear => {
            let cleared = ctx.queue.clear(chrono::Utc::now()).await?;
            Ok(Outcome::ActionCompleted {
                message: format!("cleared {cleared} entrie(s)"),
            })
        }
        SyncAction::Conflicts { action } => run_conflicts(&ctx, action).await,
        SyncAction::Daemon { action } => run_daemon(&ctx, action).await,
    }
}

async fn run_conflicts(ctx: &Ctx, action: &ConflictAction) -> Result<Outcome> {
    match action {
        ConflictAction::List => {
            let conflicts = todoat_core::db::sync_meta::list_conflicts(&ctx.store, true).await?;
            Ok(Outcome::InfoOnly {
                message: format!("{} pending conflict(s)", conflicts.len()),
            })
        }
        ConflictAction::Resolve { uid, strategy } => {
            let conflict_id: uuid::Uuid = uid
                .parse()
                .map_err(|_| Error::Validation(format!("invalid conflict uid: {uid}")))?;
            let strategy: ConflictStrategy = strategy.parse()?;
            let manager = SyncManager::new(SyncManagerConfig {
                offline_mode: ctx.cfg.sync.offline_mode,
                connectivity_timeout: ctx.cfg.sync.connectivity_timeout(),
                conflict_resolution: ctx.cfg.sync.conflict_resolution,
                merge_fallback: ctx.cfg.sync.merge_fallback,
                missing_list_policy: ctx.cfg.sync.missing_list_policy,
                background_pull_cooldown: ctx.cfg.sync.background_pull_cooldown(),
            });
            manager.resolve_one(&ctx.store, &ctx.queue, conflict_id, strategy).await?;
            Ok(Outcome::ActionCompleted {
                message: format!("resolved conflict {uid}"),
            })
        }
    }
}

async fn run_daemon(ctx: &Ctx, action: &DaemonAction) -> Result<Outcome> {
    match action {
        DaemonAction::Start => {
            if daemon::is_running(&ctx.paths)? {
                return Ok(Outcome::InfoOnly {
                    message: "already running".to_string(),
                });
            }
            daemon::spawn_detached(&ctx.paths)?;
            Ok(Outcome::ActionCompleted {
                message: "daemon started".to_string(),
            })
        }
        DaemonAction::Stop => {
            daemon::stop(&ctx.paths).await?;
            Ok(Outcome::ActionCompleted {
                message: "stop requested".to_string(),
            })
        }
        DaemonAction::Kill => {
            daemon::kill(&ctx.paths).await?;
            Ok(Outcome::ActionCompleted {
                message: "kill requested".to_string(),
            })
        }
        DaemonAction::Status => {
            let response = daemon::status(&ctx.paths).await?;
            Ok(Outcome::InfoOnly {
                message: format!("{response:?}"),
            })
        }
    }
}

async fn run_view(cli: &Cli, name: &str, list: &str) -> Result<Outcome> {
    let ctx = make_ctx(cli).await?;
    let list = ctx.engine.get_list_by_name(list).await?;
    let view = todoat_core::view::View::load_named(&ctx.paths.views_dir(), name)?;
    let tasks = ctx.engine.list_tasks(list.id).await?;
    let filtered = view.apply(tasks, chrono::Utc::now())?;
    Ok(Outcome::InfoOnly {
        message: format!("{} task(s) match view '{name}'", filtered.len()),
    })
}

async fn run_config(cli: &Cli) -> Result<Outcome> {
    let ctx = make_ctx(cli).await?;
    let yaml = serde_yaml::to_string(&ctx.cfg).map_err(|e| Error::Config(e.to_string()))?;
    Ok(Outcome::InfoOnly { message: yaml })
}

async fn run_credentials(cli: &Cli, action: &CredentialAction) -> Result<Outcome> {
    let ctx = make_ctx(cli).await?;
    match action {
        CredentialAction::Set { backend, key, value } => {
            credentials::set(&ctx.store, backend, key, value).await?;
            Ok(Outcome::ActionCompleted {
                message: format!("stored {key} for {backend}"),
            })
        }
        CredentialAction::Get { backend, key } => {
            let value = credentials::get(&ctx.store, backend, key).await?;
            Ok(Outcome::InfoOnly {
                message: value.unwrap_or_else(|| "(not set)".to_string()),
            })
        }
        CredentialAction::Delete { backend, key } => {
            credentials::delete(&ctx.store, backend, key).await?;
            Ok(Outcome::ActionCompleted {
                message: format!("deleted {key} for {backend}"),
            })
        }
    }
}

async fn run_migrate(cli: &Cli) -> Result<Outcome> {
    let ctx = make_ctx(cli).await?;
    let version = todoat_core::db::migrations::current_version(ctx.store.pool()).await?;
    Ok(Outcome::ActionCompleted {
        message: format!("schema at version {version}"),
    })
}

async fn run_trash(cli: &Cli, action: &TrashAction) -> Result<Outcome> {
    let ctx = make_ctx(cli).await?;
    match action {
        TrashAction::List => {
            let lists = ctx.engine.get_deleted_lists().await?;
            Ok(Outcome::InfoOnly {
                message: format!("{} list(s) in trash", lists.len()),
            })
        }
        TrashAction::Purge => {
            let purged = ctx.engine.purge_expired_trash(ctx.cfg.trash.retention_days).await?;
            Ok(Outcome::ActionCompleted {
                message: format!("purged {purged} list(s)"),
            })
        }
    }
}
