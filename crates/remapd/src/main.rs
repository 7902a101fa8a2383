//! remapd entrypoint: loads a config, wires the dispatcher and pointer
//! engine into an [`core_input::Engine`], and runs it on a reference
//! [`core_input::NullPlatform`] backend until interrupted or a config
//! edit is validated and swapped in.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use core_events::Telemetry;
use core_input::{Engine, NullPlatform, Platform};
use core_pointer::{DEFAULT_RADIUS, PointerEngine};

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "remapd", version, about = "Per-user input remapping daemon")]
struct Args {
    /// Config file path. Defaults to the platform config dir, then
    /// `~/.remapd/config.txt` (see `core_config::discover`).
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Raise the log level to debug regardless of `RUST_LOG`.
    #[arg(long = "debug")]
    debug: bool,

    /// Directory the rolling log file is written into.
    #[arg(long = "log-dir", default_value = ".")]
    log_dir: PathBuf,
}

fn configure_logging(args: &Args) -> Option<WorkerGuard> {
    let file_appender = tracing_appender::rolling::never(&args.log_dir, "remapd.log");
    let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = if args.debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env()
    };

    match tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(nb_writer)
        .try_init()
    {
        Ok(()) => Some(guard),
        Err(_err) => {
            // Global subscriber already installed (e.g. under a test
            // harness); drop the guard so the non-blocking writer shuts
            // down cleanly rather than leaking its flush thread.
            None
        }
    }
}

fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            tracing::error!(target: "runtime.panic", ?info, "panic");
            default_panic(info);
        }));
    });
}

fn resolve_config_path(args: &Args) -> Result<PathBuf> {
    if let Some(path) = &args.config {
        return Ok(path.clone());
    }
    core_config::discover().context(
        "no config file given with --config and none found under the platform config dir or ~/.remapd",
    )
}

/// Watches `path` for edits and, on a change that parses cleanly, flips
/// both `reload_requested` and `shutdown` so the running engine unwinds
/// and the caller rebuilds it from the fresh config. A change that fails
/// to parse is logged and otherwise ignored: the daemon keeps running on
/// whatever last parsed, exactly as `core_config::reload` would leave it.
fn spawn_reload_watcher(
    path: PathBuf,
    shutdown: Arc<AtomicBool>,
    reload_requested: Arc<AtomicBool>,
) -> Option<core_config::watch::ConfigWatcher> {
    let (watcher, rx) = match core_config::watch::watch(&path) {
        Ok(pair) => pair,
        Err(err) => {
            warn!(target = "runtime.reload", %err, "config_watch_unavailable, hot-reload disabled");
            return None;
        }
    };

    std::thread::Builder::new()
        .name("remapd-reload".into())
        .spawn(move || {
            while !shutdown.load(Ordering::Acquire) {
                let Some(changed) = core_config::watch::recv_coalesced(&rx, Duration::from_millis(500))
                else {
                    continue;
                };
                match core_config::load(&changed) {
                    Ok(_) => {
                        info!(target = "runtime.reload", path = %changed.display(), "config_edit_validated, restarting engine");
                        reload_requested.store(true, Ordering::Release);
                        shutdown.store(true, Ordering::Release);
                        break;
                    }
                    Err(err) => {
                        warn!(target = "runtime.reload", path = %changed.display(), %err, "config_edit_rejected, keeping previous config");
                    }
                }
            }
            debug!(target = "runtime.reload", "reload_watcher_exit");
        })
        .expect("failed to spawn reload watcher thread");

    Some(watcher)
}

fn run(args: Args) -> Result<()> {
    let config_path = resolve_config_path(&args)?;
    info!(target: "runtime", path = %config_path.display(), "loading config");

    let ctrl_c_shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = ctrl_c_shutdown.clone();
        ctrlc::set_handler(move || {
            info!(target: "runtime", "interrupt received, shutting down");
            flag.store(true, Ordering::Release);
        })
        .context("installing Ctrl-C handler")?;
    }

    loop {
        let keymap = core_config::load(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?;
        let pointer = PointerEngine::new(DEFAULT_RADIUS).context("constructing pointer engine")?;
        let telemetry = Arc::new(Telemetry::new());
        let platform: Arc<dyn Platform> = Arc::new(NullPlatform::new());
        warn!(
            target: "runtime",
            "running on the reference NullPlatform backend: no real OS hook is installed in this environment"
        );

        let engine = Engine::new(keymap, pointer, platform, telemetry);

        let shutdown = Arc::new(AtomicBool::new(false));
        let reload_requested = Arc::new(AtomicBool::new(false));
        let _watcher = spawn_reload_watcher(config_path.clone(), shutdown.clone(), reload_requested.clone());

        // Bridge the process-lifetime Ctrl-C flag into this iteration's
        // shutdown flag so either source can end the run loop.
        let bridge_shutdown = shutdown.clone();
        let bridge_ctrl_c = ctrl_c_shutdown.clone();
        let bridge = std::thread::spawn(move || {
            while !bridge_ctrl_c.load(Ordering::Acquire) && !bridge_shutdown.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(100));
            }
            bridge_shutdown.store(true, Ordering::Release);
        });

        engine.run(shutdown.clone())?;
        shutdown.store(true, Ordering::Release);
        let _ = bridge.join();

        if ctrl_c_shutdown.load(Ordering::Acquire) && !reload_requested.load(Ordering::Acquire) {
            info!(target: "runtime", "shutdown_complete");
            return Ok(());
        }
        if !reload_requested.load(Ordering::Acquire) {
            bail!("engine exited without a shutdown or reload request");
        }
        info!(target: "runtime", "reloading_config");
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let _log_guard = configure_logging(&args);
    install_panic_hook();

    info!(target: "runtime", "startup");
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(target: "runtime", %err, "fatal startup error");
            ExitCode::FAILURE
        }
    }
}
