//! The OS collaborator boundary. Everything above this line (dispatcher,
//! engine, ring) is pure and platform-agnostic; everything below it is a
//! hook install, an input-injection call, or a clock read.
//!
//! Grounded on the `Platform` trait in keyrx_daemon's event loop: hooks
//! and injection are a small, testable seam, so the engine never links
//! against an OS input API directly. `install_hooks`/`remove_hooks` take
//! `&self` (not `&mut self`) so one `Arc<dyn Platform>` can be shared by
//! the hook thread (install/remove/rehook/poll) and the sender thread
//! (inject) without a lock at this layer; a real backend manages its own
//! handle mutability internally, the way `SendInput`/`SetWindowsHookEx`
//! already do on the OS side.

use std::time::Duration;

use thiserror::Error;

use core_events::{RawInputEvent, SynthEvent};

use crate::dispatcher::MouseMessage;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("installing input hooks: {0}")]
    Install(String),
    #[error("removing input hooks: {0}")]
    Remove(String),
    #[error("polling for input: {0}")]
    Poll(String),
    #[error("injecting {count} synthesized event(s): {reason}")]
    Inject { count: usize, reason: String },
}

/// One decoded event as delivered by the platform's hook, already sorted
/// into the keyboard/mouse shape the dispatcher expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformEvent {
    Keyboard(RawInputEvent),
    Mouse {
        message: MouseMessage,
        time_ms: u64,
        is_injected: bool,
        extra_info: u32,
    },
}

/// The OS-facing half of the daemon. A real implementation installs a
/// low-level keyboard/mouse hook backed by this trait and an
/// input-injection API; `NullPlatform` below stands in for it wherever a
/// real hook cannot be installed (tests, this environment's reference
/// wiring in `remapd`).
pub trait Platform: Send + Sync {
    fn install_hooks(&self) -> Result<(), PlatformError>;
    fn remove_hooks(&self) -> Result<(), PlatformError>;

    /// Default rehook just cycles install/remove; a backend whose OS API
    /// offers an atomic "reinstall" primitive can override this.
    fn rehook(&self) -> Result<(), PlatformError> {
        self.remove_hooks()?;
        self.install_hooks()
    }

    /// Block up to `timeout` for the next hook callback; `Ok(None)` on a
    /// plain timeout so the hook-thread loop can check for shutdown.
    fn next_event(&self, timeout: Duration) -> Result<Option<PlatformEvent>, PlatformError>;

    fn inject(&self, events: &[SynthEvent]) -> Result<(), PlatformError>;

    fn now_ms(&self) -> u64;
}

/// Logs every call instead of touching real OS hook/injection APIs. Never
/// produces a `PlatformEvent` on its own; exists so the rest of the
/// daemon (ring, dispatcher, engine, teardown order) can be built, wired,
/// and tested without a live input backend.
pub struct NullPlatform {
    started: std::time::Instant,
}

impl NullPlatform {
    pub fn new() -> Self {
        Self {
            started: std::time::Instant::now(),
        }
    }
}

impl Default for NullPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for NullPlatform {
    fn install_hooks(&self) -> Result<(), PlatformError> {
        tracing::info!(target = "platform", "install_hooks (null backend)");
        Ok(())
    }

    fn remove_hooks(&self) -> Result<(), PlatformError> {
        tracing::info!(target = "platform", "remove_hooks (null backend)");
        Ok(())
    }

    fn next_event(&self, timeout: Duration) -> Result<Option<PlatformEvent>, PlatformError> {
        std::thread::sleep(timeout);
        Ok(None)
    }

    fn inject(&self, events: &[SynthEvent]) -> Result<(), PlatformError> {
        tracing::trace!(target = "platform", count = events.len(), "inject (null backend)");
        Ok(())
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}
