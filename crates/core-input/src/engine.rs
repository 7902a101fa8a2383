//! Thread orchestration: three `std::thread`s, no async runtime.
//!
//! - the hook thread polls `Platform::next_event`, feeds each event to the
//!   `Dispatcher`, and publishes whatever it returns onto the ring. It
//!   never blocks on injection.
//! - the sender thread drains the ring in wrap-coalescing batches and
//!   hands each batch to `Platform::inject` in one call.
//! - the timer thread wakes every `DEFAULT_INTERVAL_MS`, ticks the Polar
//!   Pointer Engine if armed, and publishes its output the same way the
//!   hook thread does.
//!
//! Grounded on the blocking/non-blocking event-loop variants in
//! keyrx_daemon's `event_loop.rs`, adapted from a single loop with a
//! process callback into three cooperating threads connected by a
//! lock-free ring and a capacity-1 signal channel, matching the
//! concurrency model the rest of this daemon assumes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use tracing::{debug, info, warn};

use core_events::{SynthEvent, Telemetry};
use core_keymap::Keymap;
use core_pointer::{DEFAULT_INTERVAL_MS, PointerEngine};
use core_ring::Ring;

use crate::dispatcher::Dispatcher;
use crate::platform::{Platform, PlatformEvent};

pub const RING_CAPACITY: usize = 1024;
pub type EventRing = Ring<SynthEvent, RING_CAPACITY>;

const HOOK_POLL_TIMEOUT: Duration = Duration::from_millis(250);
const SENDER_POLL_TIMEOUT: Duration = Duration::from_millis(250);

fn signal_channel() -> (Sender<()>, Receiver<()>) {
    bounded(1)
}

/// Non-blocking "something was published" nudge. A signal already pending
/// is as good as a second one, so `try_send` dropping a duplicate is
/// correct, not lossy.
fn notify(sender: &Sender<()>) {
    match sender.try_send(()) {
        Ok(()) | Err(TrySendError::Full(())) => {}
        Err(TrySendError::Disconnected(())) => {}
    }
}

fn publish(ring: &EventRing, telemetry: &Telemetry, event: SynthEvent) -> bool {
    match ring.reserve_producer(1) {
        Some((old_tail, n)) => {
            ring.write(old_tail, 0, event);
            ring.publish_producer(old_tail, n);
            true
        }
        None => {
            telemetry.record_drop();
            false
        }
    }
}

fn publish_all(ring: &EventRing, telemetry: &Telemetry, events: Vec<SynthEvent>, signal: &Sender<()>) {
    if events.is_empty() {
        return;
    }
    let mut any = false;
    for event in events {
        any |= publish(ring, telemetry, event);
    }
    if any {
        notify(signal);
    }
}

fn spawn_sender_thread(
    ring: Arc<EventRing>,
    signal: Receiver<()>,
    platform: Arc<dyn Platform>,
    telemetry: Arc<Telemetry>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("remapd-sender".into())
        .spawn(move || {
            let drain = || {
                loop {
                    let Some(claim) = ring.reserve_consumer(-2) else {
                        break;
                    };
                    let batch: Vec<SynthEvent> = (0..claim.n).map(|i| ring.read(&claim, i)).collect();
                    if let Err(err) = platform.inject(&batch) {
                        warn!(target = "engine.sender", %err, "inject_failed");
                    } else {
                        telemetry.record_synthesized(batch.len() as u64);
                    }
                    ring.publish_consumer(claim);
                }
            };
            loop {
                match signal.recv_timeout(SENDER_POLL_TIMEOUT) {
                    Ok(()) => drain(),
                    Err(RecvTimeoutError::Timeout) => {
                        drain();
                        if shutdown.load(Ordering::Acquire) {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        drain();
                        break;
                    }
                }
            }
            debug!(target = "engine.sender", "sender_thread_exit");
        })
        .expect("failed to spawn sender thread")
}

fn spawn_timer_thread(
    ring: Arc<EventRing>,
    signal: Sender<()>,
    pointer: Arc<Mutex<PointerEngine>>,
    telemetry: Arc<Telemetry>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("remapd-timer".into())
        .spawn(move || {
            while !shutdown.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(DEFAULT_INTERVAL_MS));
                let events = {
                    let mut guard = pointer.lock().expect("pointer engine mutex poisoned");
                    if !guard.is_active() {
                        continue;
                    }
                    guard.tick(0)
                };
                publish_all(&ring, &telemetry, events, &signal);
            }
            debug!(target = "engine.timer", "timer_thread_exit");
        })
        .expect("failed to spawn timer thread")
}

/// Owns the dispatcher, the ring, and the platform handle, and drives the
/// hook thread on whichever thread calls `run`. Construct with
/// [`Engine::new`], then call [`Engine::run`] — it blocks until
/// `shutdown` is set, then tears everything down in the fixed order
/// remove hooks, stop the timer, close the signal channel, release every
/// held key and layer lock, drop the config.
pub struct Engine {
    dispatcher: Dispatcher,
    platform: Arc<dyn Platform>,
    ring: Arc<EventRing>,
    telemetry: Arc<Telemetry>,
    pointer: Arc<Mutex<PointerEngine>>,
}

impl Engine {
    pub fn new(keymap: Keymap, pointer: PointerEngine, platform: Arc<dyn Platform>, telemetry: Arc<Telemetry>) -> Self {
        let pointer = Arc::new(Mutex::new(pointer));
        let dispatcher = Dispatcher::new(keymap, pointer.clone(), telemetry.clone());
        Self {
            dispatcher,
            platform,
            ring: Arc::new(EventRing::new()),
            telemetry,
            pointer,
        }
    }

    /// Runs until `shutdown` is observed set. Installs the OS hooks on
    /// entry and guarantees the full teardown sequence on every exit
    /// path, including an install failure.
    pub fn run(mut self, shutdown: Arc<AtomicBool>) -> Result<(), crate::platform::PlatformError> {
        self.platform.install_hooks()?;
        info!(target = "engine", "hooks_installed");

        let (signal_tx, signal_rx) = signal_channel();
        let sender_handle = spawn_sender_thread(
            self.ring.clone(),
            signal_rx,
            self.platform.clone(),
            self.telemetry.clone(),
            shutdown.clone(),
        );
        let timer_handle = spawn_timer_thread(
            self.ring.clone(),
            signal_tx.clone(),
            self.pointer.clone(),
            self.telemetry.clone(),
            shutdown.clone(),
        );

        while !shutdown.load(Ordering::Acquire) {
            match self.platform.next_event(HOOK_POLL_TIMEOUT) {
                Ok(Some(PlatformEvent::Keyboard(raw))) => {
                    let outcome = self.dispatcher.on_keyboard_event(raw);
                    publish_all(&self.ring, &self.telemetry, outcome.events, &signal_tx);
                    if outcome.rehook {
                        if let Err(err) = self.platform.rehook() {
                            warn!(target = "engine.hook", %err, "rehook_failed");
                        }
                    }
                }
                Ok(Some(PlatformEvent::Mouse {
                    message,
                    time_ms,
                    is_injected,
                    extra_info,
                })) => {
                    let outcome = self.dispatcher.on_mouse_event(message, time_ms, is_injected, extra_info);
                    publish_all(&self.ring, &self.telemetry, outcome.events, &signal_tx);
                    if outcome.rehook {
                        if let Err(err) = self.platform.rehook() {
                            warn!(target = "engine.hook", %err, "rehook_failed");
                        }
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(target = "engine.hook", %err, "poll_failed");
                }
            }
        }

        info!(target = "engine", "shutting_down");
        // Teardown order: unhook first so nothing new arrives, then stop
        // the timer, then close the signal channel, then release every
        // held chord and layer lock, then let the config drop with self.
        if let Err(err) = self.platform.remove_hooks() {
            warn!(target = "engine.hook", %err, "remove_hooks_failed");
        }
        let _ = timer_handle.join();
        drop(signal_tx);
        let _ = sender_handle.join();

        let release_events = self.dispatcher.keymap.unlock_all();
        if !release_events.is_empty() {
            if let Err(err) = self.platform.inject(&release_events) {
                warn!(target = "engine.hook", %err, "final_unlock_inject_failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{NullPlatform, PlatformError};
    use core_keymap::EngineSettings;
    use std::time::Instant;

    #[test]
    fn engine_starts_and_stops_cleanly() {
        let keymap = Keymap::new(EngineSettings::default());
        let pointer = PointerEngine::new(36).unwrap();
        let platform: Arc<dyn Platform> = Arc::new(NullPlatform::new());
        let telemetry = Arc::new(Telemetry::new());
        let engine = Engine::new(keymap, pointer, platform, telemetry);

        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            flag.store(true, Ordering::Release);
        });

        let started = Instant::now();
        let result: Result<(), PlatformError> = engine.run(shutdown);
        assert!(result.is_ok());
        assert!(started.elapsed() < Duration::from_secs(5));
        stopper.join().unwrap();
    }
}
