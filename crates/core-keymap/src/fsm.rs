//! Per-key finite state machine: tap / hold / double-tap / lock
//! classification for a single `Remap`, plus the handler invoked for keys
//! that have no rule of their own but land while other remaps are active.

use tracing::trace;

use core_events::{Direction, KeyDef, SynthEvent};

use crate::layer::{LayerGraph, LayerId};
use crate::registry::{KeyState, Remap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputDisposition {
    Block,
    PassThrough,
    ReemitTagged,
}

/// Scalar globals parsed from config directives that are not part of any
/// one `Remap`.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub debug: bool,
    pub hold_delay: u64,
    pub tap_timeout: u64,
    pub doublepress_timeout: u64,
    pub rehook_timeout: u64,
    pub unlock_timeout: u64,
    pub scancode_mode: bool,
    pub priority: u8,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            debug: false,
            hold_delay: 0,
            tap_timeout: 0,
            doublepress_timeout: 0,
            rehook_timeout: 1000,
            unlock_timeout: 60_000,
            scancode_mode: false,
            priority: 1,
        }
    }
}

fn within_timeout(timeout: u64, elapsed: u64) -> bool {
    timeout == 0 || elapsed < timeout
}

/// `hold_delay`, unlike the tap/doublepress timeouts, has no "0 means
/// unlimited" convention: a delay of zero simply never escalates.
fn within_hold_delay(hold_delay: u64, elapsed: u64) -> bool {
    hold_delay > 0 && elapsed < hold_delay
}

pub(crate) fn emit_chord(
    chord: &[KeyDef],
    remap_id: u8,
    direction: Direction,
    scancode_mode: bool,
    out: &mut Vec<SynthEvent>,
) {
    match direction {
        Direction::Down => {
            for key in chord {
                out.push(SynthEvent::key(*key, direction, remap_id, scancode_mode));
            }
        }
        Direction::Up => {
            for key in chord.iter().rev() {
                out.push(SynthEvent::key(*key, direction, remap_id, scancode_mode));
            }
        }
    }
}

/// True when `layer` either gates `remap` directly or transitively,
/// currently-live masters it — the signal that a layer switch already
/// carries this remap's meaning, so its raw chord must not also fire.
pub fn has_to_block_modifiers(remap: &Remap, layer: Option<LayerId>, layers: &LayerGraph) -> bool {
    match (remap.layer, layer) {
        (Some(remap_layer), Some(layer)) => {
            remap_layer == layer || layers.is_master_layer(layer, remap_layer)
        }
        _ => false,
    }
}

/// Toggle `tap_lock` on a completed tap and emit the matching edge of
/// `to_when_tap_lock`: `Down` when the lock just engaged, `Up` when it
/// just released. Called once per tap release, so the two directions
/// alternate one-for-one with no separate "revert" path.
fn apply_tap_lock(
    remap: &mut Remap,
    layers: &mut LayerGraph,
    scancode_mode: bool,
    out: &mut Vec<SynthEvent>,
) {
    if remap.to_when_tap_lock.is_empty() && remap.to_when_tap_lock_layers.is_empty() {
        return;
    }
    remap.tap_lock = !remap.tap_lock;
    let direction = if remap.tap_lock { Direction::Down } else { Direction::Up };
    emit_chord(&remap.to_when_tap_lock, remap.id, direction, scancode_mode, out);
    for action in remap.to_when_tap_lock_layers.clone() {
        action.apply(layers);
    }
}

/// A second tap arriving inside the doublepress window undoes the lock
/// the first tap's release just applied. Only the release side is
/// emitted here: re-engaging (`tap_lock` flipping back to `true`) is left
/// silent, matching the original's asymmetric cancel-only behavior.
fn revert_tap_lock(
    remap: &mut Remap,
    layers: &mut LayerGraph,
    scancode_mode: bool,
    out: &mut Vec<SynthEvent>,
) {
    if remap.to_when_tap_lock.is_empty() && remap.to_when_tap_lock_layers.is_empty() {
        return;
    }
    remap.tap_lock = !remap.tap_lock;
    if !remap.tap_lock {
        emit_chord(&remap.to_when_tap_lock, remap.id, Direction::Up, scancode_mode, out);
    }
    for action in remap.to_when_tap_lock_layers.clone() {
        layers.reset_layer_lock(action.layer);
    }
}

fn apply_double_tap_lock(
    remap: &mut Remap,
    layers: &mut LayerGraph,
    scancode_mode: bool,
    out: &mut Vec<SynthEvent>,
) {
    if remap.to_when_double_tap_lock.is_empty() && remap.to_when_double_tap_lock_layers.is_empty()
    {
        return;
    }
    remap.double_tap_lock = !remap.double_tap_lock;
    let direction = if remap.double_tap_lock { Direction::Down } else { Direction::Up };
    emit_chord(&remap.to_when_double_tap_lock, remap.id, direction, scancode_mode, out);
    for action in remap.to_when_double_tap_lock_layers.clone() {
        action.apply(layers);
    }
}

/// The key this FSM belongs to has gone down.
pub fn handle_down(
    remap: &mut Remap,
    layers: &mut LayerGraph,
    settings: &EngineSettings,
    time: u64,
    out: &mut Vec<SynthEvent>,
) -> InputDisposition {
    match remap.state {
        KeyState::Idle => {
            if !remap.to_with_other.is_empty() {
                remap.state = KeyState::HeldDownAlone;
            } else {
                remap.state = KeyState::Tap;
                emit_chord(
                    &remap.to_when_alone,
                    remap.id,
                    Direction::Down,
                    settings.scancode_mode,
                    out,
                );
            }
            remap.time = time;
            if let Some(layer) = remap.to_when_press_layer {
                layers.assert_state(layer, true);
            }
            InputDisposition::Block
        }
        KeyState::Tapped => {
            if within_timeout(settings.doublepress_timeout, time.saturating_sub(remap.time)) {
                remap.state = KeyState::DoubleTap;
                revert_tap_lock(remap, layers, settings.scancode_mode, out);
                if let Some(layer) = remap.to_when_doublepress_layer {
                    layers.assert_state(layer, true);
                }
                if !remap.to_when_doublepress.is_empty() {
                    emit_chord(
                        &remap.to_when_doublepress,
                        remap.id,
                        Direction::Down,
                        settings.scancode_mode,
                        out,
                    );
                } else if remap.to_when_doublepress_layer.is_none() {
                    emit_chord(
                        &remap.to_when_alone,
                        remap.id,
                        Direction::Down,
                        settings.scancode_mode,
                        out,
                    );
                }
                remap.time = time;
                InputDisposition::Block
            } else {
                remap.state = KeyState::Idle;
                handle_down(remap, layers, settings, time, out)
            }
        }
        KeyState::HeldDownAlone
        | KeyState::HeldDownWithOther
        | KeyState::Tap
        | KeyState::DoubleTap => InputDisposition::Block,
    }
}

/// The key this FSM belongs to has gone up.
pub fn handle_up(
    remap: &mut Remap,
    layers: &mut LayerGraph,
    settings: &EngineSettings,
    time: u64,
    out: &mut Vec<SynthEvent>,
) -> InputDisposition {
    match remap.state {
        KeyState::HeldDownAlone => {
            if within_timeout(settings.tap_timeout, time.saturating_sub(remap.time)) {
                remap.state = KeyState::Tapped;
                emit_chord(
                    &remap.to_when_alone,
                    remap.id,
                    Direction::Down,
                    settings.scancode_mode,
                    out,
                );
                emit_chord(
                    &remap.to_when_alone,
                    remap.id,
                    Direction::Up,
                    settings.scancode_mode,
                    out,
                );
                apply_tap_lock(remap, layers, settings.scancode_mode, out);
            } else {
                remap.state = KeyState::Idle;
            }
            if let Some(layer) = remap.to_when_press_layer {
                layers.sync_state_to_lock(layer);
            }
            remap.time = time;
            InputDisposition::Block
        }
        KeyState::HeldDownWithOther => {
            remap.state = KeyState::Idle;
            emit_chord(
                &remap.to_with_other,
                remap.id,
                Direction::Up,
                settings.scancode_mode,
                out,
            );
            remap.active_modifiers = core_events::ModMask::empty();
            if let Some(layer) = remap.to_when_press_layer {
                layers.sync_state_to_lock(layer);
            }
            InputDisposition::Block
        }
        KeyState::Tap => {
            if within_timeout(settings.tap_timeout, time.saturating_sub(remap.time)) {
                remap.state = KeyState::Tapped;
                emit_chord(
                    &remap.to_when_alone,
                    remap.id,
                    Direction::Up,
                    settings.scancode_mode,
                    out,
                );
                apply_tap_lock(remap, layers, settings.scancode_mode, out);
            } else {
                remap.state = KeyState::Idle;
                emit_chord(
                    &remap.to_when_alone,
                    remap.id,
                    Direction::Up,
                    settings.scancode_mode,
                    out,
                );
            }
            if let Some(layer) = remap.to_when_press_layer {
                layers.sync_state_to_lock(layer);
            }
            remap.time = time;
            InputDisposition::Block
        }
        KeyState::DoubleTap => {
            remap.state = KeyState::Idle;
            if !remap.to_when_doublepress.is_empty() {
                emit_chord(
                    &remap.to_when_doublepress,
                    remap.id,
                    Direction::Up,
                    settings.scancode_mode,
                    out,
                );
            } else if remap.to_when_doublepress_layer.is_none() {
                emit_chord(
                    &remap.to_when_alone,
                    remap.id,
                    Direction::Up,
                    settings.scancode_mode,
                    out,
                );
            }
            if let Some(layer) = remap.to_when_doublepress_layer {
                layers.sync_state_to_lock(layer);
            }
            if within_timeout(settings.tap_timeout, time.saturating_sub(remap.time)) {
                apply_double_tap_lock(remap, layers, settings.scancode_mode, out);
            }
            remap.time = time;
            InputDisposition::Block
        }
        KeyState::Idle | KeyState::Tapped => InputDisposition::Block,
    }
}

/// Called once per other-active remap whenever a key with no rule of its
/// own, or a rule distinct from `remap`, produces input. `other_press_layer`
/// / `other_doublepress_layer` are the incoming key's own layer-transition
/// bindings, if any, and are only consulted for the `HeldDownAlone` branch
/// per the spec's hold-delay escalation path (the later branches test
/// `remap`'s own layer against itself, since it is `remap`'s re-emission
/// that might now be redundant with a layer already asserted by the
/// originating key).
pub fn handle_other_input(
    remap: &mut Remap,
    layers: &mut LayerGraph,
    other_press_layer: Option<LayerId>,
    settings: &EngineSettings,
    time: u64,
    out: &mut Vec<SynthEvent>,
) {
    match remap.state {
        KeyState::HeldDownAlone => {
            if within_hold_delay(settings.hold_delay, time.saturating_sub(remap.time))
                && !remap.to_when_alone.is_empty()
            {
                remap.state = KeyState::Tap;
                emit_chord(
                    &remap.to_when_alone,
                    remap.id,
                    Direction::Down,
                    settings.scancode_mode,
                    out,
                );
            } else {
                remap.state = KeyState::HeldDownWithOther;
                if !has_to_block_modifiers(remap, other_press_layer, layers) {
                    emit_chord(
                        &remap.to_with_other,
                        remap.id,
                        Direction::Down,
                        settings.scancode_mode,
                        out,
                    );
                }
            }
        }
        KeyState::HeldDownWithOther | KeyState::Tap | KeyState::DoubleTap => {
            if has_to_block_modifiers(remap, remap.to_when_press_layer, layers) {
                emit_chord(
                    &remap.to_with_other,
                    remap.id,
                    Direction::Down,
                    settings.scancode_mode,
                    out,
                );
            } else {
                emit_chord(
                    &remap.to_with_other,
                    remap.id,
                    Direction::Up,
                    settings.scancode_mode,
                    out,
                );
            }
        }
        KeyState::Idle | KeyState::Tapped => {
            if remap.tap_lock && !remap.to_when_tap_lock.is_empty() {
                emit_chord(
                    &remap.to_when_tap_lock,
                    remap.id,
                    Direction::Down,
                    settings.scancode_mode,
                    out,
                );
            }
            if remap.double_tap_lock && !remap.to_when_double_tap_lock.is_empty() {
                emit_chord(
                    &remap.to_when_double_tap_lock,
                    remap.id,
                    Direction::Down,
                    settings.scancode_mode,
                    out,
                );
            }
        }
    }
    trace!(
        target = "keymap.fsm",
        remap_id = remap.id,
        state = ?remap.state,
        "time_cleared_by_other_input"
    );
    remap.time = 0;
}
