//! The platform-facing decision point: takes one decoded hardware event,
//! consults `Keymap` and (for mouse-emulation opcodes) `PointerEngine`, and
//! returns what to do with it. Holds no OS handle itself; `Engine` drives
//! it from whatever the `Platform` implementation hands back.
//!
//! Grounded on `handle_input`/`event_other_input` in the original
//! dispatcher: the unlock-timeout force-unlock, the injected-tag
//! discrimination, and the mouse-dummy-virt-code translation are all
//! reproduced here in the same order the original applies them.

use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use core_config::keytable;
use core_events::{
    Direction, INJECTED_TAG_BASE, MOUSE_DUMMY_VIRT_CODE, MouseEvent, MouseEventKind,
    RawInputEvent, SynthEvent, Telemetry, is_our_tag,
};
use core_keymap::{InputDisposition, Keymap, RemapId};
use core_pointer::PointerEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    X1,
    X2,
}

impl MouseButton {
    fn bit(self) -> u8 {
        match self {
            MouseButton::Left => 0,
            MouseButton::Right => 1,
            MouseButton::Middle => 2,
            MouseButton::X1 => 3,
            MouseButton::X2 => 4,
        }
    }
}

/// One decoded OS mouse message. `Move` is never remap-resolved (it has
/// no natural down/up pairing); the other four variants cover the "5
/// button-down and wheel messages" the dispatcher routes through
/// `MOUSE_DUMMY_VIRT_CODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseMessage {
    Move { dx: i32, dy: i32 },
    Wheel { delta: i32 },
    HWheel { delta: i32 },
    ButtonDown(MouseButton),
    ButtonUp(MouseButton),
}

/// What the caller should do with the event that triggered this outcome,
/// plus whatever new events must be pushed onto the ring.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub events: Vec<SynthEvent>,
    /// True if the original hardware event must not reach the OS/other
    /// hooks unmodified (its meaning has already been expressed, if at
    /// all, by `events`).
    pub block_original: bool,
    /// True if the caller should reinstall the OS hooks before the next
    /// event (defense against a silent unhook).
    pub rehook: bool,
}

pub struct Dispatcher {
    pub keymap: Keymap,
    pointer: Arc<Mutex<PointerEngine>>,
    telemetry: Arc<Telemetry>,
    last_input: Option<u64>,
    real_buttons: u8,
}

impl Dispatcher {
    pub fn new(keymap: Keymap, pointer: Arc<Mutex<PointerEngine>>, telemetry: Arc<Telemetry>) -> Self {
        Self {
            keymap,
            pointer,
            telemetry,
            last_input: None,
            real_buttons: 0,
        }
    }

    fn should_pass_through_injected(&self, extra_info: u32) -> bool {
        !is_our_tag(extra_info) || extra_info == INJECTED_TAG_BASE
    }

    fn apply_unlock_timeout(&mut self, time: u64, outcome: &mut DispatchOutcome) {
        if let Some(last) = self.last_input {
            if time.saturating_sub(last) > self.keymap.settings.unlock_timeout {
                let events = self.keymap.unlock_all();
                outcome.events.extend(self.route_through_pointer(events));
                self.telemetry.record_unlock_all();
                debug!(target = "dispatch", time, "unlock_timeout_elapsed");
            }
        }
    }

    fn maybe_rehook(&mut self, time: u64, outcome: &mut DispatchOutcome) {
        outcome.block_original = false;
        if let Some(last) = self.last_input {
            if time.saturating_sub(last) > self.keymap.settings.rehook_timeout {
                outcome.rehook = true;
                self.telemetry.record_rehook();
                debug!(target = "dispatch", time, "rehook_timeout_elapsed");
            }
        }
    }

    /// Any chord member whose `KeyDef` carries `virt_code == 0` is not a
    /// real key: it is a mouse-emulation opcode bound as an output, and
    /// gets diverted into the Polar Pointer Engine instead of reaching
    /// the ring as a keypress.
    fn route_through_pointer(&mut self, events: Vec<SynthEvent>) -> Vec<SynthEvent> {
        if !events
            .iter()
            .any(|e| matches!(e, SynthEvent::Key { key, .. } if key.virt_code == 0))
        {
            return events;
        }
        let mut pointer = self.pointer.lock().expect("pointer engine mutex poisoned");
        let mut out = Vec::with_capacity(events.len());
        for event in events {
            match event {
                SynthEvent::Key {
                    key,
                    direction,
                    remap_id,
                    ..
                } if key.virt_code == 0 => {
                    let outcome = pointer.on_opcode(key.scan_code as u8, direction, remap_id);
                    out.extend(outcome.events);
                }
                other => out.push(other),
            }
        }
        out
    }

    pub fn on_keyboard_event(&mut self, raw: RawInputEvent) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        self.apply_unlock_timeout(raw.time_ms, &mut outcome);

        if raw.is_injected {
            if self.should_pass_through_injected(raw.extra_info) {
                self.maybe_rehook(raw.time_ms, &mut outcome);
                return outcome;
            }
            self.last_input = Some(raw.time_ms);
            // Our own synthesized key looping back through the hook: do
            // not re-remap it, just let it through.
            return outcome;
        }
        self.last_input = Some(raw.time_ms);

        let resolved = match raw.direction {
            Direction::Down => self.keymap.key_down(raw.virt_code, raw.time_ms),
            Direction::Up => self.keymap.key_up(raw.virt_code, raw.time_ms),
        };
        let other_input_gate = raw.direction == Direction::Down && !is_modifier(raw.virt_code);
        self.finish_resolution(resolved, None, raw.time_ms, other_input_gate, &mut outcome);
        outcome
    }

    pub fn on_mouse_event(
        &mut self,
        message: MouseMessage,
        time: u64,
        is_injected: bool,
        extra_info: u32,
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        self.apply_unlock_timeout(time, &mut outcome);

        if is_injected {
            if self.should_pass_through_injected(extra_info) {
                self.maybe_rehook(time, &mut outcome);
                return outcome;
            }
            self.last_input = Some(time);
            return outcome;
        }
        self.last_input = Some(time);

        match message {
            MouseMessage::Move { .. } => {}
            MouseMessage::Wheel { delta } => {
                self.resolve_dummy_momentary(MouseEventKind::Wheel { delta }, time, &mut outcome);
            }
            MouseMessage::HWheel { delta } => {
                self.resolve_dummy_momentary(MouseEventKind::HWheel { delta }, time, &mut outcome);
            }
            MouseMessage::ButtonDown(button) => {
                self.track_button(button, true);
                let fallback = self.fallback_button_event(button);
                let resolved = self.keymap.key_down(MOUSE_DUMMY_VIRT_CODE, time);
                self.finish_resolution(resolved, Some(fallback), time, true, &mut outcome);
            }
            MouseMessage::ButtonUp(button) => {
                self.track_button(button, false);
                let fallback = self.fallback_button_event(button);
                let resolved = self.keymap.key_up(MOUSE_DUMMY_VIRT_CODE, time);
                self.finish_resolution(resolved, Some(fallback), time, false, &mut outcome);
            }
        }
        outcome
    }

    fn track_button(&mut self, button: MouseButton, pressed: bool) {
        let bit = 1u8 << button.bit();
        if pressed {
            self.real_buttons |= bit;
        } else {
            self.real_buttons &= !bit;
        }
    }

    fn fallback_button_event(&self, button: MouseButton) -> SynthEvent {
        let bit = button.bit();
        if bit < 3 {
            SynthEvent::Mouse(MouseEvent {
                kind: MouseEventKind::ClassicButtons {
                    mask: self.real_buttons & 0b0000_0111,
                },
                remap_id: 0,
            })
        } else {
            SynthEvent::Mouse(MouseEvent {
                kind: MouseEventKind::ExtendedButton {
                    index: bit - 3,
                    pressed: self.real_buttons & (1 << bit) != 0,
                },
                remap_id: 0,
            })
        }
    }

    /// A wheel tick has no natural down/up pairing from the OS, so it is
    /// modeled as an immediate down-then-up against the dummy virt code:
    /// whatever FSM state that produces resolves in the same event.
    fn resolve_dummy_momentary(&mut self, kind: MouseEventKind, time: u64, outcome: &mut DispatchOutcome) {
        let fallback = SynthEvent::Mouse(MouseEvent { kind, remap_id: 0 });
        let down = self.keymap.key_down(MOUSE_DUMMY_VIRT_CODE, time);
        match down {
            Some((_, disposition, events)) => {
                outcome.events.extend(self.route_through_pointer(events));
                if let Some((_, _, up_events)) = self.keymap.key_up(MOUSE_DUMMY_VIRT_CODE, time) {
                    let routed = self.route_through_pointer(up_events);
                    outcome.events.extend(routed);
                }
                outcome.block_original = matches!(disposition, InputDisposition::Block);
            }
            None => {
                outcome.events.push(fallback);
                self.emit_other_input(time, outcome);
                outcome.block_original = true;
            }
        }
    }

    /// Only called for the unmatched, `Direction::Down`, non-modifier path:
    /// nudges every *other* active dual-role remap's FSM the way a plain
    /// keypress would, per `event_other_input` in the original dispatcher.
    fn emit_other_input(&mut self, time: u64, outcome: &mut DispatchOutcome) {
        let other = self.keymap.other_input(None, None, time);
        let routed = self.route_through_pointer(other);
        outcome.events.extend(routed);
    }

    fn finish_resolution(
        &mut self,
        resolved: Option<(RemapId, InputDisposition, Vec<SynthEvent>)>,
        fallback: Option<SynthEvent>,
        time: u64,
        other_input_gate: bool,
        outcome: &mut DispatchOutcome,
    ) {
        match resolved {
            Some((_, disposition, events)) => {
                outcome.events.extend(self.route_through_pointer(events));
                outcome.block_original = matches!(disposition, InputDisposition::Block);
            }
            None => {
                let had_fallback = fallback.is_some();
                if let Some(fallback) = fallback {
                    outcome.events.push(fallback);
                }
                if other_input_gate {
                    self.emit_other_input(time, outcome);
                }
                outcome.block_original = had_fallback;
                trace!(target = "dispatch", "no_rule_matched");
            }
        }
    }
}

/// `event_other_input` in the original only ever fires on an unmapped key's
/// press, and only when that key is not itself a modifier (remap.c:781) —
/// a held Ctrl/Shift/Alt/Win passing through must not count as "some other
/// key was pressed" for dual-role escalation purposes.
fn is_modifier(virt_code: u16) -> bool {
    keytable::find_by_virt_code(virt_code)
        .map(|def| !def.modifier.is_empty())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_events::{KeyDef, ModMask};
    use core_keymap::EngineSettings;

    fn dispatcher() -> Dispatcher {
        let keymap = Keymap::new(EngineSettings::default());
        let pointer = Arc::new(Mutex::new(PointerEngine::new(36).unwrap()));
        Dispatcher::new(keymap, pointer, Arc::new(Telemetry::new()))
    }

    fn key(name: &'static str, virt: u16) -> KeyDef {
        KeyDef::new(name, virt, virt)
    }

    #[test]
    fn dual_role_caps_taps_to_escape() {
        let mut d = dispatcher();
        let mut remap = core_keymap::Remap::new(key("caps", 0x14));
        remap.to_when_alone.push(key("esc", 0x1B));
        d.keymap.registry.register(remap).unwrap();

        let down = d.on_keyboard_event(RawInputEvent {
            scan_code: 0x3A,
            virt_code: 0x14,
            direction: Direction::Down,
            time_ms: 0,
            is_injected: false,
            extra_info: 0,
        });
        assert!(down.block_original);
        // no `to_with_other` binding: the key goes Idle -> Tap immediately
        // and fires its down chord on press rather than waiting for release.
        assert_eq!(down.events.len(), 1);

        let up = d.on_keyboard_event(RawInputEvent {
            scan_code: 0x3A,
            virt_code: 0x14,
            direction: Direction::Up,
            time_ms: 10,
            is_injected: false,
            extra_info: 0,
        });
        assert!(up.block_original);
        assert_eq!(up.events.len(), 1);
    }

    #[test]
    fn foreign_injected_event_passes_through_untouched() {
        let mut d = dispatcher();
        let outcome = d.on_keyboard_event(RawInputEvent {
            scan_code: 0x1E,
            virt_code: 0x41,
            direction: Direction::Down,
            time_ms: 5,
            is_injected: true,
            extra_info: 0xDEAD_BEEF,
        });
        assert!(!outcome.block_original);
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn our_own_injected_event_is_not_reremapped() {
        let mut d = dispatcher();
        let outcome = d.on_keyboard_event(RawInputEvent {
            scan_code: 0x1E,
            virt_code: 0x41,
            direction: Direction::Down,
            time_ms: 5,
            is_injected: true,
            extra_info: core_events::tag_for(7),
        });
        assert!(!outcome.block_original);
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn unmapped_mouse_button_is_passed_through_tagged() {
        let mut d = dispatcher();
        let outcome = d.on_mouse_event(MouseMessage::ButtonDown(MouseButton::Left), 0, false, 0);
        assert!(outcome.block_original);
        assert_eq!(outcome.events.len(), 1);
        assert!(matches!(
            outcome.events[0],
            SynthEvent::Mouse(MouseEvent {
                kind: MouseEventKind::ClassicButtons { mask: 1 },
                ..
            })
        ));
    }

    #[test]
    fn mapped_mouse_button_routes_through_pointer_engine() {
        let mut d = dispatcher();
        let mut remap = core_keymap::Remap::new(key("mouse_left", 0xFF));
        remap.to_when_alone.push(KeyDef::new("MOUSE_WHEEL_UP", 9, 0));
        d.keymap.registry.register(remap).unwrap();

        let outcome = d.on_mouse_event(MouseMessage::ButtonDown(MouseButton::Left), 0, false, 0);
        assert!(outcome.block_original);
        // arming the opcode produces no immediate event, only a timer arm.
        assert!(outcome.events.is_empty());
        assert!(d.pointer.lock().unwrap().is_active());
    }

    #[test]
    fn unlock_timeout_forces_a_clean_slate() {
        let mut d = dispatcher();
        let mut remap = core_keymap::Remap::new(key("caps", 0x14));
        remap.to_when_alone.push(key("esc", 0x1B));
        remap.to_when_tap_lock.push(key("ctrl", 0x11).with_modifier(ModMask::CTRL_L));
        d.keymap.registry.register(remap).unwrap();

        d.on_keyboard_event(RawInputEvent {
            scan_code: 0x3A,
            virt_code: 0x14,
            direction: Direction::Down,
            time_ms: 0,
            is_injected: false,
            extra_info: 0,
        });
        d.on_keyboard_event(RawInputEvent {
            scan_code: 0x3A,
            virt_code: 0x14,
            direction: Direction::Up,
            time_ms: 0,
            is_injected: false,
            extra_info: 0,
        });

        let later = d.on_keyboard_event(RawInputEvent {
            scan_code: 0x1E,
            virt_code: 0x41,
            direction: Direction::Down,
            time_ms: 70_000,
            is_injected: false,
            extra_info: 0,
        });
        assert!(!later.events.is_empty()); // the tap-lock release chord fires.
    }
}
