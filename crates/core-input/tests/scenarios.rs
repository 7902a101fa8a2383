//! End-to-end scenarios driven through `Dispatcher`'s public surface only,
//! simulating exactly the sequence of decoded hardware events a hook
//! callback would hand it.

use std::sync::{Arc, Mutex};

use core_events::{Direction, KeyDef, ModMask, RawInputEvent, SynthEvent, Telemetry};
use core_input::Dispatcher;
use core_keymap::{EngineSettings, Keymap, Remap};
use core_pointer::PointerEngine;

fn key(name: &'static str, virt: u16) -> KeyDef {
    KeyDef::new(name, virt, virt)
}

fn dispatcher_with_dual_role_caps() -> Dispatcher {
    let mut keymap = Keymap::new(EngineSettings::default());
    let mut remap = Remap::new(key("caps", 0x14));
    remap.to_when_alone.push(key("esc", 0x1B));
    remap
        .to_with_other
        .push(key("lctrl", 0x11).with_modifier(ModMask::CTRL_L));
    keymap.registry.register(remap).unwrap();
    let pointer = Arc::new(Mutex::new(PointerEngine::new(36).unwrap()));
    Dispatcher::new(keymap, pointer, Arc::new(Telemetry::new()))
}

fn event(scan_code: u16, virt_code: u16, direction: Direction, time_ms: u64) -> RawInputEvent {
    RawInputEvent {
        scan_code,
        virt_code,
        direction,
        time_ms,
        is_injected: false,
        extra_info: 0,
    }
}

/// CAPS down@0, CAPS up@50, `tap_timeout=200` yields `ESCAPE down, ESCAPE up`.
#[test]
fn dual_role_caps_tapped_alone_yields_escape() {
    let mut d = dispatcher_with_dual_role_caps();
    d.keymap.settings.tap_timeout = 200;

    let down = d.on_keyboard_event(event(0x3A, 0x14, Direction::Down, 0));
    assert!(down.block_original);
    assert!(down.events.is_empty(), "HeldDownAlone emits nothing on press");

    let up = d.on_keyboard_event(event(0x3A, 0x14, Direction::Up, 50));
    assert!(up.block_original);
    assert_eq!(
        as_keys(&up.events),
        vec![("esc", Direction::Down), ("esc", Direction::Up)]
    );
}

/// CAPS down@0, KEY_C down@20, KEY_C up@40, CAPS up@60 yields
/// `LEFT_CTRL down, (KEY_C passes through), LEFT_CTRL up`.
#[test]
fn dual_role_caps_held_with_other_key_yields_ctrl_and_passthrough() {
    let mut d = dispatcher_with_dual_role_caps();

    let caps_down = d.on_keyboard_event(event(0x3A, 0x14, Direction::Down, 0));
    assert!(caps_down.events.is_empty());

    let c_down = d.on_keyboard_event(event(0x2E, 0x43, Direction::Down, 20));
    assert!(!c_down.block_original, "KEY_C has no rule of its own");
    assert_eq!(as_keys(&c_down.events), vec![("lctrl", Direction::Down)]);

    let c_up = d.on_keyboard_event(event(0x2E, 0x43, Direction::Up, 40));
    assert!(!c_up.block_original);
    assert!(c_up.events.is_empty());

    let caps_up = d.on_keyboard_event(event(0x3A, 0x14, Direction::Up, 60));
    assert!(caps_up.block_original);
    assert_eq!(as_keys(&caps_up.events), vec![("lctrl", Direction::Up)]);
}

fn as_keys(events: &[SynthEvent]) -> Vec<(&'static str, Direction)> {
    events
        .iter()
        .map(|e| match e {
            SynthEvent::Key { key, direction, .. } => (key.name, *direction),
            SynthEvent::Mouse(_) => panic!("expected a key event"),
        })
        .collect()
}
