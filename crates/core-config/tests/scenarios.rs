//! Parses a real `config.txt` document and drives the resulting `Keymap`
//! through the dual-role Caps scenario, the same way the daemon's
//! config-load-then-dispatch path would.

use core_config::parse;
use core_events::{Direction, SynthEvent};

#[test]
fn parsed_dual_role_caps_config_taps_to_escape() {
    let text = "tap_timeout=200\nremap_key=CAPSLOCK\nwhen_alone=ESCAPE\nwith_other=LEFT_CTRL\n";
    let mut keymap = parse(text).expect("well-formed config parses");

    let (_, _, down) = keymap.key_down(caps_virt(&keymap), 0).unwrap();
    assert!(down.is_empty(), "dual-role key emits nothing on press");

    let (_, _, up) = keymap.key_up(caps_virt(&keymap), 50).unwrap();
    assert_eq!(up.len(), 2);
    assert_eq!(direction_of(&up[0]), Direction::Down);
    assert_eq!(direction_of(&up[1]), Direction::Up);
}

#[test]
fn malformed_config_is_reported_with_line_numbers() {
    let text = "remap_key=CAPSLOCK\nwhen_alone=NOT_A_KEY\n";
    let err = parse(text).expect_err("an unknown key name must fail to parse");
    assert!(err.0.iter().any(|issue| issue.to_string().contains("line 2")));
}

fn caps_virt(keymap: &core_keymap::Keymap) -> u16 {
    keymap
        .registry
        .iter()
        .find(|r| r.from.name == "CAPSLOCK")
        .expect("CAPSLOCK remap registered")
        .from
        .virt_code
}

fn direction_of(event: &SynthEvent) -> Direction {
    match event {
        SynthEvent::Key { direction, .. } => *direction,
        SynthEvent::Mouse(_) => panic!("expected a key event"),
    }
}
