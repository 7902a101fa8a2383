//! End-to-end scenarios driven through `Keymap`'s public entry points only,
//! with no knowledge of `RemapRegistry`/`LayerGraph` internals.

use core_events::{Direction, KeyDef, SynthEvent};
use core_keymap::{EngineSettings, Keymap, Remap};

fn key(name: &'static str, virt: u16) -> KeyDef {
    KeyDef::new(name, virt, virt)
}

/// `remap_key=KEY_A; when_alone=KEY_A; when_doublepress=KEY_B`,
/// `doublepress_timeout=300`. A down@0, A up@50, A down@200, A up@260
/// yields `A down, A up, B down, B up`.
#[test]
fn doublepress_within_timeout_fires_alternate_chord() {
    let mut settings = EngineSettings::default();
    settings.doublepress_timeout = 300;
    let mut km = Keymap::new(settings);
    let mut remap = Remap::new(key("a", 0x41));
    remap.to_when_alone.push(key("a", 0x41));
    remap.to_when_doublepress.push(key("b", 0x42));
    km.registry.register(remap).unwrap();

    let (_, _, d1) = km.key_down(0x41, 0).unwrap();
    assert_eq!(as_keys(&d1), vec![("a", Direction::Down)]);
    let (_, _, u1) = km.key_up(0x41, 50).unwrap();
    assert_eq!(as_keys(&u1), vec![("a", Direction::Up)]);

    let (_, _, d2) = km.key_down(0x41, 200).unwrap();
    assert_eq!(as_keys(&d2), vec![("b", Direction::Down)]);
    let (_, _, u2) = km.key_up(0x41, 260).unwrap();
    assert_eq!(as_keys(&u2), vec![("b", Direction::Up)]);
}

/// `remap_key=SPACE; when_alone=SPACE; when_tap_lock=LEFT_SHIFT`. Tapping
/// SPACE toggles the lock chord on (emitting `LEFT_SHIFT down` on the
/// release that completes the tap), a second tap — classified here as a
/// doublepress since `doublepress_timeout=0` means "no cutoff" — reverts
/// the lock (`LEFT_SHIFT up`) before its own down chord fires.
#[test]
fn tap_lock_toggles_across_two_taps() {
    let mut km = Keymap::new(EngineSettings::default());
    let mut remap = Remap::new(key("space", 0x20));
    remap.to_when_alone.push(key("space", 0x20));
    remap.to_when_tap_lock.push(key("lshift", 0xA0));
    km.registry.register(remap).unwrap();

    // no `to_with_other`: the down edge itself enters `Tap` and fires the
    // down chord immediately, so only the release chord is left for `up`.
    let (_, _, d1) = km.key_down(0x20, 0).unwrap();
    assert_eq!(as_keys(&d1), vec![("space", Direction::Down)]);
    let (_, _, u1) = km.key_up(0x20, 5).unwrap();
    assert_eq!(
        as_keys(&u1),
        vec![("space", Direction::Up), ("lshift", Direction::Down)]
    );
    let id = km.registry.resolve(0x20, &km.layers).unwrap();
    assert!(km.registry.get(id).unwrap().tap_lock);

    let other = km.other_input(None, None, 6);
    assert_eq!(as_keys(&other), vec![("lshift", Direction::Down)]);

    let (_, _, d2) = km.key_down(0x20, 100).unwrap();
    assert_eq!(
        as_keys(&d2),
        vec![("lshift", Direction::Up), ("space", Direction::Down)]
    );
    let (_, _, u2) = km.key_up(0x20, 105).unwrap();
    assert_eq!(as_keys(&u2), vec![("space", Direction::Up)]);
    assert!(!km.registry.get(id).unwrap().tap_lock);
}

/// A layer-gated rule is inert until its layer is locked on; once locked,
/// the same virt code resolves to the gated rule instead of passing through.
#[test]
fn layer_gated_rule_only_resolves_once_its_layer_is_active() {
    let mut km = Keymap::new(EngineSettings::default());
    let nav = km.layers.create("nav");
    let mut remap = Remap::new(key("j", 0x4A));
    remap.layer = Some(nav);
    remap.to_when_alone.push(key("left", 0x25));
    km.registry.register(remap).unwrap();

    assert!(km.key_down(0x4A, 0).is_none());

    km.layers.set_layer_lock(nav, true);
    let (_, _, down) = km.key_down(0x4A, 10).unwrap();
    assert_eq!(as_keys(&down), vec![("left", Direction::Down)]);
    let (_, _, up) = km.key_up(0x4A, 20).unwrap();
    assert_eq!(as_keys(&up), vec![("left", Direction::Up)]);
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
