//! Remap Registry: per-virtual-code bucket resolution plus a by-id index,
//! and the `Remap` rule type itself with its runtime FSM fields.

use smallvec::SmallVec;
use thiserror::Error;
use tracing::debug;

use core_events::{KeyDef, ModMask};

use crate::layer::{LayerGraph, LayerId};

pub type RemapId = u8;

/// An ordered key-chord, emitted in order on press and reverse on release.
pub type KeyChord = SmallVec<[KeyDef; 4]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOp {
    Toggle,
    Set,
    Reset,
}

#[derive(Debug, Clone, Copy)]
pub struct LayerLockAction {
    pub layer: LayerId,
    pub op: LockOp,
}

impl LayerLockAction {
    pub fn apply(&self, layers: &mut LayerGraph) {
        match self.op {
            LockOp::Toggle => layers.toggle_layer_lock(self.layer),
            LockOp::Set => layers.set_layer_lock(self.layer, true),
            LockOp::Reset => layers.reset_layer_lock(self.layer),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Idle,
    HeldDownAlone,
    HeldDownWithOther,
    Tap,
    Tapped,
    DoubleTap,
}

impl Default for KeyState {
    fn default() -> Self {
        KeyState::Idle
    }
}

#[derive(Debug, Clone)]
pub struct Remap {
    pub id: RemapId,
    pub from: KeyDef,
    pub layer: Option<LayerId>,

    pub to_when_alone: KeyChord,
    pub to_with_other: KeyChord,
    pub to_when_doublepress: KeyChord,
    pub to_when_tap_lock: KeyChord,
    pub to_when_double_tap_lock: KeyChord,

    pub to_when_press_layer: Option<LayerId>,
    pub to_when_doublepress_layer: Option<LayerId>,
    pub to_when_tap_lock_layers: Vec<LayerLockAction>,
    pub to_when_double_tap_lock_layers: Vec<LayerLockAction>,

    pub state: KeyState,
    pub time: u64,
    pub tap_lock: bool,
    pub double_tap_lock: bool,
    pub active_modifiers: ModMask,
}

impl Remap {
    pub fn new(from: KeyDef) -> Self {
        Self {
            id: 0,
            from,
            layer: None,
            to_when_alone: KeyChord::new(),
            to_with_other: KeyChord::new(),
            to_when_doublepress: KeyChord::new(),
            to_when_tap_lock: KeyChord::new(),
            to_when_double_tap_lock: KeyChord::new(),
            to_when_press_layer: None,
            to_when_doublepress_layer: None,
            to_when_tap_lock_layers: Vec::new(),
            to_when_double_tap_lock_layers: Vec::new(),
            state: KeyState::Idle,
            time: 0,
            tap_lock: false,
            double_tap_lock: false,
            active_modifiers: ModMask::empty(),
        }
    }

    /// OR of the modifier bits of every key in `chord`.
    pub fn modifiers_of(chord: &KeyChord) -> ModMask {
        chord.iter().fold(ModMask::empty(), |acc, k| acc | k.modifier)
    }

    pub fn is_active(&self) -> bool {
        self.state != KeyState::Idle || self.tap_lock || self.double_tap_lock
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RemapRegistryError {
    #[error("remap registry already holds 255 remaps")]
    Full,
}

/// Resolves an incoming virtual code to the `Remap` that should handle it:
/// a layer-gated rule whose layer is currently active, else the bucket's
/// base (unlayered) rule, if any.
#[derive(Debug)]
pub struct RemapRegistry {
    remaps: Vec<Remap>,
    buckets: Vec<Vec<RemapId>>,
}

impl RemapRegistry {
    pub fn new() -> Self {
        Self {
            remaps: vec![Remap::new(KeyDef::new("", 0, 0))],
            buckets: vec![Vec::new(); 256],
        }
    }

    /// Registers `remap`, eliding outputs that would be redundant: a
    /// `to_with_other` identical to `to_when_alone`, a `to_with_other`
    /// that carries no modifier bits (its only value), and a
    /// `to_when_doublepress` identical to `to_when_alone`.
    pub fn register(&mut self, mut remap: Remap) -> Result<RemapId, RemapRegistryError> {
        if self.remaps.len() > u8::MAX as usize {
            return Err(RemapRegistryError::Full);
        }
        if !remap.to_with_other.is_empty() && remap.to_with_other == remap.to_when_alone {
            remap.to_with_other.clear();
        }
        if !remap.to_with_other.is_empty()
            && Remap::modifiers_of(&remap.to_with_other).is_empty()
        {
            remap.to_with_other.clear();
        }
        if !remap.to_when_doublepress.is_empty()
            && remap.to_when_doublepress == remap.to_when_alone
        {
            remap.to_when_doublepress.clear();
        }

        let id = self.remaps.len() as RemapId;
        remap.id = id;
        let bucket = remap.from.bucket() as usize;
        self.buckets[bucket].push(id);
        debug!(
            target = "keymap.registry",
            id,
            bucket,
            virt_code = remap.from.virt_code,
            "remap_registered"
        );
        self.remaps.push(remap);
        Ok(id)
    }

    pub fn get(&self, id: RemapId) -> Option<&Remap> {
        (id != 0).then(|| self.remaps.get(id as usize)).flatten()
    }

    pub fn get_mut(&mut self, id: RemapId) -> Option<&mut Remap> {
        (id != 0).then(|| self.remaps.get_mut(id as usize)).flatten()
    }

    pub fn len(&self) -> usize {
        self.remaps.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bucket walk: the first layer-gated entry whose layer is currently
    /// active wins; otherwise the bucket's base rule, if one exists.
    pub fn resolve(&self, virt_code: u16, layers: &LayerGraph) -> Option<RemapId> {
        let bucket = (virt_code & 0xFF) as usize;
        let mut base = None;
        for &id in &self.buckets[bucket] {
            let remap = &self.remaps[id as usize];
            match remap.layer {
                Some(layer) if layers.state(layer) => return Some(id),
                Some(_) => continue,
                None => base = Some(id),
            }
        }
        base
    }

    pub fn iter(&self) -> impl Iterator<Item = &Remap> {
        self.remaps.iter().skip(1)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Remap> {
        self.remaps.iter_mut().skip(1)
    }
}

impl Default for RemapRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn key(name: &'static str, virt: u16) -> KeyDef {
        KeyDef::new(name, virt, virt)
    }

    #[test]
    fn registered_chord_contents_match_input_order() {
        let mut reg = RemapRegistry::new();
        let mut remap = Remap::new(key("space", 0x20));
        remap.to_when_alone.push(key("ctrl", 0x11));
        remap.to_when_alone.push(key("shift", 0x10));
        let id = reg.register(remap).unwrap();
        let got: Vec<KeyDef> = reg.get(id).unwrap().to_when_alone.iter().copied().collect();
        assert_eq!(got, vec![key("ctrl", 0x11), key("shift", 0x10)]);
    }

    #[test]
    fn registration_assigns_sequential_ids_from_one() {
        let mut reg = RemapRegistry::new();
        let a = reg.register(Remap::new(key("a", 1))).unwrap();
        let b = reg.register(Remap::new(key("b", 2))).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn redundant_to_with_other_identical_to_alone_is_dropped() {
        let mut reg = RemapRegistry::new();
        let mut remap = Remap::new(key("caps", 0x14));
        remap.to_when_alone.push(key("esc", 0x1B));
        remap.to_with_other.push(key("esc", 0x1B));
        let id = reg.register(remap).unwrap();
        assert!(reg.get(id).unwrap().to_with_other.is_empty());
    }

    #[test]
    fn to_with_other_without_modifiers_is_dropped() {
        let mut reg = RemapRegistry::new();
        let mut remap = Remap::new(key("caps", 0x14));
        remap.to_when_alone.push(key("esc", 0x1B));
        remap.to_with_other.push(key("x", 0x58));
        let id = reg.register(remap).unwrap();
        assert!(reg.get(id).unwrap().to_with_other.is_empty());
    }

    #[test]
    fn resolve_prefers_active_layer_gated_rule_over_base() {
        let mut layers = LayerGraph::new();
        let nav = layers.create("nav");
        let mut reg = RemapRegistry::new();
        let mut base = Remap::new(key("h", 0x48));
        base.to_when_alone.push(key("h", 0x48));
        reg.register(base).unwrap();
        let mut gated = Remap::new(key("h", 0x48));
        gated.layer = Some(nav);
        gated.to_when_alone.push(key("left", 0x25));
        let gated_id = reg.register(gated).unwrap();

        assert_eq!(reg.resolve(0x48, &layers), Some(1));
        layers.set_layer_lock(nav, true);
        assert_eq!(reg.resolve(0x48, &layers), Some(gated_id));
    }
}
