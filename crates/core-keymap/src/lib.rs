//! Layer graph, remap registry, and per-key state machine: the pure,
//! synchronous core that decides what a resolved key means right now.
//! Holds no OS handle and performs no I/O; the dispatcher in `core-input`
//! owns the platform boundary and calls into `Keymap` with already-decoded
//! events.

pub mod fsm;
pub mod layer;
pub mod registry;

pub use fsm::{EngineSettings, InputDisposition};
pub use layer::{LayerGraph, LayerGraphError, LayerId};
pub use registry::{
    KeyChord, KeyState, LayerLockAction, LockOp, Remap, RemapId, RemapRegistry, RemapRegistryError,
};

use core_events::{Direction, SynthEvent};
use tracing::debug;

/// Ties the Layer Graph, the Remap Registry, and the active-remap list
/// together behind the three entry points the dispatcher drives.
pub struct Keymap {
    pub layers: LayerGraph,
    pub registry: RemapRegistry,
    pub settings: EngineSettings,
    active: Vec<RemapId>,
}

impl Keymap {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            layers: LayerGraph::new(),
            registry: RemapRegistry::new(),
            settings,
            active: Vec::new(),
        }
    }

    fn activate(&mut self, id: RemapId) {
        if !self.active.contains(&id) {
            self.active.push(id);
        }
    }

    fn deactivate_idle(&mut self) {
        let registry = &self.registry;
        self.active.retain(|&id| {
            registry
                .get(id)
                .is_some_and(|r| r.is_active())
        });
    }

    /// Resolve `virt_code` to a rule and run the appropriate key-down
    /// transition. Returns `None` if no rule covers this code, in which
    /// case the caller should fall through to `other_input`.
    pub fn key_down(&mut self, virt_code: u16, time: u64) -> Option<(RemapId, InputDisposition, Vec<SynthEvent>)> {
        let id = self.registry.resolve(virt_code, &self.layers)?;
        let mut out = Vec::new();
        let remap = self.registry.get_mut(id)?;
        let disposition = fsm::handle_down(remap, &mut self.layers, &self.settings, time, &mut out);
        self.activate(id);
        self.deactivate_idle();
        Some((id, disposition, out))
    }

    pub fn key_up(&mut self, virt_code: u16, time: u64) -> Option<(RemapId, InputDisposition, Vec<SynthEvent>)> {
        let id = self.registry.resolve(virt_code, &self.layers)?;
        let mut out = Vec::new();
        let remap = self.registry.get_mut(id)?;
        let disposition = fsm::handle_up(remap, &mut self.layers, &self.settings, time, &mut out);
        self.deactivate_idle();
        Some((id, disposition, out))
    }

    /// Feed an input with no rule of its own (or whose resolved rule is
    /// not `source`) to every other currently-active remap.
    pub fn other_input(
        &mut self,
        source: Option<RemapId>,
        source_press_layer: Option<LayerId>,
        time: u64,
    ) -> Vec<SynthEvent> {
        let mut out = Vec::new();
        let ids: Vec<RemapId> = self
            .active
            .iter()
            .copied()
            .filter(|&id| Some(id) != source)
            .collect();
        for id in ids {
            if let Some(remap) = self.registry.get_mut(id) {
                fsm::handle_other_input(
                    remap,
                    &mut self.layers,
                    source_press_layer,
                    &self.settings,
                    time,
                    &mut out,
                );
            }
        }
        self.deactivate_idle();
        out
    }

    /// Release every currently-held synthesized chord, clear every lock,
    /// and reset every layer to `state=0, lock=0`. Invoked by the
    /// dispatcher when the inter-event gap exceeds `unlock_timeout`.
    pub fn unlock_all(&mut self) -> Vec<SynthEvent> {
        let mut out = Vec::new();
        let ids: Vec<RemapId> = self.active.drain(..).collect();
        for id in ids {
            if let Some(remap) = self.registry.get_mut(id) {
                let scancode_mode = self.settings.scancode_mode;
                match remap.state {
                    KeyState::HeldDownAlone | KeyState::Tap => {
                        fsm::emit_chord(&remap.to_when_alone, remap.id, Direction::Up, scancode_mode, &mut out);
                    }
                    KeyState::HeldDownWithOther => {
                        fsm::emit_chord(&remap.to_with_other, remap.id, Direction::Up, scancode_mode, &mut out);
                    }
                    KeyState::DoubleTap => {
                        fsm::emit_chord(&remap.to_when_doublepress, remap.id, Direction::Up, scancode_mode, &mut out);
                    }
                    KeyState::Idle | KeyState::Tapped => {}
                }
                if remap.tap_lock {
                    fsm::emit_chord(&remap.to_when_tap_lock, remap.id, Direction::Up, scancode_mode, &mut out);
                }
                if remap.double_tap_lock {
                    fsm::emit_chord(&remap.to_when_double_tap_lock, remap.id, Direction::Up, scancode_mode, &mut out);
                }
                remap.state = KeyState::Idle;
                remap.tap_lock = false;
                remap.double_tap_lock = false;
            }
        }
        for layer in self.layers.iter_ids() {
            self.layers.set_layer_lock(layer, false);
        }
        debug!(target = "keymap.unlock", emitted = out.len(), "unlock_all");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_events::KeyDef;

    fn key(name: &'static str, virt: u16) -> KeyDef {
        KeyDef::new(name, virt, virt)
    }

    #[test]
    fn idle_tap_emits_down_then_up_on_release() {
        let mut km = Keymap::new(EngineSettings::default());
        let mut remap = Remap::new(key("caps", 0x14));
        remap.to_when_alone.push(key("esc", 0x1B));
        let id = km.registry.register(remap).unwrap();

        let (resolved_id, _, down_events) = km.key_down(0x14, 0).unwrap();
        assert_eq!(resolved_id, id);
        assert_eq!(down_events.len(), 1);

        let (_, _, up_events) = km.key_up(0x14, 10).unwrap();
        assert_eq!(up_events.len(), 1);
        match up_events[0] {
            SynthEvent::Key { direction, .. } => assert_eq!(direction, Direction::Up),
            _ => panic!("expected a key event"),
        }
    }

    #[test]
    fn held_with_other_emits_modifier_chord_on_other_key() {
        let mut km = Keymap::new(EngineSettings::default());
        let mut remap = Remap::new(key("caps", 0x14));
        remap.to_when_alone.push(key("esc", 0x1B));
        remap.to_with_other.push(key("ctrl", 0x11).with_modifier(core_events::ModMask::CTRL_L));
        km.registry.register(remap).unwrap();

        let (id, _, _) = km.key_down(0x14, 0).unwrap();
        let emitted = km.other_input(None, None, 0);
        assert_eq!(emitted.len(), 1);

        let remap = km.registry.get(id).unwrap();
        assert_eq!(remap.state, KeyState::HeldDownWithOther);
    }

    #[test]
    fn unlock_all_clears_locks_and_emits_releases() {
        let mut km = Keymap::new(EngineSettings::default());
        let mut remap = Remap::new(key("caps", 0x14));
        remap.to_when_alone.push(key("esc", 0x1B));
        remap.to_when_tap_lock.push(key("ctrl", 0x11));
        km.registry.register(remap).unwrap();

        km.key_down(0x14, 0);
        km.key_up(0x14, 0);
        let id = km.registry.resolve(0x14, &km.layers).unwrap();
        assert!(km.registry.get(id).unwrap().tap_lock);

        let emitted = km.unlock_all();
        assert!(!emitted.is_empty());
        assert!(!km.registry.get(id).unwrap().tap_lock);
    }
}
