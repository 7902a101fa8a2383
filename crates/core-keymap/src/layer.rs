//! Layer activation graph.
//!
//! A layer's `state` is either a direct lock bit (for a layer with no
//! masters) or a boolean function of its masters' states (for a derived
//! layer). Changing a lock or a master's state walks the slave edges and
//! recomputes downstream layers; the walk terminates because cycles are
//! rejected at edge-registration time rather than detected at recompute
//! time.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, trace};

pub type LayerId = usize;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LayerGraphError {
    #[error("layer edge would close a cycle")]
    Cycle,
}

#[derive(Debug, Clone)]
struct LayerNode {
    name: String,
    state: bool,
    lock: bool,
    prev_lock: bool,
    masters: Vec<LayerId>,
    not_masters: Vec<LayerId>,
    slaves: Vec<LayerId>,
}

impl LayerNode {
    fn new(name: String) -> Self {
        Self {
            name,
            state: false,
            lock: false,
            prev_lock: false,
            masters: Vec::new(),
            not_masters: Vec::new(),
            slaves: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct LayerGraph {
    nodes: Vec<LayerNode>,
    by_name: HashMap<String, LayerId>,
}

impl LayerGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, name: &str) -> Option<LayerId> {
        self.by_name.get(name).copied()
    }

    pub fn create(&mut self, name: &str) -> LayerId {
        if let Some(id) = self.find(name) {
            return id;
        }
        let id = self.nodes.len();
        self.nodes.push(LayerNode::new(name.to_string()));
        self.by_name.insert(name.to_string(), id);
        id
    }

    pub fn name(&self, layer: LayerId) -> &str {
        &self.nodes[layer].name
    }

    pub fn state(&self, layer: LayerId) -> bool {
        self.nodes[layer].state
    }

    pub fn lock(&self, layer: LayerId) -> bool {
        self.nodes[layer].lock
    }

    pub fn iter_ids(&self) -> impl Iterator<Item = LayerId> + '_ {
        0..self.nodes.len()
    }

    /// True if `master` can be reached from `from` by following existing
    /// master/not-master edges. Used both to reject a would-be cyclic edge
    /// and to answer `is_master_layer`.
    fn reachable(&self, from: LayerId, to: LayerId) -> bool {
        let mut stack = vec![from];
        let mut seen = vec![false; self.nodes.len()];
        while let Some(n) = stack.pop() {
            if n == to {
                return true;
            }
            if seen[n] {
                continue;
            }
            seen[n] = true;
            stack.extend(self.nodes[n].masters.iter().copied());
            stack.extend(self.nodes[n].not_masters.iter().copied());
        }
        false
    }

    pub fn add_master(&mut self, slave: LayerId, master: LayerId) -> Result<(), LayerGraphError> {
        if slave == master || self.reachable(master, slave) {
            return Err(LayerGraphError::Cycle);
        }
        self.nodes[slave].masters.push(master);
        self.nodes[master].slaves.push(slave);
        trace!(target = "keymap.layer", slave, master, "add_master");
        self.recompute(slave);
        Ok(())
    }

    pub fn add_not_master(
        &mut self,
        slave: LayerId,
        master: LayerId,
    ) -> Result<(), LayerGraphError> {
        if slave == master || self.reachable(master, slave) {
            return Err(LayerGraphError::Cycle);
        }
        self.nodes[slave].not_masters.push(master);
        self.nodes[master].slaves.push(slave);
        trace!(target = "keymap.layer", slave, master, "add_not_master");
        self.recompute(slave);
        Ok(())
    }

    /// Transitive master-edge membership test, additionally requiring that
    /// `slave`'s own current condition holds — used to decide whether a
    /// modifier's "a layer is about to handle this" assumption is live
    /// right now, not just structurally possible.
    pub fn is_master_layer(&self, master: LayerId, slave: LayerId) -> bool {
        self.reachable(slave, master) && self.nodes[slave].state
    }

    pub fn toggle_layer_lock(&mut self, layer: LayerId) {
        let new = !self.nodes[layer].lock;
        self.set_layer_lock(layer, new);
    }

    pub fn set_layer_lock(&mut self, layer: LayerId, lock: bool) {
        self.nodes[layer].prev_lock = self.nodes[layer].lock;
        self.nodes[layer].lock = lock;
        self.recompute(layer);
    }

    pub fn reset_layer_lock(&mut self, layer: LayerId) {
        let prev = self.nodes[layer].prev_lock;
        self.nodes[layer].lock = prev;
        self.recompute(layer);
    }

    /// Force `layer`'s own state directly, bypassing its masters/lock —
    /// the momentary "this key is down" assertion `to_when_press_layer`/
    /// `to_when_doublepress_layer` make while the key is held, distinct
    /// from a persistent lock and not recorded anywhere for later restore.
    pub fn assert_state(&mut self, layer: LayerId, value: bool) {
        self.set_state(layer, value);
    }

    /// Undo an `assert_state` call on key release: drop `layer`'s state
    /// back to whatever its own lock bit says, without touching the lock
    /// itself (so a genuine lock asserted by something else while the key
    /// was held survives the release untouched).
    pub fn sync_state_to_lock(&mut self, layer: LayerId) {
        let lock = self.nodes[layer].lock;
        self.set_state(layer, lock);
    }

    fn compute_self(&self, layer: LayerId) -> bool {
        let node = &self.nodes[layer];
        if node.masters.is_empty() && node.not_masters.is_empty() {
            node.lock
        } else {
            node.masters.iter().all(|&m| self.nodes[m].state)
                && node.not_masters.iter().all(|&m| !self.nodes[m].state)
        }
    }

    fn recompute(&mut self, layer: LayerId) {
        let value = self.compute_self(layer);
        self.set_state(layer, value);
    }

    fn set_state(&mut self, layer: LayerId, value: bool) {
        if self.nodes[layer].state == value {
            return;
        }
        self.nodes[layer].state = value;
        debug!(target = "keymap.layer", layer, state = value, "layer_state_changed");
        let slaves = self.nodes[layer].slaves.clone();
        for slave in slaves {
            let value = self.compute_self(slave);
            self.set_state(slave, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_without_masters_drives_state_directly() {
        let mut g = LayerGraph::new();
        let l = g.create("nav");
        assert!(!g.state(l));
        g.set_layer_lock(l, true);
        assert!(g.state(l));
    }

    #[test]
    fn derived_layer_follows_all_masters() {
        let mut g = LayerGraph::new();
        let a = g.create("a");
        let b = g.create("b");
        let derived = g.create("a_and_b");
        g.add_master(derived, a).unwrap();
        g.add_master(derived, b).unwrap();
        g.set_layer_lock(a, true);
        assert!(!g.state(derived));
        g.set_layer_lock(b, true);
        assert!(g.state(derived));
        g.set_layer_lock(a, false);
        assert!(!g.state(derived));
    }

    #[test]
    fn not_master_requires_absence() {
        let mut g = LayerGraph::new();
        let a = g.create("a");
        let derived = g.create("not_a");
        g.add_not_master(derived, a).unwrap();
        assert!(g.state(derived));
        g.set_layer_lock(a, true);
        assert!(!g.state(derived));
    }

    #[test]
    fn cyclic_master_edge_is_rejected() {
        let mut g = LayerGraph::new();
        let a = g.create("a");
        let b = g.create("b");
        g.add_master(b, a).unwrap();
        assert_eq!(g.add_master(a, b), Err(LayerGraphError::Cycle));
        assert_eq!(g.add_master(a, a), Err(LayerGraphError::Cycle));
    }

    #[test]
    fn is_master_layer_requires_current_condition() {
        let mut g = LayerGraph::new();
        let a = g.create("a");
        let derived = g.create("derived");
        g.add_master(derived, a).unwrap();
        assert!(!g.is_master_layer(a, derived));
        g.set_layer_lock(a, true);
        assert!(g.is_master_layer(a, derived));
    }

    #[test]
    fn reset_layer_lock_restores_previous_value() {
        let mut g = LayerGraph::new();
        let l = g.create("l");
        g.set_layer_lock(l, true);
        g.set_layer_lock(l, false);
        g.reset_layer_lock(l);
        assert!(g.state(l));
    }
}
