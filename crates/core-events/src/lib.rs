//! Shared event and key-descriptor types.
//!
//! `KeyDef`/`ModMask` describe the static key table; `RawInputEvent` is what
//! the platform hook delivers; `SynthEvent` is what the dispatcher hands to
//! the synthesizer on its way into the ring. Kept free of any OS or
//! threading concern so every other crate in the workspace can depend on it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bitflags::bitflags;

bitflags! {
    /// One bit per modifier key. Left- and right-hand variants occupy
    /// distinct bits so a rule can require (or produce) a specific side.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct ModMask: u16 {
        const CTRL_L  = 0b0000_0001;
        const CTRL_R  = 0b0000_0010;
        const SHIFT_L = 0b0000_0100;
        const SHIFT_R = 0b0000_1000;
        const ALT_L   = 0b0001_0000;
        const ALT_R   = 0b0010_0000;
        const WIN_L   = 0b0100_0000;
        const WIN_R   = 0b1000_0000;
    }
}

impl ModMask {
    pub const CTRL: Self = Self::CTRL_L.union(Self::CTRL_R);
    pub const SHIFT: Self = Self::SHIFT_L.union(Self::SHIFT_R);
    pub const ALT: Self = Self::ALT_L.union(Self::ALT_R);
    pub const WIN: Self = Self::WIN_L.union(Self::WIN_R);
}

/// Press or release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    #[default]
    Down,
    Up,
}

impl Direction {
    pub fn reversed(self) -> Self {
        match self {
            Direction::Down => Direction::Up,
            Direction::Up => Direction::Down,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Down => "down",
            Direction::Up => "up",
        })
    }
}

/// Static descriptor for a physical/logical key, as carried in the key
/// table and referenced by every `Remap` output binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyDef {
    pub name: &'static str,
    pub scan_code: u16,
    pub virt_code: u16,
    pub modifier: ModMask,
    /// Set when the scan code's high byte carries the platform's
    /// extended-prefix marker (right Ctrl/Alt, arrow cluster, numpad `/`
    /// and Enter).
    pub extended: bool,
}

impl KeyDef {
    pub const fn new(name: &'static str, scan_code: u16, virt_code: u16) -> Self {
        Self {
            name,
            scan_code,
            virt_code,
            modifier: ModMask::empty(),
            extended: false,
        }
    }

    pub const fn with_modifier(mut self, modifier: ModMask) -> Self {
        self.modifier = modifier;
        self
    }

    pub const fn with_extended(mut self) -> Self {
        self.extended = true;
        self
    }

    /// Bucket index used by both the key table and the remap registry.
    pub fn bucket(&self) -> u8 {
        (self.virt_code & 0xFF) as u8
    }
}

impl fmt::Display for KeyDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Sentinel virtual code the dispatcher uses to route mouse button/wheel
/// messages through the same remap-resolution path as keyboard events. No
/// real keyboard key uses this code.
pub const MOUSE_DUMMY_VIRT_CODE: u16 = 0xFF;

/// High 24 bits of the tag embedded in every synthesized event's
/// extra-info field. Must stay bit-for-bit stable across versions: it is
/// how a running session recognizes its own injected input versus another
/// tool's injections versus genuine hardware input.
pub const INJECTED_TAG_BASE: u32 = 0xFFC3_CE00;

/// Build the extra-info tag for an event synthesized on behalf of `remap_id`.
/// `remap_id = 0` means "re-emission of a genuine event, do not re-remap".
pub fn tag_for(remap_id: u8) -> u32 {
    INJECTED_TAG_BASE | remap_id as u32
}

/// True when `extra` carries our sentinel in its high 24 bits, regardless
/// of which remap id (if any) occupies the low byte.
pub fn is_our_tag(extra: u32) -> bool {
    (extra & 0xFFFF_FF00) == INJECTED_TAG_BASE
}

/// Extract the remap id from a tag already known to be ours.
pub fn remap_id_of(extra: u32) -> u8 {
    (extra & 0x0000_00FF) as u8
}

/// A raw event as delivered by the platform hook, before remap resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawInputEvent {
    pub scan_code: u16,
    pub virt_code: u16,
    pub direction: Direction,
    /// Millisecond-resolution wall time from the OS event.
    pub time_ms: u64,
    pub is_injected: bool,
    pub extra_info: u32,
}

/// One opcode for the polar pointer engine (`§4.G`). Kept as a thin newtype
/// rather than an enum so the dispatcher can route it like any other
/// `virt_code == 0` event before the engine interprets the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseOpcode(pub u8);

/// An event on its way out through the synthesizer (`§4.B`) into the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthEvent {
    Key {
        key: KeyDef,
        direction: Direction,
        remap_id: u8,
        /// Send as pure scan-code form (virtual code zeroed) rather than
        /// virtual-code form.
        scancode_mode: bool,
    },
    Mouse(MouseEvent),
}

impl Default for SynthEvent {
    /// Never produced by the synthesizer; exists only so the ring's
    /// fixed-size slot array has something to fill unpublished slots with.
    fn default() -> Self {
        SynthEvent::Key {
            key: KeyDef::new("", 0, 0),
            direction: Direction::Down,
            remap_id: 0,
            scancode_mode: false,
        }
    }
}

impl SynthEvent {
    pub fn key(key: KeyDef, direction: Direction, remap_id: u8, scancode_mode: bool) -> Self {
        SynthEvent::Key {
            key,
            direction,
            remap_id,
            scancode_mode,
        }
    }

    pub fn tag(&self) -> u32 {
        match self {
            SynthEvent::Key { remap_id, .. } => tag_for(*remap_id),
            SynthEvent::Mouse(m) => tag_for(m.remap_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseEvent {
    pub kind: MouseEventKind,
    pub remap_id: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseEventKind {
    Move { dx: i32, dy: i32 },
    Wheel { delta: i32 },
    HWheel { delta: i32 },
    /// The three "classic" buttons (left/right/middle), which can coexist
    /// in one event because they share a single bitmask auxiliary field.
    ClassicButtons { mask: u8 },
    /// Extended buttons (X1/X2) need one event each: they share the same
    /// auxiliary data field the wheel messages use, so two simultaneous
    /// extended-button edges cannot be coalesced into a single event.
    ExtendedButton { index: u8, pressed: bool },
}

/// How often a saturated ring is allowed to log a `warn!` for its drops;
/// the `AtomicU64` counter itself still tracks every drop exactly.
const DROP_WARN_INTERVAL: Duration = Duration::from_secs(1);

/// Process-lifetime telemetry, read by diagnostics and tests. Mirrors the
/// atomic-counter style used throughout the teacher's async input service.
#[derive(Debug)]
pub struct Telemetry {
    pub ring_drops: AtomicU64,
    pub events_synthesized: AtomicU64,
    pub rehooks: AtomicU64,
    pub unlock_alls: AtomicU64,
    last_drop_warn: std::sync::Mutex<Option<Instant>>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            ring_drops: AtomicU64::new(0),
            events_synthesized: AtomicU64::new(0),
            rehooks: AtomicU64::new(0),
            unlock_alls: AtomicU64::new(0),
            last_drop_warn: std::sync::Mutex::new(None),
        }
    }

    /// A ring reservation just failed under backpressure. The counter is
    /// exact; the accompanying `warn!` is throttled to at most once per
    /// `DROP_WARN_INTERVAL` so a saturated ring degrades remapping quality
    /// without flooding the log.
    pub fn record_drop(&self) -> u64 {
        let total = self.ring_drops.fetch_add(1, Ordering::Relaxed) + 1;
        let mut last = self.last_drop_warn.lock().expect("telemetry mutex poisoned");
        let now = Instant::now();
        let should_warn = last.is_none_or(|t| now.duration_since(t) >= DROP_WARN_INTERVAL);
        if should_warn {
            *last = Some(now);
            tracing::warn!(target = "ring", total, "synth_event_dropped_ring_full");
        } else {
            tracing::trace!(target = "ring", total, "synth_event_dropped_ring_full");
        }
        total
    }

    pub fn record_synthesized(&self, n: u64) {
        self.events_synthesized.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_rehook(&self) {
        self.rehooks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unlock_all(&self) {
        self.unlock_alls.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_roundtrips_remap_id() {
        let tag = tag_for(42);
        assert!(is_our_tag(tag));
        assert_eq!(remap_id_of(tag), 42);
    }

    #[test]
    fn foreign_tag_is_not_ours() {
        assert!(!is_our_tag(0xDEAD_BEEF));
    }

    #[test]
    fn passthrough_tag_is_ours_with_zero_remap_id() {
        assert!(is_our_tag(INJECTED_TAG_BASE));
        assert_eq!(remap_id_of(INJECTED_TAG_BASE), 0);
    }

    #[test]
    fn direction_reverses() {
        assert_eq!(Direction::Down.reversed(), Direction::Up);
        assert_eq!(Direction::Up.reversed(), Direction::Down);
    }

    #[test]
    fn mod_mask_left_right_union() {
        let m = ModMask::CTRL_L | ModMask::SHIFT_R;
        assert!(m.intersects(ModMask::CTRL));
        assert!(m.intersects(ModMask::SHIFT));
        assert!(!m.intersects(ModMask::ALT));
    }

    #[test]
    fn telemetry_counts_accumulate() {
        let t = Telemetry::new();
        t.record_drop();
        t.record_drop();
        t.record_synthesized(3);
        assert_eq!(t.ring_drops.load(Ordering::Relaxed), 2);
        assert_eq!(t.events_synthesized.load(Ordering::Relaxed), 3);
    }
}
