//! Static key table: the name -> `KeyDef` lookup the config parser consults
//! for every `key_name` token, plus the mouse-opcode pseudo-keys used by
//! `when_alone=`/`when_press=` bindings that drive the pointer engine.
//!
//! Scan codes are PS/2 set-1 make codes; virtual codes are the platform's
//! own key identifiers. A scan code whose top byte is `0xE0` carries the
//! extended-key prefix (right Ctrl/Alt, the arrow cluster, Insert/Delete/
//! Home/End/Page Up/Page Down, the left GUI keys, numpad `/` and Enter).

use core_events::{KeyDef, ModMask};

const fn k(name: &'static str, scan_code: u16, virt_code: u16) -> KeyDef {
    KeyDef::new(name, scan_code, virt_code)
}

const fn ext(def: KeyDef) -> KeyDef {
    def.with_extended()
}

/// One entry per name the config grammar can reference. Several virtual
/// codes are reachable under more than one name (`CTRL` and `LEFT_CTRL`
/// both resolve to the left control key) to match how `keys.c` aliases the
/// bare modifier name to its left-hand variant.
pub static KEY_TABLE: &[KeyDef] = &[
    k("BACKSPACE", 0x0E, 0x08),
    k("TAB", 0x0F, 0x09),
    k("ENTER", 0x1C, 0x0D),
    k("CAPSLOCK", 0x3A, 0x14),
    k("ESCAPE", 0x01, 0x1B),
    k("SPACE", 0x39, 0x20),
    k("PAGE_UP", 0x49, 0x21).with_extended(),
    k("PAGE_DOWN", 0x51, 0x22).with_extended(),
    k("END", 0x4F, 0x23).with_extended(),
    k("HOME", 0x47, 0x24).with_extended(),
    ext(k("LEFT", 0x4B, 0x25)),
    ext(k("UP", 0x48, 0x26)),
    ext(k("RIGHT", 0x4D, 0x27)),
    ext(k("DOWN", 0x50, 0x28)),
    ext(k("INSERT", 0x52, 0x2D)),
    ext(k("DELETE", 0x53, 0x2E)),
    k("PRINT_SCREEN", 0x37, 0x2C).with_extended(),
    k("PAUSE", 0x45, 0x13),
    k("NUMLOCK", 0x45, 0x90),
    k("SCROLLLOCK", 0x46, 0x91),
    k("KEY_0", 0x0B, 0x30),
    k("KEY_1", 0x02, 0x31),
    k("KEY_2", 0x03, 0x32),
    k("KEY_3", 0x04, 0x33),
    k("KEY_4", 0x05, 0x34),
    k("KEY_5", 0x06, 0x35),
    k("KEY_6", 0x07, 0x36),
    k("KEY_7", 0x08, 0x37),
    k("KEY_8", 0x09, 0x38),
    k("KEY_9", 0x0A, 0x39),
    k("KEY_A", 0x1E, 0x41),
    k("KEY_B", 0x30, 0x42),
    k("KEY_C", 0x2E, 0x43),
    k("KEY_D", 0x20, 0x44),
    k("KEY_E", 0x12, 0x45),
    k("KEY_F", 0x21, 0x46),
    k("KEY_G", 0x22, 0x47),
    k("KEY_H", 0x23, 0x48),
    k("KEY_I", 0x17, 0x49),
    k("KEY_J", 0x24, 0x4A),
    k("KEY_K", 0x25, 0x4B),
    k("KEY_L", 0x26, 0x4C),
    k("KEY_M", 0x32, 0x4D),
    k("KEY_N", 0x31, 0x4E),
    k("KEY_O", 0x18, 0x4F),
    k("KEY_P", 0x19, 0x50),
    k("KEY_Q", 0x10, 0x51),
    k("KEY_R", 0x13, 0x52),
    k("KEY_S", 0x1F, 0x53),
    k("KEY_T", 0x14, 0x54),
    k("KEY_U", 0x16, 0x55),
    k("KEY_V", 0x2F, 0x56),
    k("KEY_W", 0x11, 0x57),
    k("KEY_X", 0x2D, 0x58),
    k("KEY_Y", 0x15, 0x59),
    k("KEY_Z", 0x2C, 0x5A),
    k("F1", 0x3B, 0x70),
    k("F2", 0x3C, 0x71),
    k("F3", 0x3D, 0x72),
    k("F4", 0x3E, 0x73),
    k("F5", 0x3F, 0x74),
    k("F6", 0x40, 0x75),
    k("F7", 0x41, 0x76),
    k("F8", 0x42, 0x77),
    k("F9", 0x43, 0x78),
    k("F10", 0x44, 0x79),
    k("F11", 0x57, 0x7A),
    k("F12", 0x58, 0x7B),
    k("F13", 0x64, 0x7C),
    k("F14", 0x65, 0x7D),
    k("F15", 0x66, 0x7E),
    k("F16", 0x67, 0x7F),
    k("F17", 0x68, 0x80),
    k("F18", 0x69, 0x81),
    k("F19", 0x6A, 0x82),
    k("F20", 0x6B, 0x83),
    k("F21", 0x6C, 0x84),
    k("F22", 0x6D, 0x85),
    k("F23", 0x6E, 0x86),
    k("F24", 0x76, 0x87),
    k("PLUS", 0x0D, 0xBB),
    k("COMMA", 0x33, 0xBC),
    k("MINUS", 0x0C, 0xBD),
    k("PERIOD", 0x34, 0xBE),
    k("US_SEMI", 0x27, 0xBA),
    k("US_SLASH", 0x35, 0xBF),
    k("US_TILDE", 0x29, 0xC0),
    k("LEFT_CTRL", 0x1D, 0xA2).with_modifier(ModMask::CTRL_L),
    k("CTRL", 0x1D, 0xA2).with_modifier(ModMask::CTRL_L),
    ext(k("RIGHT_CTRL", 0xE01D & 0xFF, 0xA3)).with_modifier(ModMask::CTRL_R),
    k("LEFT_SHIFT", 0x2A, 0xA0).with_modifier(ModMask::SHIFT_L),
    k("SHIFT", 0x2A, 0xA0).with_modifier(ModMask::SHIFT_L),
    k("RIGHT_SHIFT", 0x36, 0xA1).with_modifier(ModMask::SHIFT_R),
    k("LEFT_ALT", 0x38, 0xA4).with_modifier(ModMask::ALT_L),
    k("ALT", 0x38, 0xA4).with_modifier(ModMask::ALT_L),
    ext(k("RIGHT_ALT", 0xE038 & 0xFF, 0xA5)).with_modifier(ModMask::ALT_R),
    ext(k("LEFT_WIN", 0x5B, 0x5B)).with_modifier(ModMask::WIN_L),
    ext(k("RIGHT_WIN", 0x5C, 0x5C)).with_modifier(ModMask::WIN_R),
    // Mouse opcodes: virt_code 0 routes through the dummy bucket; scan_code
    // carries the opcode the pointer engine's `on_opcode` expects.
    k("MOUSE_UP", 1, 0),
    k("MOUSE_DOWN", 2, 0),
    k("MOUSE_LEFT", 3, 0),
    k("MOUSE_RIGHT", 4, 0),
    k("MOUSE_FORWARD", 5, 0),
    k("MOUSE_BACKWARD", 6, 0),
    k("MOUSE_STEER_LEFT", 7, 0),
    k("MOUSE_STEER_RIGHT", 8, 0),
    k("MOUSE_WHEEL_UP", 9, 0),
    k("MOUSE_WHEEL_DOWN", 10, 0),
    k("MOUSE_WHEEL_LEFT", 11, 0),
    k("MOUSE_WHEEL_RIGHT", 12, 0),
    k("MOUSE_LBUTTON", 13, 0),
    k("MOUSE_RBUTTON", 14, 0),
    k("MOUSE_MBUTTON", 15, 0),
    k("MOUSE_XBUTTON1", 16, 0),
    k("MOUSE_XBUTTON2", 17, 0),
    k("MOUSE_SBUTTON", 18, 0),
    k("MOUSE_SHOLD", 19, 0),
    k("MOUSE_SRELEASE", 20, 0),
    k("MOUSE_LBUTTON_SEL", 21, 0),
    k("MOUSE_RBUTTON_SEL", 22, 0),
    k("MOUSE_MBUTTON_SEL", 23, 0),
    k("MOUSE_XBUTTON1_SEL", 24, 0),
    k("MOUSE_XBUTTON2_SEL", 25, 0),
];

/// Opcodes 1..=25 share virtual code 0, so they cannot be told apart by
/// `KeyDef` alone; the dispatcher resolves a mouse event's `Remap` by scan
/// code within the dummy bucket instead of by virtual code.
pub fn mouse_opcode(scan_code: u16) -> Option<&'static KeyDef> {
    KEY_TABLE
        .iter()
        .find(|def| def.virt_code == 0 && def.scan_code == scan_code)
}

pub fn find(name: &str) -> Option<&'static KeyDef> {
    KEY_TABLE.iter().find(|def| def.name == name)
}

/// First `KeyDef` carrying `virt_code`, preferring a modifier-bearing entry
/// where the table defines both a side-specific and a generic alias (e.g.
/// `LEFT_CTRL` before `CTRL`) since either spelling shares the virtual code.
pub fn find_by_virt_code(virt_code: u16) -> Option<&'static KeyDef> {
    KEY_TABLE
        .iter()
        .filter(|def| def.virt_code == virt_code)
        .max_by_key(|def| !def.modifier.is_empty())
}
