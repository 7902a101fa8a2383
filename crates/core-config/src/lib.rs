//! `config.txt` loading: a line-oriented grammar of `key=value` directives
//! that builds a `core_keymap::Keymap`. One rule block runs from a
//! `remap_key=` line to the next `remap_key=` (or end of file); layer
//! definitions (`define_layer=`/`and_layer=`/`and_not_layer=`) can appear
//! interleaved with rule blocks or before them.
//!
//! Grounded on the directive grammar and validation order of the original
//! `load_config_line`/`parsee_is_valid` pair: unlike that implementation,
//! which stops at the first malformed line, this parser collects every
//! line error it finds and reports them together, since a user fixing a
//! config benefits far more from the whole list than from one at a time.

pub mod keytable;
pub mod watch;

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use core_keymap::{EngineSettings, Keymap, LayerLockAction, LockOp, Remap};

const LAYER_PREFIX: &str = "layer";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigIssue {
    #[error("line {line}: unknown directive {directive:?}")]
    UnknownDirective { line: usize, directive: String },
    #[error("line {line}: {directive} requires a key or layer name")]
    MissingValue { line: usize, directive: String },
    #[error("line {line}: unknown key {name:?}")]
    UnknownKey { line: usize, name: String },
    #[error("line {line}: {directive}={value:?} is not a valid number")]
    MalformedValue {
        line: usize,
        directive: String,
        value: String,
    },
    #[error("line {line}: {name:?} is not a layer name (layer names start with \"layer\")")]
    NotALayerName { line: usize, name: String },
    #[error("line {line}: and_layer=/and_not_layer= with no preceding define_layer=")]
    IncompleteLayerDefinition { line: usize },
    #[error("line {line}: layer edge would close a cycle")]
    LayerCycle { line: usize },
    #[error(
        "line {line}: remap_key={from:?} has no when_alone=/with_other=/layer= binding, dropped"
    )]
    EmptyRule { line: usize, from: String },
    #[error("line {line}: a key or layer name is required before remap_key=")]
    DanglingDirectiveBeforeRule { line: usize },
    #[error("remap registry is full (256 rules)")]
    RegistryFull,
}

/// Every line-level problem found while parsing one file, collected rather
/// than surfaced one at a time.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigErrors(pub Vec<ConfigIssue>);

impl std::fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, issue) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigErrors {}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("reading config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Parse(#[from] ConfigErrors),
}

/// Looks for `remapd/config.txt` under the platform config directory, then
/// falls back to `.remapd/config.txt` under the user's home directory.
pub fn discover() -> Option<PathBuf> {
    if let Some(dir) = dirs::config_dir() {
        let candidate = dir.join("remapd").join("config.txt");
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    if let Some(home) = dirs::home_dir() {
        let candidate = home.join(".remapd").join("config.txt");
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

pub fn load(path: &Path) -> Result<Keymap, LoadError> {
    let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&text).map_err(LoadError::from)
}

/// Re-reads `path` and replaces `*current` only if the new file parses
/// cleanly. A malformed or unreadable file is logged and left in place,
/// so a typo in a live edit can never swap a half-built keymap into a
/// running daemon.
pub fn reload(path: &Path, current: &mut Keymap) -> Result<(), LoadError> {
    match load(path) {
        Ok(fresh) => {
            *current = fresh;
            debug!(target = "config", path = %path.display(), "config_reloaded");
            Ok(())
        }
        Err(err) => {
            warn!(target = "config", path = %path.display(), %err, "config_reload_failed, keeping previous");
            Err(err)
        }
    }
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    s.strip_prefix(prefix)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectiveKind {
    RemapKey,
    Layer,
    WhenAlone,
    WithOther,
    WhenPress,
    WhenDoublepress,
    WhenTapLock,
    WhenDoubleTapLock,
    DefineLayer,
    AndLayer,
    AndNotLayer,
}

impl std::fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DirectiveKind {
    fn as_str(&self) -> &'static str {
        match self {
            DirectiveKind::RemapKey => "remap_key",
            DirectiveKind::Layer => "layer",
            DirectiveKind::WhenAlone => "when_alone",
            DirectiveKind::WithOther => "with_other",
            DirectiveKind::WhenPress => "when_press",
            DirectiveKind::WhenDoublepress => "when_doublepress",
            DirectiveKind::WhenTapLock => "when_tap_lock",
            DirectiveKind::WhenDoubleTapLock => "when_double_tap_lock",
            DirectiveKind::DefineLayer => "define_layer",
            DirectiveKind::AndLayer => "and_layer",
            DirectiveKind::AndNotLayer => "and_not_layer",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "remap_key" => DirectiveKind::RemapKey,
            "layer" => DirectiveKind::Layer,
            "when_alone" => DirectiveKind::WhenAlone,
            "with_other" => DirectiveKind::WithOther,
            "when_press" => DirectiveKind::WhenPress,
            "when_doublepress" => DirectiveKind::WhenDoublepress,
            "when_tap_lock" => DirectiveKind::WhenTapLock,
            "when_double_tap_lock" => DirectiveKind::WhenDoubleTapLock,
            "define_layer" => DirectiveKind::DefineLayer,
            "and_layer" => DirectiveKind::AndLayer,
            "and_not_layer" => DirectiveKind::AndNotLayer,
            _ => return None,
        })
    }
}

struct Parsing {
    keymap: Keymap,
    pending: Option<Remap>,
    pending_line: usize,
    pending_layer: Option<core_keymap::LayerId>,
    errors: Vec<ConfigIssue>,
}

impl Parsing {
    fn is_pending_valid(remap: &Remap) -> bool {
        !remap.to_when_alone.is_empty()
            || !remap.to_with_other.is_empty()
            || !remap.to_when_doublepress.is_empty()
            || !remap.to_when_tap_lock.is_empty()
            || !remap.to_when_double_tap_lock.is_empty()
            || remap.to_when_press_layer.is_some()
            || remap.to_when_doublepress_layer.is_some()
            || !remap.to_when_tap_lock_layers.is_empty()
            || !remap.to_when_double_tap_lock_layers.is_empty()
    }

    fn close_pending(&mut self) {
        let Some(remap) = self.pending.take() else {
            return;
        };
        if !Self::is_pending_valid(&remap) {
            self.errors.push(ConfigIssue::EmptyRule {
                line: self.pending_line,
                from: remap.from.name.to_string(),
            });
            return;
        }
        if let Err(_err) = self.keymap.registry.register(remap) {
            self.errors.push(ConfigIssue::RegistryFull);
        }
    }

    fn pending_or_error(&mut self, line: usize, directive: DirectiveKind) -> Option<&mut Remap> {
        if self.pending.is_none() {
            self.errors
                .push(ConfigIssue::DanglingDirectiveBeforeRule { line });
            return None;
        }
        let _ = directive;
        self.pending.as_mut()
    }

    fn resolve_key(&mut self, line: usize, name: &str) -> Option<core_events::KeyDef> {
        match keytable::find(name) {
            Some(def) => Some(*def),
            None => {
                self.errors.push(ConfigIssue::UnknownKey {
                    line,
                    name: name.to_string(),
                });
                None
            }
        }
    }

    fn require_layer_name<'a>(&mut self, line: usize, name: &'a str) -> Option<&'a str> {
        if name.starts_with(LAYER_PREFIX) {
            Some(name)
        } else {
            self.errors.push(ConfigIssue::NotALayerName {
                line,
                name: name.to_string(),
            });
            None
        }
    }

    fn handle_lock_directive(&mut self, line: usize, directive: DirectiveKind, name: &str) {
        let lock_action = ["toggle_", "set_", "reset_"].iter().find_map(|prefix| {
            strip_prefix_ci(name, prefix).map(|rest| {
                let op = match *prefix {
                    "toggle_" => LockOp::Toggle,
                    "set_" => LockOp::Set,
                    _ => LockOp::Reset,
                };
                (op, rest)
            })
        });

        if let Some((op, layer_name)) = lock_action {
            let Some(layer_name) = self.require_layer_name(line, layer_name) else {
                return;
            };
            let layer = self.keymap.layers.create(layer_name);
            let Some(remap) = self.pending_or_error(line, directive) else {
                return;
            };
            let action = LayerLockAction { layer, op };
            match directive {
                DirectiveKind::WhenTapLock => remap.to_when_tap_lock_layers.push(action),
                DirectiveKind::WhenDoubleTapLock => {
                    remap.to_when_double_tap_lock_layers.push(action)
                }
                _ => unreachable!(),
            }
            return;
        }

        let Some(key) = self.resolve_key(line, name) else {
            return;
        };
        let Some(remap) = self.pending_or_error(line, directive) else {
            return;
        };
        match directive {
            DirectiveKind::WhenTapLock => remap.to_when_tap_lock.push(key),
            DirectiveKind::WhenDoubleTapLock => remap.to_when_double_tap_lock.push(key),
            _ => unreachable!(),
        }
    }

    fn handle_remap_key(&mut self, line: usize, name: &str) {
        self.close_pending();
        let Some(key) = self.resolve_key(line, name) else {
            return;
        };
        self.pending = Some(Remap::new(key));
        self.pending_line = line;
    }

    fn handle_layer_gate(&mut self, line: usize, name: &str) {
        let Some(name) = self.require_layer_name(line, name) else {
            return;
        };
        let layer = self.keymap.layers.create(name);
        if let Some(remap) = self.pending_or_error(line, DirectiveKind::Layer) {
            remap.layer = Some(layer);
        }
    }

    fn handle_chord(&mut self, line: usize, directive: DirectiveKind, name: &str) {
        let Some(key) = self.resolve_key(line, name) else {
            return;
        };
        let Some(remap) = self.pending_or_error(line, directive) else {
            return;
        };
        match directive {
            DirectiveKind::WhenAlone => remap.to_when_alone.push(key),
            DirectiveKind::WithOther => remap.to_with_other.push(key),
            _ => unreachable!(),
        }
    }

    fn handle_when_press(&mut self, line: usize, name: &str) {
        let Some(name) = self.require_layer_name(line, name) else {
            return;
        };
        let layer = self.keymap.layers.create(name);
        if let Some(remap) = self.pending_or_error(line, DirectiveKind::WhenPress) {
            remap.to_when_press_layer = Some(layer);
        }
    }

    fn handle_when_doublepress(&mut self, line: usize, name: &str) {
        if name.starts_with(LAYER_PREFIX) {
            let layer = self.keymap.layers.create(name);
            if let Some(remap) = self.pending_or_error(line, DirectiveKind::WhenDoublepress) {
                remap.to_when_doublepress_layer = Some(layer);
            }
            return;
        }
        let Some(key) = self.resolve_key(line, name) else {
            return;
        };
        if let Some(remap) = self.pending_or_error(line, DirectiveKind::WhenDoublepress) {
            remap.to_when_doublepress.push(key);
        }
    }

    fn handle_define_layer(&mut self, line: usize, name: &str) {
        let Some(name) = self.require_layer_name(line, name) else {
            return;
        };
        self.pending_layer = Some(self.keymap.layers.create(name));
    }

    fn handle_layer_edge(&mut self, line: usize, and_not: bool, name: &str) {
        let Some(name) = self.require_layer_name(line, name) else {
            return;
        };
        let Some(slave) = self.pending_layer else {
            self.errors
                .push(ConfigIssue::IncompleteLayerDefinition { line });
            return;
        };
        let master = self.keymap.layers.create(name);
        let result = if and_not {
            self.keymap.layers.add_not_master(slave, master)
        } else {
            self.keymap.layers.add_master(slave, master)
        };
        if result.is_err() {
            self.errors.push(ConfigIssue::LayerCycle { line });
        }
    }

    fn handle_scalar(&mut self, line: usize, directive: &str, value: &str) -> bool {
        let settings = &mut self.keymap.settings;
        macro_rules! parse_u64 {
            ($field:ident) => {{
                match value.trim().parse::<u64>() {
                    Ok(v) => settings.$field = v,
                    Err(_) => self.errors.push(ConfigIssue::MalformedValue {
                        line,
                        directive: directive.to_string(),
                        value: value.to_string(),
                    }),
                }
            }};
        }
        match directive {
            "debug" => settings.debug = value.trim() != "0",
            "hold_delay" => parse_u64!(hold_delay),
            "tap_timeout" => parse_u64!(tap_timeout),
            "doublepress_timeout" => parse_u64!(doublepress_timeout),
            "rehook_timeout" => parse_u64!(rehook_timeout),
            "unlock_timeout" => parse_u64!(unlock_timeout),
            "scancode" => settings.scancode_mode = value.trim() != "0",
            "priority" => match value.trim().parse::<u8>() {
                Ok(v) => settings.priority = v,
                Err(_) => self.errors.push(ConfigIssue::MalformedValue {
                    line,
                    directive: directive.to_string(),
                    value: value.to_string(),
                }),
            },
            _ => return false,
        }
        true
    }

    fn handle_line(&mut self, line: usize, raw: &str) {
        let text = raw.trim();
        if text.is_empty() || text.starts_with('#') {
            return;
        }
        let Some(eq) = text.find('=') else {
            self.errors.push(ConfigIssue::UnknownDirective {
                line,
                directive: text.to_string(),
            });
            return;
        };
        let directive_str = text[..eq].trim();
        let value = text[eq + 1..].trim();

        if self.handle_scalar(line, directive_str, value) {
            return;
        }

        let Some(directive) = DirectiveKind::from_str(directive_str) else {
            self.errors.push(ConfigIssue::UnknownDirective {
                line,
                directive: directive_str.to_string(),
            });
            return;
        };

        if value.is_empty() {
            self.errors.push(ConfigIssue::MissingValue {
                line,
                directive: directive.to_string(),
            });
            return;
        }

        match directive {
            DirectiveKind::RemapKey => self.handle_remap_key(line, value),
            DirectiveKind::Layer => self.handle_layer_gate(line, value),
            DirectiveKind::WhenAlone | DirectiveKind::WithOther => {
                self.handle_chord(line, directive, value)
            }
            DirectiveKind::WhenPress => self.handle_when_press(line, value),
            DirectiveKind::WhenDoublepress => self.handle_when_doublepress(line, value),
            DirectiveKind::WhenTapLock | DirectiveKind::WhenDoubleTapLock => {
                self.handle_lock_directive(line, directive, value)
            }
            DirectiveKind::DefineLayer => self.handle_define_layer(line, value),
            DirectiveKind::AndLayer => self.handle_layer_edge(line, false, value),
            DirectiveKind::AndNotLayer => self.handle_layer_edge(line, true, value),
        }
    }
}

/// Parse a `config.txt` document's text into a populated `Keymap`.
pub fn parse(text: &str) -> Result<Keymap, ConfigErrors> {
    let mut state = Parsing {
        keymap: Keymap::new(EngineSettings::default()),
        pending: None,
        pending_line: 0,
        pending_layer: None,
        errors: Vec::new(),
    };

    for (idx, raw) in text.lines().enumerate() {
        state.handle_line(idx + 1, raw);
    }
    state.close_pending();

    if state.errors.is_empty() {
        debug!(
            target = "config",
            remaps = state.keymap.registry.len(),
            "config_parsed"
        );
        Ok(state.keymap)
    } else {
        warn!(
            target = "config",
            errors = state.errors.len(),
            "config_parse_failed"
        );
        Err(ConfigErrors(state.errors))
    }
}
