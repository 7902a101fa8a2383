//! Platform boundary and thread orchestration for the input daemon.
//!
//! `dispatcher` is the pure decision layer between a decoded hardware
//! event and `core_keymap`/`core_pointer`; `platform` is the OS
//! collaborator seam; `engine` wires the two together with the ring and
//! the sender/timer threads described for the concurrency model.

pub mod dispatcher;
pub mod engine;
pub mod platform;

pub use dispatcher::{Dispatcher, DispatchOutcome, MouseButton, MouseMessage};
pub use engine::{Engine, EventRing, RING_CAPACITY};
pub use platform::{NullPlatform, Platform, PlatformError, PlatformEvent};
