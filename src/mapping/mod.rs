//! Button registry and shortcut bindings.
//!
//! [`registry`] holds the buttons the host can bind: the built-in set plus buttons
//! learned in detection mode. [`shortcut`] holds the per-button keyboard shortcuts and
//! the lookup used by the keyboard matcher.

pub mod registry;
pub mod shortcut;
