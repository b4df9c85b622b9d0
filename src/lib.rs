//! padpilot - drive a macOS desktop from a game controller.
//!
//! The left stick moves the pointer, the right stick scrolls, and buttons fire learnable
//! keyboard shortcuts. A raw HID reader recovers the capture button that the generic
//! controller abstraction does not expose.
//!
//! # Architecture
//!
//! ```text
//! gilrs collector ──┐                      ┌──► Injector (keys, pointer, scroll)
//! HID capture ──────┼──► Engine actor ─────┤
//! keyboard tap ─────┘    (serialized)      └──► EngineStatus / ButtonEdge broadcast
//!                           │
//!                           └──► persistence worker ──► BlobStore
//! ```

pub mod config;
pub mod controller;
pub mod engine;
pub mod inject;
pub mod keytap;
pub mod mapping;
pub mod persistence;

#[cfg(target_os = "macos")]
pub(crate) mod sys;

pub use config::{ControllerEnabled, EngineSettings};
pub use engine::{EngineError, EngineHandle, EngineStatus};
