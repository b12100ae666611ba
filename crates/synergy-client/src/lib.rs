//! synergy-client library crate.
//!
//! The binary in `main.rs` and the integration tests in `tests/` share this
//! module tree.  The client is the screen being *controlled*: it connects to
//! the synergy server, announces its geometry, and synthesizes the keyboard,
//! mouse, clipboard, and screensaver events the server forwards while the
//! cursor is on this screen.

pub mod cli;
pub mod client;
pub mod config;
pub mod net;
pub mod screen;
pub mod supervisor;

pub use client::{Client, ClientConfig, ClientState};
pub use screen::{Screen, ScreenError, ScreenShape};
pub use supervisor::{ClientStatus, Supervisor};
