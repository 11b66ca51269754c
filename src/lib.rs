//! Headphone Tester - interactive headphone and microphone checks
//!
//! Re-exports the engine from `headphone-tester-core` and adds the
//! command grammar of the interactive shell.

pub use headphone_tester_core::*;

pub mod command;
