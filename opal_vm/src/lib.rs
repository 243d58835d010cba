//! Bytecode machine for the Opal Scheme runtime.

#![forbid(unsafe_code)]

pub mod builtins;
pub mod globals;
pub mod machine;

pub use builtins::install_builtins;
pub use globals::{Globals, MAX_GLOBAL_SLOTS};
pub use machine::Machine;
