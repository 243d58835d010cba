//! Bytecode encoding for the Opal machine.
//!
//! - [`Opcode`] - the fourteen-opcode instruction set and operand widths
//! - [`Instruction`] - decoded instruction view with encode/decode
//! - [`verify`] - structural verification of instruction streams
//! - [`IrepBuilder`] - descriptor construction with labels and patching
//! - [`disassemble`] - human-readable listings

mod builder;
mod dis;
mod instruction;
mod opcode;

pub use builder::{IrepBuilder, Label};
pub use dis::disassemble;
pub use instruction::{verify, Instruction};
pub use opcode::Opcode;
