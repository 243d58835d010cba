//! Bytecode layer for the Opal Scheme runtime.

#![forbid(unsafe_code)]

pub mod bytecode;

pub use bytecode::{disassemble, verify, Instruction, IrepBuilder, Label, Opcode};
