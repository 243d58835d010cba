//! Object model and heap for the Opal Scheme runtime.
//!
//! This crate provides:
//! - The universal `Value` type and `ObjRef` handles
//! - Tagged heap objects behind a common header (tag, mark, live chain)
//! - The rope string engine with O(1) structural concatenation
//! - Identity-keyed dictionary and attribute tables
//! - Procedure descriptors, register frames, and procedures
//! - The mark-sweep collection pass over the slot arena

#![forbid(unsafe_code)]

pub mod error;
pub mod gc;
pub mod heap;
pub mod object;
pub mod value;

pub use error::{OpalError, OpalResult};
pub use heap::{Heap, HeapStats};
pub use object::{
    AttrTable, Blob, CodeStore, Data, DataType, Dict, Frame, FrameBuilder, Irep, IrepFlags,
    NativeFn, ObjBody, ObjectHeader, Pair, Proc, ProcKind, Record, Rope, Str, Symbol, TypeTag,
    Vector,
};
pub use value::{ObjRef, Value};
