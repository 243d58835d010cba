//! Procedure descriptor builder.
//!
//! Provides a high-level emission API over the raw byte encoding: constant
//! pool management with immediate deduplication, nested descriptor
//! registration, and label-based branch resolution with forward-reference
//! patching. `finish` verifies the stream and registers the descriptor.

use super::instruction::{verify, Instruction};
use opal_runtime::{CodeStore, Heap, ObjRef, OpalError, OpalResult, Value};
use std::collections::HashMap;

/// A branch target inside the code under construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

/// A COND emitted before its label was bound; the offset slot awaits
/// patching.
#[derive(Debug)]
struct ForwardRef {
    /// Offset of the COND opcode byte (for error reporting).
    at: usize,
    /// Offset of the 2-byte little-endian offset slot.
    patch_at: usize,
    label: Label,
}

/// Key for deduplicating immediate constants. Heap constants are kept by
/// identity and never merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ConstKey {
    Nil,
    Undef,
    Bool(bool),
    Int(i64),
    /// Bit pattern, for exact merging.
    Float(u64),
    Char(char),
}

impl ConstKey {
    fn from_value(v: Value) -> Option<Self> {
        match v {
            Value::Nil => Some(ConstKey::Nil),
            Value::Undef => Some(ConstKey::Undef),
            Value::Bool(b) => Some(ConstKey::Bool(b)),
            Value::Int(i) => Some(ConstKey::Int(i)),
            Value::Float(x) => Some(ConstKey::Float(x.to_bits())),
            Value::Char(c) => Some(ConstKey::Char(c)),
            Value::Obj(_) => None,
        }
    }
}

/// Builder for one compiled procedure descriptor.
pub struct IrepBuilder {
    argc: u8,
    variadic: bool,
    frame_size: u8,
    code: Vec<u8>,
    consts: Vec<Value>,
    const_keys: HashMap<ConstKey, u8>,
    ireps: Vec<ObjRef>,
    labels: HashMap<Label, usize>,
    forward: Vec<ForwardRef>,
    next_label: u32,
}

impl IrepBuilder {
    pub fn new(argc: u8, variadic: bool, frame_size: u8) -> Self {
        Self {
            argc,
            variadic,
            frame_size,
            code: Vec::new(),
            consts: Vec::new(),
            const_keys: HashMap::new(),
            ireps: Vec::new(),
            labels: HashMap::new(),
            forward: Vec::new(),
            next_label: 0,
        }
    }

    /// Current code offset.
    #[inline]
    pub fn offset(&self) -> usize {
        self.code.len()
    }

    /// Add a constant, merging repeated immediates.
    pub fn add_const(&mut self, v: Value) -> OpalResult<u8> {
        let key = ConstKey::from_value(v);
        if let Some(key) = key {
            if let Some(&idx) = self.const_keys.get(&key) {
                return Ok(idx);
            }
        }
        if self.consts.len() >= u8::MAX as usize {
            return Err(OpalError::CapacityExceeded {
                what: "constant pool",
                limit: u8::MAX as usize,
            });
        }
        let idx = self.consts.len() as u8;
        self.consts.push(v);
        if let Some(key) = key {
            self.const_keys.insert(key, idx);
        }
        Ok(idx)
    }

    /// Register a nested descriptor for PROC.
    pub fn add_irep(&mut self, irep: ObjRef) -> OpalResult<u8> {
        if self.ireps.len() >= u8::MAX as usize {
            return Err(OpalError::CapacityExceeded {
                what: "nested procedure descriptors",
                limit: u8::MAX as usize,
            });
        }
        let idx = self.ireps.len() as u8;
        self.ireps.push(irep);
        Ok(idx)
    }

    /// Create an unbound label.
    pub fn new_label(&mut self) -> Label {
        let l = Label(self.next_label);
        self.next_label += 1;
        l
    }

    /// Bind `label` to the current offset.
    pub fn bind_label(&mut self, label: Label) {
        self.labels.insert(label, self.code.len());
    }

    fn emit(&mut self, inst: Instruction) {
        inst.encode_into(&mut self.code);
    }

    pub fn emit_halt(&mut self) {
        self.emit(Instruction::Halt);
    }

    pub fn emit_call(&mut self, argc: u8) {
        self.emit(Instruction::Call { argc });
    }

    pub fn emit_proc(&mut self, dest: u8, irep: u8) {
        self.emit(Instruction::Proc { dest, irep });
    }

    pub fn emit_load(&mut self, dest: u8, index: u8) {
        self.emit(Instruction::Load { dest, index });
    }

    pub fn emit_lref(&mut self, dest: u8, depth: u8, index: u8) {
        self.emit(Instruction::Lref { dest, depth, index });
    }

    pub fn emit_lset(&mut self, src: u8, depth: u8, index: u8) {
        self.emit(Instruction::Lset { src, depth, index });
    }

    pub fn emit_gref(&mut self, dest: u8, slot: u8) {
        self.emit(Instruction::Gref { dest, slot });
    }

    pub fn emit_gset(&mut self, src: u8, slot: u8) {
        self.emit(Instruction::Gset { src, slot });
    }

    pub fn emit_loadt(&mut self, dest: u8) {
        self.emit(Instruction::Loadt { dest });
    }

    pub fn emit_loadf(&mut self, dest: u8) {
        self.emit(Instruction::Loadf { dest });
    }

    pub fn emit_loadn(&mut self, dest: u8) {
        self.emit(Instruction::Loadn { dest });
    }

    pub fn emit_loadu(&mut self, dest: u8) {
        self.emit(Instruction::Loadu { dest });
    }

    pub fn emit_loadi(&mut self, dest: u8, imm: i8) {
        self.emit(Instruction::Loadi { dest, imm });
    }

    /// Emit a COND branching to `label` when register `cond` holds `#f`.
    ///
    /// Backward branches are encoded immediately; forward branches are
    /// patched when the label is bound.
    pub fn emit_cond(&mut self, cond: u8, label: Label) -> OpalResult<()> {
        let at = self.code.len();
        match self.labels.get(&label) {
            Some(&target) => {
                let offset = branch_offset(at, target)?;
                self.emit(Instruction::Cond { cond, offset });
            }
            None => {
                self.emit(Instruction::Cond { cond, offset: 0 });
                self.forward.push(ForwardRef {
                    at,
                    patch_at: at + 2,
                    label,
                });
            }
        }
        Ok(())
    }

    /// Patch forward branches, verify the stream, and register the finished
    /// descriptor with the heap.
    pub fn finish(mut self, heap: &mut Heap) -> OpalResult<ObjRef> {
        for fref in &self.forward {
            let target = *self
                .labels
                .get(&fref.label)
                .ok_or(OpalError::InvalidOperand {
                    offset: fref.at,
                    what: "branch target",
                })?;
            let offset = branch_offset(fref.at, target)?;
            self.code[fref.patch_at..fref.patch_at + 2].copy_from_slice(&offset.to_le_bytes());
        }
        verify(
            &self.code,
            self.consts.len(),
            self.ireps.len(),
            self.frame_size,
        )?;
        heap.make_irep(
            self.argc,
            self.variadic,
            self.frame_size,
            self.ireps,
            self.consts,
            CodeStore::from(self.code),
        )
    }
}

/// Offset from the end of a COND at `at` to `target`, range-checked.
fn branch_offset(at: usize, target: usize) -> OpalResult<i16> {
    // a COND instruction occupies 4 bytes
    let from = at as i64 + 4;
    let rel = target as i64 - from;
    i16::try_from(rel).map_err(|_| OpalError::InvalidOperand {
        offset: at,
        what: "branch target",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Instruction;

    #[test]
    fn immediates_are_deduplicated() {
        let mut b = IrepBuilder::new(0, false, 1);
        let k1 = b.add_const(Value::Int(42)).unwrap();
        let k2 = b.add_const(Value::Int(42)).unwrap();
        let k3 = b.add_const(Value::Float(1.5)).unwrap();
        assert_eq!(k1, k2);
        assert_ne!(k1, k3);
    }

    #[test]
    fn heap_constants_keep_identity() {
        let mut heap = Heap::new();
        let s1 = heap.make_string(b"a");
        let s2 = heap.make_string(b"a");
        let mut b = IrepBuilder::new(0, false, 1);
        let k1 = b.add_const(Value::Obj(s1)).unwrap();
        let k2 = b.add_const(Value::Obj(s2)).unwrap();
        assert_ne!(k1, k2);
    }

    #[test]
    fn finish_produces_a_verified_descriptor() {
        let mut heap = Heap::new();
        let mut b = IrepBuilder::new(0, false, 2);
        let k = b.add_const(Value::Int(7)).unwrap();
        b.emit_load(0, k);
        b.emit_loadt(1);
        b.emit_halt();
        let irep = b.finish(&mut heap).unwrap();
        let irep = heap.irep(irep).unwrap();
        assert_eq!(irep.frame_size(), 2);
        assert_eq!(irep.consts(), &[Value::Int(7)]);
        let (inst, _) = Instruction::decode(irep.code().bytes(), 0).unwrap();
        assert_eq!(inst, Instruction::Load { dest: 0, index: 0 });
    }

    #[test]
    fn forward_branches_are_patched() {
        let mut heap = Heap::new();
        let mut b = IrepBuilder::new(0, false, 1);
        let skip = b.new_label();
        b.emit_loadf(0);
        b.emit_cond(0, skip).unwrap();
        b.emit_loadi(0, 1);
        b.bind_label(skip);
        b.emit_halt();
        let irep = b.finish(&mut heap).unwrap();
        let code = heap.irep(irep).unwrap().code().bytes().to_vec();
        // COND sits after the 2-byte LOADF; its target skips the 3-byte LOADI
        let (inst, _) = Instruction::decode(&code, 2).unwrap();
        assert_eq!(inst, Instruction::Cond { cond: 0, offset: 3 });
    }

    #[test]
    fn backward_branches_encode_immediately() {
        let mut heap = Heap::new();
        let mut b = IrepBuilder::new(0, false, 1);
        let top = b.new_label();
        b.bind_label(top);
        b.emit_loadt(0);
        b.emit_cond(0, top).unwrap();
        b.emit_halt();
        let irep = b.finish(&mut heap).unwrap();
        let code = heap.irep(irep).unwrap().code().bytes().to_vec();
        let (inst, _) = Instruction::decode(&code, 2).unwrap();
        assert_eq!(inst, Instruction::Cond { cond: 0, offset: -6 });
    }

    #[test]
    fn unbound_label_fails_finish() {
        let mut heap = Heap::new();
        let mut b = IrepBuilder::new(0, false, 1);
        let never = b.new_label();
        b.emit_cond(0, never).unwrap();
        b.emit_halt();
        assert!(matches!(
            b.finish(&mut heap),
            Err(OpalError::InvalidOperand {
                what: "branch target",
                ..
            })
        ));
    }

    #[test]
    fn finish_rejects_register_overflow() {
        let mut heap = Heap::new();
        let mut b = IrepBuilder::new(0, false, 1);
        b.emit_loadi(3, 0);
        b.emit_halt();
        assert!(matches!(
            b.finish(&mut heap),
            Err(OpalError::InvalidOperand {
                what: "register",
                ..
            })
        ));
    }
}
