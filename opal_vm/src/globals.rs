//! Global slot table.
//!
//! GREF/GSET address globals by slot index resolved at compile time. The
//! table maps symbols to stable slots and stores the slot values; lookups in
//! the hot path are a plain index.

use opal_runtime::{ObjRef, OpalError, OpalResult, Value};
use rustc_hash::FxHashMap;

/// Slot indices are one operand byte wide.
pub const MAX_GLOBAL_SLOTS: usize = 256;

/// Symbol-indexed global bindings with slot-addressed storage.
#[derive(Default)]
pub struct Globals {
    slots: Vec<Value>,
    index: FxHashMap<ObjRef, u8>,
}

impl Globals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot for `sym`, allocating one on first resolution. New slots hold
    /// the unspecified value.
    pub fn resolve(&mut self, sym: ObjRef) -> OpalResult<u8> {
        if let Some(&slot) = self.index.get(&sym) {
            return Ok(slot);
        }
        if self.slots.len() >= MAX_GLOBAL_SLOTS {
            return Err(OpalError::CapacityExceeded {
                what: "global slots",
                limit: MAX_GLOBAL_SLOTS,
            });
        }
        let slot = self.slots.len() as u8;
        self.slots.push(Value::Undef);
        self.index.insert(sym, slot);
        Ok(slot)
    }

    /// Slot for `sym` if already resolved.
    pub fn slot_of(&self, sym: ObjRef) -> Option<u8> {
        self.index.get(&sym).copied()
    }

    /// Checked slot read.
    #[inline]
    pub fn get(&self, slot: u8) -> OpalResult<Value> {
        self.slots
            .get(slot as usize)
            .copied()
            .ok_or(OpalError::IndexOutOfRange {
                index: slot as i64,
                len: self.slots.len(),
            })
    }

    /// Checked slot write.
    #[inline]
    pub fn set(&mut self, slot: u8, value: Value) -> OpalResult<()> {
        let len = self.slots.len();
        match self.slots.get_mut(slot as usize) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(OpalError::IndexOutOfRange {
                index: slot as i64,
                len,
            }),
        }
    }

    /// Resolve `sym` and bind it in one step.
    pub fn define(&mut self, sym: ObjRef, value: Value) -> OpalResult<u8> {
        let slot = self.resolve(sym)?;
        self.set(slot, value)?;
        Ok(slot)
    }

    /// Number of resolved slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Everything the table keeps alive: slot values and the symbols that
    /// name them.
    pub fn roots(&self) -> impl Iterator<Item = Value> + '_ {
        self.slots
            .iter()
            .copied()
            .chain(self.index.keys().map(|&sym| Value::Obj(sym)))
    }
}
