//! Symbol-keyed identity dictionary.
//!
//! Keys are interned symbols compared by handle identity, never by content.
//! Interning guarantees that equal-content symbols share one handle, so
//! identity keying is observationally content keying for symbols. The
//! backing table is open-addressing; iteration order is unspecified and may
//! change across mutation.

use crate::error::OpalResult;
use crate::heap::Heap;
use crate::object::ObjBody;
use crate::value::{ObjRef, Value};
use rustc_hash::FxHashMap;

/// An identity hash table from symbol to value.
#[derive(Default)]
pub struct Dict {
    pub(crate) map: FxHashMap<ObjRef, Value>,
}

impl Dict {
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterate entries in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjRef, Value)> + '_ {
        self.map.iter().map(|(&k, &v)| (k, v))
    }
}

impl Heap {
    /// Allocate an empty dictionary.
    pub fn make_dict(&mut self) -> ObjRef {
        self.alloc(ObjBody::Dict(Dict::default()))
    }

    /// Look up `key`, `None` when absent.
    pub fn dict_ref(&self, dict: Value, key: Value) -> OpalResult<Option<Value>> {
        let sym = self.symbol_handle(key)?;
        Ok(self.dict(dict)?.map.get(&sym).copied())
    }

    /// Bind `key` to `value`, replacing any previous binding.
    pub fn dict_set(&mut self, dict: Value, key: Value, value: Value) -> OpalResult<()> {
        let sym = self.symbol_handle(key)?;
        self.dict_mut(dict)?.map.insert(sym, value);
        Ok(())
    }

    /// Remove `key`; returns whether a binding existed.
    pub fn dict_del(&mut self, dict: Value, key: Value) -> OpalResult<bool> {
        let sym = self.symbol_handle(key)?;
        Ok(self.dict_mut(dict)?.map.remove(&sym).is_some())
    }

    pub fn dict_len(&self, dict: Value) -> OpalResult<usize> {
        Ok(self.dict(dict)?.len())
    }

    /// Snapshot of the current entries, order unspecified.
    pub fn dict_entries(&self, dict: Value) -> OpalResult<Vec<(ObjRef, Value)>> {
        Ok(self.dict(dict)?.iter().collect())
    }

    /// Validate that `key` is a symbol and return its handle.
    fn symbol_handle(&self, key: Value) -> OpalResult<ObjRef> {
        self.symbol(key)?;
        match key {
            Value::Obj(r) => Ok(r),
            _ => unreachable!("symbol accessor admitted a non-object"),
        }
    }
}
