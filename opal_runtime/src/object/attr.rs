//! Attribute tables: identity-keyed metadata for arbitrary heap objects.
//!
//! Every attribute table is recorded in the heap's registry at construction
//! so the collector can enumerate all of them; registration does not keep a
//! table alive. Entries are ephemeral: the collector purges entries whose
//! key has died and keeps a value alive only while its key is alive.

use crate::error::{OpalError, OpalResult};
use crate::heap::Heap;
use crate::object::ObjBody;
use crate::value::{ObjRef, Value};
use rustc_hash::FxHashMap;

/// An identity hash table from heap object to value.
#[derive(Default)]
pub struct AttrTable {
    pub(crate) map: FxHashMap<ObjRef, Value>,
}

impl AttrTable {
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
    /// Allocate an empty attribute table and register it with the collector.
    pub fn make_attr(&mut self) -> ObjRef {
        let r = self.alloc(ObjBody::Attr(AttrTable::default()));
        self.attr_registry.push(r);
        r
    }

    /// Look up the value attached to `key`, `None` when absent.
    pub fn attr_ref(&self, table: Value, key: Value) -> OpalResult<Option<Value>> {
        let key = object_key(key)?;
        Ok(self.attr(table)?.map.get(&key).copied())
    }

    /// Attach `value` to `key`, replacing any previous attachment.
    pub fn attr_set(&mut self, table: Value, key: Value, value: Value) -> OpalResult<()> {
        let key = object_key(key)?;
        self.attr_mut(table)?.map.insert(key, value);
        Ok(())
    }

    /// Detach `key`; returns whether an attachment existed.
    pub fn attr_del(&mut self, table: Value, key: Value) -> OpalResult<bool> {
        let key = object_key(key)?;
        Ok(self.attr_mut(table)?.map.remove(&key).is_some())
    }

    pub fn attr_len(&self, table: Value) -> OpalResult<usize> {
        Ok(self.attr(table)?.len())
    }

    /// Number of registered attribute tables (collector interface).
    pub fn attr_table_count(&self) -> usize {
        self.attr_registry.len()
    }
}

/// Attribute keys are identities; immediates have none.
fn object_key(key: Value) -> OpalResult<ObjRef> {
    match key {
        Value::Obj(r) => Ok(r),
        other => Err(OpalError::Type {
            expected: "heap object",
            value: other,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_and_look_up_by_identity() {
        let mut heap = Heap::new();
        let t = heap.make_attr();
        let k1 = heap.cons(Value::Nil, Value::Nil);
        let k2 = heap.cons(Value::Nil, Value::Nil);
        heap.attr_set(Value::Obj(t), Value::Obj(k1), Value::Int(1))
            .unwrap();
        assert_eq!(
            heap.attr_ref(Value::Obj(t), Value::Obj(k1)).unwrap(),
            Some(Value::Int(1))
        );
        // structurally equal but distinct objects are distinct keys
        assert_eq!(heap.attr_ref(Value::Obj(t), Value::Obj(k2)).unwrap(), None);
    }

    #[test]
    fn immediates_cannot_be_keys() {
        let mut heap = Heap::new();
        let t = heap.make_attr();
        assert!(heap
            .attr_set(Value::Obj(t), Value::Int(3), Value::Nil)
            .is_err());
    }

    #[test]
    fn tables_are_registered() {
        let mut heap = Heap::new();
        assert_eq!(heap.attr_table_count(), 0);
        let _a = heap.make_attr();
        let _b = heap.make_attr();
        assert_eq!(heap.attr_table_count(), 2);
    }

    #[test]
    fn delete_detaches() {
        let mut heap = Heap::new();
        let t = heap.make_attr();
        let k = heap.cons(Value::Nil, Value::Nil);
        heap.attr_set(Value::Obj(t), Value::Obj(k), Value::Int(5))
            .unwrap();
        assert!(heap.attr_del(Value::Obj(t), Value::Obj(k)).unwrap());
        assert_eq!(heap.attr_ref(Value::Obj(t), Value::Obj(k)).unwrap(), None);
    }
}
