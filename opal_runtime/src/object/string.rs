//! String and symbol wrappers over ropes.
//!
//! A string owns exactly one rope snapshot at a time; "mutation" swaps the
//! held rope for a new node and never touches existing rope structure, so
//! every previously observed snapshot stays valid and shareable. Symbols
//! wrap one interned string and compare by identity.

use crate::error::{check_range, OpalResult};
use crate::heap::Heap;
use crate::object::ObjBody;
use crate::value::{ObjRef, Value};
use std::cmp::Ordering;

/// Mutable string wrapper: a single rope snapshot.
pub struct Str {
    pub(crate) rope: ObjRef,
}

impl Str {
    #[inline]
    pub fn new(rope: ObjRef) -> Self {
        Self { rope }
    }

    /// The current rope snapshot.
    #[inline]
    pub fn rope(&self) -> ObjRef {
        self.rope
    }
}

/// An interned symbol. Identity, not content, is the comparison key.
pub struct Symbol {
    pub(crate) string: ObjRef,
}

impl Symbol {
    #[inline]
    pub fn new(string: ObjRef) -> Self {
        Self { string }
    }

    /// The interned string carrying this symbol's name.
    #[inline]
    pub fn string(&self) -> ObjRef {
        self.string
    }
}

impl Heap {
    /// Allocate a string over a copy of `bytes`.
    pub fn make_string(&mut self, bytes: &[u8]) -> ObjRef {
        let rope = self.make_leaf(bytes.to_vec());
        self.alloc(ObjBody::Str(Str::new(rope)))
    }

    /// Allocate a string over statically owned bytes.
    pub fn make_string_static(&mut self, bytes: &'static [u8]) -> ObjRef {
        let rope = self.make_leaf_static(bytes);
        self.alloc(ObjBody::Str(Str::new(rope)))
    }

    /// Content length in bytes.
    pub fn str_len<V: Into<Value>>(&self, s: V) -> OpalResult<usize> {
        let rope = self.string(s)?.rope;
        self.rope_len(rope)
    }

    /// Checked byte access.
    pub fn str_byte<V: Into<Value>>(&self, s: V, index: i64) -> OpalResult<u8> {
        let rope = self.string(s)?.rope;
        self.rope_byte(rope, index)
    }

    /// Append `t`'s content to `s` by swapping in a concatenation node.
    /// `t` is unchanged; no content is copied.
    pub fn str_append(&mut self, s: Value, t: Value) -> OpalResult<()> {
        let sr = self.string(s)?.rope;
        let tr = self.string(t)?.rope;
        let node = self.rope_concat(sr, tr)?;
        self.string_mut(s)?.rope = node;
        Ok(())
    }

    /// Fresh string sharing both operands' ropes, in O(1).
    pub fn str_concat(&mut self, a: Value, b: Value) -> OpalResult<ObjRef> {
        let ar = self.string(a)?.rope;
        let br = self.string(b)?.rope;
        let node = self.rope_concat(ar, br)?;
        Ok(self.alloc(ObjBody::Str(Str::new(node))))
    }

    /// Checked substring `[start, end)`, materialized into a new leaf.
    pub fn str_sub(&mut self, s: Value, start: i64, end: i64) -> OpalResult<ObjRef> {
        let rope = self.string(s)?.rope;
        let len = self.rope_len(rope)?;
        let (start, end) = check_range(len, start, end)?;
        let content = self.rope_flatten(rope)?;
        Ok(self.make_string(&content[start..end]))
    }

    /// Full content as a fresh byte buffer.
    pub fn str_to_vec<V: Into<Value>>(&self, s: V) -> OpalResult<Vec<u8>> {
        let rope = self.string(s)?.rope;
        self.rope_flatten(rope)
    }

    /// Content decoded as UTF-8, lossily, for display.
    pub fn str_display<V: Into<Value>>(&self, s: V) -> OpalResult<String> {
        Ok(String::from_utf8_lossy(&self.str_to_vec(s)?).into_owned())
    }

    /// Canonical content hash. Strings with equal content hash equally
    /// regardless of rope shape.
    pub fn str_hash<V: Into<Value>>(&self, s: V) -> OpalResult<u64> {
        let rope = self.string(s)?.rope;
        let mut h: u64 = 0;
        for chunk in self.rope_chunks(rope) {
            for &b in chunk {
                h = h.wrapping_mul(31).wrapping_add(b as u64);
            }
        }
        Ok(h)
    }

    /// Three-way content comparison across arbitrary rope shapes. Walks both
    /// trees incrementally; neither side is flattened.
    pub fn str_cmp(&self, a: Value, b: Value) -> OpalResult<Ordering> {
        let ra = self.string(a)?.rope;
        let rb = self.string(b)?.rope;
        let mut ia = self.rope_chunks(ra);
        let mut ib = self.rope_chunks(rb);
        let mut xa: &[u8] = &[];
        let mut xb: &[u8] = &[];
        loop {
            while xa.is_empty() {
                match ia.next() {
                    Some(c) => xa = c,
                    None => break,
                }
            }
            while xb.is_empty() {
                match ib.next() {
                    Some(c) => xb = c,
                    None => break,
                }
            }
            match (xa.is_empty(), xb.is_empty()) {
                (true, true) => return Ok(Ordering::Equal),
                (true, false) => return Ok(Ordering::Less),
                (false, true) => return Ok(Ordering::Greater),
                (false, false) => {}
            }
            let n = xa.len().min(xb.len());
            match xa[..n].cmp(&xb[..n]) {
                Ordering::Equal => {
                    xa = &xa[n..];
                    xb = &xb[n..];
                }
                ord => return Ok(ord),
            }
        }
    }

    /// Content equality, shape-independent.
    pub fn str_eq(&self, a: Value, b: Value) -> OpalResult<bool> {
        Ok(self.str_cmp(a, b)? == Ordering::Equal)
    }

    /// The string behind a symbol.
    pub fn symbol_string<V: Into<Value>>(&self, sym: V) -> OpalResult<ObjRef> {
        Ok(self.symbol(sym)?.string)
    }

    /// A symbol's name as a fresh byte buffer.
    pub fn symbol_name<V: Into<Value>>(&self, sym: V) -> OpalResult<Vec<u8>> {
        let string = self.symbol(sym)?.string;
        self.str_to_vec(string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_bytes() {
        let mut heap = Heap::new();
        let s = heap.make_string(b"hello, world");
        assert_eq!(heap.str_to_vec(s).unwrap(), b"hello, world");
        assert_eq!(heap.str_len(s).unwrap(), 12);
    }

    #[test]
    fn append_replaces_snapshot_without_touching_old_rope() {
        let mut heap = Heap::new();
        let s = heap.make_string(b"foo");
        let t = heap.make_string(b"bar");
        let old_rope = heap.string(s).unwrap().rope();
        heap.str_append(Value::Obj(s), Value::Obj(t)).unwrap();
        assert_eq!(heap.str_to_vec(s).unwrap(), b"foobar");
        assert_eq!(heap.rope_flatten(old_rope).unwrap(), b"foo");
        assert_eq!(heap.str_to_vec(t).unwrap(), b"bar");
    }

    #[test]
    fn cmp_and_hash_ignore_rope_shape() {
        let mut heap = Heap::new();
        // concat(concat("a", "b"), "c")
        let a = heap.make_string(b"a");
        let b = heap.make_string(b"b");
        let c = heap.make_string(b"c");
        let ab = heap.str_concat(Value::Obj(a), Value::Obj(b)).unwrap();
        let left = heap.str_concat(Value::Obj(ab), Value::Obj(c)).unwrap();
        // concat("a", concat("b", "c"))
        let bc = heap.str_concat(Value::Obj(b), Value::Obj(c)).unwrap();
        let right = heap.str_concat(Value::Obj(a), Value::Obj(bc)).unwrap();
        let flat = heap.make_string(b"abc");

        assert_eq!(
            heap.str_cmp(Value::Obj(left), Value::Obj(right)).unwrap(),
            Ordering::Equal
        );
        assert_eq!(
            heap.str_cmp(Value::Obj(left), Value::Obj(flat)).unwrap(),
            Ordering::Equal
        );
        let h1 = heap.str_hash(left).unwrap();
        let h2 = heap.str_hash(right).unwrap();
        let h3 = heap.str_hash(flat).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h2, h3);
    }

    #[test]
    fn cmp_is_a_total_order() {
        let mut heap = Heap::new();
        let ab = heap.make_string(b"ab");
        let abc = heap.make_string(b"abc");
        let b = heap.make_string(b"b");
        assert_eq!(
            heap.str_cmp(Value::Obj(ab), Value::Obj(abc)).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            heap.str_cmp(Value::Obj(abc), Value::Obj(ab)).unwrap(),
            Ordering::Greater
        );
        assert_eq!(
            heap.str_cmp(Value::Obj(b), Value::Obj(abc)).unwrap(),
            Ordering::Greater
        );
    }

    #[test]
    fn substring_checks_range() {
        let mut heap = Heap::new();
        let s = heap.make_string(b"abcdef");
        let sub = heap.str_sub(Value::Obj(s), 1, 4).unwrap();
        assert_eq!(heap.str_to_vec(sub).unwrap(), b"bcd");
        assert!(heap.str_sub(Value::Obj(s), 4, 1).is_err());
        assert!(heap.str_sub(Value::Obj(s), 0, 7).is_err());
        assert!(heap.str_sub(Value::Obj(s), -1, 3).is_err());
    }

    #[test]
    fn symbol_name_round_trips() {
        let mut heap = Heap::new();
        let sym = heap.intern_str("call/cc");
        assert_eq!(heap.symbol_name(sym).unwrap(), b"call/cc");
    }
}
