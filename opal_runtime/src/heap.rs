//! The object heap: slot arena, live chain, typed accessors, and the symbol
//! intern table.
//!
//! Objects are allocated into slots and threaded onto a singly-linked live
//! chain through their headers; the collector walks and relinks that chain at
//! sweep time. Allocation never runs a collection; collections happen only
//! when a caller reaches a safepoint and invokes [`Heap::collect`].

use crate::error::{OpalError, OpalResult};
use crate::object::{
    AttrTable, Blob, Data, Dict, Frame, Irep, ObjBody, ObjectHeader, Pair, Proc, Record, Rope,
    Str, Symbol, TypeTag, Vector,
};
use crate::value::{ObjRef, Value};
use rustc_hash::FxHashMap;

/// Collection pressure before the first sweep.
pub(crate) const INITIAL_COLLECT_THRESHOLD: usize = 4096;

/// Allocation and collection counters.
#[derive(Debug, Default, Clone)]
pub struct HeapStats {
    /// Objects allocated since heap creation.
    pub objects_allocated: u64,
    /// Objects reclaimed by sweeps.
    pub objects_freed: u64,
    /// Completed collection passes.
    pub collections: u64,
}

pub(crate) enum Slot {
    Occupied { header: ObjectHeader, body: ObjBody },
    Free { next: Option<u32> },
}

/// The object heap.
pub struct Heap {
    pub(crate) slots: Vec<Slot>,
    pub(crate) free_head: Option<u32>,
    pub(crate) live_head: Option<ObjRef>,
    /// Registry of every live attribute table, enumerable by the collector.
    /// Registration does not keep a table alive.
    pub(crate) attr_registry: Vec<ObjRef>,
    /// Weak intern table: content -> symbol. Entries for symbols that die are
    /// purged at sweep.
    pub(crate) interns: FxHashMap<Box<[u8]>, ObjRef>,
    pub(crate) live: usize,
    pub(crate) allocs_since_collect: usize,
    pub(crate) collect_threshold: usize,
    pub(crate) stats: HeapStats,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            slots: Vec::with_capacity(1024),
            free_head: None,
            live_head: None,
            attr_registry: Vec::new(),
            interns: FxHashMap::default(),
            live: 0,
            allocs_since_collect: 0,
            collect_threshold: INITIAL_COLLECT_THRESHOLD,
            stats: HeapStats::default(),
        }
    }

    /// Allocate a fully constructed body, linking it onto the live chain.
    ///
    /// The new object is tagged with its body's tag, mark clear. This never
    /// triggers a collection; callers poll [`Heap::should_collect`] at
    /// safepoints instead.
    pub fn alloc(&mut self, body: ObjBody) -> ObjRef {
        let header = ObjectHeader::new(body.tag(), self.live_head);
        let r = match self.free_head {
            Some(i) => {
                let next_free = match &self.slots[i as usize] {
                    Slot::Free { next } => *next,
                    Slot::Occupied { .. } => unreachable!("free list points at live slot"),
                };
                self.free_head = next_free;
                self.slots[i as usize] = Slot::Occupied { header, body };
                ObjRef(i)
            }
            None => {
                let i = self.slots.len() as u32;
                self.slots.push(Slot::Occupied { header, body });
                ObjRef(i)
            }
        };
        self.live_head = Some(r);
        self.live += 1;
        self.allocs_since_collect += 1;
        self.stats.objects_allocated += 1;
        r
    }

    /// True when enough allocation pressure has built up that the next
    /// safepoint should run a collection.
    #[inline]
    pub fn should_collect(&self) -> bool {
        self.allocs_since_collect >= self.collect_threshold
    }

    /// Counters since heap creation.
    #[inline]
    pub fn stats(&self) -> &HeapStats {
        &self.stats
    }

    /// Number of live objects (exact immediately after a collection).
    #[inline]
    pub fn live_objects(&self) -> usize {
        self.live
    }

    /// The object's tag, or `None` for immediates and stale handles.
    pub fn tag_of(&self, v: Value) -> Option<TypeTag> {
        match v {
            Value::Obj(r) => match self.slots.get(r.index()) {
                Some(Slot::Occupied { header, .. }) => Some(header.tag()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Type name for error messages and display.
    pub fn type_name(&self, v: Value) -> &'static str {
        if let Some(name) = v.immediate_type_name() {
            return name;
        }
        match self.tag_of(v) {
            Some(tag) => tag.name(),
            None => "invalid reference",
        }
    }

    /// Intern `name`, returning the canonical symbol for that content.
    ///
    /// Two calls with equal content return the same handle, which is what
    /// makes symbol identity a valid dictionary key. The table holds its
    /// symbols weakly; see the collector.
    pub fn intern(&mut self, name: &[u8]) -> ObjRef {
        if let Some(&sym) = self.interns.get(name) {
            return sym;
        }
        let rope = self.alloc(ObjBody::Rope(Rope::leaf_owned(name.to_vec())));
        let string = self.alloc(ObjBody::Str(Str::new(rope)));
        let sym = self.alloc(ObjBody::Symbol(Symbol::new(string)));
        self.interns.insert(name.into(), sym);
        sym
    }

    /// Intern a UTF-8 name.
    #[inline]
    pub fn intern_str(&mut self, name: &str) -> ObjRef {
        self.intern(name.as_bytes())
    }

    pub(crate) fn occupied(&self, r: ObjRef) -> Option<(&ObjectHeader, &ObjBody)> {
        match self.slots.get(r.index()) {
            Some(Slot::Occupied { header, body }) => Some((header, body)),
            _ => None,
        }
    }

    pub(crate) fn occupied_mut(&mut self, r: ObjRef) -> Option<(&mut ObjectHeader, &mut ObjBody)> {
        match self.slots.get_mut(r.index()) {
            Some(Slot::Occupied { header, body }) => Some((header, body)),
            _ => None,
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

/// Checked downcasts from values to typed object views.
///
/// Each accessor validates the tag and signals a type error naming the
/// expected type; there is no unchecked variant.
macro_rules! typed_accessors {
    ($(($imm:ident, $mut_:ident, $variant:ident, $ty:ty, $expected:expr),)*) => {
        impl Heap {
            $(
                pub fn $imm<V: Into<Value>>(&self, v: V) -> OpalResult<&$ty> {
                    let v = v.into();
                    if let Value::Obj(r) = v {
                        if let Some(Slot::Occupied { body: ObjBody::$variant(x), .. }) =
                            self.slots.get(r.index())
                        {
                            return Ok(x);
                        }
                    }
                    Err(OpalError::Type { expected: $expected, value: v })
                }

                pub fn $mut_<V: Into<Value>>(&mut self, v: V) -> OpalResult<&mut $ty> {
                    let v = v.into();
                    if let Value::Obj(r) = v {
                        if let Some(Slot::Occupied { body: ObjBody::$variant(x), .. }) =
                            self.slots.get_mut(r.index())
                        {
                            return Ok(x);
                        }
                    }
                    Err(OpalError::Type { expected: $expected, value: v })
                }
            )*
        }
    };
}

typed_accessors! {
    (blob, blob_mut, Blob, Blob, "bytevector"),
    (rope, rope_mut, Rope, Rope, "rope"),
    (string, string_mut, Str, Str, "string"),
    (symbol, symbol_mut, Symbol, Symbol, "symbol"),
    (pair, pair_mut, Pair, Pair, "pair"),
    (vector, vector_mut, Vector, Vector, "vector"),
    (dict, dict_mut, Dict, Dict, "dictionary"),
    (attr, attr_mut, Attr, AttrTable, "attribute table"),
    (data, data_mut, Data, Data, "data"),
    (record, record_mut, Record, Record, "record"),
    (irep, irep_mut, Irep, Irep, "procedure descriptor"),
    (frame, frame_mut, Frame, Frame, "frame"),
    (proc, proc_mut, Proc, Proc, "procedure"),
}
