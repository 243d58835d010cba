//! Mark-sweep collection over the slot arena.
//!
//! The pass follows the object-layout contract: marks live beside the tag
//! and are touched only here; sweep walks the live chain threaded through
//! object headers and relinks it as it frees. Attribute-table entries are
//! ephemeral (value marked only once its key is marked), the intern table is
//! weak, and the attribute registry is purged of dead tables.
//!
//! Callers run collections only at safepoints where every live value is
//! either in `roots` or reachable from it; allocation itself never collects.

use crate::heap::{Heap, Slot, INITIAL_COLLECT_THRESHOLD};
use crate::object::{ObjBody, ProcKind, Rope, TypeTag};
use crate::value::{ObjRef, Value};
use smallvec::SmallVec;

impl Heap {
    /// Run one full mark-sweep pass with the given roots.
    pub fn collect(&mut self, roots: &[Value]) {
        let mut work: Vec<ObjRef> = Vec::with_capacity(128);
        for &v in roots {
            self.mark_value(v, &mut work);
        }
        self.drain_marks(&mut work);
        self.mark_attr_entries(&mut work);
        self.sweep();
        self.purge_interns();
        self.purge_attr_registry();
        self.allocs_since_collect = 0;
        self.collect_threshold = (self.live * 2).max(INITIAL_COLLECT_THRESHOLD);
        self.stats.collections += 1;
    }

    fn mark_value(&mut self, v: Value, work: &mut Vec<ObjRef>) -> bool {
        match v {
            Value::Obj(r) => self.mark_obj(r, work),
            _ => false,
        }
    }

    fn mark_obj(&mut self, r: ObjRef, work: &mut Vec<ObjRef>) -> bool {
        if let Some((header, _)) = self.occupied_mut(r) {
            if !header.mark {
                header.mark = true;
                work.push(r);
                return true;
            }
        }
        false
    }

    fn drain_marks(&mut self, work: &mut Vec<ObjRef>) {
        while let Some(r) = work.pop() {
            let mut kids: SmallVec<[Value; 8]> = SmallVec::new();
            self.push_children(r, &mut kids);
            for v in kids {
                self.mark_value(v, work);
            }
        }
    }

    /// Collect the values an object keeps alive.
    ///
    /// Attribute tables contribute nothing here; their entries are handled
    /// by the ephemeron fixpoint.
    fn push_children(&self, r: ObjRef, out: &mut SmallVec<[Value; 8]>) {
        let body = match self.occupied(r) {
            Some((_, body)) => body,
            None => return,
        };
        match body {
            ObjBody::Blob(_) | ObjBody::Data(_) | ObjBody::Attr(_) => {}
            ObjBody::Rope(Rope::Leaf { .. }) => {}
            ObjBody::Rope(Rope::Node { left, right, .. }) => {
                out.push(Value::Obj(*left));
                out.push(Value::Obj(*right));
            }
            ObjBody::Str(s) => out.push(Value::Obj(s.rope())),
            ObjBody::Symbol(s) => out.push(Value::Obj(s.string())),
            ObjBody::Pair(p) => {
                out.push(p.car);
                out.push(p.cdr);
            }
            ObjBody::Vector(v) => out.extend(v.as_slice().iter().copied()),
            ObjBody::Dict(d) => {
                for (k, v) in d.iter() {
                    out.push(Value::Obj(k));
                    out.push(v);
                }
            }
            ObjBody::Record(rec) => {
                out.push(Value::Obj(rec.rtype));
                out.push(rec.datum);
            }
            ObjBody::Irep(i) => {
                out.extend(i.ireps().iter().map(|&x| Value::Obj(x)));
                out.extend(i.consts().iter().copied());
            }
            ObjBody::Frame(f) => {
                out.extend(f.regs.iter().copied());
                if let Some(up) = f.up {
                    out.push(Value::Obj(up));
                }
            }
            ObjBody::Proc(p) => {
                if let ProcKind::Closure(irep) = p.kind {
                    out.push(Value::Obj(irep));
                }
                if let Some(env) = p.env {
                    out.push(Value::Obj(env));
                }
            }
        }
    }

    /// Ephemeron fixpoint: in every live attribute table, a value is marked
    /// once its key is marked. Iterates because marking a value can make
    /// further keys live.
    fn mark_attr_entries(&mut self, work: &mut Vec<ObjRef>) {
        let tables = self.attr_registry.clone();
        loop {
            let mut changed = false;
            for &t in &tables {
                if !self.is_marked(t) {
                    continue;
                }
                let mut pending: SmallVec<[Value; 8]> = SmallVec::new();
                if let Some((_, ObjBody::Attr(at))) = self.occupied(t) {
                    for (k, v) in at.iter() {
                        if self.is_marked(k) && !self.value_is_marked(v) {
                            pending.push(v);
                        }
                    }
                }
                for v in pending {
                    changed |= self.mark_value(v, work);
                }
                self.drain_marks(work);
            }
            if !changed {
                break;
            }
        }
    }

    fn is_marked(&self, r: ObjRef) -> bool {
        matches!(self.occupied(r), Some((h, _)) if h.mark)
    }

    fn value_is_marked(&self, v: Value) -> bool {
        match v {
            Value::Obj(r) => self.is_marked(r),
            _ => true,
        }
    }

    /// Walk the live chain, clearing marks on survivors and unlinking and
    /// freeing everything else.
    fn sweep(&mut self) {
        let mut prev: Option<ObjRef> = None;
        let mut cur = self.live_head;
        while let Some(r) = cur {
            let (marked, next) = match self.occupied(r) {
                Some((h, _)) => (h.mark, h.next),
                None => unreachable!("live chain points at freed slot"),
            };
            if marked {
                if let Some((h, _)) = self.occupied_mut(r) {
                    h.mark = false;
                }
                prev = Some(r);
            } else {
                match prev {
                    None => self.live_head = next,
                    Some(p) => {
                        if let Some((h, _)) = self.occupied_mut(p) {
                            h.next = next;
                        }
                    }
                }
                self.free_slot(r);
            }
            cur = next;
        }
        // Purge entries whose key died from every surviving attribute table.
        let tables = self.attr_registry.clone();
        for t in tables {
            if !matches!(
                self.slots.get(t.index()),
                Some(Slot::Occupied { header, .. }) if header.tag() == TypeTag::Attr
            ) {
                continue;
            }
            let dead: Vec<ObjRef> = match self.occupied(t) {
                Some((_, ObjBody::Attr(at))) => at
                    .iter()
                    .filter(|(k, _)| !self.slot_is_live(*k))
                    .map(|(k, _)| k)
                    .collect(),
                _ => Vec::new(),
            };
            if let Some((_, ObjBody::Attr(at))) = self.occupied_mut(t) {
                for k in dead {
                    at.map.remove(&k);
                }
            }
        }
    }

    fn slot_is_live(&self, r: ObjRef) -> bool {
        matches!(self.slots.get(r.index()), Some(Slot::Occupied { .. }))
    }

    fn free_slot(&mut self, r: ObjRef) {
        let slot = std::mem::replace(
            &mut self.slots[r.index()],
            Slot::Free {
                next: self.free_head,
            },
        );
        self.free_head = Some(r.index() as u32);
        self.live -= 1;
        self.stats.objects_freed += 1;
        if let Slot::Occupied {
            body: ObjBody::Data(mut d),
            ..
        } = slot
        {
            if let (Some(finalize), Some(payload)) = (d.dtype().finalize, d.payload.take()) {
                finalize(payload);
            }
        }
    }

    /// Drop intern entries whose symbol died this pass.
    fn purge_interns(&mut self) {
        let mut interns = std::mem::take(&mut self.interns);
        interns.retain(|_, sym| {
            matches!(
                self.slots.get(sym.index()),
                Some(Slot::Occupied { header, .. }) if header.tag() == TypeTag::Symbol
            )
        });
        self.interns = interns;
    }

    /// Drop registry entries for attribute tables that died this pass.
    fn purge_attr_registry(&mut self) {
        let mut registry = std::mem::take(&mut self.attr_registry);
        registry.retain(|t| {
            matches!(
                self.slots.get(t.index()),
                Some(Slot::Occupied { header, .. }) if header.tag() == TypeTag::Attr
            )
        });
        self.attr_registry = registry;
    }
}
