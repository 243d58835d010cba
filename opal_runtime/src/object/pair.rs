//! Cons cells.
//!
//! Pairs are the universal list building block. Pair graphs are shared
//! structure and may contain cycles; nothing here assumes an ownership tree.

use crate::error::{OpalError, OpalResult};
use crate::heap::Heap;
use crate::object::ObjBody;
use crate::value::{ObjRef, Value};

/// A two-slot cons cell.
pub struct Pair {
    pub car: Value,
    pub cdr: Value,
}

impl Pair {
    #[inline]
    pub fn new(car: Value, cdr: Value) -> Self {
        Self { car, cdr }
    }
}

impl Heap {
    /// Allocate a fresh pair.
    pub fn cons(&mut self, car: Value, cdr: Value) -> ObjRef {
        self.alloc(ObjBody::Pair(Pair::new(car, cdr)))
    }

    pub fn car<V: Into<Value>>(&self, v: V) -> OpalResult<Value> {
        Ok(self.pair(v)?.car)
    }

    pub fn cdr<V: Into<Value>>(&self, v: V) -> OpalResult<Value> {
        Ok(self.pair(v)?.cdr)
    }

    pub fn set_car(&mut self, v: Value, car: Value) -> OpalResult<()> {
        self.pair_mut(v)?.car = car;
        Ok(())
    }

    pub fn set_cdr(&mut self, v: Value, cdr: Value) -> OpalResult<()> {
        self.pair_mut(v)?.cdr = cdr;
        Ok(())
    }

    /// Build a proper list from the given values.
    pub fn list(&mut self, values: &[Value]) -> Value {
        let mut acc = Value::Nil;
        for &v in values.iter().rev() {
            acc = Value::Obj(self.cons(v, acc));
        }
        acc
    }

    /// Collect a proper list into a vector of values. Signals a type error
    /// on an improper tail.
    pub fn list_to_vec(&self, list: Value) -> OpalResult<Vec<Value>> {
        let mut out = Vec::new();
        let mut cur = list;
        loop {
            match cur {
                Value::Nil => return Ok(out),
                Value::Obj(_) => {
                    let p = self.pair(cur)?;
                    out.push(p.car);
                    cur = p.cdr;
                }
                other => {
                    return Err(OpalError::Type {
                        expected: "pair",
                        value: other,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cons_car_cdr() {
        let mut heap = Heap::new();
        let p = heap.cons(Value::Int(1), Value::Int(2));
        assert_eq!(heap.car(p).unwrap(), Value::Int(1));
        assert_eq!(heap.cdr(p).unwrap(), Value::Int(2));
        heap.set_car(Value::Obj(p), Value::Int(10)).unwrap();
        assert_eq!(heap.car(p).unwrap(), Value::Int(10));
    }

    #[test]
    fn list_round_trips() {
        let mut heap = Heap::new();
        let l = heap.list(&[Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(
            heap.list_to_vec(l).unwrap(),
            vec![Value::Int(1), Value::Int(2), Value::Int(3)]
        );
        assert_eq!(heap.list_to_vec(Value::Nil).unwrap(), Vec::<Value>::new());
    }

    #[test]
    fn cyclic_pairs_are_allowed() {
        let mut heap = Heap::new();
        let p = heap.cons(Value::Int(1), Value::Nil);
        heap.set_cdr(Value::Obj(p), Value::Obj(p)).unwrap();
        assert_eq!(heap.cdr(p).unwrap(), Value::Obj(p));
    }

    #[test]
    fn improper_list_signals_type_error() {
        let mut heap = Heap::new();
        let p = heap.cons(Value::Int(1), Value::Int(2));
        assert!(heap.list_to_vec(Value::Obj(p)).is_err());
    }
}
