//! User-defined structured types.
//!
//! A record is a (type-symbol, datum) pair; new record types need no new
//! tags, only a fresh type symbol.

use crate::error::OpalResult;
use crate::heap::Heap;
use crate::object::ObjBody;
use crate::value::{ObjRef, Value};

pub struct Record {
    pub(crate) rtype: ObjRef,
    pub(crate) datum: Value,
}

impl Heap {
    /// Allocate a record of type `rtype` (a symbol) holding `datum`.
    pub fn make_record(&mut self, rtype: Value, datum: Value) -> OpalResult<ObjRef> {
        self.symbol(rtype)?;
        let rtype = match rtype {
            Value::Obj(r) => r,
            _ => unreachable!("symbol accessor admitted a non-object"),
        };
        Ok(self.alloc(ObjBody::Record(Record { rtype, datum })))
    }

    /// The record's type symbol.
    pub fn record_type<V: Into<Value>>(&self, record: V) -> OpalResult<Value> {
        Ok(Value::Obj(self.record(record)?.rtype))
    }

    /// The record's datum.
    pub fn record_datum<V: Into<Value>>(&self, record: V) -> OpalResult<Value> {
        Ok(self.record(record)?.datum)
    }
}
