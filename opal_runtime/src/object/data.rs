//! Opaque foreign payloads on the managed heap.

use crate::error::OpalResult;
use crate::heap::Heap;
use crate::object::ObjBody;
use crate::value::{ObjRef, Value};
use std::any::Any;

/// Descriptor for a host-provided opaque type.
///
/// `finalize` runs when the collector frees an instance; when absent the
/// payload is simply dropped. `eq` defines content equality between two
/// payloads of this type; when absent only identity equality exists.
pub struct DataType {
    pub name: &'static str,
    pub finalize: Option<fn(Box<dyn Any>)>,
    pub eq: Option<fn(&dyn Any, &dyn Any) -> bool>,
}

/// A foreign payload tagged with its type descriptor.
pub struct Data {
    pub(crate) dtype: &'static DataType,
    /// Taken by the finalizer at sweep time.
    pub(crate) payload: Option<Box<dyn Any>>,
}

impl Data {
    #[inline]
    pub fn dtype(&self) -> &'static DataType {
        self.dtype
    }

    /// Borrow the payload.
    #[inline]
    pub fn payload(&self) -> &dyn Any {
        self.payload
            .as_deref()
            .unwrap_or_else(|| unreachable!("payload taken outside sweep"))
    }
}

impl Heap {
    /// Allocate a data object wrapping `payload`.
    pub fn make_data(&mut self, dtype: &'static DataType, payload: Box<dyn Any>) -> ObjRef {
        self.alloc(ObjBody::Data(Data {
            dtype,
            payload: Some(payload),
        }))
    }

    /// Content equality between two data objects: same descriptor, then the
    /// descriptor's `eq` hook, falling back to identity.
    pub fn data_eq(&self, a: Value, b: Value) -> OpalResult<bool> {
        let da = self.data(a)?;
        let db = self.data(b)?;
        if !std::ptr::eq(da.dtype, db.dtype) {
            return Ok(false);
        }
        match da.dtype.eq {
            Some(eq) => Ok(eq(da.payload(), db.payload())),
            None => Ok(a == b),
        }
    }
}
