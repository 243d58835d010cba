//! Bytevectors.

use crate::error::{check_index, check_range, OpalError, OpalResult};
use crate::heap::Heap;
use crate::object::ObjBody;
use crate::value::{ObjRef, Value};

/// A fixed-length, in-place mutable byte buffer.
pub struct Blob {
    pub(crate) data: Box<[u8]>,
}

impl Blob {
    #[inline]
    pub fn new(data: Box<[u8]>) -> Self {
        Self { data }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl Heap {
    /// Allocate a zero-filled bytevector.
    pub fn make_blob(&mut self, len: usize) -> ObjRef {
        self.alloc(ObjBody::Blob(Blob::new(vec![0; len].into())))
    }

    /// Allocate a bytevector holding a copy of `bytes`.
    pub fn make_blob_from(&mut self, bytes: &[u8]) -> ObjRef {
        self.alloc(ObjBody::Blob(Blob::new(bytes.to_vec().into())))
    }

    pub fn blob_len<V: Into<Value>>(&self, v: V) -> OpalResult<usize> {
        Ok(self.blob(v)?.len())
    }

    /// Checked byte read.
    pub fn blob_ref<V: Into<Value>>(&self, v: V, index: i64) -> OpalResult<u8> {
        let blob = self.blob(v)?;
        let i = check_index(blob.len(), index)?;
        Ok(blob.data[i])
    }

    /// Checked byte write.
    pub fn blob_set(&mut self, v: Value, index: i64, byte: u8) -> OpalResult<()> {
        let blob = self.blob_mut(v)?;
        let i = check_index(blob.len(), index)?;
        blob.data[i] = byte;
        Ok(())
    }

    /// Copy `from[start..end]` into `to` beginning at `at`. The destination
    /// span must fit; `to` and `from` may be the same blob.
    pub fn blob_copy(
        &mut self,
        to: Value,
        at: i64,
        from: Value,
        start: i64,
        end: i64,
    ) -> OpalResult<()> {
        let to_len = self.blob(to)?.len();
        let from_len = self.blob(from)?.len();
        let at = check_index(to_len, at)?;
        let (start, end) = check_range(from_len, start, end)?;
        let span = end - start;
        if to_len - at < span {
            return Err(OpalError::InvalidCopyRange {
                span,
                room: to_len - at,
            });
        }
        let scratch: Vec<u8> = self.blob(from)?.data[start..end].to_vec();
        self.blob_mut(to)?.data[at..at + span].copy_from_slice(&scratch);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_is_mutable_in_place() {
        let mut heap = Heap::new();
        let b = heap.make_blob(4);
        heap.blob_set(Value::Obj(b), 2, 0xAB).unwrap();
        assert_eq!(heap.blob_ref(b, 2).unwrap(), 0xAB);
        assert_eq!(heap.blob_ref(b, 0).unwrap(), 0);
    }

    #[test]
    fn out_of_range_access_signals_and_does_not_mutate() {
        let mut heap = Heap::new();
        let b = heap.make_blob_from(&[1, 2, 3]);
        assert!(heap.blob_ref(b, 3).is_err());
        assert!(heap.blob_set(Value::Obj(b), 3, 9).is_err());
        assert!(heap.blob_set(Value::Obj(b), -1, 9).is_err());
        assert_eq!(heap.blob(b).unwrap().as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn copy_validates_all_three_ranges() {
        let mut heap = Heap::new();
        let from = heap.make_blob_from(&[1, 2, 3, 4]);
        let to = heap.make_blob(4);
        heap.blob_copy(Value::Obj(to), 1, Value::Obj(from), 1, 4)
            .unwrap();
        assert_eq!(heap.blob(to).unwrap().as_slice(), &[0, 2, 3, 4]);
        // destination too short
        let err = heap
            .blob_copy(Value::Obj(to), 3, Value::Obj(from), 0, 4)
            .unwrap_err();
        assert_eq!(err, OpalError::InvalidCopyRange { span: 4, room: 1 });
        // bad source range
        assert!(heap
            .blob_copy(Value::Obj(to), 0, Value::Obj(from), 3, 2)
            .is_err());
        // bad destination index
        assert!(heap
            .blob_copy(Value::Obj(to), 4, Value::Obj(from), 0, 0)
            .is_err());
    }
}
