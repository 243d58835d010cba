//! Compiled procedure descriptors, register frames, and procedures.
//!
//! An irep is immutable once allocated: the compiler hands over finished
//! descriptors only. Frames are the mutable half of the closure model; a
//! closure captures its defining frame by handle, so writes through one
//! capture are visible through every other.

use crate::error::{OpalError, OpalResult};
use crate::heap::Heap;
use crate::object::ObjBody;
use crate::value::{ObjRef, Value};
use std::sync::Arc;

bitflags::bitflags! {
    /// Flag bits of a procedure descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IrepFlags: u8 {
        /// Extra arguments beyond `argc` are collected into a rest list
        /// bound to register `argc`.
        const VARIADIC = 1 << 0;
        /// The instruction bytes are statically owned; nothing to free.
        const CODE_STATIC = 1 << 1;
    }
}

/// Storage for an instruction byte stream.
///
/// Static streams live in the host binary; owned streams are shared with
/// the activations executing them.
#[derive(Clone)]
pub enum CodeStore {
    Static(&'static [u8]),
    Owned(Arc<[u8]>),
}

impl CodeStore {
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        match self {
            CodeStore::Static(b) => b,
            CodeStore::Owned(b) => b,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }

    #[inline]
    pub fn is_static(&self) -> bool {
        matches!(self, CodeStore::Static(_))
    }
}

impl From<Vec<u8>> for CodeStore {
    fn from(bytes: Vec<u8>) -> Self {
        CodeStore::Owned(bytes.into())
    }
}

/// An immutable compiled-procedure descriptor.
pub struct Irep {
    argc: u8,
    flags: IrepFlags,
    frame_size: u8,
    ireps: Box<[ObjRef]>,
    consts: Box<[Value]>,
    code: CodeStore,
}

impl Irep {
    /// Number of required parameters.
    #[inline]
    pub fn argc(&self) -> u8 {
        self.argc
    }

    #[inline]
    pub fn flags(&self) -> IrepFlags {
        self.flags
    }

    #[inline]
    pub fn is_variadic(&self) -> bool {
        self.flags.contains(IrepFlags::VARIADIC)
    }

    /// Register count of the frame this descriptor executes over.
    #[inline]
    pub fn frame_size(&self) -> u8 {
        self.frame_size
    }

    /// Nested descriptors, indexed by PROC.
    #[inline]
    pub fn ireps(&self) -> &[ObjRef] {
        &self.ireps
    }

    /// Embedded constants, indexed by LOAD.
    #[inline]
    pub fn consts(&self) -> &[Value] {
        &self.consts
    }

    #[inline]
    pub fn code(&self) -> &CodeStore {
        &self.code
    }
}

/// A mutable register bank chained under its lexically enclosing frame.
pub struct Frame {
    pub(crate) regs: Box<[Value]>,
    pub(crate) up: Option<ObjRef>,
}

impl Frame {
    /// Register count.
    #[inline]
    pub fn regc(&self) -> usize {
        self.regs.len()
    }

    /// The enclosing frame, if any.
    #[inline]
    pub fn up(&self) -> Option<ObjRef> {
        self.up
    }

    /// Checked register read.
    #[inline]
    pub fn get(&self, index: usize) -> OpalResult<Value> {
        self.regs
            .get(index)
            .copied()
            .ok_or(OpalError::IndexOutOfRange {
                index: index as i64,
                len: self.regs.len(),
            })
    }

    /// Checked register write.
    #[inline]
    pub fn set(&mut self, index: usize, value: Value) -> OpalResult<()> {
        let len = self.regs.len();
        match self.regs.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(OpalError::IndexOutOfRange {
                index: index as i64,
                len,
            }),
        }
    }
}

/// Two-phase frame construction.
///
/// The builder is not registered with the heap, so a collection running
/// between `new` and `finish` cannot observe the half-built frame. Callers
/// populate registers, then `finish` links the frame onto the live chain.
pub struct FrameBuilder {
    regs: Vec<Value>,
    up: Option<ObjRef>,
}

impl FrameBuilder {
    /// Prepare a bank of `regc` registers, all holding the unspecified
    /// value until populated.
    pub fn new(regc: usize) -> OpalResult<Self> {
        if regc > u8::MAX as usize {
            return Err(OpalError::CapacityExceeded {
                what: "frame registers",
                limit: u8::MAX as usize,
            });
        }
        Ok(Self {
            regs: vec![Value::Undef; regc],
            up: None,
        })
    }

    /// Chain the frame under `up`.
    pub fn up(mut self, up: Option<ObjRef>) -> Self {
        self.up = up;
        self
    }

    /// Populate one register.
    pub fn set(&mut self, index: usize, value: Value) -> OpalResult<()> {
        let len = self.regs.len();
        match self.regs.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(OpalError::IndexOutOfRange {
                index: index as i64,
                len,
            }),
        }
    }

    /// Populate registers `0..values.len()`.
    pub fn fill(&mut self, values: &[Value]) -> OpalResult<()> {
        for (i, &v) in values.iter().enumerate() {
            self.set(i, v)?;
        }
        Ok(())
    }

    /// Register the finished frame with the heap.
    pub fn finish(self, heap: &mut Heap) -> ObjRef {
        heap.alloc(ObjBody::Frame(Frame {
            regs: self.regs.into(),
            up: self.up,
        }))
    }
}

/// Native entry point. Receives the heap, the procedure's environment frame
/// (host-captured state), and the call arguments.
pub type NativeFn = fn(&mut Heap, Option<ObjRef>, &[Value]) -> OpalResult<Value>;

/// What a procedure executes when called.
#[derive(Clone, Copy)]
pub enum ProcKind {
    Native(NativeFn),
    /// Bound descriptor; the captured frame lives in [`Proc::env`].
    Closure(ObjRef),
}

/// A callable: a native function or a bound (irep, frame) pair.
pub struct Proc {
    pub(crate) kind: ProcKind,
    pub(crate) env: Option<ObjRef>,
}

impl Proc {
    #[inline]
    pub fn kind(&self) -> &ProcKind {
        &self.kind
    }

    /// Captured environment frame.
    #[inline]
    pub fn env(&self) -> Option<ObjRef> {
        self.env
    }
}

impl Heap {
    /// Allocate an immutable procedure descriptor.
    ///
    /// `frame_size` must cover the argument registers (plus the rest-list
    /// register for variadic descriptors); every nested entry must itself
    /// be a descriptor.
    pub fn make_irep(
        &mut self,
        argc: u8,
        variadic: bool,
        frame_size: u8,
        ireps: Vec<ObjRef>,
        consts: Vec<Value>,
        code: CodeStore,
    ) -> OpalResult<ObjRef> {
        if ireps.len() > u8::MAX as usize {
            return Err(OpalError::CapacityExceeded {
                what: "nested procedure descriptors",
                limit: u8::MAX as usize,
            });
        }
        if consts.len() > u8::MAX as usize {
            return Err(OpalError::CapacityExceeded {
                what: "constant pool",
                limit: u8::MAX as usize,
            });
        }
        if (frame_size as usize) < argc as usize + usize::from(variadic) {
            return Err(OpalError::InvalidOperand {
                offset: 0,
                what: "frame size",
            });
        }
        for &r in &ireps {
            self.irep(r)?;
        }
        let mut flags = IrepFlags::empty();
        if variadic {
            flags |= IrepFlags::VARIADIC;
        }
        if code.is_static() {
            flags |= IrepFlags::CODE_STATIC;
        }
        Ok(self.alloc(ObjBody::Irep(Irep {
            argc,
            flags,
            frame_size,
            ireps: ireps.into(),
            consts: consts.into(),
            code,
        })))
    }

    /// Allocate a frame of `regc` unspecified registers chained under `up`.
    pub fn make_frame(&mut self, regc: usize, up: Option<ObjRef>) -> OpalResult<ObjRef> {
        if let Some(up) = up {
            self.frame(up)?;
        }
        Ok(FrameBuilder::new(regc)?.up(up).finish(self))
    }

    /// Walk `depth` hops up the frame chain.
    pub fn frame_at_depth(&self, frame: ObjRef, depth: usize) -> OpalResult<ObjRef> {
        let mut cur = frame;
        for hops in 0..depth {
            cur = self
                .frame(cur)?
                .up
                .ok_or(OpalError::IndexOutOfRange {
                    index: depth as i64,
                    len: hops + 1,
                })?;
        }
        Ok(cur)
    }

    /// Checked register read through a frame handle.
    pub fn frame_ref(&self, frame: ObjRef, index: usize) -> OpalResult<Value> {
        self.frame(frame)?.get(index)
    }

    /// Checked register write through a frame handle.
    pub fn frame_set(&mut self, frame: ObjRef, index: usize, value: Value) -> OpalResult<()> {
        self.frame_mut(frame)?.set(index, value)
    }

    /// Bind a descriptor to its captured frame.
    pub fn make_proc(&mut self, irep: ObjRef, env: Option<ObjRef>) -> OpalResult<ObjRef> {
        self.irep(irep)?;
        if let Some(env) = env {
            self.frame(env)?;
        }
        Ok(self.alloc(ObjBody::Proc(Proc {
            kind: ProcKind::Closure(irep),
            env,
        })))
    }

    /// Wrap a native function, optionally with a captured environment frame.
    pub fn make_proc_native(&mut self, f: NativeFn, env: Option<ObjRef>) -> OpalResult<ObjRef> {
        if let Some(env) = env {
            self.frame(env)?;
        }
        Ok(self.alloc(ObjBody::Proc(Proc {
            kind: ProcKind::Native(f),
            env,
        })))
    }

    /// Wrap an existing continuation value as an opaque procedure.
    ///
    /// Applying the result raises [`OpalError::ContinuationUnwind`] carrying
    /// `k` and the arguments; the evaluator catches it to unwind.
    pub fn make_cont(&mut self, k: Value) -> OpalResult<Value> {
        let mut env = FrameBuilder::new(1)?;
        env.set(0, k)?;
        let env = env.finish(self);
        let p = self.make_proc_native(invoke_continuation, Some(env))?;
        Ok(Value::Obj(p))
    }
}

fn invoke_continuation(
    heap: &mut Heap,
    env: Option<ObjRef>,
    args: &[Value],
) -> OpalResult<Value> {
    let env = env.ok_or(OpalError::Type {
        expected: "frame",
        value: Value::Undef,
    })?;
    let k = heap.frame_ref(env, 0)?;
    Err(OpalError::ContinuationUnwind {
        k,
        args: args.to_vec(),
    })
}
