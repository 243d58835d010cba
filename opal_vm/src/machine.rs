//! The bytecode machine.
//!
//! Executes procedure descriptors over heap-allocated register frames with
//! an explicit activation stack, so closure calls cost no host stack. Two
//! machine registers sit outside any frame: the accumulator, which every
//! value-producing instruction updates and HALT yields, and the call
//! register, which CALL consumes.
//!
//! The top of the dispatch loop is the collection safepoint: when the heap
//! reports pressure, a pass runs with the accumulator, the call register,
//! every activation's frame and descriptor, and the global table as roots.

use crate::globals::Globals;
use opal_compiler::Instruction;
use opal_runtime::{
    CodeStore, FrameBuilder, Heap, NativeFn, ObjRef, OpalError, OpalResult, ProcKind, Value,
};
use smallvec::SmallVec;

/// One entry of the activation stack.
struct Activation {
    irep: ObjRef,
    /// Shared handle on the descriptor's byte stream.
    code: CodeStore,
    frame: ObjRef,
    pc: usize,
}

/// Resolved call target, copied out of the procedure object so the heap is
/// free for the call itself.
enum Target {
    Native(NativeFn, Option<ObjRef>),
    Closure(ObjRef, Option<ObjRef>),
}

/// The executing half of the runtime: heap, globals, and machine registers.
pub struct Machine {
    pub heap: Heap,
    pub globals: Globals,
    acc: Value,
    callee: Value,
    stack: Vec<Activation>,
}

impl Machine {
    pub fn new() -> Self {
        Self {
            heap: Heap::new(),
            globals: Globals::new(),
            acc: Value::Undef,
            callee: Value::Undef,
            stack: Vec::new(),
        }
    }

    /// The accumulator: the most recently produced value.
    #[inline]
    pub fn acc(&self) -> Value {
        self.acc
    }

    /// Bind the call register consumed by CALL.
    #[inline]
    pub fn set_callee(&mut self, callee: Value) {
        self.callee = callee;
    }

    #[inline]
    pub fn callee(&self) -> Value {
        self.callee
    }

    /// Intern `name` and bind it to `value`, returning the slot.
    pub fn define_global(&mut self, name: &str, value: Value) -> OpalResult<u8> {
        let sym = self.heap.intern_str(name);
        self.globals.define(sym, value)
    }

    /// Intern `name` and resolve its slot without binding.
    pub fn global_slot(&mut self, name: &str) -> OpalResult<u8> {
        let sym = self.heap.intern_str(name);
        self.globals.resolve(sym)
    }

    /// Current value of the global named `name`.
    pub fn global(&mut self, name: &str) -> OpalResult<Value> {
        let slot = self.global_slot(name)?;
        self.globals.get(slot)
    }

    /// Wrap a native function and bind it to a global in one step.
    pub fn define_native(&mut self, name: &str, f: NativeFn) -> OpalResult<u8> {
        let p = self.heap.make_proc_native(f, None)?;
        self.define_global(name, Value::Obj(p))
    }

    /// Apply a procedure to arguments and run to completion, returning the
    /// accumulator HALT yields.
    pub fn apply(&mut self, proc: Value, args: &[Value]) -> OpalResult<Value> {
        let base = self.stack.len();
        let outcome = self.invoke(proc, args).and_then(|()| self.run(base));
        if outcome.is_err() {
            // drop the failed call's activations
            self.stack.truncate(base);
        }
        outcome?;
        Ok(self.acc)
    }

    /// Run a collection with the machine's full root set.
    pub fn collect_garbage(&mut self) {
        let mut roots: Vec<Value> =
            Vec::with_capacity(self.stack.len() * 2 + self.globals.len() + 2);
        roots.push(self.acc);
        roots.push(self.callee);
        for a in &self.stack {
            roots.push(Value::Obj(a.frame));
            roots.push(Value::Obj(a.irep));
        }
        roots.extend(self.globals.roots());
        self.heap.collect(&roots);
    }

    /// Start a call: run a native to completion, or push an activation for
    /// a closure.
    fn invoke(&mut self, proc: Value, args: &[Value]) -> OpalResult<()> {
        let target = {
            let p = self.heap.proc(proc)?;
            match *p.kind() {
                ProcKind::Native(f) => Target::Native(f, p.env()),
                ProcKind::Closure(irep) => Target::Closure(irep, p.env()),
            }
        };
        match target {
            Target::Native(f, env) => {
                self.acc = f(&mut self.heap, env, args)?;
            }
            Target::Closure(irep, env) => {
                let (argc, variadic, frame_size, code) = {
                    let d = self.heap.irep(irep)?;
                    (
                        d.argc() as usize,
                        d.is_variadic(),
                        d.frame_size() as usize,
                        d.code().clone(),
                    )
                };
                if args.len() < argc || (!variadic && args.len() != argc) {
                    return Err(OpalError::Arity {
                        required: argc,
                        got: args.len(),
                        variadic,
                    });
                }
                let mut fb = FrameBuilder::new(frame_size)?.up(env);
                fb.fill(&args[..argc])?;
                if variadic {
                    let rest = self.heap.list(&args[argc..]);
                    fb.set(argc, rest)?;
                }
                let frame = fb.finish(&mut self.heap);
                self.stack.push(Activation {
                    irep,
                    code,
                    frame,
                    pc: 0,
                });
            }
        }
        Ok(())
    }

    /// Dispatch until the activation stack drops back to `base`.
    fn run(&mut self, base: usize) -> OpalResult<()> {
        while self.stack.len() > base {
            if self.heap.should_collect() {
                self.collect_garbage();
            }
            let top = self.stack.len() - 1;
            let (inst, at, next, frame, irep) = {
                let a = &self.stack[top];
                let (inst, next) = Instruction::decode(a.code.bytes(), a.pc)?;
                (inst, a.pc, next, a.frame, a.irep)
            };
            self.stack[top].pc = next;
            match inst {
                Instruction::Halt => {
                    self.stack.pop();
                }
                Instruction::Call { argc } => {
                    let mut args: SmallVec<[Value; 8]> = SmallVec::new();
                    for i in 0..argc as usize {
                        args.push(self.heap.frame_ref(frame, i)?);
                    }
                    let callee = self.callee;
                    self.invoke(callee, &args)?;
                }
                Instruction::Proc { dest, irep: idx } => {
                    let nested = self
                        .heap
                        .irep(irep)?
                        .ireps()
                        .get(idx as usize)
                        .copied()
                        .ok_or(OpalError::InvalidOperand {
                            offset: at,
                            what: "descriptor index",
                        })?;
                    let p = self.heap.make_proc(nested, Some(frame))?;
                    self.produce(frame, dest, Value::Obj(p))?;
                }
                Instruction::Load { dest, index } => {
                    let v = self
                        .heap
                        .irep(irep)?
                        .consts()
                        .get(index as usize)
                        .copied()
                        .ok_or(OpalError::InvalidOperand {
                            offset: at,
                            what: "constant index",
                        })?;
                    self.produce(frame, dest, v)?;
                }
                Instruction::Lref { dest, depth, index } => {
                    let target = self.heap.frame_at_depth(frame, depth as usize)?;
                    let v = self.heap.frame_ref(target, index as usize)?;
                    self.produce(frame, dest, v)?;
                }
                Instruction::Lset { src, depth, index } => {
                    let v = self.heap.frame_ref(frame, src as usize)?;
                    let target = self.heap.frame_at_depth(frame, depth as usize)?;
                    self.heap.frame_set(target, index as usize, v)?;
                }
                Instruction::Gref { dest, slot } => {
                    let v = self.globals.get(slot)?;
                    self.produce(frame, dest, v)?;
                }
                Instruction::Gset { src, slot } => {
                    let v = self.heap.frame_ref(frame, src as usize)?;
                    self.globals.set(slot, v)?;
                }
                Instruction::Cond { cond, offset } => {
                    let v = self.heap.frame_ref(frame, cond as usize)?;
                    if !v.is_truthy() {
                        let len = self.stack[top].code.len();
                        let target = next as i64 + offset as i64;
                        if target < 0 || target > len as i64 {
                            return Err(OpalError::InvalidOperand {
                                offset: at,
                                what: "branch target",
                            });
                        }
                        self.stack[top].pc = target as usize;
                    }
                }
                Instruction::Loadt { dest } => self.produce(frame, dest, Value::Bool(true))?,
                Instruction::Loadf { dest } => self.produce(frame, dest, Value::Bool(false))?,
                Instruction::Loadn { dest } => self.produce(frame, dest, Value::Nil)?,
                Instruction::Loadu { dest } => self.produce(frame, dest, Value::Undef)?,
                Instruction::Loadi { dest, imm } => {
                    self.produce(frame, dest, Value::Int(imm as i64))?
                }
            }
        }
        Ok(())
    }

    /// Deposit a produced value in its destination register and the
    /// accumulator.
    #[inline]
    fn produce(&mut self, frame: ObjRef, dest: u8, v: Value) -> OpalResult<()> {
        self.heap.frame_set(frame, dest as usize, v)?;
        self.acc = v;
        Ok(())
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opal_runtime::OpalError;

    fn native_first(_: &mut Heap, _: Option<ObjRef>, args: &[Value]) -> OpalResult<Value> {
        Ok(args.first().copied().unwrap_or(Value::Undef))
    }

    #[test]
    fn apply_native_returns_its_value() {
        let mut m = Machine::new();
        let p = m.heap.make_proc_native(native_first, None).unwrap();
        let v = m.apply(Value::Obj(p), &[Value::Int(3)]).unwrap();
        assert_eq!(v, Value::Int(3));
        assert_eq!(m.acc(), Value::Int(3));
    }

    #[test]
    fn apply_rejects_non_procedures() {
        let mut m = Machine::new();
        let err = m.apply(Value::Int(1), &[]).unwrap_err();
        assert!(matches!(
            err,
            OpalError::Type {
                expected: "procedure",
                ..
            }
        ));
    }

    #[test]
    fn globals_round_trip_through_machine() {
        let mut m = Machine::new();
        m.define_global("x", Value::Int(9)).unwrap();
        assert_eq!(m.global("x").unwrap(), Value::Int(9));
    }

    #[test]
    fn define_native_binds_a_procedure() {
        let mut m = Machine::new();
        m.define_native("first", native_first).unwrap();
        let p = m.global("first").unwrap();
        let v = m.apply(p, &[Value::Int(7), Value::Int(8)]).unwrap();
        assert_eq!(v, Value::Int(7));
    }
}
