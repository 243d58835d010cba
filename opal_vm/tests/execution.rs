//! End-to-end execution tests: descriptors built with the bytecode builder,
//! run on the machine against native and closure callees.

use opal_compiler::IrepBuilder;
use opal_runtime::{Heap, ObjRef, OpalError, OpalResult, Value};
use opal_vm::{install_builtins, Machine};

fn native_add(_: &mut Heap, _: Option<ObjRef>, args: &[Value]) -> OpalResult<Value> {
    let mut sum = 0i64;
    for &a in args {
        sum += a.as_int().ok_or(OpalError::Type {
            expected: "integer",
            value: a,
        })?;
    }
    Ok(Value::Int(sum))
}

#[test]
fn loadi_loadi_call_against_native_addition_yields_12() {
    let mut m = Machine::new();

    let mut b = IrepBuilder::new(0, false, 2);
    b.emit_loadi(0, 5);
    b.emit_loadi(1, 7);
    b.emit_call(2);
    b.emit_halt();
    let irep = b.finish(&mut m.heap).unwrap();

    let add = m.heap.make_proc_native(native_add, None).unwrap();
    m.set_callee(Value::Obj(add));

    let body = m.heap.make_proc(irep, None).unwrap();
    let result = m.apply(Value::Obj(body), &[]).unwrap();
    assert_eq!(result, Value::Int(12));
}

#[test]
fn closures_capture_the_frame_not_a_snapshot() {
    let mut m = Machine::new();

    // reader: one hop up, slot 0
    let mut reader = IrepBuilder::new(0, false, 1);
    reader.emit_lref(0, 1, 0);
    reader.emit_halt();
    let reader = reader.finish(&mut m.heap).unwrap();

    // mutator: overwrite the enclosing slot 0 with 42
    let mut mutator = IrepBuilder::new(0, false, 1);
    mutator.emit_loadi(0, 42);
    mutator.emit_lset(0, 1, 0);
    mutator.emit_halt();
    let mutator = mutator.finish(&mut m.heap).unwrap();

    // outer: slot 0 := 10, then materialize both closures over this frame
    let mut outer = IrepBuilder::new(0, false, 3);
    let reader_idx = outer.add_irep(reader).unwrap();
    let mutator_idx = outer.add_irep(mutator).unwrap();
    outer.emit_loadi(0, 10);
    outer.emit_proc(1, reader_idx);
    outer.emit_proc(2, mutator_idx);
    outer.emit_halt();
    let outer = outer.finish(&mut m.heap).unwrap();

    let outer = m.heap.make_proc(outer, None).unwrap();
    let mutator_proc = m.apply(Value::Obj(outer), &[]).unwrap();

    // both closures share the outer frame; fetch the reader out of it
    let shared_frame = m.heap.proc(mutator_proc).unwrap().env().unwrap();
    let reader_proc = m.heap.frame_ref(shared_frame, 1).unwrap();

    assert_eq!(m.apply(reader_proc, &[]).unwrap(), Value::Int(10));
    m.apply(mutator_proc, &[]).unwrap();
    assert_eq!(m.apply(reader_proc, &[]).unwrap(), Value::Int(42));
}

#[test]
fn lref_reads_what_lset_wrote_at_depth_two() {
    let mut m = Machine::new();

    let outer = m.heap.make_frame(1, None).unwrap();
    let middle = m.heap.make_frame(1, Some(outer)).unwrap();

    // writer runs in a fresh frame chained under `middle`: depth 2 is `outer`
    let mut writer = IrepBuilder::new(0, false, 1);
    writer.emit_loadi(0, 7);
    writer.emit_lset(0, 2, 0);
    writer.emit_halt();
    let writer = writer.finish(&mut m.heap).unwrap();
    let writer = m.heap.make_proc(writer, Some(middle)).unwrap();

    let mut readr = IrepBuilder::new(0, false, 1);
    readr.emit_lref(0, 2, 0);
    readr.emit_halt();
    let readr = readr.finish(&mut m.heap).unwrap();
    let readr = m.heap.make_proc(readr, Some(middle)).unwrap();

    m.apply(Value::Obj(writer), &[]).unwrap();
    assert_eq!(m.heap.frame_ref(outer, 0).unwrap(), Value::Int(7));
    assert_eq!(m.apply(Value::Obj(readr), &[]).unwrap(), Value::Int(7));
}

#[test]
fn cond_branches_only_on_false() {
    let mut m = Machine::new();

    // r0 := #t; if r0 is #f skip the LOADI; result: 5
    let mut b = IrepBuilder::new(0, false, 2);
    let skip = b.new_label();
    b.emit_loadt(0);
    b.emit_cond(0, skip).unwrap();
    b.emit_loadi(1, 5);
    b.bind_label(skip);
    b.emit_halt();
    let taken = b.finish(&mut m.heap).unwrap();
    let taken = m.heap.make_proc(taken, None).unwrap();
    assert_eq!(m.apply(Value::Obj(taken), &[]).unwrap(), Value::Int(5));

    // r0 := #f; branch skips the LOADI; accumulator still holds #f
    let mut b = IrepBuilder::new(0, false, 2);
    let skip = b.new_label();
    b.emit_loadf(0);
    b.emit_cond(0, skip).unwrap();
    b.emit_loadi(1, 5);
    b.bind_label(skip);
    b.emit_halt();
    let skipped = b.finish(&mut m.heap).unwrap();
    let skipped = m.heap.make_proc(skipped, None).unwrap();
    assert_eq!(
        m.apply(Value::Obj(skipped), &[]).unwrap(),
        Value::Bool(false)
    );
}

#[test]
fn nil_is_truthy_for_cond() {
    let mut m = Machine::new();
    let mut b = IrepBuilder::new(0, false, 2);
    let skip = b.new_label();
    b.emit_loadn(0);
    b.emit_cond(0, skip).unwrap();
    b.emit_loadi(1, 1);
    b.bind_label(skip);
    b.emit_halt();
    let irep = b.finish(&mut m.heap).unwrap();
    let p = m.heap.make_proc(irep, None).unwrap();
    assert_eq!(m.apply(Value::Obj(p), &[]).unwrap(), Value::Int(1));
}

#[test]
fn variadic_descriptors_bind_the_rest_list() {
    let mut m = Machine::new();

    // argc=1 variadic: r0 = first, r1 = rest; yield the rest list
    let mut b = IrepBuilder::new(1, true, 2);
    b.emit_lref(0, 0, 1);
    b.emit_halt();
    let irep = b.finish(&mut m.heap).unwrap();
    let p = m.heap.make_proc(irep, None).unwrap();

    let rest = m
        .apply(
            Value::Obj(p),
            &[Value::Int(1), Value::Int(2), Value::Int(3)],
        )
        .unwrap();
    assert_eq!(
        m.heap.list_to_vec(rest).unwrap(),
        vec![Value::Int(2), Value::Int(3)]
    );

    // empty rest
    let rest = m.apply(Value::Obj(p), &[Value::Int(1)]).unwrap();
    assert_eq!(rest, Value::Nil);

    // too few arguments
    let err = m.apply(Value::Obj(p), &[]).unwrap_err();
    assert_eq!(
        err,
        OpalError::Arity {
            required: 1,
            got: 0,
            variadic: true
        }
    );
}

#[test]
fn fixed_arity_is_enforced() {
    let mut m = Machine::new();
    let mut b = IrepBuilder::new(2, false, 2);
    b.emit_halt();
    let irep = b.finish(&mut m.heap).unwrap();
    let p = m.heap.make_proc(irep, None).unwrap();
    assert!(m.apply(Value::Obj(p), &[Value::Int(1)]).is_err());
    assert!(m
        .apply(Value::Obj(p), &[Value::Int(1), Value::Int(2), Value::Int(3)])
        .is_err());
    assert!(m.apply(Value::Obj(p), &[Value::Int(1), Value::Int(2)]).is_ok());
}

#[test]
fn globals_flow_through_gset_and_gref() {
    let mut m = Machine::new();
    let slot = m.global_slot("counter").unwrap();

    let mut b = IrepBuilder::new(0, false, 2);
    b.emit_loadi(0, 9);
    b.emit_gset(0, slot);
    b.emit_loadu(1);
    b.emit_gref(1, slot);
    b.emit_halt();
    let irep = b.finish(&mut m.heap).unwrap();
    let p = m.heap.make_proc(irep, None).unwrap();

    assert_eq!(m.apply(Value::Obj(p), &[]).unwrap(), Value::Int(9));
    assert_eq!(m.global("counter").unwrap(), Value::Int(9));
}

#[test]
fn call_against_installed_builtin() {
    let mut m = Machine::new();
    install_builtins(&mut m).unwrap();
    let plus = m.global("+").unwrap();
    m.set_callee(plus);

    let mut b = IrepBuilder::new(0, false, 2);
    b.emit_loadi(0, 30);
    b.emit_loadi(1, 12);
    b.emit_call(2);
    b.emit_halt();
    let irep = b.finish(&mut m.heap).unwrap();
    let p = m.heap.make_proc(irep, None).unwrap();
    assert_eq!(m.apply(Value::Obj(p), &[]).unwrap(), Value::Int(42));
}

#[test]
fn nested_closure_calls_use_no_host_stack() {
    let mut m = Machine::new();

    // callee closure: its own two registers, yields 12 via native add
    let mut inner = IrepBuilder::new(2, false, 2);
    inner.emit_call(2);
    inner.emit_halt();
    let inner = inner.finish(&mut m.heap).unwrap();
    let inner = m.heap.make_proc(inner, None).unwrap();

    let add = m.heap.make_proc_native(native_add, None).unwrap();
    m.set_callee(Value::Obj(add));

    // outer calls the closure; the closure immediately calls the native
    let r = m
        .apply(Value::Obj(inner), &[Value::Int(5), Value::Int(7)])
        .unwrap();
    assert_eq!(r, Value::Int(12));
}

#[test]
fn collection_during_execution_keeps_machine_state() {
    let mut m = Machine::new();
    install_builtins(&mut m).unwrap();

    let keep = m.heap.make_string(b"still here");
    m.define_global("kept", Value::Obj(keep)).unwrap();

    // enough garbage to cross the collection threshold
    for _ in 0..5000 {
        m.heap.cons(Value::Nil, Value::Nil);
    }
    assert!(m.heap.should_collect());

    let plus = m.global("+").unwrap();
    m.set_callee(plus);
    let mut b = IrepBuilder::new(0, false, 2);
    b.emit_loadi(0, 1);
    b.emit_loadi(1, 2);
    b.emit_call(2);
    b.emit_halt();
    let irep = b.finish(&mut m.heap).unwrap();
    let p = m.heap.make_proc(irep, None).unwrap();

    // the safepoint inside the dispatch loop collects the garbage
    assert_eq!(m.apply(Value::Obj(p), &[]).unwrap(), Value::Int(3));
    assert!(!m.heap.should_collect());
    assert_eq!(m.heap.str_to_vec(keep).unwrap(), b"still here");
    assert_eq!(m.global("kept").unwrap(), Value::Obj(keep));
}
