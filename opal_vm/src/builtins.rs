//! Native primitives.
//!
//! A small set of pair, arithmetic, and string procedures, enough to give
//! CALL real callees. Each follows the native calling convention: heap,
//! optional environment frame, argument slice.

use crate::machine::Machine;
use opal_runtime::{Heap, ObjRef, OpalError, OpalResult, Value};

/// Bind the standard natives into the machine's globals.
pub fn install_builtins(machine: &mut Machine) -> OpalResult<()> {
    machine.define_native("+", native_add)?;
    machine.define_native("-", native_sub)?;
    machine.define_native("*", native_mul)?;
    machine.define_native("cons", native_cons)?;
    machine.define_native("car", native_car)?;
    machine.define_native("cdr", native_cdr)?;
    machine.define_native("list", native_list)?;
    machine.define_native("string-append", native_string_append)?;
    Ok(())
}

fn expect_argc(args: &[Value], required: usize) -> OpalResult<()> {
    if args.len() != required {
        return Err(OpalError::Arity {
            required,
            got: args.len(),
            variadic: false,
        });
    }
    Ok(())
}

enum Num {
    Int(i64),
    Float(f64),
}

fn number(v: Value) -> OpalResult<Num> {
    match v {
        Value::Int(i) => Ok(Num::Int(i)),
        Value::Float(x) => Ok(Num::Float(x)),
        other => Err(OpalError::Type {
            expected: "number",
            value: other,
        }),
    }
}

fn fold_add(acc: Num, v: Value) -> OpalResult<Num> {
    Ok(match (acc, number(v)?) {
        (Num::Int(a), Num::Int(b)) => Num::Int(a.wrapping_add(b)),
        (Num::Int(a), Num::Float(b)) => Num::Float(a as f64 + b),
        (Num::Float(a), Num::Int(b)) => Num::Float(a + b as f64),
        (Num::Float(a), Num::Float(b)) => Num::Float(a + b),
    })
}

fn fold_sub(acc: Num, v: Value) -> OpalResult<Num> {
    Ok(match (acc, number(v)?) {
        (Num::Int(a), Num::Int(b)) => Num::Int(a.wrapping_sub(b)),
        (Num::Int(a), Num::Float(b)) => Num::Float(a as f64 - b),
        (Num::Float(a), Num::Int(b)) => Num::Float(a - b as f64),
        (Num::Float(a), Num::Float(b)) => Num::Float(a - b),
    })
}

fn fold_mul(acc: Num, v: Value) -> OpalResult<Num> {
    Ok(match (acc, number(v)?) {
        (Num::Int(a), Num::Int(b)) => Num::Int(a.wrapping_mul(b)),
        (Num::Int(a), Num::Float(b)) => Num::Float(a as f64 * b),
        (Num::Float(a), Num::Int(b)) => Num::Float(a * b as f64),
        (Num::Float(a), Num::Float(b)) => Num::Float(a * b),
    })
}

fn num_value(n: Num) -> Value {
    match n {
        Num::Int(i) => Value::Int(i),
        Num::Float(x) => Value::Float(x),
    }
}

fn native_add(_: &mut Heap, _: Option<ObjRef>, args: &[Value]) -> OpalResult<Value> {
    let mut acc = Num::Int(0);
    for &a in args {
        acc = fold_add(acc, a)?;
    }
    Ok(num_value(acc))
}

fn native_sub(_: &mut Heap, _: Option<ObjRef>, args: &[Value]) -> OpalResult<Value> {
    let (first, rest) = match args.split_first() {
        Some(split) => split,
        None => {
            return Err(OpalError::Arity {
                required: 1,
                got: 0,
                variadic: true,
            })
        }
    };
    if rest.is_empty() {
        return Ok(num_value(fold_sub(Num::Int(0), *first)?));
    }
    let mut acc = number(*first)?;
    for &a in rest {
        acc = fold_sub(acc, a)?;
    }
    Ok(num_value(acc))
}

fn native_mul(_: &mut Heap, _: Option<ObjRef>, args: &[Value]) -> OpalResult<Value> {
    let mut acc = Num::Int(1);
    for &a in args {
        acc = fold_mul(acc, a)?;
    }
    Ok(num_value(acc))
}

fn native_cons(heap: &mut Heap, _: Option<ObjRef>, args: &[Value]) -> OpalResult<Value> {
    expect_argc(args, 2)?;
    Ok(Value::Obj(heap.cons(args[0], args[1])))
}

fn native_car(heap: &mut Heap, _: Option<ObjRef>, args: &[Value]) -> OpalResult<Value> {
    expect_argc(args, 1)?;
    heap.car(args[0])
}

fn native_cdr(heap: &mut Heap, _: Option<ObjRef>, args: &[Value]) -> OpalResult<Value> {
    expect_argc(args, 1)?;
    heap.cdr(args[0])
}

fn native_list(heap: &mut Heap, _: Option<ObjRef>, args: &[Value]) -> OpalResult<Value> {
    Ok(heap.list(args))
}

fn native_string_append(heap: &mut Heap, _: Option<ObjRef>, args: &[Value]) -> OpalResult<Value> {
    let mut acc = Value::Obj(heap.make_string(b""));
    for &a in args {
        acc = Value::Obj(heap.str_concat(acc, a)?);
    }
    Ok(acc)
}
