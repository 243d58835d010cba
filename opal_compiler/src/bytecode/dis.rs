//! Disassembler for procedure descriptors.

use super::instruction::Instruction;
use opal_runtime::{Heap, ObjRef, OpalResult, TypeTag, Value};
use std::fmt::Write;

/// Render a descriptor and its nested descriptors as a listing.
pub fn disassemble(heap: &Heap, irep: ObjRef) -> OpalResult<String> {
    let mut out = String::new();
    disassemble_into(heap, irep, 0, &mut out)?;
    Ok(out)
}

fn disassemble_into(heap: &Heap, irep: ObjRef, level: usize, out: &mut String) -> OpalResult<()> {
    let indent = "  ".repeat(level);
    let desc = heap.irep(irep)?;
    let argc = desc.argc();
    let variadic = desc.is_variadic();
    let frame_size = desc.frame_size();
    let consts: Vec<Value> = desc.consts().to_vec();
    let nested: Vec<ObjRef> = desc.ireps().to_vec();
    let code: Vec<u8> = desc.code().bytes().to_vec();
    let code_static = desc.code().is_static();

    writeln!(
        out,
        "{}irep: argc={}{} frame={} code={}B{}",
        indent,
        argc,
        if variadic { "+" } else { "" },
        frame_size,
        code.len(),
        if code_static { " (static)" } else { "" },
    )
    .unwrap();

    if !consts.is_empty() {
        writeln!(out, "{}constants:", indent).unwrap();
        for (i, c) in consts.iter().enumerate() {
            writeln!(out, "{}  [{}] {}", indent, i, render_const(heap, *c)).unwrap();
        }
    }

    let mut pc = 0;
    while pc < code.len() {
        let (inst, next) = Instruction::decode(&code, pc)?;
        writeln!(out, "{}  {:4}: {}", indent, pc, inst).unwrap();
        pc = next;
    }

    for r in nested {
        disassemble_into(heap, r, level + 1, out)?;
    }
    Ok(())
}

fn render_const(heap: &Heap, v: Value) -> String {
    match heap.tag_of(v) {
        Some(TypeTag::Str) => match heap.str_display(v) {
            Ok(text) => format!("{:?}", text),
            Err(_) => "<string>".to_string(),
        },
        Some(TypeTag::Symbol) => match heap.symbol_string(v).and_then(|s| heap.str_display(s)) {
            Ok(text) => text,
            Err(_) => "<symbol>".to_string(),
        },
        Some(tag) => format!("<{}>", tag.name()),
        None => format!("{:?}", v),
    }
}
