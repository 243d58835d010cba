//! Decoded instruction view and structural verification.
//!
//! Instruction streams are compiler-generated in-process; verification exists
//! to uphold the descriptor invariant that code length and operand layout
//! match the declared opcode at every offset, not to admit foreign bytecode.

use super::opcode::Opcode;
use opal_runtime::{OpalError, OpalResult};
use std::fmt;

/// One decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Halt,
    Call { argc: u8 },
    Proc { dest: u8, irep: u8 },
    Load { dest: u8, index: u8 },
    Lref { dest: u8, depth: u8, index: u8 },
    Lset { src: u8, depth: u8, index: u8 },
    Gref { dest: u8, slot: u8 },
    Gset { src: u8, slot: u8 },
    Cond { cond: u8, offset: i16 },
    Loadt { dest: u8 },
    Loadf { dest: u8 },
    Loadn { dest: u8 },
    Loadu { dest: u8 },
    Loadi { dest: u8, imm: i8 },
}

impl Instruction {
    /// Decode the instruction at `pc`, returning it and the next offset.
    pub fn decode(code: &[u8], pc: usize) -> OpalResult<(Instruction, usize)> {
        let byte = *code
            .get(pc)
            .ok_or(OpalError::TruncatedInstruction { offset: pc })?;
        let op = Opcode::from_byte(byte).ok_or(OpalError::UnknownOpcode { byte, offset: pc })?;
        let end = pc + 1 + op.operand_len();
        if end > code.len() {
            return Err(OpalError::TruncatedInstruction { offset: pc });
        }
        let ops = &code[pc + 1..end];
        let inst = match op {
            Opcode::Halt => Instruction::Halt,
            Opcode::Call => Instruction::Call { argc: ops[0] },
            Opcode::Proc => Instruction::Proc {
                dest: ops[0],
                irep: ops[1],
            },
            Opcode::Load => Instruction::Load {
                dest: ops[0],
                index: ops[1],
            },
            Opcode::Lref => Instruction::Lref {
                dest: ops[0],
                depth: ops[1],
                index: ops[2],
            },
            Opcode::Lset => Instruction::Lset {
                src: ops[0],
                depth: ops[1],
                index: ops[2],
            },
            Opcode::Gref => Instruction::Gref {
                dest: ops[0],
                slot: ops[1],
            },
            Opcode::Gset => Instruction::Gset {
                src: ops[0],
                slot: ops[1],
            },
            Opcode::Cond => Instruction::Cond {
                cond: ops[0],
                offset: i16::from_le_bytes([ops[1], ops[2]]),
            },
            Opcode::Loadt => Instruction::Loadt { dest: ops[0] },
            Opcode::Loadf => Instruction::Loadf { dest: ops[0] },
            Opcode::Loadn => Instruction::Loadn { dest: ops[0] },
            Opcode::Loadu => Instruction::Loadu { dest: ops[0] },
            Opcode::Loadi => Instruction::Loadi {
                dest: ops[0],
                imm: ops[1] as i8,
            },
        };
        Ok((inst, end))
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Halt => Opcode::Halt,
            Instruction::Call { .. } => Opcode::Call,
            Instruction::Proc { .. } => Opcode::Proc,
            Instruction::Load { .. } => Opcode::Load,
            Instruction::Lref { .. } => Opcode::Lref,
            Instruction::Lset { .. } => Opcode::Lset,
            Instruction::Gref { .. } => Opcode::Gref,
            Instruction::Gset { .. } => Opcode::Gset,
            Instruction::Cond { .. } => Opcode::Cond,
            Instruction::Loadt { .. } => Opcode::Loadt,
            Instruction::Loadf { .. } => Opcode::Loadf,
            Instruction::Loadn { .. } => Opcode::Loadn,
            Instruction::Loadu { .. } => Opcode::Loadu,
            Instruction::Loadi { .. } => Opcode::Loadi,
        }
    }

    /// Encoded size including the opcode byte.
    pub fn encoded_len(&self) -> usize {
        1 + self.opcode().operand_len()
    }

    /// Append the encoding to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.opcode() as u8);
        match *self {
            Instruction::Halt => {}
            Instruction::Call { argc } => out.push(argc),
            Instruction::Proc { dest, irep } => out.extend([dest, irep]),
            Instruction::Load { dest, index } => out.extend([dest, index]),
            Instruction::Lref { dest, depth, index } => out.extend([dest, depth, index]),
            Instruction::Lset { src, depth, index } => out.extend([src, depth, index]),
            Instruction::Gref { dest, slot } => out.extend([dest, slot]),
            Instruction::Gset { src, slot } => out.extend([src, slot]),
            Instruction::Cond { cond, offset } => {
                out.push(cond);
                out.extend(offset.to_le_bytes());
            }
            Instruction::Loadt { dest }
            | Instruction::Loadf { dest }
            | Instruction::Loadn { dest }
            | Instruction::Loadu { dest } => out.push(dest),
            Instruction::Loadi { dest, imm } => out.extend([dest, imm as u8]),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Instruction::Halt => write!(f, "HALT"),
            Instruction::Call { argc } => write!(f, "CALL {}", argc),
            Instruction::Proc { dest, irep } => write!(f, "PROC r{} irep[{}]", dest, irep),
            Instruction::Load { dest, index } => write!(f, "LOAD r{} const[{}]", dest, index),
            Instruction::Lref { dest, depth, index } => {
                write!(f, "LREF r{} up{} [{}]", dest, depth, index)
            }
            Instruction::Lset { src, depth, index } => {
                write!(f, "LSET r{} up{} [{}]", src, depth, index)
            }
            Instruction::Gref { dest, slot } => write!(f, "GREF r{} g{}", dest, slot),
            Instruction::Gset { src, slot } => write!(f, "GSET r{} g{}", src, slot),
            Instruction::Cond { cond, offset } => write!(f, "COND r{} {:+}", cond, offset),
            Instruction::Loadt { dest } => write!(f, "LOADT r{}", dest),
            Instruction::Loadf { dest } => write!(f, "LOADF r{}", dest),
            Instruction::Loadn { dest } => write!(f, "LOADN r{}", dest),
            Instruction::Loadu { dest } => write!(f, "LOADU r{}", dest),
            Instruction::Loadi { dest, imm } => write!(f, "LOADI r{} {}", dest, imm),
        }
    }
}

/// Structurally verify a byte stream against its descriptor's declared
/// constant count, nested-descriptor count, and frame size.
///
/// Checks that every offset decodes, no instruction is partial, operand
/// indices are in range for the current frame, and every COND target lands
/// on an instruction boundary. Depths and target-frame slot indices are
/// dynamic and checked at execution time.
pub fn verify(code: &[u8], consts: usize, ireps: usize, frame_size: u8) -> OpalResult<()> {
    let mut boundaries = vec![false; code.len() + 1];
    let mut branches: Vec<(usize, usize, i16)> = Vec::new();
    let mut pc = 0;
    while pc < code.len() {
        boundaries[pc] = true;
        let (inst, next) = Instruction::decode(code, pc)?;
        let reg_check = |reg: u8, what: &'static str| -> OpalResult<()> {
            if reg >= frame_size {
                return Err(OpalError::InvalidOperand { offset: pc, what });
            }
            Ok(())
        };
        match inst {
            Instruction::Halt => {}
            Instruction::Call { argc } => {
                if argc > frame_size {
                    return Err(OpalError::InvalidOperand {
                        offset: pc,
                        what: "argument count",
                    });
                }
            }
            Instruction::Proc { dest, irep } => {
                reg_check(dest, "register")?;
                if usize::from(irep) >= ireps {
                    return Err(OpalError::InvalidOperand {
                        offset: pc,
                        what: "descriptor index",
                    });
                }
            }
            Instruction::Load { dest, index } => {
                reg_check(dest, "register")?;
                if usize::from(index) >= consts {
                    return Err(OpalError::InvalidOperand {
                        offset: pc,
                        what: "constant index",
                    });
                }
            }
            Instruction::Lref { dest, depth, index } => {
                reg_check(dest, "register")?;
                if depth == 0 {
                    reg_check(index, "register")?;
                }
            }
            Instruction::Lset { src, depth, index } => {
                reg_check(src, "register")?;
                if depth == 0 {
                    reg_check(index, "register")?;
                }
            }
            Instruction::Gref { dest, .. } => reg_check(dest, "register")?,
            Instruction::Gset { src, .. } => reg_check(src, "register")?,
            Instruction::Cond { cond, offset } => {
                reg_check(cond, "register")?;
                branches.push((pc, next, offset));
            }
            Instruction::Loadt { dest }
            | Instruction::Loadf { dest }
            | Instruction::Loadn { dest }
            | Instruction::Loadu { dest }
            | Instruction::Loadi { dest, .. } => reg_check(dest, "register")?,
        }
        pc = next;
    }
    boundaries[code.len()] = true;
    for (at, next, offset) in branches {
        let target = next as i64 + offset as i64;
        if target < 0 || target > code.len() as i64 || !boundaries[target as usize] {
            return Err(OpalError::InvalidOperand {
                offset: at,
                what: "branch target",
            });
        }
    }
    Ok(())
}
