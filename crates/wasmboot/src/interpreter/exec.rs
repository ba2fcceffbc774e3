use super::{Env, Trap, invoke, numeric};
use crate::parse::body::{BlockKind, LoadKind, Op, ParsedBody, StoreKind};
use crate::parse::func::{FuncIdx, ParsedFunction};
use crate::stack::Stack;

/// A live control label: the block it belongs to and the operand stack
/// height at entry, below the block's params.
#[derive(Clone, Copy)]
struct Label {
    block: u32,
    height: usize,
}

/// Where execution continues after a branch.
enum Flow {
    Continue(usize),
    Return,
}

/// Run a function body to completion. Params are already in `locals`;
/// results are left on `stack` at the height the call started from.
pub(super) fn execute<T>(
    env: &mut Env<'_, T>,
    stack: &mut Stack,
    func: &ParsedFunction,
    locals: &mut [u64],
    depth: u32,
) -> Result<(), Trap> {
    let body = &func.body;
    let mut labels = vec![Label {
        block: 0,
        height: stack.len(),
    }];
    let mut pc = 0usize;

    while let Some(&op) = body.ops.get(pc) {
        if !env.store.consume_fuel() {
            return Err(Trap::OutOfFuel);
        }
        pc += 1;

        match op {
            Op::Nop => {}
            Op::Unreachable => return Err(Trap::Unreachable),
            Op::Return => {
                stack.unwind(labels[0].height, func.results.len());
                return Ok(());
            }
            Op::Drop => {
                stack.pop();
            }
            Op::Select => {
                let cond = stack.pop_i32();
                let b = stack.pop();
                let a = stack.pop();
                stack.push(if cond != 0 { a } else { b });
            }

            Op::Block(idx) | Op::Loop(idx) => {
                labels.push(enter(body, stack, idx));
            }
            Op::If(idx) => {
                let cond = stack.pop_i32();
                labels.push(enter(body, stack, idx));
                if cond == 0 {
                    let block = &body.blocks[idx as usize];
                    // The `end` (reached directly or past `else`) pops the label.
                    pc = match block.else_pc {
                        Some(else_pc) => else_pc as usize + 1,
                        None => block.end_pc as usize,
                    };
                }
            }
            Op::Else(idx) => {
                // Falling into `else` means the then-arm finished.
                pc = body.blocks[idx as usize].end_pc as usize;
            }
            Op::End(0) => {
                stack.unwind(labels[0].height, func.results.len());
                return Ok(());
            }
            Op::End(_) => {
                labels.pop();
            }
            Op::Br(rel) => match branch(body, stack, &mut labels, rel) {
                Flow::Continue(target) => pc = target,
                Flow::Return => return Ok(()),
            },
            Op::BrIf(rel) => {
                if stack.pop_i32() != 0 {
                    match branch(body, stack, &mut labels, rel) {
                        Flow::Continue(target) => pc = target,
                        Flow::Return => return Ok(()),
                    }
                }
            }
            Op::BrTable { first, len } => {
                let targets = &body.br_tables[first as usize..(first + len) as usize];
                let idx = stack.pop_i32() as u32 as usize;
                // Out-of-range indices take the default, stored last.
                let rel = targets
                    .get(idx.min(targets.len().saturating_sub(1)))
                    .copied()
                    .unwrap_or_default();
                match branch(body, stack, &mut labels, rel) {
                    Flow::Continue(target) => pc = target,
                    Flow::Return => return Ok(()),
                }
            }

            Op::Call(func_idx) => invoke(env, stack, FuncIdx(func_idx), depth + 1)?,
            Op::CallIndirect { type_idx, table } => {
                let elem = stack.pop_i32() as u32 as usize;
                let target = env
                    .tables
                    .get(table as usize)
                    .and_then(|table| table.elements.get(elem).copied())
                    .ok_or(Trap::TableOutOfBounds)?
                    .ok_or(Trap::UninitializedElement)?;
                let module = env.module;
                let expected = module.inner.types.get(type_idx as usize);
                if module.func_type(FuncIdx(target)) != expected {
                    return Err(Trap::IndirectCallTypeMismatch);
                }
                invoke(env, stack, FuncIdx(target), depth + 1)?;
            }

            Op::LocalGet(idx) => stack.push(locals[idx as usize]),
            Op::LocalSet(idx) => locals[idx as usize] = stack.pop(),
            Op::LocalTee(idx) => locals[idx as usize] = stack.peek(),
            Op::GlobalGet(idx) => stack.push(env.globals[idx as usize]),
            Op::GlobalSet(idx) => env.globals[idx as usize] = stack.pop(),

            Op::Load(kind, offset) => load(env, stack, kind, offset)?,
            Op::Store(kind, offset) => store(env, stack, kind, offset)?,
            Op::MemorySize => {
                let pages = env.memory.as_ref().map_or(0, |m| m.pages());
                stack.push_i32(pages as i32);
            }
            Op::MemoryGrow => {
                let delta = stack.pop_i32() as u32 as u64;
                let old = env.memory.as_mut().and_then(|m| m.grow(delta));
                stack.push_i32(old.map_or(-1, |pages| pages as i32));
            }

            Op::I32Const(v) => stack.push_i32(v),
            Op::I64Const(v) => stack.push_i64(v),
            Op::F32Const(bits) => stack.push(bits as u64),
            Op::F64Const(bits) => stack.push(bits),

            Op::RefNull => stack.push(0),
            Op::RefFunc(idx) => stack.push(idx as u64 + 1),
            Op::RefIsNull => {
                let is_null = stack.pop() == 0;
                stack.push_i32(is_null as i32);
            }

            Op::Num(num) => numeric::eval(num, stack)?,

            Op::Unsupported(idx) => {
                let name = body
                    .unsupported
                    .get(idx as usize)
                    .cloned()
                    .unwrap_or_default();
                return Err(Trap::Unimplemented(name));
            }
        }
    }

    Ok(())
}

fn enter(body: &ParsedBody, stack: &Stack, idx: u32) -> Label {
    let params = body.blocks[idx as usize].params as usize;
    Label {
        block: idx,
        height: stack.len().saturating_sub(params),
    }
}

/// Take the branch to the label `rel` levels out, unwinding the operand
/// stack to that label's height.
fn branch(body: &ParsedBody, stack: &mut Stack, labels: &mut Vec<Label>, rel: u32) -> Flow {
    let at = labels.len().saturating_sub(1 + rel as usize);
    let label = labels[at];
    let block = &body.blocks[label.block as usize];
    stack.unwind(label.height, block.branch_arity() as usize);

    match block.kind {
        BlockKind::Function => Flow::Return,
        // Loops restart and keep their label.
        BlockKind::Loop => {
            labels.truncate(at + 1);
            Flow::Continue(block.start_pc as usize + 1)
        }
        BlockKind::Block | BlockKind::If => {
            labels.truncate(at);
            Flow::Continue(block.end_pc as usize + 1)
        }
    }
}

fn effective_addr(stack: &mut Stack, offset: u64) -> Result<u64, Trap> {
    let base = stack.pop_i32() as u32 as u64;
    base.checked_add(offset).ok_or(Trap::MemoryOutOfBounds)
}

fn load<T>(env: &mut Env<'_, T>, stack: &mut Stack, kind: LoadKind, offset: u64) -> Result<(), Trap> {
    let addr = effective_addr(stack, offset)?;
    let mem = env.memory.as_ref().ok_or(Trap::MemoryOutOfBounds)?;

    match kind {
        LoadKind::I32 => stack.push_i32(i32::from_le_bytes(mem.load(addr)?)),
        LoadKind::I64 => stack.push_i64(i64::from_le_bytes(mem.load(addr)?)),
        LoadKind::F32 => stack.push(u32::from_le_bytes(mem.load(addr)?) as u64),
        LoadKind::F64 => stack.push(u64::from_le_bytes(mem.load(addr)?)),
        LoadKind::I32S8 => stack.push_i32(i8::from_le_bytes(mem.load(addr)?) as i32),
        LoadKind::I32U8 => stack.push_i32(u8::from_le_bytes(mem.load(addr)?) as i32),
        LoadKind::I32S16 => stack.push_i32(i16::from_le_bytes(mem.load(addr)?) as i32),
        LoadKind::I32U16 => stack.push_i32(u16::from_le_bytes(mem.load(addr)?) as i32),
        LoadKind::I64S8 => stack.push_i64(i8::from_le_bytes(mem.load(addr)?) as i64),
        LoadKind::I64U8 => stack.push_i64(u8::from_le_bytes(mem.load(addr)?) as i64),
        LoadKind::I64S16 => stack.push_i64(i16::from_le_bytes(mem.load(addr)?) as i64),
        LoadKind::I64U16 => stack.push_i64(u16::from_le_bytes(mem.load(addr)?) as i64),
        LoadKind::I64S32 => stack.push_i64(i32::from_le_bytes(mem.load(addr)?) as i64),
        LoadKind::I64U32 => stack.push_i64(u32::from_le_bytes(mem.load(addr)?) as i64),
    }
    Ok(())
}

fn store<T>(
    env: &mut Env<'_, T>,
    stack: &mut Stack,
    kind: StoreKind,
    offset: u64,
) -> Result<(), Trap> {
    let value = stack.pop();
    let addr = effective_addr(stack, offset)?;
    let mem = env.memory.as_mut().ok_or(Trap::MemoryOutOfBounds)?;

    match kind {
        StoreKind::I32 | StoreKind::F32 | StoreKind::I64Narrow32 => {
            mem.write(addr, &(value as u32).to_le_bytes())
        }
        StoreKind::I64 | StoreKind::F64 => mem.write(addr, &value.to_le_bytes()),
        StoreKind::I32Narrow8 | StoreKind::I64Narrow8 => mem.write(addr, &[value as u8]),
        StoreKind::I32Narrow16 | StoreKind::I64Narrow16 => {
            mem.write(addr, &(value as u16).to_le_bytes())
        }
    }
}
