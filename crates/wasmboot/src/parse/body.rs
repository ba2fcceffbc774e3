use wasmparser::{BlockType, FunctionBody, MemArg, Operator};

use super::CompileError;
use super::func::FuncType;
use super::numeric::{self, NumOp};


/// A parsed function body, pre-decoded from raw wasm bytes.
#[derive(Debug, Clone, Default)]
pub(crate) struct ParsedBody {
    /// Op table: one entry per instruction.
    pub(crate) ops: Vec<Op>,

    /// Block metadata, indexed by block index. Index 0 is the function.
    pub(crate) blocks: Vec<Block>,

    /// Flattened `br_table` targets. Each table's default label is its
    /// last entry.
    pub(crate) br_tables: Vec<u32>,

    /// Names of instructions that validated but the interpreter does not
    /// execute.
    pub(crate) unsupported: Vec<String>,
}

/// A single decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Op {
    Nop,
    Unreachable,
    Return,
    Drop,
    Select,

    Block(u32), // block index
    Loop(u32),  // block index
    If(u32),    // block index
    Else(u32),  // block index
    End(u32),   // block index
    Br(u32),    // relative label depth
    BrIf(u32),  // relative label depth
    BrTable { first: u32, len: u32 },

    Call(u32), // function index
    CallIndirect { type_idx: u32, table: u32 },

    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    GlobalGet(u32),
    GlobalSet(u32),

    Load(LoadKind, u64),   // offset
    Store(StoreKind, u64), // offset
    MemorySize,
    MemoryGrow,

    I32Const(i32),
    I64Const(i64),
    F32Const(u32),
    F64Const(u64),

    RefNull,
    RefFunc(u32),
    RefIsNull,

    Num(NumOp),

    /// Traps when executed. Index into `ParsedBody::unsupported`.
    Unsupported(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadKind {
    I32,
    I64,
    F32,
    F64,
    I32S8,
    I32U8,
    I32S16,
    I32U16,
    I64S8,
    I64U8,
    I64S16,
    I64U16,
    I64S32,
    I64U32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StoreKind {
    I32,
    I64,
    F32,
    F64,
    I32Narrow8,
    I32Narrow16,
    I64Narrow8,
    I64Narrow16,
    I64Narrow32,
}

/// Metadata for a block/loop/if/function, resolved at parse time.
#[derive(Debug, Clone)]
pub(crate) struct Block {
    pub(crate) kind: BlockKind,
    /// PC of the block opener (block/loop/if instruction).
    pub(crate) start_pc: u32,
    /// PC of the `end` instruction (patched when `end` is parsed).
    pub(crate) end_pc: u32,
    /// PC of the `else` instruction, if the `if` has one.
    pub(crate) else_pc: Option<u32>,
    pub(crate) params: u32,
    pub(crate) results: u32,
}

impl Block {
    /// Number of values a branch to this block's label carries.
    pub(crate) fn branch_arity(&self) -> u32 {
        match self.kind {
            BlockKind::Loop => self.params,
            _ => self.results,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum BlockKind {
    /// Implicit function-level block.
    Function,
    Block,
    Loop,
    If,
}

impl ParsedBody {
    /// Parse raw wasm function body bytes into a pre-decoded body.
    ///
    /// `types` is the module's type section, used to resolve multi-value
    /// block types; `results` is the function's result count.
    pub(crate) fn parse(
        reader: &FunctionBody,
        types: &[FuncType],
        results: usize,
    ) -> Result<Self, CompileError> {
        let mut body = Self::default();

        // Implicit function-level block (index 0).
        let func_block_idx = body.open_block(BlockKind::Function, 0, results as u32);

        // Track open block indices so `end` can find the right one.
        let mut block_stack: Vec<u32> = vec![func_block_idx];

        for op in reader.get_operators_reader()? {
            body.parse_op(op?, types, &mut block_stack)?;
        }
        if !block_stack.is_empty() {
            return Err(CompileError::Malformed("function body is missing `end`".into()));
        }
        Ok(body)
    }

    /// Allocate a new block entry, returning its index.
    fn open_block(&mut self, kind: BlockKind, params: u32, results: u32) -> u32 {
        let idx = self.blocks.len() as u32;
        self.blocks.push(Block {
            kind,
            start_pc: self.ops.len() as u32,
            end_pc: 0,
            else_pc: None,
            params,
            results,
        });
        idx
    }

    fn open_typed_block(
        &mut self,
        kind: BlockKind,
        blockty: BlockType,
        types: &[FuncType],
        block_stack: &mut Vec<u32>,
    ) -> Result<u32, CompileError> {
        let (params, results) = block_arity(blockty, types)?;
        let idx = self.open_block(kind, params, results);
        block_stack.push(idx);
        Ok(idx)
    }

    fn parse_op(
        &mut self,
        op: Operator,
        types: &[FuncType],
        block_stack: &mut Vec<u32>,
    ) -> Result<(), CompileError> {
        let decoded = match op {
            Operator::Nop => Op::Nop,
            Operator::Unreachable => Op::Unreachable,
            Operator::Return => Op::Return,
            Operator::Drop => Op::Drop,
            Operator::Select | Operator::TypedSelect { .. } => Op::Select,

            // Block control flow
            Operator::Block { blockty } => {
                Op::Block(self.open_typed_block(BlockKind::Block, blockty, types, block_stack)?)
            }
            Operator::Loop { blockty } => {
                Op::Loop(self.open_typed_block(BlockKind::Loop, blockty, types, block_stack)?)
            }
            Operator::If { blockty } => {
                Op::If(self.open_typed_block(BlockKind::If, blockty, types, block_stack)?)
            }
            Operator::Else => {
                let &idx = block_stack
                    .last()
                    .ok_or_else(|| CompileError::Malformed("else without open block".into()))?;
                self.blocks[idx as usize].else_pc = Some(self.ops.len() as u32);
                Op::Else(idx)
            }
            Operator::End => {
                let idx = block_stack
                    .pop()
                    .ok_or_else(|| CompileError::Malformed("end without open block".into()))?;
                self.blocks[idx as usize].end_pc = self.ops.len() as u32;
                Op::End(idx)
            }
            Operator::Br { relative_depth } => Op::Br(relative_depth),
            Operator::BrIf { relative_depth } => Op::BrIf(relative_depth),
            Operator::BrTable { targets } => {
                let first = self.br_tables.len() as u32;
                for target in targets.targets() {
                    self.br_tables.push(target?);
                }
                self.br_tables.push(targets.default());
                let len = self.br_tables.len() as u32 - first;
                Op::BrTable { first, len }
            }

            // Calls
            Operator::Call { function_index } => Op::Call(function_index),
            Operator::CallIndirect {
                type_index,
                table_index,
            } => Op::CallIndirect {
                type_idx: type_index,
                table: table_index,
            },

            // Variables
            Operator::LocalGet { local_index } => Op::LocalGet(local_index),
            Operator::LocalSet { local_index } => Op::LocalSet(local_index),
            Operator::LocalTee { local_index } => Op::LocalTee(local_index),
            Operator::GlobalGet { global_index } => Op::GlobalGet(global_index),
            Operator::GlobalSet { global_index } => Op::GlobalSet(global_index),

            // Memory
            Operator::I32Load { memarg } => self.load(LoadKind::I32, memarg, "i32.load"),
            Operator::I64Load { memarg } => self.load(LoadKind::I64, memarg, "i64.load"),
            Operator::F32Load { memarg } => self.load(LoadKind::F32, memarg, "f32.load"),
            Operator::F64Load { memarg } => self.load(LoadKind::F64, memarg, "f64.load"),
            Operator::I32Load8S { memarg } => self.load(LoadKind::I32S8, memarg, "i32.load8_s"),
            Operator::I32Load8U { memarg } => self.load(LoadKind::I32U8, memarg, "i32.load8_u"),
            Operator::I32Load16S { memarg } => self.load(LoadKind::I32S16, memarg, "i32.load16_s"),
            Operator::I32Load16U { memarg } => self.load(LoadKind::I32U16, memarg, "i32.load16_u"),
            Operator::I64Load8S { memarg } => self.load(LoadKind::I64S8, memarg, "i64.load8_s"),
            Operator::I64Load8U { memarg } => self.load(LoadKind::I64U8, memarg, "i64.load8_u"),
            Operator::I64Load16S { memarg } => self.load(LoadKind::I64S16, memarg, "i64.load16_s"),
            Operator::I64Load16U { memarg } => self.load(LoadKind::I64U16, memarg, "i64.load16_u"),
            Operator::I64Load32S { memarg } => self.load(LoadKind::I64S32, memarg, "i64.load32_s"),
            Operator::I64Load32U { memarg } => self.load(LoadKind::I64U32, memarg, "i64.load32_u"),
            Operator::I32Store { memarg } => self.store(StoreKind::I32, memarg, "i32.store"),
            Operator::I64Store { memarg } => self.store(StoreKind::I64, memarg, "i64.store"),
            Operator::F32Store { memarg } => self.store(StoreKind::F32, memarg, "f32.store"),
            Operator::F64Store { memarg } => self.store(StoreKind::F64, memarg, "f64.store"),
            Operator::I32Store8 { memarg } => {
                self.store(StoreKind::I32Narrow8, memarg, "i32.store8")
            }
            Operator::I32Store16 { memarg } => {
                self.store(StoreKind::I32Narrow16, memarg, "i32.store16")
            }
            Operator::I64Store8 { memarg } => {
                self.store(StoreKind::I64Narrow8, memarg, "i64.store8")
            }
            Operator::I64Store16 { memarg } => {
                self.store(StoreKind::I64Narrow16, memarg, "i64.store16")
            }
            Operator::I64Store32 { memarg } => {
                self.store(StoreKind::I64Narrow32, memarg, "i64.store32")
            }
            Operator::MemorySize { mem: 0 } => Op::MemorySize,
            Operator::MemoryGrow { mem: 0 } => Op::MemoryGrow,

            // Constants
            Operator::I32Const { value } => Op::I32Const(value),
            Operator::I64Const { value } => Op::I64Const(value),
            Operator::F32Const { value } => Op::F32Const(value.bits()),
            Operator::F64Const { value } => Op::F64Const(value.bits()),

            // References
            Operator::RefNull { .. } => Op::RefNull,
            Operator::RefFunc { function_index } => Op::RefFunc(function_index),
            Operator::RefIsNull => Op::RefIsNull,

            other => match numeric::from_operator(&other) {
                Some(num) => Op::Num(num),
                None => self.unsupported(format!("{other:?}")),
            },
        };
        self.ops.push(decoded);
        Ok(())
    }

    fn load(&mut self, kind: LoadKind, memarg: MemArg, name: &str) -> Op {
        if memarg.memory != 0 {
            return self.unsupported(format!("{name} on memory {}", memarg.memory));
        }
        Op::Load(kind, memarg.offset)
    }

    fn store(&mut self, kind: StoreKind, memarg: MemArg, name: &str) -> Op {
        if memarg.memory != 0 {
            return self.unsupported(format!("{name} on memory {}", memarg.memory));
        }
        Op::Store(kind, memarg.offset)
    }

    /// Record an instruction the interpreter cannot execute. Only the
    /// mnemonic part of the operator's debug form is kept.
    fn unsupported(&mut self, debug: String) -> Op {
        let name = debug
            .split([' ', '{', '('])
            .next()
            .unwrap_or_default()
            .to_string();
        let idx = self.unsupported.len() as u32;
        self.unsupported.push(name);
        Op::Unsupported(idx)
    }
}

/// Resolve a block type to its `(params, results)` arity.
fn block_arity(blockty: BlockType, types: &[FuncType]) -> Result<(u32, u32), CompileError> {
    match blockty {
        BlockType::Empty => Ok((0, 0)),
        BlockType::Type(_) => Ok((0, 1)),
        BlockType::FuncType(idx) => {
            let ty = types.get(idx as usize).ok_or_else(|| {
                CompileError::Malformed(format!("block type {idx} is out of range"))
            })?;
            Ok((ty.params().len() as u32, ty.results().len() as u32))
        }
    }
}
