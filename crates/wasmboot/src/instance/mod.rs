pub mod memory;

pub use memory::{Memory, PAGE_SIZE};

use crate::interpreter::Trap;
use crate::linker::HostFunc;
use crate::parse::func::{FuncIdx, FuncType};
use crate::parse::{ConstInit, ConstOp, ExternKind};
use crate::stack::Stack;
use crate::value::{Val, WasmArgs, WasmResults};
use crate::{Module, Store, interpreter};

/// An instantiated WASM module.
pub struct Instance<T> {
    pub(crate) module: Module,
    /// Every function in the index space, imports first.
    pub(crate) funcs: Vec<FuncInst<T>>,
    /// Global values as raw slots, imports first.
    pub(crate) globals: Vec<u64>,
    pub(crate) memory: Option<Memory>,
    pub(crate) tables: Vec<Table>,
    pub(crate) stack: Stack,
}

pub(crate) enum FuncInst<T> {
    /// Defined by the module; the body lives in the parsed module.
    Local,
    Host(HostFunc<T>),
}

/// A funcref table. Each element is a function index or null.
#[derive(Debug, Clone)]
pub(crate) struct Table {
    pub(crate) elements: Vec<Option<u32>>,
}

/// Why a call into an instance failed.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("export `{0}` not found")]
    MissingExport(String),
    #[error("export `{name}` is a {kind}, not a function")]
    NotAFunction { name: String, kind: ExternKind },
    #[error("arguments to `{name}` do not match its signature {expected}")]
    ArgumentMismatch { name: String, expected: String },
    #[error(transparent)]
    Trap(#[from] Trap),
}

impl<T> Instance<T> {
    /// Allocate and initialize an instance from resolved imports, then run
    /// the start function if the module declares one.
    pub(crate) fn new(
        store: &mut Store<T>,
        module: &Module,
        imported_funcs: Vec<HostFunc<T>>,
        imported_globals: Vec<u64>,
    ) -> Result<Self, Trap> {
        let parsed = &module.inner;

        let funcs = imported_funcs
            .into_iter()
            .map(FuncInst::Host)
            .chain(std::iter::repeat_with(|| FuncInst::Local).take(parsed.funcs.len()))
            .collect();

        // Local globals may refer to any earlier global.
        let mut globals = imported_globals;
        for def in &parsed.globals {
            let value = eval_const(&def.init, &globals);
            globals.push(value);
        }

        let mut memory = parsed
            .memories
            .first()
            .map(|limits| Memory::new(limits.initial, limits.maximum))
            .transpose()?;

        let mut tables: Vec<Table> = parsed
            .tables
            .iter()
            .map(|limits| Table {
                elements: vec![None; limits.initial as usize],
            })
            .collect();

        for segment in &parsed.elements {
            let Some((table_idx, offset)) = &segment.active else {
                continue;
            };
            let offset = eval_const(offset, &globals) as u32 as usize;
            let table = tables
                .get_mut(*table_idx as usize)
                .ok_or(Trap::TableOutOfBounds)?;
            let end = offset
                .checked_add(segment.items.len())
                .filter(|end| *end <= table.elements.len())
                .ok_or(Trap::TableOutOfBounds)?;
            for (slot, item) in table.elements[offset..end].iter_mut().zip(&segment.items) {
                *slot = eval_const(item, &globals).checked_sub(1).map(|idx| idx as u32);
            }
        }

        for segment in &parsed.data {
            let Some(offset) = &segment.offset else {
                continue;
            };
            let offset = eval_const(offset, &globals) as u32 as u64;
            let mem = memory.as_mut().ok_or(Trap::MemoryOutOfBounds)?;
            mem.write(offset, &segment.bytes)?;
        }

        let mut instance = Self {
            module: module.clone(),
            funcs,
            globals,
            memory,
            tables,
            stack: Stack::new(),
        };

        if let Some(start) = parsed.start {
            interpreter::call(&mut instance, store, FuncIdx(start), &[])?;
        }
        Ok(instance)
    }

    /// Call an exported function by name (typed API).
    pub fn call<A: WasmArgs, R: WasmResults>(
        &mut self,
        store: &mut Store<T>,
        name: &str,
        args: A,
    ) -> Result<R, anyhow::Error> {
        let vals = self.call_dynamic(store, name, &args.to_vals())?;
        R::from_vals(&vals)
    }

    /// Call an exported function by name (dynamic API).
    pub fn call_dynamic(
        &mut self,
        store: &mut Store<T>,
        name: &str,
        args: &[Val],
    ) -> Result<Vec<Val>, CallError> {
        let func_idx = self.resolve_export_func_idx(name)?;

        if let Some(ty) = self.module.func_type(func_idx) {
            let well_typed = args.len() == ty.params().len()
                && args.iter().zip(ty.params()).all(|(arg, ty)| arg.matches(ty));
            if !well_typed {
                return Err(CallError::ArgumentMismatch {
                    name: name.to_string(),
                    expected: ty.to_string(),
                });
            }
        }

        Ok(interpreter::call(self, store, func_idx, args)?)
    }

    /// Get an exported global's value by name.
    pub fn get_global(&self, name: &str) -> Option<Val> {
        let export = self.module.get_export(name)?;
        if export.kind != ExternKind::Global {
            return None;
        }
        let ty = self.module.inner.global_types.get(export.index as usize)?;
        let raw = *self.globals.get(export.index as usize)?;
        Some(Val::from_raw(raw, &ty.content))
    }

    /// The instance's linear memory, if it defines one.
    pub fn memory(&self) -> Option<&Memory> {
        self.memory.as_ref()
    }

    pub fn memory_mut(&mut self) -> Option<&mut Memory> {
        self.memory.as_mut()
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn export_func_type(&self, name: &str) -> Option<&FuncType> {
        self.module.export_func_type(name)
    }

    pub(crate) fn resolve_export_func_idx(&self, name: &str) -> Result<FuncIdx, CallError> {
        let export = self
            .module
            .get_export(name)
            .ok_or_else(|| CallError::MissingExport(name.to_string()))?;
        match export.kind {
            ExternKind::Func => Ok(FuncIdx(export.index)),
            kind => Err(CallError::NotAFunction {
                name: name.to_string(),
                kind,
            }),
        }
    }
}

/// Evaluate a constant initializer against the globals defined so far.
/// Validation guarantees the expression is well typed.
fn eval_const(init: &ConstInit, globals: &[u64]) -> u64 {
    let mut stack: Vec<u64> = Vec::with_capacity(2);
    for op in &init.ops {
        let value = match *op {
            ConstOp::I32(v) => v as u32 as u64,
            ConstOp::I64(v) => v as u64,
            ConstOp::F32(bits) => bits as u64,
            ConstOp::F64(bits) => bits,
            ConstOp::GlobalGet(idx) => globals.get(idx as usize).copied().unwrap_or_default(),
            ConstOp::RefNull => 0,
            ConstOp::RefFunc(idx) => idx as u64 + 1,
            ConstOp::I32Add | ConstOp::I32Sub | ConstOp::I32Mul => {
                let b = stack.pop().unwrap_or_default() as u32;
                let a = stack.pop().unwrap_or_default() as u32;
                let r = match op {
                    ConstOp::I32Add => a.wrapping_add(b),
                    ConstOp::I32Sub => a.wrapping_sub(b),
                    _ => a.wrapping_mul(b),
                };
                r as u64
            }
            ConstOp::I64Add | ConstOp::I64Sub | ConstOp::I64Mul => {
                let b = stack.pop().unwrap_or_default();
                let a = stack.pop().unwrap_or_default();
                match op {
                    ConstOp::I64Add => a.wrapping_add(b),
                    ConstOp::I64Sub => a.wrapping_sub(b),
                    _ => a.wrapping_mul(b),
                }
            }
        };
        stack.push(value);
    }
    stack.pop().unwrap_or_default()
}
