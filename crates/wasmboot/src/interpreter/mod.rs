use crate::instance::{FuncInst, Instance, Memory, Table};
use crate::linker::{Caller, HostFunc};
use crate::parse::func::FuncIdx;
use crate::stack::Stack;
use crate::{Module, Store, Val};

mod exec;
mod numeric;

/// A runtime fault raised while executing guest code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Trap {
    #[error("unreachable executed")]
    Unreachable,
    #[error("out of fuel")]
    OutOfFuel,
    #[error("call stack exhausted")]
    CallStackExhausted,
    #[error("out of bounds memory access")]
    MemoryOutOfBounds,
    #[error("out of bounds table access")]
    TableOutOfBounds,
    #[error("uninitialized element")]
    UninitializedElement,
    #[error("indirect call type mismatch")]
    IndirectCallTypeMismatch,
    #[error("integer divide by zero")]
    IntegerDivideByZero,
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("invalid conversion to integer")]
    InvalidConversionToInteger,
    #[error("unimplemented instruction: {0}")]
    Unimplemented(String),
    #[error("host error: {0}")]
    Host(String),
    /// The guest asked the host to end execution with an exit code.
    #[error("guest exited with code {0}")]
    Exit(i32),
}

impl Trap {
    pub fn host(message: impl Into<String>) -> Self {
        Trap::Host(message.into())
    }
}

/// Everything a running call can touch, split out of the instance so the
/// function table stays shared while globals and memory are mutated.
pub(crate) struct Env<'a, T> {
    pub(crate) module: &'a Module,
    pub(crate) funcs: &'a [FuncInst<T>],
    pub(crate) globals: &'a mut [u64],
    pub(crate) memory: &'a mut Option<Memory>,
    pub(crate) tables: &'a [Table],
    pub(crate) store: &'a mut Store<T>,
}

/// Call a function of `instance` from the host.
pub(crate) fn call<T>(
    instance: &mut Instance<T>,
    store: &mut Store<T>,
    func_idx: FuncIdx,
    args: &[Val],
) -> Result<Vec<Val>, Trap> {
    let Instance {
        module,
        funcs,
        globals,
        memory,
        tables,
        stack,
    } = instance;

    let results = module
        .func_type(func_idx)
        .map(|ty| ty.results().to_vec())
        .unwrap_or_default();

    let return_sp = stack.len();

    // Push args onto the operand stack.
    for arg in args {
        stack.push_val(arg);
    }

    let mut env = Env {
        module,
        funcs,
        globals,
        memory,
        tables,
        store,
    };
    let outcome = invoke(&mut env, stack, func_idx, 1);

    match outcome {
        Ok(()) => {
            let raw = stack.pop_n(results.len());
            stack.truncate(return_sp);
            Ok(raw
                .iter()
                .zip(&results)
                .map(|(raw, ty)| Val::from_raw(*raw, ty))
                .collect())
        }
        Err(trap) => {
            stack.truncate(return_sp);
            Err(trap)
        }
    }
}

/// Set up a frame and execute a function. Used by both the host entry
/// point and the `call` opcodes; arguments are already on the stack.
pub(crate) fn invoke<T>(
    env: &mut Env<'_, T>,
    stack: &mut Stack,
    func_idx: FuncIdx,
    depth: u32,
) -> Result<(), Trap> {
    if depth > env.store.max_call_depth {
        return Err(Trap::CallStackExhausted);
    }

    let funcs = env.funcs;
    match funcs.get(func_idx.0 as usize) {
        Some(FuncInst::Local) => {
            let module = env.module;
            let func = module
                .get_func(func_idx)
                .ok_or(Trap::UninitializedElement)?;
            let mut locals = stack.pop_n(func.param_count);
            locals.resize(func.locals.len(), 0);
            exec::execute(env, stack, func, &mut locals, depth)
        }
        Some(FuncInst::Host(host)) => call_host(env, stack, host),
        None => Err(Trap::UninitializedElement),
    }
}

fn call_host<T>(env: &mut Env<'_, T>, stack: &mut Stack, host: &HostFunc<T>) -> Result<(), Trap> {
    let ty = host.ty();
    let args: Vec<Val> = stack
        .pop_n(ty.params().len())
        .iter()
        .zip(ty.params())
        .map(|(raw, ty)| Val::from_raw(*raw, ty))
        .collect();

    let caller = Caller {
        data: env.store.data_mut(),
        memory: env.memory.as_mut(),
    };
    let results = host.call(caller, &args)?;

    let well_typed = results.len() == ty.results().len()
        && results.iter().zip(ty.results()).all(|(v, t)| v.matches(t));
    if !well_typed {
        return Err(Trap::host(format!(
            "host function returned {results:?}, declared {ty}"
        )));
    }
    for val in &results {
        stack.push_val(val);
    }
    Ok(())
}
