//! Host import table for module instantiation.
//!
//! The [`ImportTable`] collects host functions and globals keyed by
//! `(module, name)` and resolves them against a module's declared imports
//! during instantiation.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;
use wasmparser::ValType;

use crate::instance::{Instance, Memory};
use crate::interpreter::Trap;
use crate::parse::func::{FuncType, val_type_name};
use crate::parse::{ExternKind, ImportType};
use crate::{Module, Store, Val};

type HostCallback<T> = dyn Fn(Caller<'_, T>, &[Val]) -> Result<Vec<Val>, Trap> + Send + Sync;

/// A host function bound into an import table.
pub struct HostFunc<T> {
    ty: FuncType,
    callback: Arc<HostCallback<T>>,
}

impl<T> HostFunc<T> {
    pub fn ty(&self) -> &FuncType {
        &self.ty
    }

    pub(crate) fn call(&self, caller: Caller<'_, T>, args: &[Val]) -> Result<Vec<Val>, Trap> {
        (self.callback)(caller, args)
    }
}

impl<T> Clone for HostFunc<T> {
    fn clone(&self) -> Self {
        Self {
            ty: self.ty.clone(),
            callback: Arc::clone(&self.callback),
        }
    }
}

/// What a host function sees of the calling instance.
pub struct Caller<'a, T> {
    pub(crate) data: &'a mut T,
    pub(crate) memory: Option<&'a mut Memory>,
}

impl<T> Caller<'_, T> {
    pub fn data(&self) -> &T {
        &*self.data
    }

    pub fn data_mut(&mut self) -> &mut T {
        &mut *self.data
    }

    /// The caller's linear memory, if it has one.
    pub fn memory(&self) -> Option<&Memory> {
        self.memory.as_deref()
    }

    pub fn memory_mut(&mut self) -> Option<&mut Memory> {
        self.memory.as_deref_mut()
    }

    /// Read a `(ptr, len)` string out of the caller's memory.
    pub fn read_string(&self, ptr: u32, len: u32) -> Result<String, Trap> {
        self.memory()
            .ok_or(Trap::MemoryOutOfBounds)?
            .read_string(ptr as u64, len as usize)
    }
}

/// Entry in the import table.
enum Extern<T> {
    Func(HostFunc<T>),
    Global { value: Val, mutable: bool },
}

impl<T> Extern<T> {
    fn kind(&self) -> ExternKind {
        match self {
            Extern::Func(_) => ExternKind::Func,
            Extern::Global { .. } => ExternKind::Global,
        }
    }
}

impl<T> Clone for Extern<T> {
    fn clone(&self) -> Self {
        match self {
            Extern::Func(func) => Extern::Func(func.clone()),
            Extern::Global { value, mutable } => Extern::Global {
                value: *value,
                mutable: *mutable,
            },
        }
    }
}

/// Why a module's imports could not be satisfied.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LinkError {
    #[error("import `{module}.{name}` was not found")]
    MissingImport { module: String, name: String },
    #[error("import `{module}.{name}`: expected {expected} found {found}")]
    KindMismatch {
        module: String,
        name: String,
        expected: ExternKind,
        found: ExternKind,
    },
    #[error("import `{module}.{name}`: expected signature {expected} found {found}")]
    FuncSignature {
        module: String,
        name: String,
        expected: String,
        found: String,
    },
    #[error("import `{module}.{name}`: expected global {expected} found {found}")]
    GlobalType {
        module: String,
        name: String,
        expected: String,
        found: String,
    },
    #[error("import `{module}.{name}`: {kind} imports are not supported")]
    Unsupported {
        module: String,
        name: String,
        kind: ExternKind,
    },
}

/// Why instantiation failed: the imports did not link, or initialization
/// (segments, start function) trapped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InstantiationError {
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("instantiation trapped: {0}")]
    Trap(#[from] Trap),
}

/// A named import registry that resolves module imports during
/// instantiation.
///
/// Register host functions and globals, then call
/// [`ImportTable::instantiate`] to resolve a module's imports and produce
/// a live [`Instance`]. Linking never mutates the table, so one table can
/// serve any number of instantiations.
///
/// # Examples
///
/// ```ignore
/// let mut imports = ImportTable::new();
/// imports.func("env", "double", [ValType::I32], [ValType::I32], |_, args| match args {
///     [Val::I32(x)] => Ok(vec![Val::I32(x * 2)]),
///     _ => Err(Trap::host("double: bad arguments")),
/// });
/// let instance = imports.instantiate(&mut store, &module)?;
/// ```
pub struct ImportTable<T> {
    entries: HashMap<(String, String), Extern<T>>,
}

impl<T> Default for ImportTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for ImportTable<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<T> ImportTable<T> {
    /// Create an empty import table.
    pub fn new() -> Self {
        ImportTable {
            entries: HashMap::new(),
        }
    }

    /// Register a host function import.
    pub fn func<F>(
        &mut self,
        module: &str,
        name: &str,
        params: impl IntoIterator<Item = ValType>,
        results: impl IntoIterator<Item = ValType>,
        callback: F,
    ) -> &mut Self
    where
        F: Fn(Caller<'_, T>, &[Val]) -> Result<Vec<Val>, Trap> + Send + Sync + 'static,
    {
        let func = HostFunc {
            ty: FuncType::new(params, results),
            callback: Arc::new(callback),
        };
        self.entries
            .insert((module.to_string(), name.to_string()), Extern::Func(func));
        self
    }

    /// Register a global import.
    pub fn global(&mut self, module: &str, name: &str, value: Val, mutable: bool) -> &mut Self {
        self.entries.insert(
            (module.to_string(), name.to_string()),
            Extern::Global { value, mutable },
        );
        self
    }

    /// Check whether an import is already registered.
    pub fn has(&self, module: &str, name: &str) -> bool {
        self.entries
            .contains_key(&(module.to_string(), name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy every entry of `other` into this table; `other` wins on
    /// collisions.
    pub fn extend(&mut self, other: &ImportTable<T>) -> &mut Self {
        for (key, entry) in &other.entries {
            self.entries.insert(key.clone(), entry.clone());
        }
        self
    }

    /// Resolve a module's imports and instantiate it.
    ///
    /// For each import declared by the module:
    /// 1. Look up `(module, name)` in the registry.
    /// 2. Verify the registered kind matches the import kind.
    /// 3. Verify the function signature or global type.
    ///
    /// Then allocate the instance, apply segments and run the start
    /// function.
    pub fn instantiate(
        &self,
        store: &mut Store<T>,
        module: &Module,
    ) -> Result<Instance<T>, InstantiationError> {
        let mut funcs = Vec::new();
        let mut globals = Vec::new();

        for import in module.imports() {
            let missing = || LinkError::MissingImport {
                module: import.module.clone(),
                name: import.name.clone(),
            };
            let entry = self
                .entries
                .get(&(import.module.clone(), import.name.clone()))
                .ok_or_else(missing)?;

            match (&import.ty, entry) {
                (ImportType::Func(expected), Extern::Func(func)) => {
                    if func.ty() != expected {
                        return Err(LinkError::FuncSignature {
                            module: import.module.clone(),
                            name: import.name.clone(),
                            expected: expected.to_string(),
                            found: func.ty().to_string(),
                        }
                        .into());
                    }
                    funcs.push(func.clone());
                }
                (ImportType::Global(expected), Extern::Global { value, mutable }) => {
                    if !value.matches(&expected.content) || *mutable != expected.mutable {
                        return Err(LinkError::GlobalType {
                            module: import.module.clone(),
                            name: import.name.clone(),
                            expected: global_type_name(&expected.content, expected.mutable),
                            found: global_type_name(&value.ty(), *mutable),
                        }
                        .into());
                    }
                    globals.push(value.to_raw());
                }
                (ImportType::Memory | ImportType::Table | ImportType::Tag, _) => {
                    return Err(LinkError::Unsupported {
                        module: import.module.clone(),
                        name: import.name.clone(),
                        kind: import.ty.kind(),
                    }
                    .into());
                }
                (expected, found) => {
                    return Err(LinkError::KindMismatch {
                        module: import.module.clone(),
                        name: import.name.clone(),
                        expected: expected.kind(),
                        found: found.kind(),
                    }
                    .into());
                }
            }
            debug!(
                module = %import.module,
                name = %import.name,
                kind = %import.ty.kind(),
                "resolved import"
            );
        }

        Ok(Instance::new(store, module, funcs, globals)?)
    }
}

fn global_type_name(content: &ValType, mutable: bool) -> String {
    if mutable {
        format!("(mut {})", val_type_name(content))
    } else {
        val_type_name(content).to_string()
    }
}
