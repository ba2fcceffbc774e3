use std::sync::Arc;

use crate::Engine;
use crate::parse::func::{FuncIdx, FuncType, ParsedFunction};
use crate::parse::{CompileError, Export, ExternKind, Import, ParsedModule, parse};

/// A validated and decoded WASM module (immutable, cheap to clone).
#[derive(Clone)]
pub struct Module {
    pub(crate) inner: Arc<ParsedModule>,
}

impl Module {
    /// Parse a WAT string into a module.
    pub fn new(engine: &Engine, wat: &str) -> Result<Self, CompileError> {
        let bytes = wat::parse_str(wat)?;
        Self::from_bytes(engine, &bytes)
    }

    /// Create a module from raw WASM bytes.
    pub fn from_bytes(engine: &Engine, bytes: &[u8]) -> Result<Self, CompileError> {
        let parsed = parse(engine, bytes)?;
        Ok(Module {
            inner: Arc::new(parsed),
        })
    }

    /// Declared imports, in index order.
    pub fn imports(&self) -> &[Import] {
        &self.inner.imports
    }

    /// Declared exports, sorted by name.
    pub fn exports(&self) -> Vec<(&str, Export)> {
        let mut exports: Vec<_> = self
            .inner
            .exports
            .iter()
            .map(|(name, export)| (name.as_str(), *export))
            .collect();
        exports.sort_by_key(|(name, _)| *name);
        exports
    }

    pub fn get_export(&self, name: &str) -> Option<Export> {
        self.inner.exports.get(name).copied()
    }

    /// Index of the function run during instantiation, if declared.
    pub fn start(&self) -> Option<u32> {
        self.inner.start
    }

    /// Signature of an exported function.
    pub fn export_func_type(&self, name: &str) -> Option<&FuncType> {
        match self.get_export(name)? {
            Export {
                kind: ExternKind::Func,
                index,
            } => self.func_type(FuncIdx(index)),
            _ => None,
        }
    }

    pub(crate) fn func_type(&self, func_idx: FuncIdx) -> Option<&FuncType> {
        let type_idx = *self.inner.func_types.get(func_idx.0 as usize)?;
        self.inner.types.get(type_idx as usize)
    }

    /// A locally defined function, or `None` for imports.
    pub(crate) fn get_func(&self, func_idx: FuncIdx) -> Option<&ParsedFunction> {
        let local = func_idx.0.checked_sub(self.inner.num_imported_funcs)?;
        self.inner.funcs.get(local as usize)
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("imports", &self.inner.imports.len())
            .field("funcs", &self.inner.func_types.len())
            .field("exports", &self.inner.exports.len())
            .finish()
    }
}
