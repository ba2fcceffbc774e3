pub(crate) mod body;
pub(crate) mod func;
pub(crate) mod numeric;

use std::collections::HashMap;

use body::ParsedBody;
use func::{FuncType, ParsedFunction};
use wasmparser::{
    BinaryReaderError, ConstExpr, DataKind, ElementItems, ElementKind, ExternalKind,
    FunctionBody, Operator, Parser, Payload, TypeRef, ValType,
};

use crate::Engine;

/// Why a byte payload could not be turned into a [`Module`](crate::Module).
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("invalid module: {0}")]
    Invalid(#[from] BinaryReaderError),
    #[error("invalid module text: {0}")]
    Text(#[from] wat::Error),
    #[error("malformed module: {0}")]
    Malformed(String),
}

/// The kind of an import or export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternKind {
    Func,
    Global,
    Memory,
    Table,
    Tag,
}

impl std::fmt::Display for ExternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ExternKind::Func => "func",
            ExternKind::Global => "global",
            ExternKind::Memory => "memory",
            ExternKind::Table => "table",
            ExternKind::Tag => "tag",
        })
    }
}

/// Type of a global: content type plus mutability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalType {
    pub content: ValType,
    pub mutable: bool,
}

/// What an import expects the host to supply.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportType {
    Func(FuncType),
    Global(GlobalType),
    Memory,
    Table,
    Tag,
}

impl ImportType {
    pub fn kind(&self) -> ExternKind {
        match self {
            ImportType::Func(_) => ExternKind::Func,
            ImportType::Global(_) => ExternKind::Global,
            ImportType::Memory => ExternKind::Memory,
            ImportType::Table => ExternKind::Table,
            ImportType::Tag => ExternKind::Tag,
        }
    }
}

/// A declared import: `(module, name)` plus the expected type.
#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub ty: ImportType,
}

/// A declared export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Export {
    pub kind: ExternKind,
    pub index: u32,
}

/// A constant initializer expression, evaluated at instantiation.
#[derive(Debug, Clone, Default)]
pub(crate) struct ConstInit {
    pub(crate) ops: Vec<ConstOp>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum ConstOp {
    I32(i32),
    I64(i64),
    F32(u32),
    F64(u64),
    GlobalGet(u32),
    RefNull,
    RefFunc(u32),
    I32Add,
    I32Sub,
    I32Mul,
    I64Add,
    I64Sub,
    I64Mul,
}

#[derive(Debug, Clone)]
pub(crate) struct GlobalDef {
    pub(crate) ty: GlobalType,
    pub(crate) init: ConstInit,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Limits {
    pub(crate) initial: u64,
    pub(crate) maximum: Option<u64>,
}

#[derive(Debug, Clone)]
pub(crate) struct DataSegment {
    /// `None` for passive segments.
    pub(crate) offset: Option<ConstInit>,
    pub(crate) bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub(crate) struct ElementSegment {
    /// `(table, offset)` for active segments.
    pub(crate) active: Option<(u32, ConstInit)>,
    pub(crate) items: Vec<ConstInit>,
}

pub(crate) struct ParsedModule {
    pub(crate) types: Vec<FuncType>,
    pub(crate) imports: Vec<Import>,
    /// Type index of every function, imports first.
    pub(crate) func_types: Vec<u32>,
    pub(crate) num_imported_funcs: u32,
    /// Locally defined functions.
    pub(crate) funcs: Vec<ParsedFunction>,
    /// Type of every global, imports first.
    pub(crate) global_types: Vec<GlobalType>,
    pub(crate) num_imported_globals: u32,
    /// Locally defined globals.
    pub(crate) globals: Vec<GlobalDef>,
    pub(crate) memories: Vec<Limits>,
    pub(crate) tables: Vec<Limits>,
    pub(crate) exports: HashMap<String, Export>,
    pub(crate) start: Option<u32>,
    pub(crate) data: Vec<DataSegment>,
    pub(crate) elements: Vec<ElementSegment>,
}

pub(crate) fn parse(engine: &Engine, bytes: &[u8]) -> Result<ParsedModule, CompileError> {
    let mut validator = engine.new_validator();
    validator.validate_all(bytes)?;

    let mut builder = ModuleBuilder::default();
    let parser = Parser::new(0);
    for payload in parser.parse_all(bytes) {
        builder.process_payload(payload?)?;
    }

    Ok(builder.build())
}

#[derive(Default)]
struct ModuleBuilder {
    types: Vec<FuncType>,
    imports: Vec<Import>,
    func_types: Vec<u32>,
    num_imported_funcs: u32,
    funcs: Vec<ParsedFunction>,
    global_types: Vec<GlobalType>,
    num_imported_globals: u32,
    globals: Vec<GlobalDef>,
    memories: Vec<Limits>,
    tables: Vec<Limits>,
    /// Function exports: name → export.
    exports: HashMap<String, Export>,
    start: Option<u32>,
    data: Vec<DataSegment>,
    elements: Vec<ElementSegment>,
}

impl ModuleBuilder {
    fn process_payload(&mut self, payload: Payload) -> Result<(), CompileError> {
        match payload {
            Payload::TypeSection(reader) => {
                for rec_group in reader {
                    for sub_type in rec_group?.into_types() {
                        self.types.push(FuncType::from(sub_type.unwrap_func()));
                    }
                }
            }
            Payload::ImportSection(reader) => {
                for import in reader {
                    self.parse_import(import?)?;
                }
            }
            Payload::FunctionSection(reader) => {
                for type_idx in reader {
                    self.func_types.push(type_idx?);
                }
            }
            Payload::TableSection(reader) => {
                for table in reader {
                    let ty = table?.ty;
                    self.tables.push(Limits {
                        initial: ty.initial as u64,
                        maximum: ty.maximum.map(|m| m as u64),
                    });
                }
            }
            Payload::MemorySection(reader) => {
                for memory in reader {
                    let ty = memory?;
                    self.memories.push(Limits {
                        initial: ty.initial as u64,
                        maximum: ty.maximum.map(|m| m as u64),
                    });
                }
            }
            Payload::GlobalSection(reader) => {
                for global in reader {
                    let global = global?;
                    let ty = GlobalType {
                        content: global.ty.content_type,
                        mutable: global.ty.mutable,
                    };
                    self.global_types.push(ty);
                    self.globals.push(GlobalDef {
                        ty,
                        init: parse_const(&global.init_expr)?,
                    });
                }
            }
            Payload::ExportSection(reader) => {
                for export in reader {
                    let export = export?;
                    let kind = match export.kind {
                        ExternalKind::Func => ExternKind::Func,
                        ExternalKind::Global => ExternKind::Global,
                        ExternalKind::Memory => ExternKind::Memory,
                        ExternalKind::Table => ExternKind::Table,
                        _ => ExternKind::Tag,
                    };
                    self.exports.insert(
                        export.name.to_string(),
                        Export {
                            kind,
                            index: export.index,
                        },
                    );
                }
            }
            Payload::StartSection { func, .. } => self.start = Some(func),
            Payload::ElementSection(reader) => {
                for element in reader {
                    self.parse_element(element?)?;
                }
            }
            Payload::DataSection(reader) => {
                for data in reader {
                    let data = data?;
                    let offset = match data.kind {
                        DataKind::Active {
                            memory_index: 0,
                            offset_expr,
                        } => Some(parse_const(&offset_expr)?),
                        DataKind::Active { memory_index, .. } => {
                            return Err(CompileError::Malformed(format!(
                                "data segment targets unsupported memory {memory_index}"
                            )));
                        }
                        DataKind::Passive => None,
                    };
                    self.data.push(DataSegment {
                        offset,
                        bytes: data.data.to_vec(),
                    });
                }
            }
            Payload::CodeSectionEntry(body) => self.parse_body(body)?,
            _ => {}
        }
        Ok(())
    }

    fn parse_import(&mut self, import: wasmparser::Import) -> Result<(), CompileError> {
        let ty = match import.ty {
            TypeRef::Func(type_idx) => {
                self.func_types.push(type_idx);
                self.num_imported_funcs += 1;
                ImportType::Func(self.func_type(type_idx)?.clone())
            }
            TypeRef::Global(global) => {
                let ty = GlobalType {
                    content: global.content_type,
                    mutable: global.mutable,
                };
                self.global_types.push(ty);
                self.num_imported_globals += 1;
                ImportType::Global(ty)
            }
            TypeRef::Memory(_) => ImportType::Memory,
            TypeRef::Table(_) => ImportType::Table,
            _ => ImportType::Tag,
        };
        self.imports.push(Import {
            module: import.module.to_string(),
            name: import.name.to_string(),
            ty,
        });
        Ok(())
    }

    fn parse_element(&mut self, element: wasmparser::Element) -> Result<(), CompileError> {
        let active = match element.kind {
            ElementKind::Active {
                table_index,
                offset_expr,
            } => Some((table_index.unwrap_or(0), parse_const(&offset_expr)?)),
            ElementKind::Passive | ElementKind::Declared => None,
        };
        let mut items = Vec::new();
        match element.items {
            ElementItems::Functions(reader) => {
                for func in reader {
                    items.push(ConstInit {
                        ops: vec![ConstOp::RefFunc(func?)],
                    });
                }
            }
            ElementItems::Expressions(_, reader) => {
                for expr in reader {
                    items.push(parse_const(&expr?)?);
                }
            }
        }
        self.elements.push(ElementSegment { active, items });
        Ok(())
    }

    fn parse_body(&mut self, body: FunctionBody) -> Result<(), CompileError> {
        let func_idx = self.num_imported_funcs as usize + self.funcs.len();
        let type_idx = *self.func_types.get(func_idx).ok_or_else(|| {
            CompileError::Malformed(format!("function {func_idx} has no declared type"))
        })?;
        let ty = self.func_type(type_idx)?.clone();

        // locals = params ++ body-declared locals
        let mut locals: Vec<ValType> = ty.params().to_vec();
        for local in body.get_locals_reader()? {
            let (count, val_type) = local?;
            locals.extend(std::iter::repeat_n(val_type, count as usize));
        }
        let parsed = ParsedBody::parse(&body, &self.types, ty.results().len())?;
        self.funcs.push(ParsedFunction {
            locals: locals.into(),
            param_count: ty.params().len(),
            results: ty.results().into(),
            body: parsed,
        });
        Ok(())
    }

    fn func_type(&self, type_idx: u32) -> Result<&FuncType, CompileError> {
        self.types
            .get(type_idx as usize)
            .ok_or_else(|| CompileError::Malformed(format!("type {type_idx} is out of range")))
    }

    fn build(self) -> ParsedModule {
        ParsedModule {
            types: self.types,
            imports: self.imports,
            func_types: self.func_types,
            num_imported_funcs: self.num_imported_funcs,
            funcs: self.funcs,
            global_types: self.global_types,
            num_imported_globals: self.num_imported_globals,
            globals: self.globals,
            memories: self.memories,
            tables: self.tables,
            exports: self.exports,
            start: self.start,
            data: self.data,
            elements: self.elements,
        }
    }
}

/// Decode a constant expression into a small stack program.
fn parse_const(expr: &ConstExpr) -> Result<ConstInit, CompileError> {
    let mut ops = Vec::new();
    for op in expr.get_operators_reader() {
        let op = match op? {
            Operator::I32Const { value } => ConstOp::I32(value),
            Operator::I64Const { value } => ConstOp::I64(value),
            Operator::F32Const { value } => ConstOp::F32(value.bits()),
            Operator::F64Const { value } => ConstOp::F64(value.bits()),
            Operator::GlobalGet { global_index } => ConstOp::GlobalGet(global_index),
            Operator::RefNull { .. } => ConstOp::RefNull,
            Operator::RefFunc { function_index } => ConstOp::RefFunc(function_index),
            Operator::I32Add => ConstOp::I32Add,
            Operator::I32Sub => ConstOp::I32Sub,
            Operator::I32Mul => ConstOp::I32Mul,
            Operator::I64Add => ConstOp::I64Add,
            Operator::I64Sub => ConstOp::I64Sub,
            Operator::I64Mul => ConstOp::I64Mul,
            Operator::End => break,
            other => {
                return Err(CompileError::Malformed(format!(
                    "unsupported constant instruction {other:?}"
                )));
            }
        };
        ops.push(op);
    }
    Ok(ConstInit { ops })
}
