mod bootstrap;
mod engine;
mod fetch;
pub mod host;
mod instance;
mod interpreter;
mod linker;
mod module;
mod parse;
mod report;
mod source;
mod stack;
mod store;
mod value;

pub use bootstrap::{
    BootstrapConfig, BootstrapError, Bootstrapper, EntryPointError, RunHandle, RunStatus,
    TrapStage,
};
pub use engine::Engine;
pub use fetch::{DefaultFetcher, Fetch, FetchError, Fetched};
pub use instance::{CallError, Instance, Memory, PAGE_SIZE};
pub use interpreter::Trap;
pub use linker::{Caller, HostFunc, ImportTable, InstantiationError, LinkError};
pub use module::Module;
pub use parse::func::FuncType;
pub use parse::{CompileError, Export, ExternKind, GlobalType, Import, ImportType};
pub use report::{Reporter, TracingReporter};
pub use source::ModuleSource;
pub use store::Store;
pub use value::{Val, WasmArgs, WasmResults, WasmVal};
pub use wasmparser::ValType;
