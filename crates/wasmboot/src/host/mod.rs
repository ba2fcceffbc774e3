//! Ready-made `env` imports for guests that print and exit.
//!
//! | import          | signature        | effect                          |
//! |-----------------|------------------|---------------------------------|
//! | `env.log`       | `(ptr, len)`     | write a UTF-8 line              |
//! | `env.log_i32`   | `(value)`        | write a number                  |
//! | `env.exit`      | `(code)`         | stop with [`Trap::Exit`]        |
//! | `env.abort`     | `(ptr, len)`     | stop with [`Trap::Host`]        |

use std::sync::Arc;

use tracing::debug;
use wasmparser::ValType;

use crate::interpreter::Trap;
use crate::linker::ImportTable;
use crate::Val;

pub const NAMESPACE: &str = "env";

/// Console imports that print guest lines to stdout.
pub fn console<T>() -> ImportTable<T> {
    console_with(|line| println!("{line}"))
}

/// Console imports that hand each guest line to `sink`.
pub fn console_with<T>(sink: impl Fn(&str) + Send + Sync + 'static) -> ImportTable<T> {
    let sink = Arc::new(sink);
    let mut imports = ImportTable::new();

    let log_sink = Arc::clone(&sink);
    imports.func(
        NAMESPACE,
        "log",
        [ValType::I32, ValType::I32],
        [],
        move |caller, args| {
            let (ptr, len) = ptr_len(args)?;
            let line = caller.read_string(ptr, len)?;
            log_sink(&line);
            Ok(vec![])
        },
    );

    let number_sink = Arc::clone(&sink);
    imports.func(NAMESPACE, "log_i32", [ValType::I32], [], move |_, args| {
        match args {
            [Val::I32(value)] => number_sink(&value.to_string()),
            _ => return Err(Trap::host("log_i32 expects one i32")),
        }
        Ok(vec![])
    });

    imports.func(NAMESPACE, "exit", [ValType::I32], [], |_, args| match args {
        [Val::I32(code)] => {
            debug!(code, "guest requested exit");
            Err(Trap::Exit(*code))
        }
        _ => Err(Trap::host("exit expects one i32")),
    });

    imports.func(
        NAMESPACE,
        "abort",
        [ValType::I32, ValType::I32],
        [],
        |caller, args| {
            let (ptr, len) = ptr_len(args)?;
            let message = caller.read_string(ptr, len)?;
            Err(Trap::host(format!("guest aborted: {message}")))
        },
    );

    imports
}

fn ptr_len(args: &[Val]) -> Result<(u32, u32), Trap> {
    match args {
        [Val::I32(ptr), Val::I32(len)] => Ok((*ptr as u32, *len as u32)),
        _ => Err(Trap::host("expected (ptr: i32, len: i32)")),
    }
}
