use wasmboot::{
    Engine, ExternKind, ImportTable, InstantiationError, LinkError, Module, Store, Val, ValType,
};

fn link(imports: &ImportTable<()>, wat: &str) -> Result<(), InstantiationError> {
    let engine = Engine::default();
    let module = Module::new(&engine, wat).expect("test WAT should compile");
    let mut store = Store::new(&engine, ());
    imports.instantiate(&mut store, &module).map(|_| ())
}

fn noop_table() -> ImportTable<()> {
    let mut imports = ImportTable::new();
    imports.func("env", "tick", [ValType::I32], [], |_, _| Ok(vec![]));
    imports.global("env", "base", Val::I32(5), false);
    imports
}

#[test]
fn missing_import_names_module_and_field() {
    let err = link(
        &noop_table(),
        r#"(module (import "env" "tock" (func (param i32))))"#,
    )
    .unwrap_err();
    assert_eq!(
        err,
        InstantiationError::Link(LinkError::MissingImport {
            module: "env".into(),
            name: "tock".into(),
        })
    );
    assert_eq!(err.to_string(), "import `env.tock` was not found");
}

#[test]
fn kind_mismatch_is_rejected() {
    let err = link(
        &noop_table(),
        r#"(module (import "env" "base" (func)))"#,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        InstantiationError::Link(LinkError::KindMismatch {
            expected: ExternKind::Func,
            found: ExternKind::Global,
            ..
        })
    ));
}

#[test]
fn function_signatures_must_match_exactly() {
    let err = link(
        &noop_table(),
        r#"(module (import "env" "tick" (func (param i64))))"#,
    )
    .unwrap_err();
    let InstantiationError::Link(LinkError::FuncSignature { expected, found, .. }) = err else {
        panic!("expected a signature mismatch, got {err:?}");
    };
    assert_eq!(expected, "(i64) -> ()");
    assert_eq!(found, "(i32) -> ()");
}

#[test]
fn global_mutability_must_match() {
    let err = link(
        &noop_table(),
        r#"(module (import "env" "base" (global (mut i32))))"#,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        InstantiationError::Link(LinkError::GlobalType { .. })
    ));

    let err = link(
        &noop_table(),
        r#"(module (import "env" "base" (global i64)))"#,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        InstantiationError::Link(LinkError::GlobalType { .. })
    ));
}

#[test]
fn memory_imports_are_unsupported() {
    let err = link(
        &noop_table(),
        r#"(module (import "env" "memory" (memory 1)))"#,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        InstantiationError::Link(LinkError::Unsupported {
            kind: ExternKind::Memory,
            ..
        })
    ));
}

#[test]
fn imported_globals_seed_initializers() -> Result<(), anyhow::Error> {
    let engine = Engine::default();
    let module = Module::new(
        &engine,
        r#"
        (module
            (global $base (import "env" "base") i32)
            (global (export "derived") i32 (global.get $base))
        )
    "#,
    )?;
    let mut store = Store::new(&engine, ());
    let instance = noop_table().instantiate(&mut store, &module)?;
    assert_eq!(instance.get_global("derived"), Some(Val::I32(5)));
    Ok(())
}

#[test]
fn one_table_links_many_instances() -> Result<(), anyhow::Error> {
    let engine = Engine::default();
    let module = Module::new(
        &engine,
        r#"
        (module
            (import "env" "tick" (func $tick (param i32)))
            (func (export "run")
                i32.const 1
                call $tick
            )
        )
    "#,
    )?;
    let imports = noop_table();
    for _ in 0..3 {
        let mut store = Store::new(&engine, ());
        let mut instance = imports.instantiate(&mut store, &module)?;
        let () = instance.call(&mut store, "run", ())?;
    }
    assert_eq!(imports.len(), 2);
    Ok(())
}

#[test]
fn extend_merges_and_overrides() {
    let mut base = noop_table();
    let mut extra = ImportTable::new();
    extra.global("env", "base", Val::I32(9), false);
    extra.global("env", "limit", Val::I64(100), true);
    base.extend(&extra);

    assert_eq!(base.len(), 3);
    assert!(base.has("env", "tick"));
    assert!(base.has("env", "limit"));
    assert!(!base.has("other", "tick"));
}

#[test]
fn segment_out_of_bounds_traps_during_instantiation() {
    let err = link(
        &ImportTable::new(),
        r#"(module (memory 1) (data (i32.const 65535) "ab"))"#,
    )
    .unwrap_err();
    assert_eq!(
        err,
        InstantiationError::Trap(wasmboot::Trap::MemoryOutOfBounds)
    );
}
