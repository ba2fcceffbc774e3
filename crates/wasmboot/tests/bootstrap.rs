mod harness;

use std::sync::atomic::Ordering;
use std::time::Duration;

use harness::{MapFetcher, Reports, serve_once, serve_stalled, wasm};
use url::Url;
use wasmboot::{
    BootstrapConfig, BootstrapError, Bootstrapper, DefaultFetcher, EntryPointError, Fetch,
    FetchError, ImportTable, LinkError, ModuleSource, RunStatus, Trap, TrapStage, Val, ValType,
    host,
};

const RUN_ONCE: &str = r#"
    (module
        (global $calls (export "calls") (mut i32) (i32.const 0))
        (func (export "run")
            global.get $calls
            i32.const 1
            i32.add
            global.set $calls
        )
        (func (export "answer") (result i32)
            i32.const 42
        )
    )
"#;

const NEEDS_LOG: &str = r#"
    (module
        (import "env" "log" (func $log (param i32 i32)))
        (memory 1)
        (data (i32.const 0) "hello")
        (func (export "run")
            i32.const 0
            i32.const 5
            call $log
        )
    )
"#;

fn source(name: &str) -> ModuleSource {
    name.parse().unwrap()
}

fn bootstrapper(
    config: BootstrapConfig,
    fetcher: MapFetcher,
    reports: &Reports,
) -> Bootstrapper<MapFetcher, impl wasmboot::Reporter + use<>> {
    Bootstrapper::new(config)
        .with_fetcher(fetcher)
        .with_reporter(reports.reporter())
}

#[tokio::test]
async fn valid_module_runs_entry_once() {
    let reports = Reports::new();
    let fetcher = MapFetcher::new().with("module.bin", wasm(RUN_ONCE));
    let fetches = fetcher.counter();
    let boot = bootstrapper(BootstrapConfig::default(), fetcher, &reports);

    let mut handle = boot
        .bootstrap::<()>(source("module.bin"), &ImportTable::new())
        .await
        .unwrap();

    assert_eq!(handle.status(), &RunStatus::Returned(vec![]));
    assert_eq!(handle.get_global("calls"), Some(Val::I32(1)));
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    assert!(reports.kinds().is_empty());

    // The instance stays callable after the entry point.
    let (answer,): (i32,) = handle.call("answer", ()).unwrap();
    assert_eq!(answer, 42);
}

#[tokio::test]
async fn missing_resource_fails_fetch_and_reports_once() {
    let reports = Reports::new();
    let fetcher = MapFetcher::new();
    let fetches = fetcher.counter();
    let boot = bootstrapper(BootstrapConfig::default(), fetcher, &reports);

    let err = boot
        .bootstrap::<()>(source("missing.bin"), &ImportTable::new())
        .await
        .unwrap_err();

    assert!(
        matches!(err, BootstrapError::FetchFailed { error: FetchError::NotFound(_), .. }),
        "{err}"
    );
    assert_eq!(reports.kinds(), ["fetch_failed"]);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn corrupt_bytes_are_an_invalid_module() {
    let reports = Reports::new();
    let fetcher = MapFetcher::new().with("corrupt.bin", b"\0asm\x01\0\0\0garbage".to_vec());
    let boot = bootstrapper(BootstrapConfig::default(), fetcher, &reports);

    let err = boot
        .bootstrap::<()>(source("corrupt.bin"), &ImportTable::new())
        .await
        .unwrap_err();

    assert!(matches!(err, BootstrapError::InvalidModule { .. }), "{err}");
    assert_eq!(err.origin(), &source("corrupt.bin"));
    assert_eq!(reports.kinds(), ["invalid_module"]);
}

#[tokio::test]
async fn unresolved_import_is_a_link_error() {
    let reports = Reports::new();
    let fetcher = MapFetcher::new().with("needs_import.bin", wasm(NEEDS_LOG));
    let boot = bootstrapper(BootstrapConfig::default(), fetcher, &reports);

    let err = boot
        .bootstrap::<()>(source("needs_import.bin"), &ImportTable::new())
        .await
        .unwrap_err();

    let BootstrapError::LinkError { error, .. } = &err else {
        panic!("expected a link error, got {err}");
    };
    assert_eq!(
        error,
        &LinkError::MissingImport {
            module: "env".into(),
            name: "log".into(),
        }
    );
    assert_eq!(reports.kinds(), ["link_error"]);
}

#[tokio::test]
async fn host_imports_write_into_store_data() {
    let mut imports = ImportTable::<Vec<String>>::new();
    imports.func(
        "env",
        "log",
        [ValType::I32, ValType::I32],
        [],
        |mut caller, args| {
            let [Val::I32(ptr), Val::I32(len)] = args else {
                return Err(Trap::host("log expects (ptr, len)"));
            };
            let line = caller.read_string(*ptr as u32, *len as u32)?;
            caller.data_mut().push(line);
            Ok(vec![])
        },
    );
    let reports = Reports::new();
    let fetcher = MapFetcher::new().with("log.wasm", wasm(NEEDS_LOG));
    let boot = bootstrapper(BootstrapConfig::default(), fetcher, &reports);

    let handle = boot.bootstrap(source("log.wasm"), &imports).await.unwrap();
    assert_eq!(handle.data(), &["hello".to_string()]);
}

#[tokio::test]
async fn console_imports_forward_guest_lines() {
    let lines = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = std::sync::Arc::clone(&lines);
    let imports = host::console_with::<()>(move |line| sink.lock().unwrap().push(line.to_string()));

    let reports = Reports::new();
    let fetcher = MapFetcher::new().with("log.wasm", wasm(NEEDS_LOG));
    let boot = bootstrapper(BootstrapConfig::default(), fetcher, &reports);

    boot.bootstrap(source("log.wasm"), &imports).await.unwrap();
    assert_eq!(*lines.lock().unwrap(), ["hello"]);
}

#[tokio::test]
async fn guest_exit_is_a_normal_finish() {
    let exits = wasm(
        r#"
        (module
            (import "env" "exit" (func $exit (param i32)))
            (func (export "run")
                i32.const 3
                call $exit
                unreachable
            )
        )
    "#,
    );
    let reports = Reports::new();
    let fetcher = MapFetcher::new().with("exit.wasm", exits);
    let boot = bootstrapper(BootstrapConfig::default(), fetcher, &reports);

    let handle = boot
        .bootstrap(source("exit.wasm"), &host::console::<()>())
        .await
        .unwrap();
    assert_eq!(handle.status(), &RunStatus::Exited(3));
    assert_eq!(handle.exit_code(), Some(3));
    assert!(reports.kinds().is_empty());
}

#[tokio::test]
async fn trapping_entry_reports_entry_stage() {
    let reports = Reports::new();
    let fetcher = MapFetcher::new().with(
        "trap.wasm",
        wasm(r#"(module (func (export "run") unreachable))"#),
    );
    let boot = bootstrapper(BootstrapConfig::default(), fetcher, &reports);

    let err = boot
        .bootstrap::<()>(source("trap.wasm"), &ImportTable::new())
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            BootstrapError::RuntimeTrap {
                stage: TrapStage::Entry,
                trap: Trap::Unreachable,
                ..
            }
        ),
        "{err}"
    );
    assert_eq!(reports.kinds(), ["runtime_trap"]);
}

#[tokio::test]
async fn trapping_start_function_reports_instantiation_stage() {
    let reports = Reports::new();
    let fetcher = MapFetcher::new().with(
        "start.wasm",
        wasm(
            r#"
            (module
                (func $init unreachable)
                (start $init)
                (func (export "run"))
            )
        "#,
        ),
    );
    let boot = bootstrapper(BootstrapConfig::default(), fetcher, &reports);

    let err = boot
        .bootstrap::<()>(source("start.wasm"), &ImportTable::new())
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            BootstrapError::RuntimeTrap {
                stage: TrapStage::Instantiation,
                ..
            }
        ),
        "{err}"
    );
    assert_eq!(reports.kinds(), ["runtime_trap"]);
}

#[tokio::test]
async fn fuel_limits_the_entry_point() {
    let reports = Reports::new();
    let fetcher = MapFetcher::new().with(
        "spin.wasm",
        wasm(r#"(module (func (export "run") (loop br 0)))"#),
    );
    let boot = bootstrapper(BootstrapConfig::default().with_fuel(500), fetcher, &reports);

    let err = boot
        .bootstrap::<()>(source("spin.wasm"), &ImportTable::new())
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            BootstrapError::RuntimeTrap {
                trap: Trap::OutOfFuel,
                ..
            }
        ),
        "{err}"
    );
}

#[tokio::test]
async fn entry_point_must_exist_and_take_no_params() {
    let reports = Reports::new();
    let fetcher = MapFetcher::new()
        .with("module.bin", wasm(RUN_ONCE))
        .with(
            "params.bin",
            wasm(r#"(module (func (export "run") (param i32)))"#),
        );
    let boot = bootstrapper(
        BootstrapConfig::default().with_entry("main"),
        fetcher.clone(),
        &reports,
    );
    let err = boot
        .bootstrap::<()>(source("module.bin"), &ImportTable::new())
        .await
        .unwrap_err();
    assert!(
        matches!(
            &err,
            BootstrapError::EntryPoint { error: EntryPointError::Missing(name), .. } if name == "main"
        ),
        "{err}"
    );

    let boot = bootstrapper(BootstrapConfig::default(), fetcher.clone(), &reports);
    let err = boot
        .bootstrap::<()>(source("params.bin"), &ImportTable::new())
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            BootstrapError::EntryPoint {
                error: EntryPointError::TakesParams { .. },
                ..
            }
        ),
        "{err}"
    );

    let boot = bootstrapper(BootstrapConfig::default().with_entry("calls"), fetcher, &reports);
    let err = boot
        .bootstrap::<()>(source("module.bin"), &ImportTable::new())
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            BootstrapError::EntryPoint {
                error: EntryPointError::NotAFunction { .. },
                ..
            }
        ),
        "{err}"
    );
    assert_eq!(reports.kinds(), ["entry_point"; 3]);
}

#[tokio::test]
async fn custom_entry_returns_values() {
    let reports = Reports::new();
    let fetcher = MapFetcher::new().with("module.bin", wasm(RUN_ONCE));
    let boot = bootstrapper(BootstrapConfig::default().with_entry("answer"), fetcher, &reports);

    let handle = boot
        .bootstrap::<()>(source("module.bin"), &ImportTable::new())
        .await
        .unwrap();
    assert_eq!(handle.status(), &RunStatus::Returned(vec![Val::I32(42)]));
    assert_eq!(
        handle
            .instance()
            .export_func_type("answer")
            .map(ToString::to_string)
            .as_deref(),
        Some("() -> (i32)")
    );
    // `run` was not the entry, so it never ran.
    assert_eq!(handle.get_global("calls"), Some(Val::I32(0)));
}

#[tokio::test]
async fn text_modules_need_opting_in() {
    let reports = Reports::new();
    let fetcher = MapFetcher::new().with("module.wat", RUN_ONCE.as_bytes().to_vec());

    let strict = bootstrapper(BootstrapConfig::default(), fetcher.clone(), &reports);
    let err = strict
        .bootstrap::<()>(source("module.wat"), &ImportTable::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BootstrapError::InvalidModule { .. }), "{err}");

    let lenient = bootstrapper(BootstrapConfig::default().with_accept_text(true), fetcher, &reports);
    let handle = lenient
        .bootstrap::<()>(source("module.wat"), &ImportTable::new())
        .await
        .unwrap();
    assert_eq!(handle.get_global("calls"), Some(Val::I32(1)));
}

#[tokio::test]
async fn relative_sources_resolve_against_base_url() {
    let reports = Reports::new();
    let fetcher = MapFetcher::new().with("http://example.test/app/wasm.wasm", wasm(RUN_ONCE));
    let base = Url::parse("http://example.test/app/index.html").unwrap();
    let boot = bootstrapper(BootstrapConfig::default().with_base_url(base), fetcher, &reports);

    let handle = boot
        .bootstrap::<()>(source("wasm.wasm"), &ImportTable::new())
        .await
        .unwrap();
    assert_eq!(handle.get_global("calls"), Some(Val::I32(1)));
}

#[tokio::test]
async fn fetch_timeout_fails_the_fetch() {
    let reports = Reports::new();
    let fetcher = MapFetcher::new()
        .with("slow.wasm", wasm(RUN_ONCE))
        .with_delay(Duration::from_secs(30));
    let config = BootstrapConfig::default().with_fetch_timeout(Duration::from_millis(50));
    let boot = bootstrapper(config, fetcher, &reports);

    let err = boot
        .bootstrap::<()>(source("slow.wasm"), &ImportTable::new())
        .await
        .unwrap_err();
    assert!(
        matches!(err, BootstrapError::FetchFailed { error: FetchError::TimedOut(_), .. }),
        "{err}"
    );
    assert_eq!(reports.kinds(), ["fetch_failed"]);
}

#[tokio::test]
async fn cancellation_abandons_the_fetch() {
    let reports = Reports::new();
    let fetcher = MapFetcher::new()
        .with("slow.wasm", wasm(RUN_ONCE))
        .with_delay(Duration::from_secs(30));
    let boot = bootstrapper(BootstrapConfig::default(), fetcher, &reports);

    let err = boot
        .bootstrap_until(
            source("slow.wasm"),
            &ImportTable::new(),
            (),
            tokio::time::sleep(Duration::from_millis(20)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BootstrapError::Cancelled { .. }), "{err}");
    assert_eq!(reports.kinds(), ["cancelled"]);
}

#[tokio::test]
async fn file_sources_load_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("module.wasm");
    std::fs::write(&path, wasm(RUN_ONCE)).unwrap();

    let boot = Bootstrapper::new(BootstrapConfig::default());
    let handle = boot
        .bootstrap::<()>(ModuleSource::Path(path.clone()), &ImportTable::new())
        .await
        .unwrap();
    assert_eq!(handle.get_global("calls"), Some(Val::I32(1)));

    let url = Url::from_file_path(&path).unwrap();
    let handle = boot
        .bootstrap::<()>(ModuleSource::Url(url), &ImportTable::new())
        .await
        .unwrap();
    assert_eq!(handle.get_global("calls"), Some(Val::I32(1)));

    let err = boot
        .bootstrap::<()>(
            ModuleSource::Path(dir.path().join("absent.wasm")),
            &ImportTable::new(),
        )
        .await
        .unwrap_err();
    assert!(
        matches!(err, BootstrapError::FetchFailed { error: FetchError::NotFound(_), .. }),
        "{err}"
    );
}

#[tokio::test]
async fn http_sources_are_fetched() {
    let url = serve_once("200 OK", "application/wasm", wasm(RUN_ONCE), None, "/module.wasm").await;
    let boot = Bootstrapper::new(BootstrapConfig::default().with_strict_content_type(true));

    let handle = boot
        .bootstrap::<()>(ModuleSource::Url(url), &ImportTable::new())
        .await
        .unwrap();
    assert_eq!(handle.get_global("calls"), Some(Val::I32(1)));
}

#[tokio::test]
async fn http_not_found_fails_fetch() {
    let url = serve_once("404 Not Found", "text/plain", b"nope".to_vec(), None, "/missing.bin").await;
    let reports = Reports::new();
    let boot = Bootstrapper::new(BootstrapConfig::default())
        .with_fetcher(DefaultFetcher::default())
        .with_reporter(reports.reporter());

    let err = boot
        .bootstrap::<()>(ModuleSource::Url(url), &ImportTable::new())
        .await
        .unwrap_err();
    assert!(
        matches!(err, BootstrapError::FetchFailed { error: FetchError::Status { status: 404, .. }, .. }),
        "{err}"
    );
    assert_eq!(reports.kinds(), ["fetch_failed"]);
}

#[tokio::test]
async fn strict_mode_rejects_wrong_content_type() {
    let url = serve_once("200 OK", "text/html", wasm(RUN_ONCE), None, "/module.wasm").await;
    let boot = Bootstrapper::new(BootstrapConfig::default().with_strict_content_type(true));

    let err = boot
        .bootstrap::<()>(ModuleSource::Url(url), &ImportTable::new())
        .await
        .unwrap_err();
    assert!(
        matches!(err, BootstrapError::FetchFailed { error: FetchError::ContentType { .. }, .. }),
        "{err}"
    );
}

#[tokio::test]
async fn short_http_body_is_truncated() {
    let body = wasm(RUN_ONCE);
    let declared = body.len() + 16;
    let url = serve_once("200 OK", "application/wasm", body, Some(declared), "/module.wasm").await;
    let boot = Bootstrapper::new(BootstrapConfig::default());

    let err = boot
        .bootstrap::<()>(ModuleSource::Url(url), &ImportTable::new())
        .await
        .unwrap_err();
    assert!(
        matches!(err, BootstrapError::FetchFailed { error: FetchError::Truncated { .. }, .. }),
        "{err}"
    );
}

#[tokio::test]
async fn stalled_http_request_gives_up_on_its_own() {
    let url = serve_stalled("/module.wasm", Duration::from_secs(30)).await;
    let fetcher = DefaultFetcher::default().with_timeout(Duration::from_millis(150));

    // No outer timer: the blocking request itself has to stop.
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        fetcher.fetch(&ModuleSource::Url(url)),
    )
    .await
    .expect("the request should end at its own deadline");
    assert!(
        matches!(result, Err(FetchError::TimedOut(limit)) if limit == Duration::from_millis(150)),
        "{result:?}"
    );
}

#[tokio::test]
async fn fetch_timeout_reaches_the_http_request() {
    let url = serve_stalled("/module.wasm", Duration::from_secs(30)).await;
    let reports = Reports::new();
    let config = BootstrapConfig::default().with_fetch_timeout(Duration::from_millis(150));
    let boot = Bootstrapper::new(config).with_reporter(reports.reporter());

    let err = boot
        .bootstrap::<()>(ModuleSource::Url(url), &ImportTable::new())
        .await
        .unwrap_err();
    assert!(
        matches!(err, BootstrapError::FetchFailed { error: FetchError::TimedOut(_), .. }),
        "{err}"
    );
    assert_eq!(reports.kinds(), ["fetch_failed"]);
}

#[tokio::test]
async fn malformed_source_urls_are_reported() {
    let reports = Reports::new();
    let boot = bootstrapper(BootstrapConfig::default(), MapFetcher::new(), &reports);

    let err = boot.parse_source("http://[::1/module.wasm").unwrap_err();
    assert!(
        matches!(err, BootstrapError::FetchFailed { error: FetchError::InvalidUrl(_), .. }),
        "{err}"
    );
    assert_eq!(err.origin().to_string(), "http://[::1/module.wasm");
    assert_eq!(reports.kinds(), ["fetch_failed"]);

    let source = boot.parse_source("build/module.wasm").unwrap();
    assert_eq!(source, ModuleSource::Path("build/module.wasm".into()));
    assert_eq!(reports.kinds(), ["fetch_failed"]);
}
