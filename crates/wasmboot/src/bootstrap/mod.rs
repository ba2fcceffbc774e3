//! Fetch, compile, link and run a module in one call.
//!
//! [`Bootstrapper::bootstrap`] drives the sequence
//! fetch → compile → instantiate → entry point exactly once. Every failure
//! is reported once through the configured [`Reporter`] and then returned
//! as a [`BootstrapError`]; no [`RunHandle`] exists unless every step
//! succeeded.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info};
use url::Url;

use crate::fetch::{DefaultFetcher, Fetch, FetchError, Fetched, is_wasm_content_type};
use crate::instance::{CallError, Instance, Memory};
use crate::interpreter::Trap;
use crate::linker::{ImportTable, InstantiationError, LinkError};
use crate::parse::{CompileError, ExternKind};
use crate::report::{Reporter, TracingReporter};
use crate::value::{WasmArgs, WasmResults};
use crate::{Engine, Module, ModuleSource, Store, Val};

const DEFAULT_ENTRY: &str = "run";

/// Knobs for a [`Bootstrapper`]. Every limit is off by default.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    entry: String,
    fetch_timeout: Option<Duration>,
    base_url: Option<Url>,
    strict_content_type: bool,
    accept_text: bool,
    fuel: Option<u64>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            entry: DEFAULT_ENTRY.to_string(),
            fetch_timeout: None,
            base_url: None,
            strict_content_type: false,
            accept_text: false,
            fuel: None,
        }
    }
}

impl BootstrapConfig {
    /// Export invoked once instantiation succeeds.
    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = entry.into();
        self
    }

    /// Bound the fetch step.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    /// Resolve relative path sources against this URL.
    pub fn with_base_url(mut self, base: Url) -> Self {
        self.base_url = Some(base);
        self
    }

    /// Require HTTP responses to declare `application/wasm`.
    pub fn with_strict_content_type(mut self, strict: bool) -> Self {
        self.strict_content_type = strict;
        self
    }

    /// Accept WebAssembly text as well as binary modules.
    pub fn with_accept_text(mut self, accept: bool) -> Self {
        self.accept_text = accept;
        self
    }

    /// Bound guest execution (start function and entry point together).
    pub fn with_fuel(mut self, fuel: u64) -> Self {
        self.fuel = Some(fuel);
        self
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    pub fn strict_content_type(&self) -> bool {
        self.strict_content_type
    }

    pub fn accept_text(&self) -> bool {
        self.accept_text
    }

    pub fn fuel(&self) -> Option<u64> {
        self.fuel
    }
}

/// Where a trap surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapStage {
    /// Segment initialization or the start function.
    Instantiation,
    Entry,
}

impl fmt::Display for TrapStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TrapStage::Instantiation => "instantiation",
            TrapStage::Entry => "entry point",
        })
    }
}

/// The configured entry export cannot be called.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntryPointError {
    #[error("module has no export named `{0}`")]
    Missing(String),
    #[error("export `{name}` is a {kind}, not a function")]
    NotAFunction { name: String, kind: ExternKind },
    #[error("entry point `{name}` must take no parameters, found {signature}")]
    TakesParams { name: String, signature: String },
}

/// Why a bootstrap call failed. Every variant names the module source.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("failed to fetch {origin}: {error}")]
    FetchFailed {
        origin: ModuleSource,
        #[source]
        error: FetchError,
    },
    #[error("{origin} is not a valid module: {error}")]
    InvalidModule {
        origin: ModuleSource,
        #[source]
        error: CompileError,
    },
    #[error("failed to link {origin}: {error}")]
    LinkError {
        origin: ModuleSource,
        #[source]
        error: LinkError,
    },
    #[error("{origin} trapped during {stage}: {trap}")]
    RuntimeTrap {
        origin: ModuleSource,
        stage: TrapStage,
        #[source]
        trap: Trap,
    },
    #[error("cannot start {origin}: {error}")]
    EntryPoint {
        origin: ModuleSource,
        #[source]
        error: EntryPointError,
    },
    #[error("bootstrap of {origin} was cancelled")]
    Cancelled { origin: ModuleSource },
}

impl BootstrapError {
    /// Stable tag for logs and exit paths.
    pub fn kind(&self) -> &'static str {
        match self {
            BootstrapError::FetchFailed { .. } => "fetch_failed",
            BootstrapError::InvalidModule { .. } => "invalid_module",
            BootstrapError::LinkError { .. } => "link_error",
            BootstrapError::RuntimeTrap { .. } => "runtime_trap",
            BootstrapError::EntryPoint { .. } => "entry_point",
            BootstrapError::Cancelled { .. } => "cancelled",
        }
    }

    /// The (resolved) source the failing bootstrap was loading.
    pub fn origin(&self) -> &ModuleSource {
        match self {
            BootstrapError::FetchFailed { origin, .. }
            | BootstrapError::InvalidModule { origin, .. }
            | BootstrapError::LinkError { origin, .. }
            | BootstrapError::RuntimeTrap { origin, .. }
            | BootstrapError::EntryPoint { origin, .. }
            | BootstrapError::Cancelled { origin } => origin,
        }
    }
}

/// How the entry point finished.
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    Returned(Vec<Val>),
    /// The guest called a host exit binding.
    Exited(i32),
}

/// A module that bootstrapped successfully: the live instance, its store
/// and the entry point's outcome.
pub struct RunHandle<T> {
    instance: Instance<T>,
    store: Store<T>,
    status: RunStatus,
}

impl<T> std::fmt::Debug for RunHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl<T> RunHandle<T> {
    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    /// Exit code if the guest exited through the host.
    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            RunStatus::Exited(code) => Some(code),
            RunStatus::Returned(_) => None,
        }
    }

    /// Call another export after the entry point (typed API).
    pub fn call<A: WasmArgs, R: WasmResults>(
        &mut self,
        name: &str,
        args: A,
    ) -> Result<R, anyhow::Error> {
        self.instance.call(&mut self.store, name, args)
    }

    /// Call another export after the entry point (dynamic API).
    pub fn call_dynamic(&mut self, name: &str, args: &[Val]) -> Result<Vec<Val>, CallError> {
        self.instance.call_dynamic(&mut self.store, name, args)
    }

    pub fn get_global(&self, name: &str) -> Option<Val> {
        self.instance.get_global(name)
    }

    pub fn memory(&self) -> Option<&Memory> {
        self.instance.memory()
    }

    pub fn instance(&self) -> &Instance<T> {
        &self.instance
    }

    pub fn data(&self) -> &T {
        self.store.data()
    }

    pub fn data_mut(&mut self) -> &mut T {
        self.store.data_mut()
    }

    pub fn into_parts(self) -> (Instance<T>, Store<T>) {
        (self.instance, self.store)
    }
}

/// Drives one module from source to running entry point.
pub struct Bootstrapper<F = DefaultFetcher, R = TracingReporter> {
    config: BootstrapConfig,
    engine: Engine,
    fetcher: F,
    reporter: R,
}

impl Bootstrapper {
    /// The default fetcher inherits the config's fetch timeout so a timed
    /// out HTTP request also stops on the blocking pool.
    pub fn new(config: BootstrapConfig) -> Self {
        let fetcher = match config.fetch_timeout {
            Some(limit) => DefaultFetcher::default().with_timeout(limit),
            None => DefaultFetcher::default(),
        };
        Self {
            config,
            engine: Engine::default(),
            fetcher,
            reporter: TracingReporter,
        }
    }
}

impl Default for Bootstrapper {
    fn default() -> Self {
        Self::new(BootstrapConfig::default())
    }
}

impl<F: Fetch, R: Reporter> Bootstrapper<F, R> {
    pub fn with_fetcher<G: Fetch>(self, fetcher: G) -> Bootstrapper<G, R> {
        Bootstrapper {
            config: self.config,
            engine: self.engine,
            fetcher,
            reporter: self.reporter,
        }
    }

    pub fn with_reporter<S: Reporter>(self, reporter: S) -> Bootstrapper<F, S> {
        Bootstrapper {
            config: self.config,
            engine: self.engine,
            fetcher: self.fetcher,
            reporter,
        }
    }

    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = engine;
        self
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// Classify a user-supplied source string. A malformed URL is reported
    /// like any other fetch failure.
    pub fn parse_source(&self, input: &str) -> Result<ModuleSource, BootstrapError> {
        ModuleSource::parse(input).map_err(|err| {
            let err = BootstrapError::FetchFailed {
                origin: ModuleSource::Path(input.into()),
                error: err.into(),
            };
            self.reporter.report(&err);
            err
        })
    }

    /// Bootstrap with default host data.
    pub async fn bootstrap<T: Default>(
        &self,
        source: ModuleSource,
        imports: &ImportTable<T>,
    ) -> Result<RunHandle<T>, BootstrapError> {
        self.bootstrap_with(source, imports, T::default()).await
    }

    pub async fn bootstrap_with<T>(
        &self,
        source: ModuleSource,
        imports: &ImportTable<T>,
        data: T,
    ) -> Result<RunHandle<T>, BootstrapError> {
        self.bootstrap_until(source, imports, data, std::future::pending::<()>())
            .await
    }

    /// Bootstrap, abandoning the fetch with [`BootstrapError::Cancelled`]
    /// if `cancel` completes first.
    pub async fn bootstrap_until<T>(
        &self,
        source: ModuleSource,
        imports: &ImportTable<T>,
        data: T,
        cancel: impl Future<Output = ()>,
    ) -> Result<RunHandle<T>, BootstrapError> {
        let started_at = Instant::now();
        let result = self.run_sequence(source, imports, data, cancel).await;
        match &result {
            Ok(handle) => info!(
                target: "wasmboot",
                stage = "bootstrap",
                status = "ok",
                entry = %self.config.entry,
                outcome = ?handle.status,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "module bootstrapped"
            ),
            Err(err) => self.reporter.report(err),
        }
        result
    }

    /// Fetch and compile without instantiating. Failures are reported the
    /// same way as for a full bootstrap.
    pub async fn load(&self, source: ModuleSource) -> Result<Module, BootstrapError> {
        let result = self.load_module(source, std::future::pending::<()>()).await;
        if let Err(err) = &result {
            self.reporter.report(err);
        }
        result.map(|(_, module)| module)
    }

    async fn run_sequence<T>(
        &self,
        source: ModuleSource,
        imports: &ImportTable<T>,
        data: T,
        cancel: impl Future<Output = ()>,
    ) -> Result<RunHandle<T>, BootstrapError> {
        let (origin, module) = self.load_module(source, cancel).await?;

        let mut store = Store::new(&self.engine, data);
        store.set_fuel(self.config.fuel);
        let mut instance = imports
            .instantiate(&mut store, &module)
            .map_err(|err| match err {
                InstantiationError::Link(error) => BootstrapError::LinkError {
                    origin: origin.clone(),
                    error,
                },
                InstantiationError::Trap(trap) => BootstrapError::RuntimeTrap {
                    origin: origin.clone(),
                    stage: TrapStage::Instantiation,
                    trap,
                },
            })?;
        debug!(source = %origin, imports = module.imports().len(), "instantiated module");

        let entry = self.config.entry();
        let status = match instance.call_dynamic(&mut store, entry, &[]) {
            Ok(values) => RunStatus::Returned(values),
            Err(CallError::Trap(Trap::Exit(code))) => RunStatus::Exited(code),
            Err(err) => return Err(entry_error(origin, entry, err)),
        };

        Ok(RunHandle {
            instance,
            store,
            status,
        })
    }

    /// Resolve, fetch and compile. Returns the resolved source with the
    /// module so later errors name what was actually loaded.
    async fn load_module(
        &self,
        source: ModuleSource,
        cancel: impl Future<Output = ()>,
    ) -> Result<(ModuleSource, Module), BootstrapError> {
        let origin = match source.resolve(self.config.base_url()) {
            Ok(origin) => origin,
            Err(err) => {
                return Err(BootstrapError::FetchFailed {
                    origin: source,
                    error: err.into(),
                });
            }
        };

        let fetched = self.fetch(&origin, cancel).await?;
        if let Err(error) = self.check_content_type(&origin, &fetched) {
            return Err(BootstrapError::FetchFailed { origin, error });
        }

        let module = match self.compile(&fetched.bytes) {
            Ok(module) => module,
            Err(error) => return Err(BootstrapError::InvalidModule { origin, error }),
        };
        debug!(
            source = %origin,
            bytes = fetched.bytes.len(),
            exports = module.exports().len(),
            "compiled module"
        );
        Ok((origin, module))
    }

    async fn fetch(
        &self,
        origin: &ModuleSource,
        cancel: impl Future<Output = ()>,
    ) -> Result<Fetched, BootstrapError> {
        let fetch = self.fetcher.fetch(origin);
        let bounded = async {
            match self.config.fetch_timeout {
                Some(limit) => match tokio::time::timeout(limit, fetch).await {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::TimedOut(limit)),
                },
                None => fetch.await,
            }
        };

        tokio::select! {
            result = bounded => result.map_err(|error| BootstrapError::FetchFailed {
                origin: origin.clone(),
                error,
            }),
            () = cancel => Err(BootstrapError::Cancelled {
                origin: origin.clone(),
            }),
        }
    }

    /// Strict mode mirrors streaming instantiation: an HTTP response must
    /// declare `application/wasm`.
    fn check_content_type(&self, origin: &ModuleSource, fetched: &Fetched) -> Result<(), FetchError> {
        let is_http = matches!(origin, ModuleSource::Url(url) if url.scheme() != "file");
        if !self.config.strict_content_type || !is_http {
            return Ok(());
        }
        match fetched.content_type.as_deref() {
            Some(content_type) if is_wasm_content_type(content_type) => Ok(()),
            found => Err(FetchError::ContentType {
                found: found.unwrap_or("nothing").to_string(),
            }),
        }
    }

    fn compile(&self, bytes: &[u8]) -> Result<Module, CompileError> {
        if self.config.accept_text && !bytes.starts_with(b"\0asm") {
            let binary = wat::parse_bytes(bytes)?;
            return Module::from_bytes(&self.engine, &binary);
        }
        Module::from_bytes(&self.engine, bytes)
    }
}

fn entry_error(origin: ModuleSource, entry: &str, err: CallError) -> BootstrapError {
    let error = match err {
        CallError::Trap(trap) => {
            return BootstrapError::RuntimeTrap {
                origin,
                stage: TrapStage::Entry,
                trap,
            };
        }
        CallError::MissingExport(name) => EntryPointError::Missing(name),
        CallError::NotAFunction { name, kind } => EntryPointError::NotAFunction { name, kind },
        CallError::ArgumentMismatch { expected, .. } => EntryPointError::TakesParams {
            name: entry.to_string(),
            signature: expected,
        },
    };
    BootstrapError::EntryPoint { origin, error }
}
