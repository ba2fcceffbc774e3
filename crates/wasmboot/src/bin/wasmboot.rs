use std::process::ExitCode;
use std::sync::OnceLock;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use url::Url;
use wasmboot::{BootstrapConfig, Bootstrapper, ExternKind, ImportType, RunStatus, host};

#[derive(Parser)]
#[command(name = "wasmboot", about = "Fetch, link and run a WebAssembly module")]
struct Cli {
    /// Default log level; `RUST_LOG` overrides it.
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bootstrap a module with the console imports and call its entry point.
    Run {
        /// Path, file:// or http(s):// URL of the module.
        source: String,
        /// Export to call once instantiated.
        #[arg(long, default_value = "run")]
        entry: String,
        /// Give up on the fetch after this many milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Instruction budget for the guest.
        #[arg(long)]
        fuel: Option<u64>,
        /// Resolve relative sources against this URL.
        #[arg(long)]
        base_url: Option<Url>,
        /// Require HTTP responses to be served as application/wasm.
        #[arg(long)]
        strict_content_type: bool,
        /// Accept WebAssembly text as well as binary.
        #[arg(long)]
        wat: bool,
    },
    /// Fetch and compile a module, then list its imports and exports.
    Inspect {
        source: String,
        #[arg(long)]
        wat: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.log_level, cli.log_format);

    match cli.command {
        Command::Run {
            source,
            entry,
            timeout_ms,
            fuel,
            base_url,
            strict_content_type,
            wat,
        } => {
            let mut config = BootstrapConfig::default()
                .with_entry(entry)
                .with_strict_content_type(strict_content_type)
                .with_accept_text(wat);
            if let Some(ms) = timeout_ms {
                config = config.with_fetch_timeout(Duration::from_millis(ms));
            }
            if let Some(fuel) = fuel {
                config = config.with_fuel(fuel);
            }
            if let Some(base) = base_url {
                config = config.with_base_url(base);
            }
            run(config, &source).await
        }
        Command::Inspect { source, wat } => {
            let config = BootstrapConfig::default().with_accept_text(wat);
            inspect(config, &source).await
        }
    }
}

async fn run(config: BootstrapConfig, source: &str) -> anyhow::Result<ExitCode> {
    let imports = host::console::<()>();
    let bootstrapper = Bootstrapper::new(config);
    // Failures are reported through tracing by the bootstrapper.
    let Ok(source) = bootstrapper.parse_source(source) else {
        return Ok(ExitCode::FAILURE);
    };

    let interrupted = async {
        // Without a handler, never cancel.
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    let Ok(handle) = bootstrapper
        .bootstrap_until(source, &imports, (), interrupted)
        .await
    else {
        return Ok(ExitCode::FAILURE);
    };

    match handle.status() {
        RunStatus::Returned(values) => {
            if !values.is_empty() {
                let rendered: Vec<String> = values.iter().map(ToString::to_string).collect();
                println!("{}", rendered.join(" "));
            }
            Ok(ExitCode::SUCCESS)
        }
        RunStatus::Exited(code) => Ok(ExitCode::from(u8::try_from(*code).unwrap_or(1))),
    }
}

async fn inspect(config: BootstrapConfig, source: &str) -> anyhow::Result<ExitCode> {
    let bootstrapper = Bootstrapper::new(config);
    let Ok(source) = bootstrapper.parse_source(source) else {
        return Ok(ExitCode::FAILURE);
    };
    let Ok(module) = bootstrapper.load(source).await else {
        return Ok(ExitCode::FAILURE);
    };

    println!("imports:");
    for import in module.imports() {
        let ty = match &import.ty {
            ImportType::Func(ty) => ty.to_string(),
            other => other.kind().to_string(),
        };
        println!("  {}.{}: {ty}", import.module, import.name);
    }

    println!("exports:");
    for (name, export) in module.exports() {
        match export.kind {
            ExternKind::Func => {
                let ty = module
                    .export_func_type(name)
                    .map(ToString::to_string)
                    .unwrap_or_default();
                println!("  {name}: func {ty}");
            }
            kind => println!("  {name}: {kind}"),
        }
    }

    if let Some(start) = module.start() {
        println!("start: func[{start}]");
    }
    Ok(ExitCode::SUCCESS)
}

fn init_logging(level: LogLevel, format: LogFormat) {
    use std::io::IsTerminal;
    use tracing_subscriber::{EnvFilter, fmt};

    static INITIALISED: OnceLock<()> = OnceLock::new();

    INITIALISED.get_or_init(|| {
        let use_ansi = std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level.directive()));

        let builder = fmt::fmt()
            .with_env_filter(filter)
            .with_ansi(use_ansi)
            .with_writer(std::io::stderr)
            .with_target(true);

        match format {
            LogFormat::Json => {
                let _ = tracing::subscriber::set_global_default(builder.json().finish());
            }
            LogFormat::Text => {
                let _ = tracing::subscriber::set_global_default(builder.compact().finish());
            }
        }
    });
}
