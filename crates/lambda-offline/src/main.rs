//! lambda-offline: serve a service file's HTTP endpoints locally.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use lambda_offline_config::{parse_service_file, ConfigError, ServiceSpec};
use lambda_offline_lib::{server, Gateway, GatewayOptions, HandlerRegistry};
use lambda_offline_runtime::{HandlerLoadError, Runtime};
use lambda_offline_telemetry::{LogFormat, Telemetry, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(name = "lambda-offline", about = "Local API gateway and function emulator", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the HTTP endpoints of a service file.
    Serve {
        /// Service file (YAML).
        #[arg(short, long, default_value = "serverless.yml")]
        config: PathBuf,

        /// Host to listen on.
        #[arg(long, default_value = "localhost", env = "LAMBDA_OFFLINE_HOST")]
        host: String,

        /// Port to listen on.
        #[arg(long, default_value_t = 3000, env = "LAMBDA_OFFLINE_PORT")]
        port: u16,

        /// Path prefix added to every route.
        #[arg(long, default_value = "")]
        prefix: String,

        /// Stage, overriding the service file.
        #[arg(long)]
        stage: Option<String>,

        /// Region, overriding the service file.
        #[arg(long)]
        region: Option<String>,

        /// Let handlers run without a timeout.
        #[arg(long)]
        no_timeout: bool,

        /// Add CORS headers and answer preflight requests.
        #[arg(long)]
        cors: bool,

        /// Directory holding cert.pem and key.pem; serves HTTPS when set.
        #[arg(long)]
        https_dir: Option<PathBuf>,

        /// Log level.
        #[arg(long, default_value = "info", env = "LAMBDA_OFFLINE_LOG_LEVEL")]
        log_level: String,

        /// Log format (json or pretty).
        #[arg(long, default_value = "json")]
        log_format: String,
    },

    /// Check a service file without serving it.
    Validate {
        /// Service file (YAML).
        #[arg(short, long, default_value = "serverless.yml")]
        config: PathBuf,

        /// Output format (text or json).
        #[arg(long, default_value = "text")]
        format: String,
    },
}

struct ServeArgs {
    config: PathBuf,
    host: String,
    port: u16,
    https_dir: Option<PathBuf>,
    options: GatewayOptions,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { config, format } => run_validate(&config, &format),
        Commands::Serve {
            config,
            host,
            port,
            prefix,
            stage,
            region,
            no_timeout,
            cors,
            https_dir,
            log_level,
            log_format,
        } => {
            let Some(log_format) = LogFormat::parse(&log_format) else {
                eprintln!("error: unknown log format '{}' (expected json or pretty)", log_format);
                return ExitCode::from(2);
            };

            // Handlers read this to detect local execution; set before any thread exists.
            std::env::set_var("IS_OFFLINE", "true");

            let telemetry = match Telemetry::init(
                TelemetryConfig::new()
                    .with_log_level(log_level)
                    .with_log_format(log_format),
            ) {
                Ok(telemetry) => telemetry,
                Err(e) => {
                    eprintln!("error: {}", e);
                    return ExitCode::from(1);
                }
            };

            let mut options = GatewayOptions::new()
                .with_prefix(prefix)
                .with_timeouts(!no_timeout)
                .with_cors(cors)
                .with_metrics(telemetry.metrics_clone());
            options.stage = stage;
            options.region = region;

            let args = ServeArgs {
                config,
                host,
                port,
                https_dir,
                options,
            };

            let runtime = match tokio::runtime::Runtime::new() {
                Ok(runtime) => runtime,
                Err(e) => {
                    eprintln!("error: failed to start the async runtime: {}", e);
                    return ExitCode::from(1);
                }
            };
            match runtime.block_on(run_serve(args)) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    let error = format!("{:#}", e);
                    lambda_offline_telemetry::log_configuration_error!(error = %error, "lambda-offline stopped");
                    eprintln!("error: {}", error);
                    ExitCode::from(1)
                }
            }
        }
    }
}

async fn run_serve(args: ServeArgs) -> anyhow::Result<()> {
    let service = load_service(&args.config)?;
    let service_name = service.service.clone();
    let registry = HandlerRegistry::new();
    warn_unhosted_handlers(&service, &registry);

    let gateway = Arc::new(Gateway::new(service, args.options, registry)?);
    let version = env!("CARGO_PKG_VERSION");
    let route_count = gateway.routes().len();
    lambda_offline_telemetry::log_startup!(
        version = version,
        service = %service_name,
        stage = %gateway.stage(),
        routes = route_count,
        "lambda-offline starting"
    );

    let addr = resolve_addr(&args.host, args.port).await?;
    let tls = match &args.https_dir {
        Some(dir) => Some(server::load_tls(dir)?),
        None => None,
    };
    let listener = server::bind(addr).await?;

    server::serve(gateway, listener, tls, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    })
    .await?;
    Ok(())
}

fn load_service(path: &Path) -> Result<ServiceSpec, ConfigError> {
    parse_service_file(path)?.resolve()
}

async fn resolve_addr(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("cannot resolve host '{}'", host))?
        .next()
        .with_context(|| format!("host '{}' has no addresses", host))
}

/// Native functions need handlers registered by an embedding program.
fn warn_unhosted_handlers(service: &ServiceSpec, registry: &HandlerRegistry) {
    for function in &service.functions {
        if Runtime::parse(&function.runtime) != Some(Runtime::Rust) {
            continue;
        }
        if let Err(HandlerLoadError::NotRegistered { function, handler }) = registry.load(function) {
            tracing::warn!(
                function = %function,
                handler = %handler,
                "no native handler registered; requests to this function will fail"
            );
        }
    }
}

#[derive(serde::Serialize)]
struct ValidationResult {
    file: String,
    valid: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    routes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Run the validate command.
fn run_validate(config: &Path, output_format: &str) -> ExitCode {
    let result = match load_service(config).and_then(|service| {
        Gateway::new(service, GatewayOptions::new(), HandlerRegistry::new())
    }) {
        Ok(gateway) => ValidationResult {
            file: config.display().to_string(),
            valid: true,
            routes: gateway.routes().to_vec(),
            error: None,
        },
        Err(e) => ValidationResult {
            file: config.display().to_string(),
            valid: false,
            routes: Vec::new(),
            error: Some(e.to_string()),
        },
    };

    if output_format == "json" {
        match serde_json::to_string_pretty(&result) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("error: {}", e);
                return ExitCode::from(1);
            }
        }
    } else if result.valid {
        eprintln!("✓ {} is valid ({} route(s))", result.file, result.routes.len());
        for route in &result.routes {
            eprintln!("  {}", route);
        }
    } else {
        eprintln!("✗ {} is invalid", result.file);
        if let Some(error) = &result.error {
            eprintln!("  {}", error);
        }
    }

    if result.valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}
