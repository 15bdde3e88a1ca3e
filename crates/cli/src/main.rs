//! `hotpatch` - inspect patch configuration and version gating from the command line.
//!
//! ## Commands
//!
//! - `config`: print the effective configuration
//! - `policy`: fetch the server version policy
//! - `check`: run the version compatibility decision
//! - `simulate`: run the full patch pipeline against an in-memory backend

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hotpatch_core::{
    check_version, fetch_policy_with_retry, load_config, run_operations,
    testing::MockAssetBackend, validate_config, AssetBackend, Config, HttpPolicySource,
    PatchEvent, PatchOperation, Platform, PlayMode, PolicySource, TransferFile,
};
use tokio_util::sync::CancellationToken;

/// Exit code when the version check blocks patching.
const EXIT_BLOCKED: i32 = 2;

#[derive(Parser)]
#[command(name = "hotpatch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Client-side package patch orchestrator", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "HOTPATCH_CONFIG",
        default_value = "hotpatch.toml"
    )]
    config: PathBuf,

    /// Target platform (defaults to the build platform)
    #[arg(short, long, global = true)]
    platform: Option<Platform>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration as JSON
    Config,

    /// Fetch and print the server version policy
    Policy,

    /// Decide whether a client version may patch to a server version
    Check {
        /// Latest version reported by the server
        #[arg(short, long)]
        server: String,

        /// Installed version (defaults to server.app_version)
        #[arg(short, long)]
        local: Option<String>,

        /// Skip the server policy and use the built-in rules only
        #[arg(long)]
        no_policy: bool,
    },

    /// Run the patch pipeline against an in-memory backend
    Simulate {
        /// Package name, repeat to patch several packages at once
        #[arg(long = "package", default_value = "DefaultPackage")]
        packages: Vec<String>,

        /// Play mode
        #[arg(short, long, default_value = "host")]
        mode: PlayMode,

        /// Version the backend reports as latest
        #[arg(long, default_value = "1.0.1")]
        latest: String,

        /// Number of files pending download
        #[arg(long, default_value = "0")]
        files: usize,

        /// Size of each pending file in bytes
        #[arg(long, default_value = "1024")]
        size: u64,

        /// Make this file fail on every attempt
        #[arg(long)]
        fail: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(code) => code,
        Err(e) => {
            error!("Fatal error: {:#}", e);
            eprintln!("error: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = read_config(&cli.config)?;
    validate_config(&config).context("Configuration validation failed")?;
    let platform = cli.platform.unwrap_or_else(Platform::current);

    match cli.command {
        Commands::Config => {
            print_json(&config)?;
            Ok(0)
        }
        Commands::Policy => {
            let source = policy_source(&config, platform)?;
            info!(url = %source.policy_url(), "Fetching version policy");
            let policy = source
                .fetch()
                .await
                .with_context(|| format!("Failed to fetch policy from {}", source.policy_url()))?;
            print_json(&policy)?;
            Ok(0)
        }
        Commands::Check {
            server,
            local,
            no_policy,
        } => {
            let local = local.unwrap_or_else(|| config.server.app_version.clone());
            let policy = if no_policy || !config.version.fetch_policy {
                None
            } else {
                let source = policy_source(&config, platform)?;
                fetch_policy_with_retry(&source, &config.version.retry, &CancellationToken::new())
                    .await
            };

            let result = check_version(&local, &server, policy.as_ref());
            print_json(&result)?;

            if result.allows_patching() {
                Ok(0)
            } else {
                warn!(%local, %server, reason = %result.reason, "Patching blocked");
                Ok(EXIT_BLOCKED)
            }
        }
        Commands::Simulate {
            packages,
            mode,
            latest,
            files,
            size,
            fail,
        } => simulate(config, platform, packages, mode, latest, files, size, fail).await,
    }
}

/// Load the config file, falling back to defaults when it does not exist.
fn read_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        warn!("Config file {:?} not found, using defaults", path);
        return Ok(Config::default());
    }

    info!("Loading configuration from {:?}", path);
    load_config(path).with_context(|| format!("Failed to load config from {:?}", path))
}

fn policy_source(config: &Config, platform: Platform) -> Result<HttpPolicySource> {
    HttpPolicySource::new(
        config.server.full_server_url(false, platform),
        config.version.policy_timeout(),
        config.version.policy_cache_ttl(),
    )
    .context("Failed to create policy client")
}

#[allow(clippy::too_many_arguments)]
async fn simulate(
    config: Config,
    platform: Platform,
    packages: Vec<String>,
    mode: PlayMode,
    latest: String,
    files: usize,
    size: u64,
    fail: Option<String>,
) -> Result<i32> {
    let backend = MockAssetBackend::new();
    backend.set_latest_version(latest).await;
    backend
        .set_pending_files(
            (0..files)
                .map(|i| TransferFile::new(format!("bundle_{:03}.bundle", i), size))
                .collect(),
        )
        .await;
    if let Some(file) = fail {
        backend.fail_file(file, u32::MAX).await;
    }

    let backend: Arc<dyn AssetBackend> = Arc::new(backend);

    let mut operations = Vec::with_capacity(packages.len());
    for package in packages {
        let mut operation =
            PatchOperation::new(package.clone(), mode, config.clone(), backend.clone())
                .with_context(|| format!("Failed to create patch operation for {}", package))?
                .with_platform(platform);

        operation.subscribe(move |event: &PatchEvent| {
            let line = serde_json::json!({ "package": &package, "event": event });
            println!("{}", line);
        });
        operations.push(operation);
    }

    let reports = run_operations(&mut operations)
        .await
        .context("Patch operation failed")?;
    print_json(&reports)?;

    let failures: Vec<String> = reports
        .iter()
        .filter(|r| !r.succeeded())
        .map(|r| {
            format!(
                "{} at {}: {}",
                r.package,
                r.stalled_at.map(|s| s.as_str()).unwrap_or("unknown stage"),
                r.error.as_deref().unwrap_or("unknown error")
            )
        })
        .collect();
    if !failures.is_empty() {
        bail!("Patch failed for {}", failures.join("; "));
    }
    Ok(0)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to encode JSON")?;
    println!("{}", json);
    Ok(())
}
