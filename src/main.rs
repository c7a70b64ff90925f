use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use throome::config::{ClusterConfig, Config, ConfigError};
use throome::utils::{format_duration, format_latency, generate_id};
use throome::{AdapterFactory, Gateway};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "throome")]
#[command(about = "A gateway control plane for cache, database and queue backends")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "Throome Team")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway
    Run {
        /// Path to gateway configuration file
        #[arg(short, long, default_value = "throome.toml")]
        config: PathBuf,
    },
    /// Generate an example gateway configuration and cluster
    Config {
        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
    /// Validate a gateway or cluster configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
        /// Treat the file as a cluster document
        #[arg(long)]
        cluster: bool,
    },
    /// Connect every configured cluster once and print service health
    Health {
        /// Path to gateway configuration file
        #[arg(short, long, default_value = "throome.toml")]
        config: PathBuf,
        /// Only check this cluster
        #[arg(long)]
        cluster_id: Option<String>,
        /// Print the collected metrics in Prometheus text format
        #[arg(long)]
        metrics: bool,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run_gateway(config).await,
        Commands::Config { output } => generate_config(output),
        Commands::Validate { config, cluster } => validate_config(config, cluster),
        Commands::Health {
            config,
            cluster_id,
            metrics,
        } => check_health(config, cluster_id, metrics).await,
        Commands::Version => {
            show_version();
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    Config::load_from_file(path).with_context(|| format!("failed to load config from {:?}", path))
}

async fn run_gateway(config_path: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&config_path)?;
    init_logging(&config)?;

    let instance = generate_id("throome");
    info!(
        instance = %instance,
        "Starting throome v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!("Configuration loaded from: {:?}", config_path);

    let started = Instant::now();
    let gateway = Arc::new(Gateway::new(&config, AdapterFactory::with_builtin())?);
    let loaded = gateway.load_dir(&config.gateway.clusters_dir).await?;
    if loaded.is_empty() {
        tracing::warn!(dir = %config.gateway.clusters_dir, "No clusters loaded");
    }

    let monitor = gateway.spawn_health_monitor();
    info!(clusters = loaded.len(), "Gateway running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    gateway.shutdown().await;
    if let Err(e) = monitor.await {
        tracing::error!("Health monitor task failed: {}", e);
    }
    info!(uptime = %format_duration(started.elapsed()), "Throome stopped");
    Ok(())
}

fn generate_config(output: PathBuf) -> anyhow::Result<()> {
    println!("Generating example configuration in: {:?}", output);

    Config::create_example_config(&output).context("failed to generate config")?;

    println!("Configuration files generated successfully!");
    println!("Edit them to match your environment and run:");
    println!("  throome run --config {:?}", output.join("throome.toml"));

    Ok(())
}

fn validate_config(config_path: PathBuf, cluster: bool) -> anyhow::Result<()> {
    println!("Validating configuration file: {:?}", config_path);

    let result = if cluster {
        ClusterConfig::load_from_file(&config_path).map(|cluster| {
            println!("✓ Cluster document is valid");
            println!("  Cluster: {} ({})", cluster.cluster_id, cluster.name);
            println!("  Strategy: {}", cluster.routing.strategy);
            println!("  Services: {}", cluster.services.len());
            for (name, service) in &cluster.services {
                println!(
                    "    {}: {} at {} (weight {})",
                    name,
                    service.service_type,
                    service.address(),
                    service.weight
                );
            }
        })
    } else {
        Config::load_from_file(&config_path).map(|config| {
            println!("✓ Configuration file is valid");
            println!("  Clusters directory: {}", config.gateway.clusters_dir);
            println!("  Connect timeout: {}ms", config.gateway.connect_timeout_ms);
            println!(
                "  Health checks: every {}s, timeout {}s, threshold {}",
                config.health.interval_sec, config.health.timeout_sec, config.health.failure_threshold
            );
            println!("  Log level: {} ({})", config.logging.level, config.logging.format);
        })
    };

    if let Err(e) = result {
        eprintln!("✗ Configuration file validation failed:");
        match &e {
            ConfigError::IoError(msg) => eprintln!("  File error: {}", msg),
            ConfigError::ParseError(msg) => eprintln!("  Parse error: {}", msg),
            ConfigError::ValidationError(msg) => eprintln!("  Validation error: {}", msg),
            ConfigError::SerializeError(msg) => eprintln!("  Serialization error: {}", msg),
        }
        return Err(e.into());
    }

    Ok(())
}

async fn check_health(
    config_path: PathBuf,
    cluster_id: Option<String>,
    metrics: bool,
) -> anyhow::Result<()> {
    let config = load_config(&config_path)?;
    init_logging(&config)?;

    let gateway = Gateway::new(&config, AdapterFactory::with_builtin())?;
    gateway.load_dir(&config.gateway.clusters_dir).await?;

    let routers = match &cluster_id {
        Some(id) => vec![gateway.router(id).await?],
        None => gateway.routers().await,
    };

    let mut unhealthy = 0;
    for router in &routers {
        println!("Cluster {} ({})", router.cluster_id(), router.strategy_name().await);
        let results = router.health_check_all().await;
        gateway.collector().record_health_round(router, &results).await;
        for (service, status) in results {
            let mark = if status.healthy { "✓" } else { "✗" };
            match &status.error_message {
                Some(reason) => println!("  {} {}: {}", mark, service, reason),
                None => println!("  {} {}: {}", mark, service, format_latency(status.response_time)),
            }
            if !status.healthy {
                unhealthy += 1;
            }
        }
    }

    if metrics {
        println!();
        print!("{}", gateway.collector().gather_text()?);
    }

    gateway.shutdown().await;

    if unhealthy > 0 {
        bail!("{} unhealthy service(s)", unhealthy);
    }
    Ok(())
}

fn show_version() {
    println!("throome v{}", env!("CARGO_PKG_VERSION"));
    println!("A gateway control plane for cache, database and queue backends");
    println!();
    println!("Target: {}", std::env::consts::ARCH);
    println!();
    println!("Routing strategies:");
    for kind in throome::StrategyKind::ALL {
        println!("  • {}", kind);
    }
    println!("Built-in adapters:");
    for service_type in AdapterFactory::with_builtin().registered_types() {
        println!("  • {}", service_type);
    }
}

/// Level comes from the config file unless RUST_LOG is set
fn init_logging(config: &Config) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.logging.level)?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match config.logging.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    info!("Logging initialized at level: {}", config.logging.level);
    Ok(())
}
