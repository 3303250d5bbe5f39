use clap::{Parser, Subcommand};
use eyre::{Result, WrapErr};
use std::path::PathBuf;
use std::time::Duration;

use faceswap_gateway::config::Config;
use faceswap_gateway::remote::{RemoteSwapClient, RetryPolicy};
use faceswap_gateway::server::{run_server, ServerConfig};

#[derive(Parser)]
#[command(
    name = "faceswap-gateway",
    about = "HTTP gateway for a hosted face-swap model with content-hash result caching."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Address to bind to
        #[arg(long)]
        bind: Option<String>,

        /// Remote face-swap endpoint base URL
        #[arg(long)]
        remote_endpoint: Option<String>,

        /// Output directory for finalized images
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Upload staging directory
        #[arg(long)]
        upload_dir: Option<PathBuf>,

        /// Rate limit in requests per minute per IP (0 = no limit)
        #[arg(long)]
        rate_limit: Option<u32>,

        /// Cache TTL in seconds
        #[arg(long)]
        cache_ttl: Option<u64>,
    },

    /// Swap faces between two local images without running the server
    Swap {
        /// Source image (face to transplant)
        #[arg(long)]
        source: PathBuf,

        /// Destination image (face to replace)
        #[arg(long)]
        dest: PathBuf,

        /// 1-based face index in the source image
        #[arg(long, default_value_t = 1)]
        source_face: u32,

        /// 1-based face index in the destination image
        #[arg(long, default_value_t = 1)]
        dest_face: u32,

        /// Remote face-swap endpoint base URL
        #[arg(long)]
        remote_endpoint: Option<String>,

        /// Output directory for the finalized image
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

fn cmd_serve(
    bind: Option<String>,
    remote_endpoint: Option<String>,
    output_dir: Option<PathBuf>,
    upload_dir: Option<PathBuf>,
    rate_limit: Option<u32>,
    cache_ttl: Option<u64>,
) -> Result<()> {
    let cfg = Config::load();
    let defaults = ServerConfig::default();

    let bind_str = bind
        .or(cfg.bind)
        .unwrap_or_else(|| defaults.bind_addr.to_string());
    let bind_addr = bind_str
        .parse()
        .wrap_err_with(|| format!("Invalid bind address: {}", bind_str))?;

    let retry = RetryPolicy {
        max_attempts: cfg.retry_max_attempts.unwrap_or(defaults.retry.max_attempts),
        base_delay: cfg
            .retry_base_delay_seconds
            .map(Duration::from_secs)
            .unwrap_or(defaults.retry.base_delay),
        multiplier: cfg
            .retry_backoff_multiplier
            .unwrap_or(defaults.retry.multiplier),
    };

    let config = ServerConfig {
        bind_addr,
        upload_dir: upload_dir
            .or(cfg.upload_dir.map(PathBuf::from))
            .unwrap_or(defaults.upload_dir),
        output_dir: output_dir
            .or(cfg.output_dir.map(PathBuf::from))
            .unwrap_or(defaults.output_dir),
        remote_endpoint: remote_endpoint
            .or(cfg.remote_endpoint)
            .unwrap_or(defaults.remote_endpoint),
        remote_operation: cfg.remote_operation.unwrap_or(defaults.remote_operation),
        cache_ttl_seconds: cache_ttl
            .or(cfg.cache_ttl_seconds)
            .unwrap_or(defaults.cache_ttl_seconds),
        cache_max_entries: cfg.cache_max_entries.unwrap_or(defaults.cache_max_entries),
        retry,
        rate_limit_rpm: rate_limit.or(cfg.rate_limit_rpm).unwrap_or(defaults.rate_limit_rpm),
        allowed_origins: cfg.allowed_origins,
        max_image_dimension: cfg
            .max_image_dimension
            .unwrap_or(defaults.max_image_dimension),
    };

    tracing::info!("starting faceswap-gateway server");
    tracing::info!(
        cache_ttl_seconds = config.cache_ttl_seconds,
        cache_max_entries = config.cache_max_entries,
        "result cache configured"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_server(config))?;

    Ok(())
}

fn cmd_swap(
    source: PathBuf,
    dest: PathBuf,
    source_face: u32,
    dest_face: u32,
    remote_endpoint: Option<String>,
    output_dir: Option<PathBuf>,
) -> Result<i32> {
    let cfg = Config::load();
    let defaults = ServerConfig::default();

    let endpoint = remote_endpoint
        .or(cfg.remote_endpoint)
        .unwrap_or(defaults.remote_endpoint);
    let operation = cfg.remote_operation.unwrap_or(defaults.remote_operation);
    let output = output_dir
        .or(cfg.output_dir.map(PathBuf::from))
        .unwrap_or(defaults.output_dir);

    let client = RemoteSwapClient::new(&endpoint, &operation, RetryPolicy::default(), output);

    let rt = tokio::runtime::Runtime::new()?;
    match rt.block_on(client.swap(&source, &dest, source_face, dest_face)) {
        Ok(path) => {
            println!("{}", path.display());
            Ok(0)
        }
        Err(e) => {
            eprintln!("{}", e.message());
            Ok(1)
        }
    }
}

fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "faceswap_gateway=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve {
            bind,
            remote_endpoint,
            output_dir,
            upload_dir,
            rate_limit,
            cache_ttl,
        } => cmd_serve(bind, remote_endpoint, output_dir, upload_dir, rate_limit, cache_ttl),
        Commands::Swap {
            source,
            dest,
            source_face,
            dest_face,
            remote_endpoint,
            output_dir,
        } => match cmd_swap(source, dest, source_face, dest_face, remote_endpoint, output_dir) {
            Ok(code) => {
                if code != 0 {
                    std::process::exit(code);
                }
                Ok(())
            }
            Err(e) => Err(e),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {e:?}");
        std::process::exit(1);
    }
}
