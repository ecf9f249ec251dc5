use std::time::Duration;

use clap::Parser;
use error::AppError;
use hoard_engine::{CacheLimit, DownloaderConfig, Hoard, HoardConfig, ProxyConfig};
use mimalloc::MiMalloc;
use tracing::{Level, debug, error, info};
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::writer::MakeWriterExt;

mod cli;
mod commands;
mod error;
mod utils;

use cli::{CliArgs, Command};
use utils::{parse_headers, parse_size};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        error!(error = ?e, "Application failed");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    let args = CliArgs::parse();

    // Setup logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open("hoard.log")?;

    let multi_writer = MakeWriterExt::and(std::io::stderr, log_file);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(multi_writer)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::Initialization(e.to_string()))?;

    let config = build_config(&args)?;
    info!(
        cache_dir = %args.cache_dir.display(),
        size_limit = %config.cache.size_limit,
        count_limit = %config.cache.count_limit,
        "Opening cache"
    );

    let hoard = Hoard::new(config).await?;
    commands::run(&hoard, args.command).await
}

fn build_config(args: &CliArgs) -> Result<HoardConfig, AppError> {
    // opening a cache enforces its limits, and only fetch should evict to make room
    let (size_limit, count_limit) = match args.command {
        Command::Fetch { .. } => (
            CacheLimit::from_raw(parse_size(&args.max_size)?),
            CacheLimit::from_raw(args.max_count),
        ),
        _ => (CacheLimit::Unlimited, CacheLimit::Unlimited),
    };

    debug!(
        "HTTP timeout configuration: overall={}s, connect={}s",
        args.timeout, args.connect_timeout
    );

    let mut builder = HoardConfig::builder()
        .with_cache_dir(&args.cache_dir)
        .with_scratch_dir(args.cache_dir.with_extension("relocated"))
        .with_download_dir(args.cache_dir.with_extension("partial"))
        .with_size_limit(size_limit)
        .with_count_limit(count_limit)
        .with_timeout(Duration::from_secs(args.timeout))
        .with_connect_timeout(Duration::from_secs(args.connect_timeout))
        .with_headers(parse_headers(
            DownloaderConfig::get_default_headers(),
            &args.headers,
        ));

    if let Some(user_agent) = &args.user_agent {
        builder = builder.with_user_agent(user_agent);
    }

    builder = if args.no_proxy {
        info!("All proxy settings disabled (--no-proxy flag)");
        builder.with_system_proxy(false)
    } else if let Some(proxy_url) = &args.proxy {
        info!(
            proxy_url = %proxy_url,
            proxy_type = ?args.proxy_type,
            "Using explicit proxy configuration for downloads"
        );
        builder.with_proxy(ProxyConfig {
            url: proxy_url.clone(),
            proxy_type: args.proxy_type,
            auth: None,
        })
    } else {
        builder.with_system_proxy(true)
    };

    Ok(builder.build())
}
