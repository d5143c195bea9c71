use std::sync::Arc;

use clap::Parser;
use error::AppError;
use intercache::{CacheConfig, CacheEngine};
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

mod cli;
mod commands;
mod error;
mod utils;

use cli::{CliArgs, Commands};
use commands::Host;
use utils::{parse_duration, parse_headers};

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        // Log the full error for debugging
        error!(error = ?e, "Application failed");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    // Parse command-line arguments
    let args = CliArgs::parse();

    // Setup logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::Initialization(e.to_string()))?;

    let config = build_config(&args)?;
    info!(
        root = ?config.root_dir,
        fill_timeout = ?config.fill_timeout,
        max_age = ?config.max_age,
        statuses = ?config.cacheable_statuses,
        kinds = ?config.cacheable_kinds,
        "Cache configuration"
    );

    let engine = Arc::new(CacheEngine::open(config).await?);

    match args.command {
        Commands::Fetch {
            urls,
            resource_kind,
            headers,
            output_dir,
        } => {
            // Expire fills whose response never arrived while requests run
            let maintenance = engine
                .clone()
                .start_maintenance_task(engine.config().fill_timeout);
            let host = Host::new(engine, parse_headers(&headers))?;
            let result = host
                .fetch_all(&urls, resource_kind, output_dir.as_deref())
                .await;
            maintenance.abort();
            result
        }
        Commands::Lookup { url, resource_kind } => {
            commands::lookup(&engine, &url, resource_kind).await
        }
        Commands::Purge { url, resource_kind } => {
            commands::purge(&engine, &url, resource_kind).await
        }
        Commands::Clear => commands::clear(&engine).await,
        Commands::Stats => commands::stats(&engine).await,
    }
}

fn build_config(args: &CliArgs) -> Result<CacheConfig, AppError> {
    let mut builder =
        CacheConfig::builder().with_fill_timeout(parse_duration(&args.fill_timeout)?);

    if let Some(dir) = &args.cache_dir {
        builder = builder.with_root_dir(dir);
    }
    if !args.statuses.is_empty() {
        builder = builder.with_cacheable_statuses(args.statuses.iter().copied());
    }
    if !args.kinds.is_empty() {
        builder = builder.with_cacheable_kinds(args.kinds.iter().copied());
    }
    if let Some(max_age) = &args.max_age {
        builder = builder.with_max_age(Some(parse_duration(max_age)?));
    }

    let config = builder.build();
    if config.fill_timeout.is_zero() {
        return Err(AppError::InvalidInput(
            "Fill timeout must be greater than zero".to_string(),
        ));
    }
    Ok(config)
}
