//! Page Prerender CLI
//!
//!   page-prerender [--config prerender.json] [--pages pages.json] [--out-dir DIR]
//!                  [--skip-assets] [--drain-timeout-ms MS] [--verbose]
//!
//! Runs the whole website build and exits. Exit code 0 means every page was
//! written; any error exits with 1 and no partial build should be deployed.

use anyhow::{Context, Result};
use clap::Parser;
use page_prerender::{BuildConfig, BuildReport, PageRegistry, Pipeline};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "page-prerender")]
#[command(about = "Prerender website pages with sandboxed notebook cells")]
#[command(version)]
struct Cli {
    /// Build configuration (JSON). Defaults apply if the file is absent.
    #[arg(short, long, default_value = "prerender.json")]
    config: PathBuf,

    /// Page manifest, overriding the config
    #[arg(long)]
    pages: Option<PathBuf>,

    /// Website output root, overriding the config
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Skip docs, style and bundle steps (prebuilt assets must exist)
    #[arg(long)]
    skip_assets: bool,

    /// Fail a page whose sandboxed work has not settled after this long
    #[arg(long)]
    drain_timeout_ms: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

async fn build(cli: Cli) -> Result<BuildReport> {
    let mut config = BuildConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(pages) = cli.pages {
        config.pages = pages;
    }
    if let Some(out_dir) = cli.out_dir {
        config.out_dir = out_dir;
    }
    if cli.drain_timeout_ms.is_some() {
        config.drain_timeout_ms = cli.drain_timeout_ms;
    }

    let manifest = config.pages_path();
    let registry = PageRegistry::load(&manifest)
        .with_context(|| format!("loading pages from {}", manifest.display()))?;

    let report = Pipeline::new(config, registry)
        .skip_assets(cli.skip_assets)
        .run()
        .await?;
    Ok(report)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_target(false)
        .init();

    match build(cli).await {
        Ok(report) => {
            tracing::info!(pages = report.pages.len(), "done");
            // Exit explicitly: leftover runtime resources must not keep the
            // process alive once the last page is on disk.
            std::process::exit(0);
        }
        Err(err) => {
            tracing::error!("build failed: {err:#}");
            std::process::exit(1);
        }
    }
}
