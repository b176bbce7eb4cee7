use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gqlkit::async_graphql::dynamic::Schema;
use gqlkit::{AppContext, CompositionReport, ModuleHost, SchemaComposer, SchemaNamespace};
use gqlkit_bootstrap::{AppConfig, AppConfigProvider, CliArgs};
use mimalloc::MiMalloc;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

mod http;
mod registered_modules;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Wellspring Server - GraphQL API composed from feature modules
#[derive(Parser)]
#[command(name = "wellspring-server")]
#[command(about = "Wellspring Server - GraphQL API composed from feature modules")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port override for HTTP server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable GraphQL introspection
    #[arg(long)]
    no_introspection: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Run,
    /// Compose the schema, print its SDL and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        port: cli.port,
        print_config: cli.print_config,
        verbose: cli.verbose,
        no_introspection: cli.no_introspection,
    };

    // defaults -> YAML (if provided) -> env (APP__*) -> CLI overrides
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    if args.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    let logging_config = config.logging.clone().unwrap_or_default();
    let home_dir = Path::new(&config.server.home_dir);
    gqlkit_bootstrap::init_logging(&logging_config, home_dir);
    tracing::debug!(files = ?gqlkit_bootstrap::log_files(&logging_config, home_dir), "Log files");
    tracing::info!(
        modules = ?registered_modules::linked_modules(),
        home_dir = %config.server.home_dir,
        "Wellspring Server starting"
    );

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_server(config).await,
        Commands::Check => check_schema(config).await,
    }
}

/// Loads every registered module, runs post-load and composes the schema.
async fn compose(config: &AppConfig) -> Result<(Schema, CompositionReport)> {
    let ctx = AppContext::builder()
        .config(config.graphql.clone())
        .settings(Arc::new(AppConfigProvider::new(config.clone())))
        .build();

    let host = ModuleHost::new(ctx.clone())?;
    let loaded = host.load_registered()?;
    tracing::info!(count = loaded.len(), "Modules loaded");

    let post_load = host.post_load().await;
    for failure in &post_load.failures {
        tracing::warn!(
            module = %failure.module,
            phase = %failure.phase,
            error = %failure.error,
            "Module post-load step failed; continuing"
        );
    }

    let (schema, report) = SchemaComposer::from_config(&config.graphql)
        .compose_with_report(&ctx, &mut SchemaNamespace::new())
        .context("Schema composition failed")?;
    tracing::info!(
        types = report.installed.len(),
        collisions = report.collisions.len(),
        skipped_scalars = report.skipped_scalars.len(),
        overrides = report.resolver_overrides.len(),
        "Schema composed"
    );
    Ok((schema, report))
}

async fn run_server(config: AppConfig) -> Result<()> {
    let (schema, _) = compose(&config).await?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;

    let cancel = gqlkit_bootstrap::shutdown_token();
    http::serve(
        addr,
        http::router(schema),
        cancel,
        Duration::from_secs(config.server.shutdown_timeout_sec),
    )
    .await?;

    tracing::info!("Wellspring Server stopped");
    Ok(())
}

async fn check_schema(config: AppConfig) -> Result<()> {
    tracing::info!("Checking module composition…");
    let (schema, report) = compose(&config).await?;

    for collision in &report.collisions {
        println!(
            "warning: type {} from '{}' dropped (kept from '{}')",
            collision.type_name, collision.dropped_from, collision.kept_from
        );
    }
    for scalar in &report.skipped_scalars {
        println!("warning: custom scalar '{scalar}' skipped");
    }
    println!("{}", schema.sdl());
    Ok(())
}
