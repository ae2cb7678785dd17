//! upaas-build - application package builder
//!
//! Loads the worker configuration and the application metadata, then runs
//! one build or one OS bootstrap while printing progress.

mod cli;
mod error;
mod events;
mod logging;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use futures::StreamExt;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use upaas_builder::{BuildContext, BuildRequest, Builder, OsImageBuilder};
use upaas_config::{BuildConfig, Metadata};
use upaas_events::EventReceiver;
use upaas_types::BuildResult;

use crate::cli::{Cli, Commands};
use crate::error::CliError;
use crate::events::EventHandler;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json_mode = cli.global.json;

    if let Err(e) = logging::init_tracing(&cli.global.log_level, &cli.global.log_output, json_mode) {
        eprintln!("Error: {e}");
        process::exit(1);
    }

    if let Err(e) = run(cli).await {
        error!("Application error: {}", e);
        if !json_mode {
            eprintln!("Error: {e}");
        }
        process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    info!("Starting upaas-build v{}", env!("CARGO_PKG_VERSION"));
    let config = BuildConfig::load(cli.global.config.as_deref())
        .await
        .map_err(CliError::Config)?;

    let (event_sender, event_receiver) = upaas_events::channel();
    let mut handler = EventHandler::new(cli.global.json);
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    match cli.command {
        Commands::Build {
            metadata,
            base_package,
            previous_revision,
        } => {
            let metadata = load_metadata(&metadata).await?;
            let builder = Builder::new(config, metadata)
                .await?
                .with_events(event_sender)
                .with_cancellation(cancel);
            let request = BuildRequest {
                base_package,
                previous_revision,
            };
            let result = with_events(build(&builder, request), event_receiver, &mut handler).await?;
            print_result(&result, cli.global.json)?;
        }
        Commands::Bootstrap { force } => {
            let mut ctx = BuildContext::from_config(config).await?;
            ctx.events = Some(event_sender);
            ctx.cancel = cancel;
            with_events(bootstrap(&ctx, force), event_receiver, &mut handler).await?;
        }
    }

    info!("Command completed successfully");
    Ok(())
}

async fn load_metadata(path: &Path) -> Result<Metadata, CliError> {
    let path = if path.is_dir() {
        path.join("upaas.yml")
    } else {
        PathBuf::from(path)
    };
    Metadata::load_from_file(&path).await.map_err(CliError::Config)
}

async fn build(builder: &Builder, request: BuildRequest) -> Result<BuildResult, CliError> {
    let mut stream = Box::pin(builder.build_package(request).into_stream());
    let mut last = None;
    while let Some(result) = stream.next().await {
        let result = result?;
        info!(progress = result.progress, "build progress");
        last = Some(result);
    }
    last.ok_or_else(|| CliError::Build(upaas_errors::Error::internal("build produced no result")))
}

async fn bootstrap(ctx: &BuildContext, force: bool) -> Result<(), CliError> {
    let os = OsImageBuilder::new(ctx);
    if !force && os.has_valid_os_image().await? {
        info!(image = %os.image_filename(), "valid OS image already stored");
        return Ok(());
    }
    os.bootstrap_os().await?;
    Ok(())
}

/// Drive `operation` while forwarding events to the handler
async fn with_events<T>(
    operation: impl Future<Output = Result<T, CliError>>,
    mut events: EventReceiver,
    handler: &mut EventHandler,
) -> Result<T, CliError> {
    let mut operation = Box::pin(operation);
    loop {
        select! {
            result = &mut operation => {
                while let Ok(event) = events.try_recv() {
                    handler.handle_event(event);
                }
                return result;
            }
            Some(event) = events.recv() => handler.handle_event(event),
        }
    }
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("interrupted, aborting");
                cancel.cancel();
            }
            Err(e) => warn!(error = %e, "cannot listen for interrupts"),
        }
    });
}

fn print_result(result: &BuildResult, json: bool) -> Result<(), CliError> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    println!("package:     {}", result.filename.as_deref().unwrap_or("-"));
    println!("storage:     {}", result.storage.as_deref().unwrap_or("-"));
    println!("size:        {}", upaas_types::bytes_to_human(result.bytes));
    println!("parent:      {}", result.parent.as_deref().unwrap_or("(fresh)"));
    println!(
        "interpreter: {}",
        result.interpreter_version.as_deref().unwrap_or("-")
    );
    println!(
        "distro:      {} {} {}",
        result.distro_name, result.distro_version, result.distro_arch
    );
    if let Some(revision) = &result.revision.id {
        println!("revision:    {revision}");
    }
    if let Some(changelog) = &result.revision.changelog {
        println!("changelog:\n{changelog}");
    }
    Ok(())
}
