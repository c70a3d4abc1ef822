use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use epaperd::Config;
use epaperd::Engine;
use epaperd::format_diagnostics;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;

/// Serve OpenEPaperLink tag images as engine entities.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Config files, merged in order. Imports inside them are followed.
    #[arg(default_value = "epaperd.toml")]
    config: Vec<PathBuf>,
}

fn init_logging(config: &Config) {
    let mut targets = Targets::new().with_default(LevelFilter::from(config.logging.level));
    for (target, level) in &config.logging.overrides {
        targets = targets.with_target(target.clone(), LevelFilter::from(*level));
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(targets)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let (config, diagnostics) = match Config::from_files(&args.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if !diagnostics.is_empty() {
        eprint!("{}", format_diagnostics(&diagnostics));
    }

    tracing::info!("epaperd starting");
    tracing::info!("Loaded config from: {:?}", args.config);

    let engine = Arc::new(Engine::new());
    engine.register_integrations_from_config(&config).await;

    let (api_shutdown_tx, api_shutdown_rx) = tokio::sync::oneshot::channel();
    let api_engine = engine.clone();
    let listen = config.api.listen.clone();
    let port = config.api.port;
    let api_task = tokio::spawn(async move {
        if let Err(e) = epaperd::api::serve(listen, port, api_shutdown_rx, api_engine).await {
            tracing::error!("HTTP API server failed: {}", e);
        }
    });

    tracing::info!("Press Ctrl+C to exit");

    tokio::select! {
        _ = engine.run() => {}
        res = tokio::signal::ctrl_c() => match res {
            Ok(()) => tracing::info!("Received shutdown signal"),
            Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
        },
    }

    api_shutdown_tx.send(()).ok();
    engine.shutdown().await;
    engine.process_pending().await;

    if let Err(e) = api_task.await {
        tracing::error!("HTTP API task panicked: {}", e);
    }

    tracing::info!("epaperd shutdown complete");

    Ok(())
}
