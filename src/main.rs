//! Speedtest exporter binary
//!
//! Serves Prometheus metrics over HTTP while a background task runs the
//! speedtest CLI on a fixed interval. Ctrl-C stops the schedule, lets any
//! running measurement and in-flight scrape finish, then exits.

use clap::Parser;
use speedtest_exporter::{
    cli::{Cli, Command, generate_config_template},
    error::AppError,
    handlers::{self, AppState},
    metrics::Metrics,
    runner::SpeedtestRunner,
    scheduler::Scheduler,
    telemetry,
};
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Command::Config { output }) = &cli.command {
        let template = generate_config_template();
        match output {
            Some(path) => {
                std::fs::write(path, template)?;
                eprintln!("Configuration template written to {}", path.display());
            }
            None => print!("{}", template),
        }
        return Ok(());
    }

    let config = cli.into_config()?;
    telemetry::init(&config.observability.log_level);

    let metrics = Arc::new(Metrics::new()?);
    let runner = Arc::new(SpeedtestRunner::from_config(
        &config.measurement,
        Arc::clone(&metrics),
    ));
    let scheduler = Scheduler::new(runner, config.measurement.interval());
    let state = AppState::new(Arc::clone(&metrics), scheduler.subscribe());

    // Bind before measuring so a taken port fails fast
    let addr = config.listen_addr()?;
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(source) => {
            let err = AppError::Bind { addr, source };
            tracing::error!(error = %err, "Cannot start Prometheus HTTP server");
            return Err(err.into());
        }
    };
    tracing::info!("Starting Prometheus metrics server on {}", addr);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let measurements = scheduler.spawn(shutdown_rx.clone());

    let mut server_shutdown = shutdown_rx;
    let server = tokio::spawn(async move {
        axum::serve(listener, handlers::router(state))
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received, shutting down");
    let _ = shutdown_tx.send(true);

    measurements.await?;
    server.await??;

    tracing::info!("Good bye");
    Ok(())
}
