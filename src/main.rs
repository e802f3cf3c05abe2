//! vcom-echo: a virtual COM port with an echo responder
//!
//! Allocates a pseudo-terminal pair, announces the slave device as a
//! virtual serial port, and echoes back whatever a connected client writes.
//!
//! Features:
//! - Raw echo or echo behind a fixed tag (e.g. `Echo: `)
//! - Configurable response delay
//! - Hex dump or text rendering of received bytes
//! - Optional stable symlink to the slave device
//! - Configuration via CLI arguments or TOML file

mod config;
mod pty;
mod responder;
mod shutdown;

use config::Config;
use pty::{PortOptions, PtyEndpoint};
use responder::{Outcome, Settings};
use shutdown::{Interrupts, Shutdown};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// How long the responder gets to stop after an interrupt.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn main() -> ExitCode {
    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(
        delay_ms = config.delay.as_millis() as u64,
        mode = ?config.mode,
        log_format = ?config.log_format,
        buffer_size = config.buffer_size,
        raw = config.raw,
        "Starting vcom-echo"
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("vcom-echo")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(serve(config)) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Fatal error");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Allocate the port, run the responder, and wait for an interrupt or for
/// the responder to stop on its own.
async fn serve(config: Config) -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Listen before announcing the port so an early Ctrl-C is handled.
    let mut interrupts = Interrupts::install()?;

    let endpoint = PtyEndpoint::open(&PortOptions::from(&config))?;
    println!("Virtual COM Port: {}", endpoint.path().display());
    if let Some(link) = endpoint.link() {
        info!(link = %link.display(), "Slave device also reachable through link");
    }

    let master = endpoint.master()?;
    let settings = Settings::from(&config);
    let shutdown = Shutdown::new();

    let mut worker = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { responder::run(master, &settings, shutdown).await }
    });

    let code = tokio::select! {
        _ = interrupts.recv() => {
            shutdown.trigger();
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut worker).await {
                Ok(Ok(Ok(outcome))) => info!(outcome = ?outcome, "Responder stopped"),
                Ok(Ok(Err(e))) => warn!(error = %e, "Responder failed during shutdown"),
                Ok(Err(e)) => warn!(error = %e, "Responder task aborted"),
                Err(_) => {
                    warn!(
                        grace_ms = SHUTDOWN_GRACE.as_millis() as u64,
                        "Responder did not stop, aborting"
                    );
                    worker.abort();
                }
            }
            ExitCode::SUCCESS
        }
        joined = &mut worker => match joined {
            Ok(Ok(Outcome::PeerClosed)) => ExitCode::SUCCESS,
            Ok(Ok(Outcome::Cancelled)) => ExitCode::SUCCESS,
            Ok(Err(e)) => {
                error!(error = %e, "Responder stopped on endpoint error");
                ExitCode::FAILURE
            }
            Err(e) => {
                error!(error = %e, "Responder task panicked");
                ExitCode::FAILURE
            }
        },
    };

    println!("Exiting");
    info!(path = %endpoint.path().display(), "Releasing virtual port");
    drop(endpoint);

    Ok(code)
}
