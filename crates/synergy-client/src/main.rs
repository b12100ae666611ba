//! synergyc – Synergy client entry point.
//!
//! Wires together the event queue, the screen driver, the client state
//! machine, and the supervisor, then runs the dispatch loop on the main
//! thread.  Socket I/O runs on a tokio runtime whose tasks communicate with
//! the loop exclusively through the event queue.

use std::process::exit;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use synergy_core::{Dispatcher, EventQueue};
use synergy_client::cli::{Cli, EXIT_ARGS, VERSION};
use synergy_client::config;
use synergy_client::screen::mock::{MockScreen, MockScreenHandle};
use synergy_client::screen::ScreenError;
use synergy_client::supervisor::{Supervisor, EXIT_SCREEN_OPEN_FAILURE};
use synergy_client::Client;

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => 0,
                _ => EXIT_ARGS,
            };
            let _ = e.print();
            exit(code);
        }
    };

    let config_path = cli.config.clone();
    let app_config = match config::load_config(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("synergyc: {e}");
            exit(EXIT_ARGS);
        }
    };

    let settings = match cli.into_settings(&app_config) {
        Ok(settings) => settings,
        Err(e) => {
            // A bad port never gets better; fail now regardless of --restart.
            eprintln!("synergyc: {e}");
            exit(1);
        }
    };

    init_logging(&settings);
    info!("synergyc {VERSION}");
    if settings.daemon {
        info!("daemon mode requested; detaching is left to the service manager");
    }
    if let Some(display_name) = &settings.display {
        debug!("using display {display_name}");
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("cannot start I/O runtime: {e}");
            exit(1);
        }
    };

    let queue = EventQueue::new();
    let dispatcher = Dispatcher::new(queue.clone());
    let registry = dispatcher.handlers();

    let (screen, _screen_handle) = match open_screen() {
        Ok(screen) => screen,
        Err(e) => {
            error!("cannot open screen: {e}");
            let code = match e {
                ScreenError::OpenFailure(_) => EXIT_SCREEN_OPEN_FAILURE,
                _ => 1,
            };
            exit(code);
        }
    };

    let client = Client::new(
        settings.client.clone(),
        Box::new(screen),
        &queue,
        &registry,
        rt.handle().clone(),
    );
    let supervisor = Supervisor::new(
        client,
        settings.restart,
        &queue,
        &registry,
        Some(Box::new(|status, detail| {
            debug!("status: {status:?} {detail}");
        })),
    );

    // Ctrl-C ends the dispatch loop via the quit event.
    let quit_queue = queue.clone();
    rt.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; shutting down");
            quit_queue.post_quit();
        }
    });

    info!(
        "{}: connecting to {}:{}",
        settings.client.name, settings.client.host, settings.client.port
    );
    supervisor.start();
    dispatcher.run();
    supervisor.stop();

    info!("stopped client");
    exit(supervisor.exit_code());
}

/// Opens the screen driver.
///
/// This build uses the recording mock so the client runs headless anywhere;
/// a production build selects the platform driver (SendInput, XTest,
/// CoreGraphics) here instead.
fn open_screen() -> Result<(MockScreen, MockScreenHandle), ScreenError> {
    Ok(MockScreen::single_1080p())
}

fn init_logging(settings: &synergy_client::cli::Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_directive.clone()));
    match &settings.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .unwrap_or_else(|e| {
                    eprintln!("synergyc: cannot open log file {}: {e}", path.display());
                    exit(EXIT_ARGS);
                });
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}
