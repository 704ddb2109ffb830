mod config;
mod report;

use std::{sync::Arc, time::Duration};

use anyhow::{bail, Result};
use clap::Parser;
use scan_session::{
    CategorySelection, HttpScanEngine, ScanEngine, ScanOptions, SessionController, SessionEvent,
    SessionStatus,
};
use shared::domain::ScanMode;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "tidy",
    about = "Scan directories through a cleanup engine and delete selected categories"
)]
struct Args {
    /// Engine base URL; overrides disktidy.toml and APP__ENGINE_URL.
    #[arg(long)]
    engine_url: Option<String>,
    #[arg(long, default_value = "quick")]
    mode: ScanMode,
    #[arg(long)]
    include_hidden: bool,
    #[arg(long)]
    include_system: bool,
    #[arg(long = "exclude", value_name = "PATH")]
    exclude: Vec<String>,
    #[arg(long)]
    page_size: Option<u64>,
    /// Load every page of each category before selecting.
    #[arg(long)]
    load_all: bool,
    #[arg(long = "select", value_name = "CATEGORY")]
    select: Vec<String>,
    #[arg(long, requires = "select")]
    delete: bool,
    /// Delete permanently instead of moving files to the trash.
    #[arg(long)]
    permanent: bool,
    /// Poll interval used when the engine event stream is unavailable.
    #[arg(long, default_value_t = 1000)]
    poll_ms: u64,
    #[arg(required = true)]
    paths: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = config::load_settings();
    if let Some(engine_url) = &args.engine_url {
        settings.engine_url = config::normalize_engine_url(engine_url);
    }
    if let Some(page_size) = args.page_size {
        settings.page_size = page_size;
    }
    if args.permanent {
        settings.move_to_trash = false;
    }
    info!(engine_url = %settings.engine_url, "tidy: using engine");

    let transport = Arc::new(HttpScanEngine::with_event_buffer(
        &settings.engine_url,
        settings.event_buffer,
    )?);
    let pushed = match transport.connect_events().await {
        Ok(()) => true,
        Err(err) => {
            warn!("tidy: event stream unavailable, polling instead: {err:#}");
            false
        }
    };
    let engine: Arc<dyn ScanEngine> = transport;
    let controller = SessionController::with_options(engine, settings.controller_options());
    let mut events = controller.events();
    if pushed {
        controller.subscribe().await;
    }

    let session_id = controller
        .start_scan(
            args.mode,
            args.paths.clone(),
            ScanOptions {
                include_hidden: args.include_hidden,
                include_system: args.include_system,
                exclude_paths: args.exclude.clone(),
            },
        )
        .await?;
    println!("Scanning {} as {session_id}", args.paths.join(", "));

    let poll = Duration::from_millis(args.poll_ms.max(50));
    match wait_for_scan(&controller, &mut events, pushed, poll).await? {
        SessionStatus::Completed => {}
        SessionStatus::Cancelled => {
            println!("Scan cancelled");
            controller.reset().await?;
            return Ok(());
        }
        status => {
            let last_error = controller.snapshot().await.last_error;
            bail!(
                "scan ended as {}: {}",
                status.as_str(),
                last_error.unwrap_or_else(|| "no error reported".to_string())
            );
        }
    }

    if args.load_all {
        load_all_pages(&controller).await;
    }
    let snapshot = controller.snapshot().await;
    if let Some(result) = snapshot.result.as_ref() {
        report::print_result(result);
    }

    if !args.select.is_empty() {
        for key in &args.select {
            controller.toggle_category(key).await;
            if controller.category_selection(key).await == CategorySelection::None {
                warn!(category = %key, "tidy: nothing selected in category");
            }
        }
        report::print_selection(&controller.snapshot().await);
    }

    if args.delete {
        let clean = controller.delete_selected().await?;
        report::print_clean_result(&clean);
        if let Some(result) = controller.snapshot().await.result.as_ref() {
            report::print_result(result);
        }
    }

    controller.reset().await?;
    Ok(())
}

async fn wait_for_scan(
    controller: &SessionController,
    events: &mut broadcast::Receiver<SessionEvent>,
    pushed: bool,
    poll: Duration,
) -> Result<SessionStatus> {
    let mut ticker = tokio::time::interval(poll);
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::Progress(progress)) => {
                    println!("{}", report::progress_line(&progress));
                }
                Ok(SessionEvent::StatusChanged(status)) if status.is_terminal() => {
                    return Ok(status);
                }
                Ok(SessionEvent::Error(message)) => warn!("tidy: {message}"),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "tidy: session events lagged");
                }
                Err(broadcast::error::RecvError::Closed) => bail!("session event channel closed"),
            },
            _ = ticker.tick(), if !pushed => {
                if let Err(err) = controller.refresh_progress().await {
                    warn!("tidy: progress poll failed: {err}");
                }
                if let Err(err) = controller.sync_result().await {
                    warn!("tidy: result poll failed: {err}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                controller.cancel().await?;
                return Ok(SessionStatus::Cancelled);
            }
        }
    }
}

async fn load_all_pages(controller: &SessionController) {
    let Some(result) = controller.snapshot().await.result else {
        return;
    };
    for category in result.categories.iter().filter(|category| category.has_more) {
        while let Some(page) = controller.load_next_page(&category.key).await {
            if page.files.is_empty() {
                break;
            }
        }
    }
}
