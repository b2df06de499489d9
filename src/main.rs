use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

use frame_display::config::Configuration;
use frame_display::events::ViewerCommand;
use frame_display::tasks::catalog::DirectoryCatalog;
use frame_display::tasks::viewer::{self, transition::TransitionGate};

#[derive(Debug, Parser)]
#[command(name = "frame-display", version, about = "Cross-fading photo frame display")]
struct Args {
    /// Path to YAML config
    #[arg(value_name = "CONFIG")]
    config: PathBuf,
    /// Override the time each slide stays on screen (e.g. "30s")
    #[arg(long = "slide-duration", value_name = "DURATION", value_parser = humantime::parse_duration)]
    slide_duration: Option<Duration>,
    /// Override the cross-fade length (e.g. "1500ms")
    #[arg(long = "fade-duration", value_name = "DURATION", value_parser = humantime::parse_duration)]
    fade_duration: Option<Duration>,
    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let level = match verbose {
        0 => None,
        1 => Some("frame_display=debug"),
        _ => Some("frame_display=trace"),
    };
    if let Some(directive) = level.and_then(|d| d.parse().ok()) {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        config,
        slide_duration,
        fade_duration,
        verbose,
    } = Args::parse();
    init_tracing(verbose);

    let mut cfg = Configuration::from_yaml_file(&config)
        .with_context(|| format!("failed to load configuration from {}", config.display()))?;
    if let Some(duration) = slide_duration {
        cfg.slideshow.slide_duration = duration;
    }
    if let Some(duration) = fade_duration {
        cfg.slideshow.fade_duration = duration;
    }
    let cfg = cfg.validated().context("invalid configuration values")?;
    tracing::info!(
        "Loaded configuration from {}:\n{:#?}",
        config.display(),
        cfg
    );

    let (control_tx, control_rx) = mpsc::channel::<ViewerCommand>(16);
    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    #[cfg(unix)]
    {
        let cancel = cancel.clone();
        let control = control_tx.clone();
        tokio::spawn(async move {
            let (mut sigusr1, mut sigusr2) = match (
                signal(SignalKind::user_defined1()),
                signal(SignalKind::user_defined2()),
            ) {
                (Ok(a), Ok(b)) => (a, b),
                (Err(err), _) | (_, Err(err)) => {
                    tracing::warn!("failed to register SIGUSR handlers: {err}");
                    return;
                }
            };
            loop {
                let command = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = sigusr1.recv() => match received {
                        Some(()) => {
                            tracing::info!("SIGUSR1 received; toggling pause");
                            ViewerCommand::TogglePause
                        }
                        None => break,
                    },
                    received = sigusr2.recv() => match received {
                        Some(()) => {
                            tracing::info!("SIGUSR2 received; skipping to next slide");
                            ViewerCommand::Next
                        }
                        None => break,
                    },
                };
                if let Err(err) = control.send(command).await {
                    tracing::warn!("failed to forward viewer command: {err}");
                    break;
                }
            }
        });
    }
    drop(control_tx);

    let gate = TransitionGate::default();
    let catalog = DirectoryCatalog::open(
        cfg.photo_library_path.clone(),
        cfg.catalog.clone(),
        cfg.slideshow.pair_portraits,
        gate.clone(),
    )
    .context("failed to open photo library")?;
    if catalog.is_empty() {
        tracing::warn!(
            "no pictures found under {}; waiting for the next rescan",
            cfg.photo_library_path.display()
        );
    }

    // The viewer owns the main thread until the window closes or cancellation occurs.
    if let Err(e) = viewer::run_windowed(catalog, gate, cancel.clone(), cfg, control_rx)
        .context("viewer failed")
    {
        tracing::error!("{e:?}");
    }
    cancel.cancel();
    Ok(())
}
