use anyhow::{Context, Result};
use mixer_rs::{default_backend, CancelToken, MixerApp, MixerConfig, MixerSnapshot, SystemProcessTable};
use std::path::PathBuf;
use std::rc::Rc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,mixer_rs=debug";

fn init_tracing(level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or(DEFAULT_FILTER)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn log_snapshot(snapshot: &MixerSnapshot) {
    info!(
        endpoint = snapshot.endpoint.as_deref().unwrap_or("<none>"),
        channels = snapshot.channels.len(),
        "Mixer state"
    );
    if snapshot.empty {
        info!("No audio sessions found. Play audio in an application to see it here.");
    }
    for channel in &snapshot.channels {
        info!(
            "  {:<40} {:>3}%{}",
            channel.name,
            (channel.volume * 100.0).round() as u32,
            if channel.muted { " (muted)" } else { "" }
        );
    }
}

fn main() -> Result<()> {
    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => MixerConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => MixerConfig::default(),
    };
    init_tracing(config.log_level.as_deref());

    info!(version = env!("CARGO_PKG_VERSION"), "Audio mixer starting");

    let backend = default_backend().context("Failed to initialize audio backend")?;

    // Set up Ctrl+C handler
    let token = CancelToken::new();
    let handler = token.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived Ctrl+C, stopping...");
        handler.cancel();
    })
    .context("Failed to set Ctrl+C handler")?;

    let mut app = MixerApp::new(backend, Rc::new(SystemProcessTable::new()), config)
        .context("Invalid mixer configuration")?;
    app.run_until_cancelled(&token, log_snapshot);

    Ok(())
}
